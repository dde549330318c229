use super::models::{Sample, SampleId};
use super::{Database, DbError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::params;
use std::path::PathBuf;

/// Raw column values for one `samples` row.
struct SampleRow {
    id: String,
    path: String,
    tags: String,
    created_at: String,
    duration_seconds: Option<f64>,
    sample_rate: Option<f64>,
    bit_depth: Option<i64>,
    format: Option<String>,
    file_created: Option<String>,
    file_size_bytes: Option<i64>,
}

impl Database {
    /// Replace the whole table with `samples`, preserving their order.
    pub fn replace_samples(&self, samples: &[Sample]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM samples", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO samples (
                    id, position, path, tags, created_at,
                    duration_seconds, sample_rate, bit_depth, format,
                    file_created, file_size_bytes
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;
            for (position, s) in samples.iter().enumerate() {
                stmt.execute(params![
                    s.id.to_string(),
                    position as i64,
                    s.path.to_string_lossy(),
                    s.tags.join(","),
                    format_timestamp(&s.created_at),
                    s.duration_seconds,
                    s.sample_rate,
                    s.bit_depth.map(i64::from),
                    s.format,
                    s.file_created.as_ref().map(format_timestamp),
                    s.file_size_bytes.map(|b| b as i64),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// All samples in stored order.
    pub fn load_samples(&self) -> Result<Vec<Sample>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, path, tags, created_at,
                    duration_seconds, sample_rate, bit_depth, format,
                    file_created, file_size_bytes
             FROM samples ORDER BY position",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok(SampleRow {
                    id: row.get(0)?,
                    path: row.get(1)?,
                    tags: row.get(2)?,
                    created_at: row.get(3)?,
                    duration_seconds: row.get(4)?,
                    sample_rate: row.get(5)?,
                    bit_depth: row.get(6)?,
                    format: row.get(7)?,
                    file_created: row.get(8)?,
                    file_size_bytes: row.get(9)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter().map(sample_from_row).collect()
    }
}

fn sample_from_row(row: SampleRow) -> Result<Sample> {
    let corrupt = |message: String| DbError::CorruptRow {
        id: row.id.clone(),
        message,
    };

    let id: SampleId = row
        .id
        .parse()
        .map_err(|e| corrupt(format!("bad id: {e}")))?;
    let created_at = parse_timestamp(&row.created_at)
        .ok_or_else(|| corrupt(format!("bad created_at: {}", row.created_at)))?;
    // Unparseable optional timestamps degrade to absent rather than failing the row
    let file_created = row.file_created.as_deref().and_then(parse_timestamp);

    let tags = if row.tags.trim().is_empty() {
        Vec::new()
    } else {
        row.tags
            .split(',')
            .filter(|t| !t.trim().is_empty())
            .map(str::to_string)
            .collect()
    };

    Ok(Sample {
        id,
        path: PathBuf::from(&row.path),
        tags,
        created_at,
        duration_seconds: row.duration_seconds,
        sample_rate: row.sample_rate,
        bit_depth: row.bit_depth.and_then(|b| u32::try_from(b).ok()),
        format: row.format,
        file_created,
        file_size_bytes: row.file_size_bytes.and_then(|b| u64::try_from(b).ok()),
    })
}

/// RFC 3339 with full sub-second precision, matching serde's chrono encoding.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{bare_sample, full_sample};
    use crate::db::SampleStore;

    fn dump(db: &Database) -> Vec<Vec<Option<String>>> {
        let mut stmt = db
            .conn
            .prepare("SELECT * FROM samples ORDER BY position")
            .unwrap();
        let cols = stmt.column_count();
        stmt.query_map([], |row| {
            (0..cols)
                .map(|i| {
                    let v: rusqlite::types::Value = row.get(i)?;
                    Ok(match v {
                        rusqlite::types::Value::Null => None,
                        other => Some(format!("{other:?}")),
                    })
                })
                .collect()
        })
        .unwrap()
        .collect::<std::result::Result<Vec<_>, _>>()
        .unwrap()
    }

    #[test]
    fn test_replace_and_load_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let samples = vec![full_sample(), bare_sample()];
        db.replace_samples(&samples).unwrap();
        assert_eq!(db.load_samples().unwrap(), samples);
    }

    #[test]
    fn test_save_is_full_replace() {
        let db = Database::open_in_memory().unwrap();
        db.save(&[full_sample(), bare_sample()]).unwrap();
        let only = bare_sample();
        db.save(std::slice::from_ref(&only)).unwrap();
        assert_eq!(db.load(), vec![only]);
    }

    #[test]
    fn test_save_load_twice_is_stable() {
        let db = Database::open_in_memory().unwrap();
        db.save(&[full_sample(), bare_sample()]).unwrap();
        let first = dump(&db);

        db.save(&db.load()).unwrap();
        db.save(&db.load()).unwrap();
        assert_eq!(dump(&db), first);
    }

    #[test]
    fn test_nulls_and_blank_tags_load_as_absent() {
        let db = Database::open_in_memory().unwrap();
        let id = SampleId::new();
        db.conn
            .execute(
                "INSERT INTO samples (id, position, path, tags, created_at)
                 VALUES (?1, 0, '/x/a.wav', '   ', '2024-01-01T00:00:00Z')",
                params![id.to_string()],
            )
            .unwrap();

        let loaded = db.load_samples().unwrap();
        assert_eq!(loaded.len(), 1);
        let s = &loaded[0];
        assert_eq!(s.id, id);
        assert!(s.tags.is_empty());
        assert!(s.duration_seconds.is_none());
        assert!(s.sample_rate.is_none());
        assert!(s.bit_depth.is_none());
        assert!(s.format.is_none());
        assert!(s.file_created.is_none());
        assert!(s.file_size_bytes.is_none());
    }

    #[test]
    fn test_corrupt_row_loads_as_empty_library() {
        let db = Database::open_in_memory().unwrap();
        db.conn
            .execute(
                "INSERT INTO samples (id, position, path, tags, created_at)
                 VALUES ('garbage', 0, '/x/a.wav', '', 'yesterday')",
                [],
            )
            .unwrap();
        assert!(db.load_samples().is_err());
        assert!(db.load().is_empty());
    }
}
