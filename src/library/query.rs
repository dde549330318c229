use crate::db::models::Sample;
use std::borrow::Borrow;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SortKey {
    Name,
    Size,
    DateCreated,
    SampleRate,
    BitDepth,
    Format,
    Length,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// Case-insensitive substring match against the searchable fields.
///
/// An empty (or all-whitespace) query matches everything.
pub fn matches(sample: &Sample, query: &str) -> bool {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return true;
    }

    if sample.display_name().to_lowercase().contains(&needle) {
        return true;
    }
    if sample.tags.iter().any(|t| t.to_lowercase().contains(&needle)) {
        return true;
    }
    if let Some(format) = &sample.format {
        if format.to_lowercase().contains(&needle) {
            return true;
        }
    }
    if let Some(rate) = sample.sample_rate {
        if (rate as i64).to_string().contains(&needle) {
            return true;
        }
    }
    if let Some(bits) = sample.bit_depth {
        if bits.to_string().contains(&needle) {
            return true;
        }
    }
    if let Some(secs) = sample.duration_seconds {
        if format!("{secs:.2}").contains(&needle) {
            return true;
        }
    }
    false
}

/// Keep the samples matching `query`, in their current order.
pub fn filter<'a>(samples: &'a [Sample], query: &str) -> Vec<&'a Sample> {
    samples.iter().filter(|s| matches(s, query)).collect()
}

/// Ascending comparison for `key`. Absent values order before present ones.
pub fn compare(a: &Sample, b: &Sample, key: SortKey) -> Ordering {
    match key {
        SortKey::Name => compare_text(&a.display_name(), &b.display_name()),
        SortKey::Size => a.file_size_bytes.cmp(&b.file_size_bytes),
        SortKey::DateCreated => a.file_created.cmp(&b.file_created),
        SortKey::SampleRate => compare_float(a.sample_rate, b.sample_rate),
        SortKey::BitDepth => a.bit_depth.cmp(&b.bit_depth),
        SortKey::Format => match (&a.format, &b.format) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(x), Some(y)) => compare_text(x, y),
        },
        SortKey::Length => compare_float(a.duration_seconds, b.duration_seconds),
    }
}

/// Stable sort. Descending is the exact reversal of the ascending comparison,
/// so absent values end up last when descending.
pub fn sort<S: Borrow<Sample>>(items: &mut [S], key: SortKey, order: SortOrder) {
    items.sort_by(|a, b| {
        let ord = compare(a.borrow(), b.borrow(), key);
        match order {
            SortOrder::Ascending => ord,
            SortOrder::Descending => ord.reverse(),
        }
    });
}

fn compare_text(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase())
}

fn compare_float(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => x.total_cmp(&y),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str, rate: Option<f64>, secs: Option<f64>) -> Sample {
        let mut s = Sample::new(format!("/lib/{name}"), vec![]);
        s.sample_rate = rate;
        s.duration_seconds = secs;
        s.format = name.rsplit('.').next().map(str::to_string);
        s
    }

    fn names(items: &[&Sample]) -> Vec<String> {
        items.iter().map(|s| s.display_name()).collect()
    }

    #[test]
    fn test_filter_fields() {
        let mut kick = sample("Kick_01.wav", Some(48000.0), Some(2.5));
        kick.bit_depth = Some(24);
        kick.tags = vec!["Drums".into()];
        let pad = sample("pad.flac", Some(44100.0), Some(12.0));
        let all = vec![kick, pad];

        assert_eq!(names(&filter(&all, "kick")), vec!["Kick_01.wav"]);
        assert_eq!(names(&filter(&all, "drums")), vec!["Kick_01.wav"]);
        assert_eq!(names(&filter(&all, "FLAC")), vec!["pad.flac"]);
        assert_eq!(names(&filter(&all, "44100")), vec!["pad.flac"]);
        assert_eq!(names(&filter(&all, "24")), vec!["Kick_01.wav"]);
        assert_eq!(names(&filter(&all, "2.50")), vec!["Kick_01.wav"]);
        assert_eq!(names(&filter(&all, "12.00")), vec!["pad.flac"]);
        assert_eq!(filter(&all, "").len(), 2);
        assert_eq!(filter(&all, "   ").len(), 2);
        assert!(filter(&all, "vocal").is_empty());
    }

    #[test]
    fn test_sort_absent_first_ascending_last_descending() {
        let all = vec![
            sample("b.wav", Some(48000.0), None),
            sample("a.wav", None, None),
            sample("c.wav", Some(44100.0), None),
        ];
        let mut view: Vec<&Sample> = all.iter().collect();

        sort(&mut view, SortKey::SampleRate, SortOrder::Ascending);
        assert_eq!(names(&view), vec!["a.wav", "c.wav", "b.wav"]);

        sort(&mut view, SortKey::SampleRate, SortOrder::Descending);
        assert_eq!(names(&view), vec!["b.wav", "c.wav", "a.wav"]);
    }

    #[test]
    fn test_sort_name_case_insensitive() {
        let all = vec![
            sample("snare.wav", None, None),
            sample("Kick.wav", None, None),
            sample("hat.wav", None, None),
        ];
        let mut view: Vec<&Sample> = all.iter().collect();
        sort(&mut view, SortKey::Name, SortOrder::Ascending);
        assert_eq!(names(&view), vec!["hat.wav", "Kick.wav", "snare.wav"]);
    }

    #[test]
    fn test_sort_is_idempotent() {
        let all = vec![
            sample("x.wav", Some(44100.0), Some(1.0)),
            sample("y.wav", Some(44100.0), Some(2.0)),
            sample("z.wav", None, Some(1.0)),
            sample("w.mp3", Some(48000.0), None),
        ];
        for key in [
            SortKey::Name,
            SortKey::Size,
            SortKey::DateCreated,
            SortKey::SampleRate,
            SortKey::BitDepth,
            SortKey::Format,
            SortKey::Length,
        ] {
            for order in [SortOrder::Ascending, SortOrder::Descending] {
                let mut once: Vec<&Sample> = all.iter().collect();
                sort(&mut once, key, order);
                let mut twice = once.clone();
                sort(&mut twice, key, order);
                assert_eq!(names(&once), names(&twice), "{key:?} {order:?}");
            }
        }
    }

    #[test]
    fn test_sort_format_absent_first() {
        let mut none = sample("noext", None, None);
        none.format = None;
        let all = vec![sample("a.wav", None, None), none, sample("b.aiff", None, None)];
        let mut view: Vec<&Sample> = all.iter().collect();
        sort(&mut view, SortKey::Format, SortOrder::Ascending);
        assert_eq!(names(&view), vec!["noext", "b.aiff", "a.wav"]);
    }
}
