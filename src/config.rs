use std::path::PathBuf;

use directories::ProjectDirs;
use serde::Deserialize;

use crate::db::BackendKind;
use crate::pipeline::EngineOptions;
use crate::waveform::WaveformSize;

/// Application configuration loaded from TOML config file.
/// All fields have defaults, so the config file is optional.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Library file (JSON document or SQLite database). Defaults under the data dir.
    pub library_path: Option<PathBuf>,
    pub backend: BackendKind,
    /// Waveform disk tier. Defaults under the cache dir.
    pub cache_dir: Option<PathBuf>,
    /// Number of parallel workers. 0 = auto-detect (cores / 2, min 1).
    pub workers: usize,
    /// Import/refresh progress is reported every this many files.
    pub progress_interval: usize,
    pub waveform: WaveformConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            library_path: None,
            backend: BackendKind::default(),
            cache_dir: None,
            workers: 0,
            progress_interval: 25,
            waveform: WaveformConfig::default(),
        }
    }
}

/// Default preview dimensions.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WaveformConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for WaveformConfig {
    fn default() -> Self {
        Self {
            width: 400,
            height: 80,
        }
    }
}

impl WaveformConfig {
    pub fn size(&self) -> WaveformSize {
        WaveformSize::new(self.width, self.height)
    }
}

impl AppConfig {
    /// Load config from `~/.config/sampledeck/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => Self::parse(&contents).unwrap_or_else(|e| {
                    log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }),
                Err(e) => {
                    log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Resolve worker count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }

    pub fn resolve_library_path(&self) -> PathBuf {
        self.library_path
            .clone()
            .unwrap_or_else(|| default_library_path(self.backend))
    }

    pub fn resolve_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(default_cache_dir)
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            cache_dir: self.resolve_cache_dir(),
            workers: self.resolve_workers(),
            progress_interval: self.progress_interval.max(1),
        }
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Resolve the default library file using the XDG data directory.
pub fn default_library_path(backend: BackendKind) -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).ok();
        data_dir.join(backend.default_file_name())
    } else {
        // Fallback: current directory
        PathBuf::from(backend.default_file_name())
    }
}

/// Resolve the waveform cache directory using the XDG cache directory.
pub fn default_cache_dir() -> PathBuf {
    match ProjectDirs::from("", "", crate::APP_NAME) {
        Some(dirs) => dirs.cache_dir().join("waveforms"),
        None => PathBuf::from(".sampledeck-waveforms"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.backend, BackendKind::Json);
        assert_eq!(config.progress_interval, 25);
        assert_eq!(config.waveform.size(), WaveformSize::new(400, 80));
        assert!(config.library_path.is_none());
    }

    #[test]
    fn test_partial_config() {
        let config = AppConfig::parse(
            r#"
            backend = "sqlite"
            library_path = "/data/samples.db"
            workers = 3

            [waveform]
            height = 120
            "#,
        )
        .unwrap();
        assert_eq!(config.backend, BackendKind::Sqlite);
        assert_eq!(config.resolve_library_path(), PathBuf::from("/data/samples.db"));
        assert_eq!(config.resolve_workers(), 3);
        assert_eq!(config.waveform.width, 400);
        assert_eq!(config.waveform.height, 120);
    }

    #[test]
    fn test_bad_backend_is_error() {
        assert!(AppConfig::parse("backend = \"yaml\"").is_err());
    }

    #[test]
    fn test_auto_workers_at_least_one() {
        let config = AppConfig::default();
        assert!(config.resolve_workers() >= 1);
    }

    #[test]
    fn test_engine_options() {
        let config = AppConfig::parse("cache_dir = \"/tmp/wf\"\nprogress_interval = 0").unwrap();
        let opts = config.engine_options();
        assert_eq!(opts.cache_dir, PathBuf::from("/tmp/wf"));
        assert_eq!(opts.progress_interval, 1);
    }
}
