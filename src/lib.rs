pub mod audio;
pub mod config;
pub mod convert;
pub mod db;
pub mod library;
pub mod pipeline;
pub mod scanner;
pub mod waveform;

/// Audio file extensions we import
pub const SUPPORTED_EXTENSIONS: &[&str] = &["wav", "aif", "aiff", "mp3", "m4a", "flac", "ogg"];

/// Application name for XDG paths
pub const APP_NAME: &str = "sampledeck";
