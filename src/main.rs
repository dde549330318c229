use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossbeam_channel::Receiver;
use indicatif::{ProgressBar, ProgressStyle};
use sampledeck::convert::{ConvertOptions, TargetFormat, WavBitDepth, WavSampleRate};
use sampledeck::db::models::{Sample, SampleId};
use sampledeck::db::{BackendKind, Store};
use sampledeck::library::{RenameOutcome, SortKey, SortOrder};
use sampledeck::pipeline::{Engine, LibraryEvent};
use sampledeck::waveform::WaveformSize;
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "sampledeck", version, about = "Audio sample library manager")]
struct Cli {
    /// Path to the library file
    #[arg(long, global = true)]
    library: Option<PathBuf>,

    /// Storage backend for the library file
    #[arg(long, value_enum, global = true)]
    backend: Option<BackendKind>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a directory and add its audio files to the library
    Import {
        dir: PathBuf,

        /// Comma-separated tags applied to every imported sample
        #[arg(short, long, default_value = "")]
        tags: String,

        /// Import, report, then roll the import back
        #[arg(long)]
        dry_run: bool,
    },

    /// Re-read metadata for samples that are missing some
    Refresh,

    /// List samples
    List {
        /// Case-insensitive substring filter
        #[arg(short, long)]
        filter: Option<String>,

        /// Sort key (reorders the stored library)
        #[arg(short, long, value_enum)]
        sort: Option<SortKey>,

        /// Sort descending
        #[arg(long)]
        desc: bool,
    },

    /// Add comma-separated tags to samples
    Tag {
        text: String,
        /// Sample ids or unique id prefixes
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Remove comma-separated tags from samples (case-insensitive)
    Untag {
        text: String,
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Rename a sample's file in place
    Rename { id: String, name: String },

    /// Remove samples from the library
    Remove {
        #[arg(required = true)]
        ids: Vec<String>,

        /// Also delete the files from disk
        #[arg(long)]
        delete: bool,
    },

    /// Render a sample's waveform preview to a PNG file
    Waveform {
        id: String,

        /// Output file (defaults to <name>.png in the current directory)
        #[arg(short, long)]
        out: Option<PathBuf>,

        #[arg(long)]
        width: Option<u32>,

        #[arg(long)]
        height: Option<u32>,
    },

    /// Convert samples to another format
    Convert {
        #[arg(required = true)]
        ids: Vec<String>,

        #[arg(long, value_enum, default_value = "wav")]
        to: TargetFormat,

        /// Destination directory
        #[arg(short, long)]
        out: PathBuf,

        /// WAV bit depth: 16, 24 or 32
        #[arg(long, default_value = "16")]
        bit_depth: u16,

        /// WAV sample rate: 44100 or 48000
        #[arg(long, default_value = "44100")]
        sample_rate: u32,
    },

    /// Show library statistics
    Stats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let mut config = sampledeck::config::AppConfig::load();
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }
    if cli.library.is_some() {
        config.library_path = cli.library;
    }

    // Resolve library path: CLI > config > XDG default
    let library_path = config.resolve_library_path();
    let store = Store::open(config.backend, &library_path).context("Failed to open library")?;
    if let Some(location) = store.location() {
        log::info!("Library: {} ({:?})", location.display(), store.kind());
    }
    let mut engine =
        Engine::new(store, config.engine_options()).context("Failed to start engine")?;

    match cli.command {
        Commands::Import { dir, tags, dry_run } => {
            let events = engine.subscribe();
            engine
                .start_import(&dir, &tags)
                .context("Import failed to start")?;
            run_with_progress(&mut engine, &events);
            println!("{}", engine.state().status);

            if dry_run {
                let rolled_back = engine.remove_last_import();
                println!("(dry run: rolled back {} samples)", rolled_back.len());
            }
        }

        Commands::Refresh => {
            let events = engine.subscribe();
            engine.start_refresh().context("Refresh failed to start")?;
            run_with_progress(&mut engine, &events);
            println!("{}", engine.state().status);
        }

        Commands::List { filter, sort, desc } => {
            if let Some(key) = sort {
                let order = if desc { SortOrder::Descending } else { SortOrder::Ascending };
                engine.sort(key, order);
            }
            let results = engine.filter(filter.as_deref().unwrap_or(""));
            if results.is_empty() {
                println!("No samples found.");
                return Ok(());
            }
            print_sample_table(&results);
        }

        Commands::Tag { text, ids } => {
            let ids = resolve_ids(&engine, &ids)?;
            let changed = engine.add_tags(&text, &ids);
            println!("Tagged {} samples", changed);
        }

        Commands::Untag { text, ids } => {
            let ids = resolve_ids(&engine, &ids)?;
            let changed = engine.remove_tags(&text, &ids);
            println!("Untagged {} samples", changed);
        }

        Commands::Rename { id, name } => {
            let id = resolve_id(&engine, &id)?;
            match engine.rename(id, &name) {
                RenameOutcome::Renamed { old_path } => {
                    let new_path = engine.library().get(id).map(|s| s.path.clone()).unwrap_or_default();
                    println!("Renamed {} -> {}", old_path.display(), new_path.display());
                }
                RenameOutcome::Unchanged => println!("Name unchanged."),
                RenameOutcome::Failed => anyhow::bail!("Rename failed (see log with -v)"),
            }
        }

        Commands::Remove { ids, delete } => {
            let ids = resolve_ids(&engine, &ids)?;
            let removed = engine.remove(&ids, delete);
            let verb = if delete { "Deleted" } else { "Removed" };
            println!("{} {} samples", verb, removed.len());
        }

        Commands::Waveform { id, out, width, height } => {
            let id = resolve_id(&engine, &id)?;
            let default = config.waveform.size();
            let size = WaveformSize::new(width.unwrap_or(default.width), height.unwrap_or(default.height));
            let image = wait_for_waveform(&engine, id, size)
                .context("No waveform could be rendered for this sample")?;
            let out = match out {
                Some(path) => path,
                None => {
                    let sample = engine.library().get(id).context("Unknown sample")?;
                    let stem = sample.path.file_stem().unwrap_or_default();
                    PathBuf::from(stem).with_extension("png")
                }
            };
            std::fs::write(&out, &image.png)
                .with_context(|| format!("Failed to write {}", out.display()))?;
            println!("Wrote {}x{} waveform to {}", image.width, image.height, out.display());
        }

        Commands::Convert { ids, to, out, bit_depth, sample_rate } => {
            let ids = resolve_ids(&engine, &ids)?;
            let options = match to {
                TargetFormat::Mp3 => ConvertOptions::mp3(),
                TargetFormat::Wav => {
                    let depth = WavBitDepth::from_bits(bit_depth)
                        .with_context(|| format!("Unsupported bit depth {bit_depth} (16, 24, 32)"))?;
                    let rate = WavSampleRate::from_hz(sample_rate).with_context(|| {
                        format!("Unsupported sample rate {sample_rate} (44100, 48000)")
                    })?;
                    ConvertOptions::wav(depth, rate)
                }
            };
            let events = engine.subscribe();
            engine.start_conversion(&ids, &out, options);
            run_with_progress(&mut engine, &events);
            println!("{}", engine.state().status);
        }

        Commands::Stats => {
            let stats = engine.library().stats();
            println!("Library statistics:");
            println!("  Samples:            {}", stats.total_samples);
            println!("  Total duration:     {:.1} min", stats.total_duration_secs / 60.0);
            println!("  Total size:         {:.1} MB", stats.total_bytes as f64 / 1_048_576.0);
            println!("  Missing metadata:   {}", stats.incomplete_metadata);
            if !stats.formats.is_empty() {
                println!();
                println!("  {:<8} {:>6}", "Format", "Count");
                for (format, count) in &stats.formats {
                    println!("  {:<8} {:>6}", format, count);
                }
            }
        }
    }

    Ok(())
}

/// Drive the engine until its background work finishes, mirroring progress
/// events onto a terminal bar.
fn run_with_progress(engine: &mut Engine, events: &Receiver<LibraryEvent>) {
    let pb = ProgressBar::new(1000);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {percent}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    loop {
        for event in events.try_iter() {
            if let LibraryEvent::Progress { fraction, status } = event {
                pb.set_position((fraction * 1000.0).round() as u64);
                pb.set_message(status);
            }
        }
        if !engine.step() {
            break;
        }
    }
    engine.process_pending();
    pb.finish_and_clear();
}

/// Request a render, then wait for it to land or for the renderer to give up.
fn wait_for_waveform(
    engine: &Engine,
    id: SampleId,
    size: WaveformSize,
) -> Option<std::sync::Arc<sampledeck::waveform::WaveformImage>> {
    if let Some(image) = engine.waveform(id, size) {
        return Some(image);
    }
    let sample = engine.library().get(id)?;
    let cache = engine.waveform_cache();
    let deadline = Instant::now() + Duration::from_secs(120);
    while Instant::now() < deadline {
        if !cache.is_pending(id) {
            return cache.get(sample, size);
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    None
}

fn resolve_id(engine: &Engine, text: &str) -> Result<SampleId> {
    engine
        .library()
        .find_by_prefix(text)
        .with_context(|| format!("No unique sample matching id \"{text}\""))
}

fn resolve_ids(engine: &Engine, texts: &[String]) -> Result<Vec<SampleId>> {
    texts.iter().map(|t| resolve_id(engine, t)).collect()
}

fn print_sample_table(samples: &[&Sample]) {
    println!(
        "{:<8}  {:<32} {:>6} {:>6} {:>4} {:>8}  {}",
        "Id", "Name", "Format", "Rate", "Bits", "Length", "Tags"
    );
    println!("{}", "-".repeat(90));
    for s in samples {
        let id = s.id.to_string();
        println!(
            "{:<8}  {:<32} {:>6} {:>6} {:>4} {:>8}  {}",
            &id[..8],
            truncate(&s.display_name(), 32),
            s.format.as_deref().unwrap_or("-"),
            s.sample_rate.map(|r| format!("{}", r as i64)).unwrap_or_else(|| "-".into()),
            s.bit_depth.map(|b| b.to_string()).unwrap_or_else(|| "-".into()),
            s.duration_seconds.map(|d| format!("{d:.2}s")).unwrap_or_else(|| "-".into()),
            s.tags.join(", "),
        );
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let cut: String = s.chars().take(max - 1).collect();
        format!("{cut}…")
    } else {
        s.to_string()
    }
}
