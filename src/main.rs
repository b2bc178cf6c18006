use clap::{Parser, Subcommand};
use maniagen::export::ChartTemplate;
use maniagen::stages::normalize::StatsSource;
use maniagen::{Config, ManiaPipeline};
use std::path::PathBuf;

/// Rhythm-game chart alignment and decoding engine
#[derive(Parser)]
#[command(name = "maniagen")]
#[command(about = "Build aligned training corpora from mania charts and decode lane predictions")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Custom configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet output
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Align raw charts with their audio and write record files
    Preprocess,
    /// Window record files into train/test sequence chunks
    Sequences {
        /// Normalize feature columns with this stats file
        #[arg(long)]
        stats: Option<PathBuf>,
    },
    /// Compute normalization statistics
    Stats {
        /// Only this bucket's train chunks
        #[arg(long, conflicts_with = "records")]
        bucket: Option<String>,

        /// Use record files instead of chunks
        #[arg(long)]
        records: bool,

        /// Output file (defaults to paths.stats_file)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Extract normalized inference feature windows from audio
    Features {
        /// Input audio file (WAV)
        audio: PathBuf,

        #[arg(long)]
        bpm: f64,

        /// Time of the first beat in milliseconds
        #[arg(long, default_value_t = 0.0)]
        start_ms: f64,

        #[arg(short, long, default_value = "features.npy")]
        output: PathBuf,
    },
    /// Decode model predictions into a .gblf file
    Decode {
        /// Predictions .npy of shape (n, lanes) or (n, L, lanes)
        predictions: PathBuf,

        #[arg(long)]
        bpm: f64,

        #[arg(long, default_value_t = 0.0)]
        start_ms: f64,

        #[arg(short, long, default_value = "generated.gblf")]
        output: PathBuf,

        /// Also render a chart file
        #[arg(long)]
        chart: Option<PathBuf>,

        /// Chart title
        #[arg(long, default_value = "Untitled")]
        title: String,

        /// Chart artist
        #[arg(long, default_value = "Unknown")]
        artist: String,

        /// Audio file name referenced by the chart
        #[arg(long, default_value = "audio.wav")]
        audio_file: String,
    },
    /// Validate configuration file
    ValidateConfig {
        /// Configuration file to validate
        file: PathBuf,
    },
    /// Show default configuration
    ShowConfig,
}

fn init_logging(verbose: bool, quiet: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else if quiet {
        log::LevelFilter::Warn
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .format_timestamp(None)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.verbose && cli.quiet {
        anyhow::bail!("Cannot specify both --verbose and --quiet");
    }
    init_logging(cli.verbose, cli.quiet);

    let load = || -> anyhow::Result<Config> {
        Ok(match &cli.config {
            Some(path) => maniagen::config::load_config(path)?,
            None => Config::default(),
        })
    };

    match &cli.command {
        Commands::Preprocess => {
            let pipeline = ManiaPipeline::new(load()?)?;
            let report = pipeline.preprocess()?;
            println!(
                "Preprocessed {} charts ({} existing, {} filtered, {} failed)",
                report.processed, report.skipped_existing, report.skipped_filtered, report.failed
            );
            println!(
                "Notes: {} parsed, {} matched to subbeats",
                report.input_notes, report.matched_notes
            );
        }
        Commands::Sequences { stats } => {
            let pipeline = ManiaPipeline::new(load()?)?;
            for summary in pipeline.build_sequences(stats.as_deref())? {
                println!(
                    "{}: {} charts, {} train / {} test windows, {} new chunk files",
                    summary.bucket,
                    summary.charts,
                    summary.train_windows,
                    summary.test_windows,
                    summary.files.len()
                );
            }
        }
        Commands::Stats {
            bucket,
            records,
            output,
        } => {
            let mut config = load()?;
            if let Some(output) = output {
                config.paths.stats_file = output.clone();
            }
            let source = match (bucket, *records) {
                (_, true) => StatsSource::Records,
                (Some(bucket), false) => StatsSource::Bucket(bucket.clone()),
                (None, false) => StatsSource::AllBuckets,
            };
            let pipeline = ManiaPipeline::new(config)?;
            let stats = pipeline.compute_stats(&source)?;
            println!("means: {:?}", stats.means);
            println!("stds:  {:?}", stats.stds);
            println!("Saved to {}", pipeline.config().paths.stats_file.display());
        }
        Commands::Features {
            audio,
            bpm,
            start_ms,
            output,
        } => {
            let pipeline = ManiaPipeline::new(load()?)?;
            pipeline.features(audio, *bpm, *start_ms, output)?;
            println!("Feature windows saved to {}", output.display());
        }
        Commands::Decode {
            predictions,
            bpm,
            start_ms,
            output,
            chart,
            title,
            artist,
            audio_file,
        } => {
            let pipeline = ManiaPipeline::new(load()?)?;
            let template = ChartTemplate {
                title: title.clone(),
                artist: artist.clone(),
                audio_file_name: audio_file.clone(),
                ..ChartTemplate::default()
            };
            let chart_output = chart.as_deref().map(|path| (path, &template));
            let summary = pipeline.decode(predictions, *bpm, *start_ms, output, chart_output)?;
            println!("Decoded {} subbeats to {}", summary.subbeats, output.display());
            println!("Lane frequencies: {:?}", summary.lane_frequencies);
            println!(
                "Probabilities: min {:.3}, max {:.3}, mean {:.3}; note density {:.3}",
                summary.min_probability,
                summary.max_probability,
                summary.mean_probability,
                summary.note_density
            );
        }
        Commands::ValidateConfig { file } => {
            let config = maniagen::config::load_config(file)?;
            println!("Configuration is valid");
            if let Ok(json) = serde_json::to_string_pretty(&config) {
                println!("{}", json);
            }
        }
        Commands::ShowConfig => {
            let config = Config::default();
            let json = serde_json::to_string_pretty(&config)?;
            println!("{}", json);
        }
    }

    Ok(())
}
