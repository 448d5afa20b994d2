//! BME Window Agent CLI
//!
//! Windowed feature extraction and streaming classification for BME688 arrays.

use anyhow::{bail, Context, Result};
use bme_window_agent::{
    collector::{
        read_feature_table, read_readings, record_stream, write_feature_table, ChannelSchema,
        CollectorConfig, LineCollector, RecordParser, Recorder,
    },
    config::Config,
    core::{FeatureEngine, FeatureSpec, FeatureTable, ValidityPolicy, WindowedPipeline},
    labels::{ChannelResolver, LabelCatalog, LabelRequest, LabelResolver, LabelStore, PromptResolver},
    stats::StreamStats,
    stream::{
        CentroidClassifier, Classifier, StreamController, StreamError, StreamEvent,
        DEFAULT_POLL_INTERVAL,
    },
    VERSION,
};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use crossbeam_channel::{select, Receiver};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "bme-window")]
#[command(version = VERSION)]
#[command(about = "Windowed feature extraction and streaming classification for BME688 arrays", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Turn a recording into a feature table
    Process {
        /// Recording with a header row
        #[arg(long, short)]
        input: PathBuf,

        /// Output feature table (defaults to the export directory)
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Ask for class names of new labels on the terminal
        #[arg(long)]
        prompt_labels: bool,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Fit the reference classifier
    Train {
        /// Recording, or a feature table with --from-features
        #[arg(long, short)]
        input: PathBuf,

        /// Input is a feature table written by `process`
        #[arg(long)]
        from_features: bool,

        /// Where to write the model (defaults to the configured model path)
        #[arg(long)]
        model: Option<PathBuf>,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Classify a live line stream (stdin unless --input is given)
    Stream {
        /// Replay a file instead of reading stdin; readings left at its end are classified too
        #[arg(long, short)]
        input: Option<PathBuf>,

        /// Seconds of wall-clock time per batch
        #[arg(long)]
        batch_length: Option<f64>,

        /// Model to classify with (defaults to the configured model path)
        #[arg(long)]
        model: Option<PathBuf>,

        /// Echo every received line
        #[arg(long)]
        echo: bool,

        /// Ask for class names of new labels on the terminal (needs --input)
        #[arg(long)]
        prompt_labels: bool,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Log a live line stream to a recording (stdin unless --input is given)
    Record {
        /// Read a file instead of stdin
        #[arg(long, short)]
        input: Option<PathBuf>,

        /// Recording to write (defaults to the data directory)
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Number of sensors on the board
        #[arg(long)]
        sensors: Option<u8>,
    },

    /// List the label catalog
    Labels,

    /// List feature names
    Features {
        /// Include gas index features
        #[arg(long)]
        all: bool,
    },

    /// Show cumulative stream statistics
    Status,

    /// Show configuration
    Config,
}

/// Per-run overrides of the pipeline configuration.
#[derive(Args, Debug, Default)]
struct PipelineArgs {
    /// Window size in seconds
    #[arg(long)]
    window_size: Option<f64>,

    /// Window stride in seconds
    #[arg(long)]
    stride: Option<f64>,

    /// Gap in seconds that splits blocks
    #[arg(long)]
    gap: Option<f64>,

    /// Require this many readings per window instead of time coverage
    #[arg(long, conflicts_with = "coverage")]
    min_rows: Option<usize>,

    /// Fraction of the window the readings must cover
    #[arg(long)]
    coverage: Option<f64>,

    /// Number of sensors on the board
    #[arg(long)]
    sensors: Option<u8>,

    /// Comma-separated feature names
    #[arg(long)]
    features: Option<String>,
}

impl PipelineArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(size) = self.window_size {
            config.window_size_secs = size;
        }
        if let Some(stride) = self.stride {
            config.stride_secs = stride;
        }
        if let Some(secs) = self.gap {
            config.gap_threshold = bme_window_agent::GapThreshold::Fixed { secs };
        }
        if let Some(rows) = self.min_rows {
            config.validity = ValidityPolicy::MinRowCount(rows);
        }
        if let Some(fraction) = self.coverage {
            config.validity = ValidityPolicy::MinCoverageFraction(fraction);
        }
        if let Some(sensors) = self.sensors {
            config.sensor_count = sensors;
        }
        if let Some(ref names) = self.features {
            config.feature_names = Some(
                names
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            );
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Process {
            input,
            output,
            prompt_labels,
            pipeline,
        } => cmd_process(&input, output, prompt_labels, &pipeline),
        Commands::Train {
            input,
            from_features,
            model,
            pipeline,
        } => cmd_train(&input, from_features, model, &pipeline),
        Commands::Stream {
            input,
            batch_length,
            model,
            echo,
            prompt_labels,
            pipeline,
        } => cmd_stream(input, batch_length, model, echo, prompt_labels, &pipeline),
        Commands::Record {
            input,
            output,
            sensors,
        } => cmd_record(input, output, sensors),
        Commands::Labels => cmd_labels(),
        Commands::Features { all } => cmd_features(all),
        Commands::Status => cmd_status(),
        Commands::Config => cmd_config(),
    }
}

fn load_config(overrides: &PipelineArgs) -> Result<Config> {
    let mut config = Config::load().context("loading configuration")?;
    overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}

fn build_pipeline(config: &Config) -> Result<WindowedPipeline> {
    let engine = match config.feature_names {
        Some(ref names) => FeatureEngine::from_names(names),
        None => FeatureEngine::default_for(config.sensor_count),
    };
    if engine.is_empty() {
        bail!("no recognised feature names selected");
    }
    Ok(WindowedPipeline::new(
        config.pipeline_config()?,
        engine,
        ChannelSchema::new(config.sensor_count),
    ))
}

fn open_catalog(config: &Config) -> LabelCatalog {
    LabelCatalog::load(LabelStore::new(&config.label_store_path))
}

fn open_source(input: Option<&Path>) -> Result<Box<dyn BufRead + Send>> {
    let reader: Box<dyn BufRead + Send> = match input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("opening {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(std::io::stdin())),
    };
    Ok(reader)
}

fn load_recording(path: &Path, schema: &ChannelSchema) -> Result<Vec<bme_window_agent::Reading>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let readings = read_readings(BufReader::new(file), schema)
        .with_context(|| format!("reading {}", path.display()))?;
    info!(path = %path.display(), readings = readings.len(), "recording loaded");
    Ok(readings)
}

fn cmd_process(
    input: &Path,
    output: Option<PathBuf>,
    prompt_labels: bool,
    overrides: &PipelineArgs,
) -> Result<()> {
    let config = load_config(overrides)?;
    let pipeline = build_pipeline(&config)?;
    let readings = load_recording(input, pipeline.schema())?;

    let mut catalog = open_catalog(&config);
    if prompt_labels {
        catalog = catalog.with_resolver(Arc::new(PromptResolver::terminal()));
    }

    let mut last_percent = None;
    let mut progress = |done: usize, total: usize| {
        let percent = if total == 0 { 100 } else { done * 100 / total };
        if last_percent != Some(percent) {
            eprint!("\rProcessing windows: {percent:>3}% ({done}/{total})");
            last_percent = Some(percent);
        }
    };
    let rows = pipeline.process(&readings, &catalog, Some(&mut progress))?;
    if last_percent.is_some() {
        eprintln!();
    }

    let table = FeatureTable {
        columns: pipeline.engine().names().to_vec(),
        rows,
    };
    let output = output.unwrap_or_else(|| {
        config.export_path.join(format!(
            "features_{}.csv",
            Utc::now().format("%Y%m%d_%H%M%S")
        ))
    });
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let file = File::create(&output).with_context(|| format!("creating {}", output.display()))?;
    write_feature_table(&table, BufWriter::new(file))?;
    println!(
        "Wrote {} feature vectors ({} features each) to {}",
        table.len(),
        table.columns.len(),
        output.display()
    );
    Ok(())
}

fn cmd_train(
    input: &Path,
    from_features: bool,
    model_path: Option<PathBuf>,
    overrides: &PipelineArgs,
) -> Result<()> {
    let config = load_config(overrides)?;

    let table = if from_features {
        let file = File::open(input).with_context(|| format!("opening {}", input.display()))?;
        read_feature_table(BufReader::new(file))?
    } else {
        let pipeline = build_pipeline(&config)?;
        let readings = load_recording(input, pipeline.schema())?;
        pipeline.process_batch(&readings, &open_catalog(&config))?
    };

    let mut model = CentroidClassifier::new();
    model.fit(&table.rows)?;

    let model_path = model_path.unwrap_or_else(|| config.model_path.clone());
    model.save(&model_path)?;

    println!(
        "Trained on {} feature vectors, {} classes: {}",
        table.len(),
        model.classes().len(),
        model.classes().join(", ")
    );
    println!("Model saved to {}", model_path.display());
    Ok(())
}

fn cmd_stream(
    input: Option<PathBuf>,
    batch_length: Option<f64>,
    model_path: Option<PathBuf>,
    echo: bool,
    prompt_labels: bool,
    overrides: &PipelineArgs,
) -> Result<()> {
    let mut config = load_config(overrides)?;
    if let Some(secs) = batch_length {
        config.batch_length = Duration::try_from_secs_f64(secs)
            .with_context(|| format!("invalid batch length {secs}"))?;
        config.validate()?;
    }
    if let Err(e) = config.ensure_directories() {
        warn!(error = %e, "could not create data directories");
    }

    let model_path = model_path.unwrap_or_else(|| config.model_path.clone());
    let model = CentroidClassifier::load(&model_path)
        .with_context(|| format!("loading model {}", model_path.display()))?;

    let reader = open_source(input.as_deref())?;

    // New labels are asked about on this thread, not the worker's
    let mut catalog = open_catalog(&config);
    let requests: Receiver<LabelRequest> = if prompt_labels && input.is_some() {
        let (resolver, requests) = ChannelResolver::channel();
        catalog = catalog.with_resolver(Arc::new(resolver));
        requests
    } else {
        if prompt_labels {
            warn!("--prompt-labels needs --input while stdin carries the stream; new labels keep their raw names");
        }
        crossbeam_channel::never()
    };
    let prompt = PromptResolver::terminal();

    let stats = Arc::new(StreamStats::with_persistence(config.stats_path()));
    let mut stream_config = config.stream_config();
    stream_config.flush_on_close = input.is_some();
    let mut controller = StreamController::new(
        stream_config,
        build_pipeline(&config)?,
        Arc::new(catalog),
        Arc::new(model),
        Arc::clone(&stats),
    );

    println!("BME Window Agent v{VERSION}");
    println!("  Batch length: {:.1}s", config.batch_length.as_secs_f64());
    println!(
        "  Window: {}s, stride {}s",
        config.window_size_secs, config.stride_secs
    );
    println!("Press Ctrl+C to stop");
    println!();

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    let events = controller.start_stream(reader)?;
    let mut stdout = std::io::stdout();

    while running.load(Ordering::SeqCst) {
        let next = select! {
            recv(events) -> event => Next::Event(event.ok()),
            recv(requests) -> request => request.map(Next::Request).unwrap_or(Next::Idle),
            default(Duration::from_millis(100)) => Next::Idle,
        };

        match next {
            Next::Event(Some(StreamEvent::RawLine(line))) => {
                if echo {
                    writeln!(stdout, "{line}")?;
                }
            }
            Next::Event(Some(StreamEvent::Prediction(prediction))) => {
                writeln!(stdout, "[{}] {}", Utc::now().format("%H:%M:%S"), prediction)?;
            }
            // Fatal, or the worker has ended
            Next::Event(Some(StreamEvent::Fatal(_))) | Next::Event(None) => break,
            Next::Request(request) => {
                let answer = prompt.ask(&request.raw);
                request.answer(answer);
            }
            Next::Idle => {}
        }
    }

    // Unblocks a worker still waiting on a label answer
    drop(requests);

    let outcome = if controller.is_running() {
        controller.stop_stream()
    } else {
        controller.wait()
    };

    if let Err(e) = stats.save() {
        warn!(error = %e, "could not save stream statistics");
    }
    println!();
    println!("{}", stats.summary());

    match outcome {
        Ok(report) => {
            println!(
                "Stopped ({:?}) after {} batches; {} buffered readings discarded",
                report.reason, report.batches, report.discarded
            );
            Ok(())
        }
        Err(StreamError::Transport(reason)) => bail!("stream transport failed: {reason}"),
        Err(e) => Err(e.into()),
    }
}

fn cmd_record(input: Option<PathBuf>, output: Option<PathBuf>, sensors: Option<u8>) -> Result<()> {
    let mut config = Config::load().context("loading configuration")?;
    if let Some(sensors) = sensors {
        config.sensor_count = sensors;
    }
    config.validate()?;

    let reader = open_source(input.as_deref())?;
    let output = output.unwrap_or_else(|| {
        config.data_path.join("log_files").join(format!(
            "recording_{}.csv",
            Utc::now().format("%Y%m%d_%H%M%S")
        ))
    });
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = File::create(&output).with_context(|| format!("creating {}", output.display()))?;
    let parser = RecordParser::new(ChannelSchema::new(config.sensor_count));
    let mut recorder = Recorder::new(parser, BufWriter::new(file))?;

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    let mut collector = LineCollector::new(CollectorConfig::default());
    collector.start(reader)?;
    println!("Recording to {}", output.display());
    println!("Press Ctrl+C to stop");

    let summary = record_stream(collector.receiver(), &mut recorder, &running, DEFAULT_POLL_INTERVAL)?;
    collector.stop();

    println!(
        "Logged {} records to {}; {} malformed lines dropped",
        summary.written,
        output.display(),
        summary.dropped
    );
    Ok(())
}

fn cmd_labels() -> Result<()> {
    let config = Config::load()?;
    let catalog = open_catalog(&config);

    println!("Label catalog: {}", config.label_store_path.display());
    if catalog.is_empty() {
        println!("No labels recorded yet.");
        return Ok(());
    }
    for (raw, class) in catalog.entries() {
        println!("  {raw:>8}  {class}");
    }
    Ok(())
}

fn cmd_features(all: bool) -> Result<()> {
    let config = Config::load()?;
    let names: Vec<String> = if all {
        FeatureSpec::full_set(config.sensor_count)
            .iter()
            .map(FeatureSpec::name)
            .collect()
    } else {
        match config.feature_names {
            Some(ref names) => FeatureEngine::from_names(names).names().to_vec(),
            None => FeatureEngine::default_for(config.sensor_count).names().to_vec(),
        }
    };

    for name in &names {
        println!("{name}");
    }
    eprintln!("{} features", names.len());
    Ok(())
}

fn cmd_status() -> Result<()> {
    let config = Config::load()?;

    println!("BME Window Agent Status");
    println!("=======================");
    println!();
    println!("Configuration:");
    println!("  Window: {}s, stride {}s", config.window_size_secs, config.stride_secs);
    println!("  Gap threshold: {}s", config.gap_threshold.secs());
    println!("  Validity: {:?}", config.validity);
    println!("  Batch length: {:.1}s", config.batch_length.as_secs_f64());
    println!(
        "  Model: {} ({})",
        config.model_path.display(),
        if config.model_path.exists() { "present" } else { "missing" }
    );
    println!();

    let stats_path = config.stats_path();
    if stats_path.exists() {
        let snapshot = StreamStats::with_persistence(stats_path).snapshot();
        println!("Cumulative Statistics:");
        println!("  Lines received: {}", snapshot.lines_received);
        println!("  Malformed lines dropped: {}", snapshot.malformed_dropped);
        println!("  Readings accepted: {}", snapshot.readings_accepted);
        println!("  Batches flushed: {}", snapshot.batches_flushed);
        println!("  Feature vectors produced: {}", snapshot.vectors_produced);
        println!("  Predictions made: {}", snapshot.predictions_made);
        println!("  Readings discarded at stop: {}", snapshot.discarded_at_stop);
    } else {
        println!("No previous stream data found.");
    }
    Ok(())
}

fn cmd_config() -> Result<()> {
    let config = Config::load()?;

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {}", Config::config_path().display());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

/// What the stream loop woke up for.
enum Next {
    Event(Option<StreamEvent>),
    Request(LabelRequest),
    Idle,
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("setting Ctrl+C handler")
}
