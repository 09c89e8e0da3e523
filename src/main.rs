use anyhow::{Context, Result};
use camwatch::config::LogsConfig;
use camwatch::encode::{probe_encoders, EncoderCommand};
use camwatch::registry::InUseRegistry;
use camwatch::retention::{RetentionPolicy, RetentionScheduler};
use camwatch::{CamwatchConfig, CamwatchOrchestrator};
use clap::Parser;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};

#[derive(Parser, Debug)]
#[command(name = "camwatch")]
#[command(about = "Multi-camera recorder with motion events, hourly files and live streams")]
#[command(version)]
#[command(long_about = "Captures frames from one or more cameras, records continuous \
hourly files and motion-triggered clips, optionally encodes them to H.264 with an \
external encoder, serves a live MJPEG stream per camera and deletes recordings \
older than the configured retention.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "camwatch.toml", help = "Path to TOML configuration file")]
    config: String,

    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    #[arg(long, help = "Validate configuration file and exit without starting")]
    validate_config: bool,

    #[arg(long, help = "Print an example configuration in TOML format and exit")]
    print_config: bool,

    /// Report what retention would delete, then exit
    #[arg(long, help = "Validate configuration and report what cleanup would delete")]
    dry_run: bool,

    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    #[arg(long, help = "Check that the configured H.264 encoders are available and exit")]
    probe_encoder: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        let example = toml::to_string_pretty(&CamwatchConfig::example())
            .context("failed to render example configuration")?;
        println!("{}", example);
        return Ok(());
    }

    let config = CamwatchConfig::load_from_file(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config))?;

    // file logging is configured by the file being loaded
    let log_guard = init_logging(&args, &config.logs)?;

    info!("Starting camwatch v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from: {}", args.config);

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        eprintln!("✗ Configuration validation failed: {}", e);
        std::process::exit(1);
    }

    if args.validate_config {
        println!("✓ Configuration is valid");
        return Ok(());
    }

    if args.probe_encoder {
        return probe(&config).await;
    }

    if args.dry_run {
        return dry_run(&config).await;
    }

    let mut orchestrator = CamwatchOrchestrator::new(config).await.map_err(|e| {
        error!("Failed to create orchestrator: {}", e);
        e
    })?;

    orchestrator.initialize().await?;

    if let Err(e) = orchestrator.start().await {
        error!("Failed to start camwatch: {}", e);
        orchestrator.shutdown().await?;
        return Err(e.into());
    }

    let exit_code = orchestrator.run().await.map_err(|e| {
        error!("System error during execution: {}", e);
        e
    })?;

    info!("camwatch exited with code: {}", exit_code);

    // flush buffered log lines before exiting
    drop(log_guard);
    std::process::exit(exit_code);
}

async fn probe(config: &CamwatchConfig) -> Result<()> {
    let wanted: Vec<String> = [&config.recordings, &config.motion]
        .into_iter()
        .filter(|output| output.save && output.encode_to_h264.needs_encoder())
        .filter_map(|output| output.h264_encoder.clone())
        .collect();

    if wanted.is_empty() {
        println!("No output uses an H.264 encoder");
        return Ok(());
    }

    let command = EncoderCommand::from_config(&config.encoder);
    let results = probe_encoders(&command, &wanted).await?;

    let mut missing = 0;
    for result in &results {
        if result.available {
            println!("✓ {}", result.encoder);
        } else {
            println!("✗ {} is not provided by {}", result.encoder, command.program());
            missing += 1;
        }
    }

    if missing > 0 {
        std::process::exit(1);
    }
    Ok(())
}

async fn dry_run(config: &CamwatchConfig) -> Result<()> {
    let policies: Vec<_> = [
        RetentionPolicy::from_output("recordings", &config.recordings),
        RetentionPolicy::from_output("motion", &config.motion),
    ]
    .into_iter()
    .flatten()
    .collect();

    let scheduler = RetentionScheduler::new(policies, InUseRegistry::new(), config.timezone()?);
    let result = scheduler.dry_run_cleanup().await;

    println!(
        "✓ Dry run: {} file(s), {} byte(s) would be deleted",
        result.files_deleted, result.bytes_freed
    );
    for e in &result.errors {
        println!("  ! {}", e);
    }
    Ok(())
}

fn init_logging(args: &Args, logs: &LogsConfig) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("camwatch={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer().with_target(true).boxed()
        }
    };

    let (file_layer, guard) = if logs.save {
        let rotation = match logs.rotation.as_str() {
            "minutely" => Rotation::MINUTELY,
            "hourly" => Rotation::HOURLY,
            "never" => Rotation::NEVER,
            _ => Rotation::DAILY,
        };
        let appender = RollingFileAppender::builder()
            .rotation(rotation)
            .filename_prefix("camwatch")
            .filename_suffix("log")
            .max_log_files(logs.max_files.max(1))
            .build(&logs.directory)
            .with_context(|| format!("failed to open log directory {}", logs.directory))?;
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_writer(writer)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}
