//! Pi Rangecam - Raspberry Pi Camera Console Binary
//!
//! Drives the rangefinder and the video stream reader from the command line.

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use pi_rangecam::console::distance_text;
use pi_rangecam::{
    ConsoleConfig, HardwareConsole, HardwareSession, HudSnapshot, MeasureMode, MjpegFactory,
    SessionState, StatusEvent, StreamEndpoint, StreamSupervisor,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};
use tokio::io::AsyncBufReadExt;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "pi_rangecam")]
#[command(about = "📷 Pi Rangecam - Raspberry Pi camera console with laser rangefinder")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = "Rangefinder driver and resilient MJPEG stream reader for a Raspberry Pi camera console")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Rangefinder UART device (overrides the config file)
    #[arg(long)]
    port: Option<String>,

    /// BCM pin of the rangefinder power-enable line (overrides the config file)
    #[arg(long)]
    enable_pin: Option<u8>,

    /// Measurement mode entered on power-up (overrides the config file)
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether a rangefinder is answering
    Probe,

    /// Take single-shot measurements
    Measure(MeasureArgs),

    /// Read measurements in continuous mode
    Continuous(ContinuousArgs),

    /// Read frames from the stream catalogue
    Stream(StreamArgs),

    /// Run the console loop (default)
    Run,
}

#[derive(Args)]
struct MeasureArgs {
    /// Number of measurements
    #[arg(short = 'n', long, default_value_t = 1)]
    count: u32,

    /// Pause between measurements in milliseconds
    #[arg(short, long, default_value_t = 500)]
    interval_ms: u64,
}

#[derive(Args)]
struct ContinuousArgs {
    /// Number of read cycles before stopping
    #[arg(short = 'n', long, default_value_t = 20)]
    cycles: u32,
}

#[derive(Args)]
struct StreamArgs {
    /// Frames to receive before exiting
    #[arg(short = 'n', long, default_value_t = 100)]
    frames: u32,

    /// Read this URL instead of the configured catalogue
    #[arg(long)]
    url: Option<String>,

    /// Save the last received frame to this file
    #[arg(long)]
    save: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Single,
    Continuous,
}

impl From<ModeArg> for MeasureMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Single => MeasureMode::Single,
            ModeArg::Continuous => MeasureMode::Continuous,
        }
    }
}

/// Operator commands read from stdin by `run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConsoleCommand {
    Measure,
    ToggleContinuous,
    NextStream,
    SwitchStream(usize),
    Quit,
}

impl ConsoleCommand {
    fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let command = match words.next()? {
            "m" | "measure" => Self::Measure,
            "c" | "continuous" => Self::ToggleContinuous,
            "n" | "next" => Self::NextStream,
            "s" | "stream" => Self::SwitchStream(words.next()?.parse().ok()?),
            "q" | "quit" => Self::Quit,
            _ => return None,
        };
        Some(command)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing/logging
    init_logging(&cli)?;

    // Print banner
    print_banner();

    let config = load_config(&cli)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Probe => probe_command(config).await?,
        Commands::Measure(args) => measure_command(config, args).await?,
        Commands::Continuous(args) => continuous_command(config, args).await?,
        Commands::Stream(args) => stream_command(config, args).await?,
        Commands::Run => run_command(config).await?,
    }

    Ok(())
}

fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let level = if cli.debug {
        Level::DEBUG
    } else if cli.verbose {
        Level::INFO
    } else {
        Level::WARN
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

fn print_banner() {
    println!("📷 Pi Rangecam - Raspberry Pi Camera Console");
    println!("   Version: {}", env!("CARGO_PKG_VERSION"));
    #[cfg(feature = "gpio")]
    println!("   GPIO power control: enabled");
    #[cfg(not(feature = "gpio"))]
    println!("   GPIO power control: simulated");
    println!();
}

fn load_config(cli: &Cli) -> anyhow::Result<ConsoleConfig> {
    let mut config = match &cli.config {
        Some(path) => ConsoleConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ConsoleConfig::default(),
    };

    if let Some(port) = &cli.port {
        config.rangefinder.port = port.clone();
    }
    if let Some(pin) = cli.enable_pin {
        config.rangefinder.enable_pin = pin;
    }
    if let Some(mode) = cli.mode {
        config.rangefinder.mode = mode.into();
    }
    config.validate()?;

    info!(
        "Rangefinder on {} (enable pin {}, {:?} mode)",
        config.rangefinder.port, config.rangefinder.enable_pin, config.rangefinder.mode
    );
    Ok(config)
}

/// Flag set once Ctrl-C is received.
fn stop_on_ctrl_c() -> Arc<AtomicBool> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, stopping");
            flag.store(true, Ordering::SeqCst);
        }
    });
    stop
}

async fn probe_command(config: ConsoleConfig) -> anyhow::Result<()> {
    let available = tokio::task::spawn_blocking(move || {
        let mut session = HardwareSession::open(&config.rangefinder);
        let available = session.probe();
        session.close();
        available
    })
    .await?;

    if available {
        println!("✅ Rangefinder answering");
    } else {
        println!("❌ Rangefinder not detected");
    }
    Ok(())
}

async fn measure_command(config: ConsoleConfig, args: MeasureArgs) -> anyhow::Result<()> {
    let stop = stop_on_ctrl_c();
    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let mut session = HardwareSession::open(&config.rangefinder);
        session.power_on().context("powering on the rangefinder")?;

        for i in 0..args.count {
            if stop.load(Ordering::SeqCst) {
                break;
            }
            if i > 0 {
                std::thread::sleep(Duration::from_millis(args.interval_ms));
            }
            let reading = session.get_single_measurement();
            println!("{}", distance_text(reading.as_ref()));
        }

        session.close();
        Ok(())
    })
    .await?
}

async fn continuous_command(config: ConsoleConfig, args: ContinuousArgs) -> anyhow::Result<()> {
    let stop = stop_on_ctrl_c();
    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let mut session = HardwareSession::open(&config.rangefinder);
        session.power_on().context("powering on the rangefinder")?;
        if session.state() == SessionState::Idle {
            session
                .start_continuous()
                .context("starting continuous mode")?;
        }

        let mut readings = session.continuous_stream();
        for _ in 0..args.cycles {
            if stop.load(Ordering::SeqCst) {
                break;
            }
            match readings.next() {
                Some(reading) => println!("{}", distance_text(reading.as_ref())),
                None => break,
            }
        }
        if let Err(e) = readings.stop() {
            warn!("Stopping continuous mode: {}", e);
        }

        session.close();
        Ok(())
    })
    .await?
}

async fn stream_command(config: ConsoleConfig, args: StreamArgs) -> anyhow::Result<()> {
    let streams = match &args.url {
        Some(url) => vec![StreamEndpoint::new(url.clone(), url.clone())],
        None => config.effective_streams(),
    };
    let stop = stop_on_ctrl_c();

    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let mut supervisor = StreamSupervisor::new(streams, config.video.clone(), MjpegFactory::new())
            .with_policy(config.reconnect)
            .with_retries_per_source(config.retries_per_source);
        let idle = config.video.frame_interval().max(Duration::from_millis(10));

        let started = Instant::now();
        let mut received = 0u32;
        let mut last_frame = None;
        while received < args.frames && !stop.load(Ordering::SeqCst) {
            match supervisor.read() {
                Some(frame) => {
                    received += 1;
                    debug!("Frame {} from {}", received, supervisor.current_source_name());
                    last_frame = Some(frame);
                }
                None => std::thread::sleep(idle),
            }
        }

        let elapsed = started.elapsed().as_secs_f64();
        println!(
            "Received {} frames in {:.1}s ({:.1} fps), last source: {}",
            received,
            elapsed,
            if elapsed > 0.0 { received as f64 / elapsed } else { 0.0 },
            supervisor.current_source_name()
        );

        if let (Some(path), Some(frame)) = (&args.save, &last_frame) {
            frame
                .save(path)
                .with_context(|| format!("saving frame to {}", path.display()))?;
            println!("Saved last frame to {}", path.display());
        }
        supervisor.release();
        Ok(())
    })
    .await?
}

async fn run_command(config: ConsoleConfig) -> anyhow::Result<()> {
    info!("Starting console...");
    let idle = config.video.frame_interval().max(Duration::from_millis(10));
    let mut console = tokio::task::spawn_blocking(move || HardwareConsole::open(&config)).await?;
    let mut events = console.subscribe();

    println!("Commands: m = measure, c = continuous on/off, n = next stream, s <index> = stream, q = quit");

    let (hud_tx, mut hud_rx) = watch::channel(None::<HudSnapshot>);
    let (command_tx, command_rx) = mpsc::channel::<ConsoleCommand>();
    let stop = Arc::new(AtomicBool::new(false));

    let worker_stop = stop.clone();
    let worker = tokio::task::spawn_blocking(move || {
        while !worker_stop.load(Ordering::SeqCst) {
            while let Ok(command) = command_rx.try_recv() {
                match command {
                    ConsoleCommand::Measure => {
                        console.request_single_measurement();
                    }
                    ConsoleCommand::ToggleContinuous => {
                        console.toggle_continuous();
                    }
                    ConsoleCommand::NextStream => {
                        console.next_stream();
                    }
                    ConsoleCommand::SwitchStream(index) => {
                        console.switch_stream(index);
                    }
                    ConsoleCommand::Quit => worker_stop.store(true, Ordering::SeqCst),
                }
            }

            let tick = console.tick();
            hud_tx.send_replace(Some(tick.hud));
            if tick.frame.is_none() {
                std::thread::sleep(idle);
            }
        }
        console.shutdown();
    });

    let mut stdin = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut last_distance = String::new();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, stopping");
                break;
            }
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match ConsoleCommand::parse(&line) {
                    Some(ConsoleCommand::Quit) => break,
                    Some(command) => {
                        if command_tx.send(command).is_err() {
                            break;
                        }
                    }
                    None => println!("Unknown command: {}", line.trim()),
                },
                Ok(None) => {
                    debug!("stdin closed, running until Ctrl-C");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!("Reading stdin failed: {}", e);
                    break;
                }
            },
            event = events.recv() => match event {
                Ok(event) => print_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => warn!("Dropped {} status events", n),
                Err(broadcast::error::RecvError::Closed) => break,
            },
            changed = hud_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let hud = hud_rx.borrow_and_update().clone();
                if let Some(hud) = hud {
                    if hud.distance_text != last_distance {
                        println!(
                            "[{}] {} | {}",
                            hud.timestamp.format("%H:%M:%S"),
                            hud.distance_text,
                            hud.stream_name
                        );
                        last_distance = hud.distance_text;
                    }
                }
            }
        }
    }

    stop.store(true, Ordering::SeqCst);
    if let Err(e) = worker.await {
        error!("Console worker failed: {}", e);
    }
    Ok(())
}

fn print_event(event: &StatusEvent) {
    let now = chrono::Local::now().format("%H:%M:%S");
    match event {
        StatusEvent::RangefinderState { state } => println!("[{}] Rangefinder {}", now, state),
        StatusEvent::ContinuousAutoOff { after_minutes } => {
            println!("[{}] Continuous measuring off after {:.1} min", now, after_minutes)
        }
        StatusEvent::StreamUnavailable { name } => println!("[{}] Stream {} unavailable", now, name),
        StatusEvent::StreamSwitched { from, to } => println!("[{}] Stream {} -> {}", now, from, to),
        StatusEvent::AllStreamsFailed { attempted } => {
            println!("[{}] All {} streams failed", now, attempted)
        }
        StatusEvent::Measurement { .. } | StatusEvent::NoReading { .. } => {
            if let Ok(json) = serde_json::to_string(event) {
                debug!("{}", json);
            }
        }
    }
}
