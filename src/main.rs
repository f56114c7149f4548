use std::{
    fs,
    io::BufRead,
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use crossbeam_channel::{Receiver, select, tick, unbounded};

use gesture_arcade::{
    config::AppConfig,
    consumer::{ConsumerHub, ConsumerKind},
    pipeline::{
        CameraProvider, CaptureBackend, Overlay, VisionAdapter, recognizer::OnnxModelLoader,
    },
    session::RecognitionSession,
    supervisor::ProcessSupervisor,
    types::{Frame, GestureSignal},
};

/// How often the run loop advances game timers and refreshes the status line.
const UI_TICK: Duration = Duration::from_millis(50);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// TOML config file; defaults to $GESTURE_ARCADE_CONFIG, then built-ins.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open the camera and run a gesture consumer. Reads commands from stdin:
    /// n (new game), r (reset stats), o/p/s (switch mode), x (retry), q (quit).
    Run {
        #[arg(long, value_enum, default_value_t = Mode::Overlay)]
        mode: Mode,
    },
    /// List capture devices.
    Cameras,
    /// Classify still images.
    ClassifyImage {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Write the hand skeleton of each image as PNG into this directory.
        #[arg(long)]
        annotate: Option<PathBuf>,
    },
    /// Launch a configured external process and follow its status.
    Launch { process_id: String },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    Overlay,
    Rps,
    Simon,
}

impl From<Mode> for ConsumerKind {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Overlay => ConsumerKind::Overlay,
            Mode::Rps => ConsumerKind::RockPaperScissors,
            Mode::Simon => ConsumerKind::SimonSays,
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let cfg = AppConfig::load(args.config.as_deref())?;

    match args.command {
        Command::Run { mode } => run(&cfg, mode.into()),
        Command::Cameras => list_cameras(&cfg),
        Command::ClassifyImage { paths, annotate } => {
            classify_images(&cfg, &paths, annotate.as_deref())
        }
        Command::Launch { process_id } => launch(&cfg, &process_id),
    }
}

#[cfg(feature = "camera-nokhwa")]
fn capture_backend() -> Result<Arc<dyn CaptureBackend>> {
    Ok(Arc::new(gesture_arcade::pipeline::camera::NokhwaBackend))
}

#[cfg(not(feature = "camera-nokhwa"))]
fn capture_backend() -> Result<Arc<dyn CaptureBackend>> {
    anyhow::bail!("built without camera support, enable the `camera-nokhwa` feature")
}

fn build_adapter(cfg: &AppConfig) -> Result<Arc<VisionAdapter>> {
    let adapter = VisionAdapter::new(Arc::new(OnnxModelLoader::default()), cfg.model_sources())
        .with_init_timeout(cfg.init_timeout())
        .with_noise_filter(cfg.noise_filter()?);
    Ok(Arc::new(adapter))
}

fn run(cfg: &AppConfig, initial: ConsumerKind) -> Result<()> {
    let provider = Arc::new(CameraProvider::new(capture_backend()?, cfg.settle_delay()));
    let session = Arc::new(
        RecognitionSession::new(build_adapter(cfg)?).with_tick_interval(cfg.tick_interval()),
    );
    let mut hub = ConsumerHub::standard(
        session,
        provider,
        cfg.link_settings(),
        (&cfg.rps).into(),
        (&cfg.simon).into(),
    );

    let mut current = initial;
    if let Err(err) = hub.activate(current, Instant::now()) {
        eprintln!("{}: {err} (press x to retry)", current.label());
    }

    let commands = spawn_stdin_reader()?;
    let ticker = tick(UI_TICK);
    let mut last_line = String::new();

    loop {
        select! {
            recv(commands) -> line => {
                let Ok(line) = line else { break };
                let now = Instant::now();
                match line.trim() {
                    "q" => break,
                    "n" => {
                        if let Some(consumer) = hub.active_consumer_mut() {
                            consumer.new_round(now);
                        }
                    }
                    "r" => {
                        if let Some(consumer) = hub.active_consumer_mut() {
                            consumer.reset_stats();
                        }
                    }
                    "o" | "p" | "s" => {
                        current = match line.trim() {
                            "o" => ConsumerKind::Overlay,
                            "p" => ConsumerKind::RockPaperScissors,
                            _ => ConsumerKind::SimonSays,
                        };
                        if let Err(err) = hub.activate(current, now) {
                            eprintln!("{}: {err} (press x to retry)", current.label());
                        }
                    }
                    "x" => {
                        if let Err(err) = hub.retry(current, now) {
                            eprintln!("{}: retry failed: {err}", current.label());
                        }
                    }
                    "" => {}
                    other => eprintln!("unknown command `{other}`"),
                }
            }
            recv(ticker) -> _ => {}
        }

        hub.update(Instant::now());
        if let Some(consumer) = hub.consumer(current) {
            let line = consumer.status_line();
            if line != last_line {
                println!("{line}");
                last_line = line;
            }
        }
    }

    hub.deactivate_all();
    Ok(())
}

fn spawn_stdin_reader() -> Result<Receiver<String>> {
    let (tx, rx) = unbounded();
    thread::Builder::new()
        .name("stdin-commands".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .context("failed to spawn stdin reader")?;
    Ok(rx)
}

fn list_cameras(cfg: &AppConfig) -> Result<()> {
    let provider = CameraProvider::new(capture_backend()?, cfg.settle_delay());
    let devices = provider.devices()?;
    if devices.is_empty() {
        println!("no cameras found");
    }
    for device in devices {
        println!("{}: {}", device.index, device.label);
    }
    Ok(())
}

fn classify_images(cfg: &AppConfig, paths: &[PathBuf], annotate: Option<&Path>) -> Result<()> {
    let adapter = build_adapter(cfg)?;
    adapter.initialize()?;

    if let Some(dir) = annotate {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }

    for (index, path) in paths.iter().enumerate() {
        let image = image::open(path)
            .with_context(|| format!("failed to read image {}", path.display()))?
            .to_rgba8();
        let (width, height) = image.dimensions();
        let frame = Frame {
            rgba: image.into_raw(),
            width,
            height,
            timestamp: Instant::now(),
        };

        let detections = adapter.classify(&frame, index as u64)?;
        match detections.primary() {
            Some((hand, score)) => println!(
                "{}: {}",
                path.display(),
                GestureSignal::from_detection(hand, score).display_text()
            ),
            None => println!("{}: no hand detected", path.display()),
        }

        if let Some(dir) = annotate {
            let overlay = Overlay::new();
            overlay.resize(width, height);
            overlay.draw_hands(&detections.hands);
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("image-{index}"));
            let out = dir.join(format!("{stem}.png"));
            if let Some(canvas) = overlay.snapshot().to_image() {
                canvas
                    .save(&out)
                    .with_context(|| format!("failed to write {}", out.display()))?;
            }
        }
    }

    adapter.close();
    Ok(())
}

fn launch(cfg: &AppConfig, process_id: &str) -> Result<()> {
    let supervisor = ProcessSupervisor::new(cfg.processes.clone());
    let events = supervisor.subscribe();
    supervisor.execute(process_id)?;

    for event in events.iter() {
        let state = if event.is_running { "running" } else { "stopped" };
        println!("{}: {state}", event.process_id);
        if event.process_id == process_id && !event.is_running {
            break;
        }
    }
    Ok(())
}
