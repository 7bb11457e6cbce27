//! Fringe entrypoint.
//!
//! Builds the acquisition engine from `fringe.toml` (projectors on
//! virtual display surfaces, cameras on their configured backends) and
//! drives it: continuous preview for a while, optionally a batch, then a
//! statistics printout. Real swap-chain and vendor-SDK surfaces plug in
//! at the same seams the virtual ones use.

use std::path::PathBuf;
use std::sync::Once;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use core_acquire::{BatchOptions, Engine, EngineOptions};
use core_camera::{BackendConfig, BackendKind};
use core_display::VirtualDisplay;

/// Which batch verb to run after the preview phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum BatchMode {
    None,
    Sequential,
    Simultaneous,
}

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "fringe", version, about = "Structured-light acquisition engine")]
struct Args {
    /// Optional configuration file path (overrides discovery of `fringe.toml`).
    #[arg(long = "config")]
    config: Option<PathBuf>,
    /// Seconds of continuous preview before any batch.
    #[arg(long = "preview-secs", default_value_t = 2)]
    preview_secs: u64,
    /// Batch verb to run after the preview phase.
    #[arg(long = "batch", value_enum, default_value_t = BatchMode::None)]
    batch: BatchMode,
}

struct AppStartup {
    log_guard: Option<WorkerGuard>,
}

impl AppStartup {
    fn new() -> Self {
        Self { log_guard: None }
    }

    fn configure_logging(&mut self) {
        let file_appender = tracing_appender::rolling::never(".", "fringe.log");
        let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);
        match tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(nb_writer)
            .try_init()
        {
            Ok(_) => {
                self.log_guard = Some(guard);
            }
            Err(_err) => {
                // Global subscriber already installed; drop guard so the
                // writer shuts down.
            }
        }
    }

    fn install_panic_hook() {
        static HOOK: Once = Once::new();
        HOOK.call_once(|| {
            let default_panic = std::panic::take_hook();
            std::panic::set_hook(Box::new(move |info| {
                tracing::error!(target: "runtime.panic", ?info, "panic");
                default_panic(info);
            }));
        });
    }
}

fn backend_kind(name: &str) -> BackendKind {
    match name {
        "from-file" => BackendKind::FromFile,
        "pylon" => BackendKind::Pylon,
        "sapera" => BackendKind::Sapera,
        "spinnaker" => BackendKind::Spinnaker,
        "flycapture" => BackendKind::FlyCapture,
        "software" => BackendKind::Software,
        other => {
            warn!(target: "runtime", backend = other, "unknown backend name; using software");
            BackendKind::Software
        }
    }
}

fn build_engine(config: &core_config::Config) -> Result<Engine> {
    let file = &config.file;
    let (queue_low, queue_high) = config.queue_watermarks();

    let engine = Engine::new(EngineOptions {
        output_root: file.engine.output_root.clone(),
        session: file.engine.session.clone(),
        sl_method: file.engine.sl_method.clone(),
        save_png: file.engine.save_png,
        save_raw: file.engine.save_raw,
        queue_low_watermark: queue_low,
        queue_high_watermark: queue_high,
        delay_ms: file.acquisition.delay_ms,
        present_interval_vblanks: file.acquisition.present_interval_vblanks,
        blocking: file.acquisition.blocking,
        exposure_us: file.acquisition.exposure_us,
        concurrent_delay: file.acquisition.concurrent_delay,
    });

    for projector in &file.projectors {
        let surface = VirtualDisplay::new(
            file.display.refresh_hz,
            file.display.width,
            file.display.height,
        );
        let id = engine
            .add_projector(Box::new(surface), &projector.pattern_directory, projector.cycle)
            .with_context(|| {
                format!(
                    "adding projector for {}",
                    projector.pattern_directory.display()
                )
            })?;
        info!(target: "runtime", projector = id, "projector ready");
    }

    for camera in &file.cameras {
        let backend = backend_kind(&camera.backend);
        let backend_config = BackendConfig {
            identifier: camera.identifier.clone(),
            width: camera.width,
            height: camera.height,
            directory: camera.directory.clone(),
        };
        let id = engine
            .add_camera(camera.projector, backend, &backend_config)
            .with_context(|| format!("adding camera {}", camera.identifier))?;
        info!(target: "runtime", camera = id, projector = camera.projector, "camera ready");
    }

    Ok(engine)
}

fn print_statistics(engine: &Engine) {
    for id in 0..engine.projector_count() {
        if let Ok(info) = engine.projector_info(id) {
            println!(
                "projector {id}: presents={} vblanks={} skipped={} cameras={:?}",
                info.present_counter, info.vblank_counter, info.skipped_frames, info.camera_ids
            );
        }
    }
    for id in 0..engine.camera_count() {
        if let Ok(info) = engine.camera_info(id) {
            println!(
                "camera {id} ({}): triggers={} frames={} throttled={} exposure={}us",
                info.identifier,
                info.triggers_dispatched,
                info.frames_delivered,
                info.throttle_count,
                info.exposure_us
            );
        }
    }
}

fn run(args: Args) -> Result<()> {
    let config = core_config::load_from(args.config.clone())?;
    let engine = build_engine(&config)?;

    if engine.projector_count() == 0 {
        println!("no projectors configured; nothing to do");
        engine.shutdown();
        return Ok(());
    }

    // Continuous preview phase.
    for id in 0..engine.projector_count() {
        engine.start_continuous(id)?;
    }
    info!(target: "runtime", secs = args.preview_secs, "continuous preview running");
    std::thread::sleep(Duration::from_secs(args.preview_secs));
    for id in 0..engine.projector_count() {
        engine.stop_continuous(id)?;
    }

    match args.batch {
        BatchMode::None => {}
        BatchMode::Sequential | BatchMode::Simultaneous => {
            engine.set_batch_options(BatchOptions {
                blocking: config.file.acquisition.blocking,
                concurrent_delay: config.file.acquisition.concurrent_delay,
                fixed: false,
                num_acquire: 1,
            })?;
            let report = match args.batch {
                BatchMode::Sequential => engine.start_sequential_batch()?,
                _ => engine.start_simultaneous_batch()?,
            };
            for (projector, result) in &report {
                println!(
                    "projector {projector}: participated={} outcome={:?}",
                    result.participated, result.outcome
                );
            }
            engine.wait_for_persistence(Duration::from_secs(30))?;
            println!("acquisition stored under {}", engine.recording_dir().display());
        }
    }

    print_statistics(&engine);
    engine.shutdown();
    Ok(())
}

fn main() -> Result<()> {
    let mut startup = AppStartup::new();
    startup.configure_logging();
    AppStartup::install_panic_hook();
    info!(target: "runtime", "startup");

    let args = Args::parse();
    run(args)
}
