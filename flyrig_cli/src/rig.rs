//! Composition root: wires hardware, services and the trial sequencer, and
//! implements the stage utility commands.

use eyre::WrapErr;
use flyrig_config::Config;
use flyrig_core::{Tracker, TrackerHandle, Trial, VisionHandle, VisionService};
use flyrig_hardware::{SimulatedStage, WanderingVision};
use flyrig_traits::{Clock, MonotonicClock, StageDriver};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

fn clock() -> Arc<dyn Clock + Send + Sync> {
    Arc::new(MonotonicClock::new())
}

fn build_stage(cfg: &Config, sim: bool) -> eyre::Result<Box<dyn StageDriver + Send>> {
    if sim || cfg.stage.port.is_none() {
        tracing::info!("using the simulated stage");
        return Ok(Box::new(SimulatedStage::new()));
    }
    #[cfg(feature = "hardware")]
    {
        let port = cfg.stage.port.as_deref().unwrap_or_default();
        let timeout = Duration::from_millis(cfg.stage.loop_period_ms.max(10) * 10);
        let stage = flyrig_hardware::SerialStage::open(port, cfg.stage.baud, timeout)
            .wrap_err_with(|| format!("opening stage on {port}"))?;
        tracing::info!(port, baud = cfg.stage.baud, "stage link open");
        Ok(Box::new(stage))
    }
    #[cfg(not(feature = "hardware"))]
    {
        eyre::bail!(
            "stage.port is set but this build has no `hardware` feature; \
             rebuild with --features hardware or pass --sim"
        )
    }
}

fn install_ctrlc() -> eyre::Result<Arc<AtomicBool>> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || {
        tracing::info!("shutdown requested");
        flag.store(true, Ordering::Relaxed);
    })
    .wrap_err("installing Ctrl-C handler")?;
    Ok(shutdown)
}

/// Build a tracker over the configured stage with no camera attached.
/// Used by the stage utility commands.
fn build_bare_tracker(cfg: &Config, sim: bool) -> eyre::Result<Tracker> {
    let stage = build_stage(cfg, sim)?;
    Tracker::new(
        stage,
        VisionHandle::detached(),
        (&cfg.tracking).into(),
        clock(),
    )
}

fn log_period(name: &str, period: Option<Duration>) {
    if let Some(p) = period {
        tracing::info!(service = name, avg_period_ms = p.as_secs_f64() * 1e3, "loop statistics");
    }
}

/// Full rig: vision service, tracker, trial sequencer, until Ctrl-C.
pub fn run_experiment(cfg: &Config, sim: bool, home_first: bool) -> eyre::Result<()> {
    let shutdown = install_ctrlc()?;
    let clock = clock();
    let stage = build_stage(cfg, sim)?;

    // Camera acquisition is an external collaborator; this binary ships the
    // simulated source. Embedders publish real samples via VisionHandle.
    if !sim {
        tracing::info!("camera not wired in this binary; using the simulated fly");
    }
    let vision_cfg: flyrig_core::VisionCfg = (&cfg.vision).into();
    let mut vision = VisionService::new(WanderingVision::default(), &vision_cfg, clock.clone());
    vision.start()?;

    let mut tracker = Tracker::new(
        stage,
        vision.handle(),
        (&cfg.tracking).into(),
        clock.clone(),
    )?;
    tracker.start()?;

    if home_first {
        home_and_wait(&tracker.handle(), cfg, &shutdown)?;
    }

    let mut trial = Trial::new(
        vision.handle(),
        tracker.handle(),
        None,
        Vec::new(),
        (&cfg.trial).into(),
        clock,
    )?;
    trial.start()?;
    tracing::info!("rig running; press Ctrl-C to stop");

    while !shutdown.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(100));
    }

    trial.stop()?;
    tracker.stop()?;
    vision.stop()?;
    log_period("trial", trial.average_period());
    log_period("tracker", tracker.average_period());
    log_period("vision", vision.average_period());
    Ok(())
}

fn home_and_wait(
    handle: &TrackerHandle,
    cfg: &Config,
    shutdown: &AtomicBool,
) -> eyre::Result<()> {
    handle.request_home();
    let deadline = Instant::now()
        + Duration::from_millis(cfg.tracking.move_timeout_ms) * 2
        + Duration::from_secs(5);
    while !handle.is_close_to_center() {
        if shutdown.load(Ordering::Relaxed) {
            eyre::bail!("interrupted while homing");
        }
        if Instant::now() >= deadline {
            eyre::bail!("stage did not finish homing in time");
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    tracing::info!("stage homed and centered");
    Ok(())
}

pub fn home(cfg: &Config, sim: bool) -> eyre::Result<()> {
    let shutdown = install_ctrlc()?;
    let mut tracker = build_bare_tracker(cfg, sim)?;
    tracker.start()?;
    let result = home_and_wait(&tracker.handle(), cfg, &shutdown);
    tracker.stop()?;
    result
}

pub fn center(cfg: &Config, sim: bool) -> eyre::Result<()> {
    let mut tracker = build_bare_tracker(cfg, sim)?;
    tracker.start()?;
    let handle = tracker.handle();
    let result = handle
        .move_to_position(cfg.tracking.center_x, cfg.tracking.center_y)
        .wrap_err("centering the stage");
    if result.is_ok() {
        tracing::info!(
            x = cfg.tracking.center_x,
            y = cfg.tracking.center_y,
            "stage centered"
        );
    }
    tracker.stop()?;
    result
}

pub fn jog(
    cfg: &Config,
    sim: bool,
    vel_x: f64,
    vel_y: f64,
    duration_ms: u64,
) -> eyre::Result<()> {
    let mut tracker = build_bare_tracker(cfg, sim)?;
    tracker.start()?;
    let handle = tracker.handle();
    handle.set_manual_velocity(vel_x, vel_y);
    std::thread::sleep(Duration::from_millis(duration_ms));
    handle.stop_manual();
    // let the stage decelerate to zero under the acceleration limit
    std::thread::sleep(Duration::from_millis(200));
    if let Some(status) = handle.status() {
        tracing::info!(x = status.pos_x, y = status.pos_y, "jog finished");
    }
    tracker.stop()?;
    Ok(())
}

/// Quick health check of everything that can be verified without the rig.
pub fn self_check(cfg: &Config) -> eyre::Result<()> {
    cfg.validate().wrap_err("config validation")?;

    use flyrig_hardware::protocol;
    use flyrig_traits::{StageStatus, VelocityCommand, VisionSource};

    protocol::encode_velocity(VelocityCommand::new(0.1, -0.1)).wrap_err("velocity codec")?;
    let status = StageStatus {
        pos_x: 0.123,
        pos_y: 0.456,
        lim_n: false,
        lim_s: false,
        lim_e: false,
        lim_w: false,
    };
    protocol::decode_status(&protocol::encode_status(&status)).wrap_err("status codec")?;

    let mut stage = SimulatedStage::new();
    stage
        .set_velocity(VelocityCommand::ZERO)
        .map_err(|e| eyre::eyre!("simulated stage: {e}"))?;

    let mut vision = WanderingVision::default();
    let sample = vision
        .poll()
        .map_err(|e| eyre::eyre!("simulated vision: {e}"))?;
    if !sample.present {
        eyre::bail!("simulated vision reported no fly");
    }

    println!("self-check: ok");
    Ok(())
}
