//! Vision sampling service.
//!
//! Polls a `VisionSource` on its own worker and publishes the latest
//! `FlySample` snapshot for the tracker and the trial sequencer. An absent
//! fly is a valid sample; poll errors are transient and leave the previous
//! snapshot in place.

use crate::cell::Guarded;
use crate::config::VisionCfg;
use crate::error::Result;
use crate::service::{LoopBody, LoopTiming, Service};
use crate::telemetry::TelemetryStream;
use flyrig_traits::{Clock, FlySample, VisionSource};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

const VISION_LOG_HEADER: &str = "t,fly_present,x,y,angle";
const POLL_WARN_INTERVAL: Duration = Duration::from_secs(1);

struct VisionShared {
    sample: Guarded<Option<FlySample>>,
    log: Mutex<TelemetryStream>,
}

/// Cheap cloneable handle to the latest vision snapshot and its telemetry
/// stream.
#[derive(Clone)]
pub struct VisionHandle {
    shared: Arc<VisionShared>,
}

impl VisionHandle {
    /// A handle with no service behind it. Used when the rig runs without a
    /// camera (homing/jog utilities) and by tests, which publish samples
    /// directly.
    pub fn detached() -> Self {
        Self {
            shared: Arc::new(VisionShared {
                sample: Guarded::new(None),
                log: Mutex::new(TelemetryStream::new(VISION_LOG_HEADER)),
            }),
        }
    }

    pub fn sample(&self) -> Option<FlySample> {
        self.shared.sample.get()
    }

    pub fn fly_present(&self) -> bool {
        self.sample().is_some_and(|s| s.present)
    }

    /// Publish a new snapshot. Called by the vision worker; also the
    /// injection point for tests and embedded vision stacks.
    pub fn publish(&self, sample: FlySample) {
        self.shared.sample.set(Some(sample));
    }

    pub fn start_logging(&self, path: &Path) -> Result<()> {
        self.lock_log()
            .open(path)
            .map_err(|e| eyre::eyre!("opening vision log {}: {e}", path.display()))
    }

    pub fn stop_logging(&self) {
        self.lock_log().close();
    }

    fn lock_log(&self) -> std::sync::MutexGuard<'_, TelemetryStream> {
        self.shared.log.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Loop body polling the source once per tick.
pub struct VisionLoop<V: VisionSource> {
    source: V,
    handle: VisionHandle,
    clock: Arc<dyn Clock + Send + Sync>,
    epoch: Instant,
    last_warn: Option<Instant>,
}

impl<V: VisionSource> VisionLoop<V> {
    pub fn new(source: V, clock: Arc<dyn Clock + Send + Sync>) -> (Self, VisionHandle) {
        let handle = VisionHandle::detached();
        let epoch = clock.now();
        (
            Self {
                source,
                handle: handle.clone(),
                clock,
                epoch,
                last_warn: None,
            },
            handle,
        )
    }

    pub fn step(&mut self) {
        match self.source.poll() {
            Ok(sample) => {
                self.handle.publish(sample);
                let t = self
                    .clock
                    .now()
                    .saturating_duration_since(self.epoch)
                    .as_secs_f64();
                let angle = sample
                    .angle
                    .map(|a| format!("{a:.6}"))
                    .unwrap_or_default();
                self.handle.lock_log().record(format_args!(
                    "{t:.6},{},{:.6},{:.6},{angle}",
                    sample.present, sample.x, sample.y
                ));
            }
            Err(e) => {
                let due = self.last_warn.is_none_or(|t| {
                    self.clock.now().saturating_duration_since(t) >= POLL_WARN_INTERVAL
                });
                if due {
                    tracing::warn!(error = %e, "vision poll failed; keeping previous sample");
                    self.last_warn = Some(self.clock.now());
                }
            }
        }
    }
}

impl<V: VisionSource + Send> LoopBody for VisionLoop<V> {
    fn tick(&mut self) -> Result<()> {
        self.step();
        Ok(())
    }

    fn on_stop(&mut self) {
        self.handle.stop_logging();
    }
}

/// Vision worker plus its handle.
pub struct VisionService {
    service: Service,
    handle: VisionHandle,
}

impl VisionService {
    pub fn new(
        source: impl VisionSource + Send + 'static,
        cfg: &VisionCfg,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        let (body, handle) = VisionLoop::new(source, clock.clone());
        let service = Service::new(
            "vision",
            LoopTiming::fixed(cfg.loop_period),
            Box::new(body),
            clock,
        );
        Self { service, handle }
    }

    pub fn handle(&self) -> VisionHandle {
        self.handle.clone()
    }

    pub fn start(&mut self) -> Result<()> {
        self.service.start()
    }

    pub fn stop(&mut self) -> Result<()> {
        self.service.stop()
    }

    pub fn average_period(&self) -> Option<Duration> {
        self.service.average_period()
    }
}
