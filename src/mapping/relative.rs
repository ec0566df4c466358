//! Relative axis remaps
//!
//! A relative remap does not set its target to the input position. The
//! deflection is a rate instead, and an integrator task moves the virtual
//! axis by that rate on a fixed tick until the input returns to rest.
//!
//! There is one integrator per target. It stays alive while idle so the
//! position it reached is kept, and only stops on deactivation.

use super::binding::OutputTarget;
use super::sink::VirtualOutputSink;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_TICK: Duration = Duration::from_millis(10);

/// Deflections smaller than this count as rest
pub const REST_THRESHOLD: f64 = 0.05;

struct Integrator {
    rate: watch::Sender<f64>,
    handle: JoinHandle<()>,
}

pub struct RelativeAxes {
    sink: Arc<dyn VirtualOutputSink>,
    root: CancellationToken,
    tick: Duration,
    axes: HashMap<OutputTarget, Integrator>,
}

impl RelativeAxes {
    pub fn new(sink: Arc<dyn VirtualOutputSink>, tick: Duration) -> Self {
        Self {
            sink,
            root: CancellationToken::new(),
            tick,
            axes: HashMap::new(),
        }
    }

    /// Sets the speed of `target` in full travel per second
    ///
    /// The first non-zero rate spawns the integrator starting at `start`.
    /// Must be called from within a tokio runtime.
    pub fn set_rate(&mut self, target: OutputTarget, rate: f64, start: f64) {
        let rate = if rate.is_finite() { rate } else { 0.0 };
        if let Some(integrator) = self.axes.get(&target) {
            if !integrator.handle.is_finished() {
                integrator.rate.send_replace(rate);
                return;
            }
        }
        if rate == 0.0 {
            return;
        }

        debug!("Starting relative integrator for {} at {}", target, start);
        let (rate_tx, rate_rx) = watch::channel(rate);
        let handle = tokio::spawn(integrate(
            target,
            self.sink.clone(),
            rate_rx,
            self.root.child_token(),
            start.clamp(-1.0, 1.0),
            self.tick,
        ));
        self.axes.insert(
            target,
            Integrator {
                rate: rate_tx,
                handle,
            },
        );
    }

    /// Holds `target` where it is
    pub fn stop(&mut self, target: &OutputTarget) {
        if let Some(integrator) = self.axes.get(target) {
            integrator.rate.send_replace(0.0);
        }
    }

    /// Integrators currently moving their target
    pub fn moving(&self) -> usize {
        self.axes
            .values()
            .filter(|i| !i.handle.is_finished() && *i.rate.borrow() != 0.0)
            .count()
    }

    /// Cancels and waits for every integrator task
    pub async fn shutdown(&mut self) {
        if !self.axes.is_empty() {
            info!("Stopping {} relative axes", self.axes.len());
        }
        self.root.cancel();
        self.root = CancellationToken::new();
        for (target, integrator) in self.axes.drain() {
            if let Err(e) = integrator.handle.await {
                warn!("Relative integrator for {} ended abnormally: {}", target, e);
            }
        }
    }
}

async fn integrate(
    target: OutputTarget,
    sink: Arc<dyn VirtualOutputSink>,
    mut rate: watch::Receiver<f64>,
    token: CancellationToken,
    start: f64,
    tick: Duration,
) {
    let mut value = start;
    let mut ticker = interval_at(Instant::now() + tick, tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let step = tick.as_secs_f64();

    loop {
        if *rate.borrow_and_update() == 0.0 {
            tokio::select! {
                _ = token.cancelled() => break,
                changed = rate.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    ticker.reset();
                    continue;
                }
            }
        }

        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let current = *rate.borrow();
        let next = (value + current * step).clamp(-1.0, 1.0);
        if next != value {
            value = next;
            if let Err(e) = sink.set_axis(target.device, target.input.index(), value) {
                warn!("Relative axis {} failed to write: {}", target, e);
            }
        }
    }
    debug!("Relative integrator for {} stopped at {}", target, value);
}
