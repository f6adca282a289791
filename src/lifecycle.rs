//! App-lifecycle handling: background/foreground transitions.
//!
//! Mobile hosts deliver lifecycle signals noisily: spurious flaps during
//! startup, rapid background/foreground pairs around permission dialogs and
//! notification shades. The coordinator debounces them and turns the stable
//! ones into session actions.

use crate::models::HealthStatus;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Host-reported app lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    Foreground,
    Background,
}

/// Timing knobs for lifecycle debouncing. The defaults fit real app
/// startup; tests shrink them.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleOptions {
    /// Signals within this window after startup are recorded, not acted on.
    pub startup_grace: Duration,
    /// A signal acts only after holding steady this long.
    pub dwell: Duration,
    /// Delay between foreground recovery actions and the resync pass.
    pub settle: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            startup_grace: Duration::from_millis(1_500),
            dwell: Duration::from_millis(300),
            settle: Duration::from_millis(500),
        }
    }
}

/// Session operations the coordinator drives. Abstracted so lifecycle
/// timing can be tested without a connection.
#[async_trait]
pub(crate) trait SessionControl: Send + Sync {
    async fn pause_reconnect(&self);
    async fn resume_reconnect(&self);
    async fn reset_subscriptions(&self);
    async fn check_health(&self) -> HealthStatus;
    async fn force_reconnect(&self);
    async fn resync(&self);
}

struct Inner {
    options: LifecycleOptions,
    control: Arc<dyn SessionControl>,
    /// Dwell tasks are spawned through this handle, not the ambient
    /// runtime: hosts deliver lifecycle callbacks from OS threads.
    runtime: tokio::runtime::Handle,
    started_at: Instant,
    /// Bumped per signal; a dwell task only acts if it is still current.
    generation: AtomicU64,
    last_applied: Mutex<Option<LifecycleSignal>>,
    /// Set on shutdown; signals are dropped from then on.
    closed: AtomicBool,
}

pub(crate) struct LifecycleCoordinator {
    inner: Arc<Inner>,
}

impl LifecycleCoordinator {
    /// Must be called from within a tokio runtime; the runtime handle is
    /// captured here so later signals may arrive from any thread.
    pub fn new(options: LifecycleOptions, control: Arc<dyn SessionControl>) -> Self {
        Self {
            inner: Arc::new(Inner {
                options,
                control,
                runtime: tokio::runtime::Handle::current(),
                started_at: Instant::now(),
                generation: AtomicU64::new(0),
                last_applied: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Stop acting on signals. Dwell tasks already in flight re-check this
    /// and bail instead of driving session actions.
    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }

    /// Feed a host lifecycle signal. Returns immediately; any action runs
    /// after the dwell window on a spawned task.
    pub fn signal(&self, signal: LifecycleSignal) {
        let inner = self.inner.clone();
        if inner.closed.load(Ordering::SeqCst) {
            log::debug!("Ignoring {:?} signal after shutdown", signal);
            return;
        }
        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        if inner.started_at.elapsed() < inner.options.startup_grace {
            log::debug!(
                "Ignoring {:?} signal during startup grace window",
                signal
            );
            return;
        }

        self.inner.runtime.spawn(async move {
            tokio::time::sleep(inner.options.dwell).await;
            if inner.closed.load(Ordering::SeqCst) {
                log::debug!("Discarding {:?} signal after shutdown", signal);
                return;
            }
            if inner.generation.load(Ordering::SeqCst) != generation {
                // Superseded while dwelling; the app flapped.
                log::debug!("Discarding flapped {:?} signal", signal);
                return;
            }
            let repeated = {
                let mut last = match inner.last_applied.lock() {
                    Ok(last) => last,
                    Err(_) => return,
                };
                let repeated = *last == Some(signal);
                *last = Some(signal);
                repeated
            };
            if repeated {
                log::debug!("Ignoring repeated {:?} signal", signal);
                return;
            }
            match signal {
                LifecycleSignal::Background => inner.on_background().await,
                LifecycleSignal::Foreground => inner.on_foreground().await,
            }
        });
    }
}

impl Inner {
    async fn on_background(&self) {
        log::info!("[boda-link] App backgrounded; pausing reconnection");
        self.control.pause_reconnect().await;
    }

    /// Foreground recovery: resume reconnection, void stale memberships,
    /// probe health, force a reconnect if the probe fails, and after the
    /// settle delay run one resync pass whether or not a reconnect happened.
    async fn on_foreground(&self) {
        log::info!("[boda-link] App foregrounded; refreshing session");
        self.control.resume_reconnect().await;
        self.control.reset_subscriptions().await;

        let health = self.control.check_health().await;
        if !health.healthy {
            log::info!(
                "Connection unhealthy after foreground ({}); forcing reconnect",
                health.detail.as_deref().unwrap_or("no detail")
            );
            self.control.force_reconnect().await;
        }

        tokio::time::sleep(self.options.settle).await;
        self.control.resync().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[derive(Default)]
    struct MockControl {
        healthy: bool,
        pauses: AtomicU32,
        resumes: AtomicU32,
        resets: AtomicU32,
        forces: AtomicU32,
        resyncs: AtomicU32,
    }

    #[async_trait]
    impl SessionControl for MockControl {
        async fn pause_reconnect(&self) {
            self.pauses.fetch_add(1, Ordering::SeqCst);
        }
        async fn resume_reconnect(&self) {
            self.resumes.fetch_add(1, Ordering::SeqCst);
        }
        async fn reset_subscriptions(&self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }
        async fn check_health(&self) -> HealthStatus {
            if self.healthy {
                HealthStatus::healthy()
            } else {
                HealthStatus::unhealthy("probe failed")
            }
        }
        async fn force_reconnect(&self) {
            self.forces.fetch_add(1, Ordering::SeqCst);
        }
        async fn resync(&self) {
            self.resyncs.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn options(grace_ms: u64) -> LifecycleOptions {
        LifecycleOptions {
            startup_grace: Duration::from_millis(grace_ms),
            dwell: Duration::from_millis(50),
            settle: Duration::from_millis(50),
        }
    }

    async fn settle_tasks() {
        // Let spawned dwell tasks run to completion under paused time.
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_signals_during_startup_grace_are_ignored() {
        let control = Arc::new(MockControl {
            healthy: true,
            ..MockControl::default()
        });
        let coordinator =
            LifecycleCoordinator::new(options(10_000), control.clone() as Arc<dyn SessionControl>);

        coordinator.signal(LifecycleSignal::Background);
        settle_tasks().await;

        assert_eq!(control.pauses.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flapped_signal_is_discarded() {
        let control = Arc::new(MockControl {
            healthy: true,
            ..MockControl::default()
        });
        let coordinator =
            LifecycleCoordinator::new(options(0), control.clone() as Arc<dyn SessionControl>);

        coordinator.signal(LifecycleSignal::Background);
        tokio::time::sleep(Duration::from_millis(10)).await;
        coordinator.signal(LifecycleSignal::Foreground);
        settle_tasks().await;

        // Only the foreground path ran.
        assert_eq!(control.pauses.load(Ordering::SeqCst), 0);
        assert_eq!(control.resumes.load(Ordering::SeqCst), 1);
        assert_eq!(control.resyncs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_pauses_reconnection() {
        let control = Arc::new(MockControl {
            healthy: true,
            ..MockControl::default()
        });
        let coordinator =
            LifecycleCoordinator::new(options(0), control.clone() as Arc<dyn SessionControl>);

        coordinator.signal(LifecycleSignal::Background);
        settle_tasks().await;

        assert_eq!(control.pauses.load(Ordering::SeqCst), 1);
        assert_eq!(control.resyncs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreground_healthy_skips_force_reconnect() {
        let control = Arc::new(MockControl {
            healthy: true,
            ..MockControl::default()
        });
        let coordinator =
            LifecycleCoordinator::new(options(0), control.clone() as Arc<dyn SessionControl>);

        coordinator.signal(LifecycleSignal::Foreground);
        settle_tasks().await;

        assert_eq!(control.resumes.load(Ordering::SeqCst), 1);
        assert_eq!(control.resets.load(Ordering::SeqCst), 1);
        assert_eq!(control.forces.load(Ordering::SeqCst), 0);
        assert_eq!(control.resyncs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreground_unhealthy_forces_reconnect_then_resyncs() {
        let control = Arc::new(MockControl::default()); // healthy=false
        let coordinator =
            LifecycleCoordinator::new(options(0), control.clone() as Arc<dyn SessionControl>);

        coordinator.signal(LifecycleSignal::Foreground);
        settle_tasks().await;

        assert_eq!(control.forces.load(Ordering::SeqCst), 1);
        assert_eq!(control.resyncs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_after_shutdown_is_dropped() {
        let control = Arc::new(MockControl {
            healthy: true,
            ..MockControl::default()
        });
        let coordinator =
            LifecycleCoordinator::new(options(0), control.clone() as Arc<dyn SessionControl>);

        coordinator.shutdown();
        coordinator.signal(LifecycleSignal::Foreground);
        settle_tasks().await;

        assert_eq!(control.resumes.load(Ordering::SeqCst), 0);
        assert_eq!(control.resyncs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_mid_dwell_cancels_pending_action() {
        let control = Arc::new(MockControl {
            healthy: true,
            ..MockControl::default()
        });
        let coordinator =
            LifecycleCoordinator::new(options(0), control.clone() as Arc<dyn SessionControl>);

        coordinator.signal(LifecycleSignal::Foreground);
        // Shut down while the dwell task is still sleeping.
        tokio::time::sleep(Duration::from_millis(10)).await;
        coordinator.shutdown();
        settle_tasks().await;

        assert_eq!(control.resumes.load(Ordering::SeqCst), 0);
        assert_eq!(control.resyncs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_signal_from_host_thread_outside_runtime() {
        let control = Arc::new(MockControl {
            healthy: true,
            ..MockControl::default()
        });
        let coordinator = Arc::new(LifecycleCoordinator::new(
            LifecycleOptions {
                startup_grace: Duration::ZERO,
                dwell: Duration::from_millis(10),
                settle: Duration::from_millis(10),
            },
            control.clone() as Arc<dyn SessionControl>,
        ));

        // OS lifecycle hooks arrive on host threads with no runtime context.
        let from_host = coordinator.clone();
        std::thread::spawn(move || from_host.signal(LifecycleSignal::Background))
            .join()
            .unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while control.pauses.load(Ordering::SeqCst) == 0 {
            assert!(std::time::Instant::now() < deadline, "pause never ran");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(control.pauses.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_signal_acts_once() {
        let control = Arc::new(MockControl {
            healthy: true,
            ..MockControl::default()
        });
        let coordinator =
            LifecycleCoordinator::new(options(0), control.clone() as Arc<dyn SessionControl>);

        coordinator.signal(LifecycleSignal::Background);
        settle_tasks().await;
        coordinator.signal(LifecycleSignal::Background);
        settle_tasks().await;

        assert_eq!(control.pauses.load(Ordering::SeqCst), 1);
    }
}
