//! The focus controller: one consumer that measures images, batches them,
//! runs the optimizer and pushes new targets to the mirror.

use bf_io::{publish_with_retry, ActuatorSink, MetricSource, ParameterStore, RetryPolicy};
use bf_optimizer::{random_direction, Batcher, ClimberSettings, FocusHistory, HillClimber};
use bf_types::{internal_error, BfError, BfResult, Decision, Direction, FocusConfig};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

/// Events emitted by the controller for external consumption (logging,
/// dashboards, tests).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ControllerEvent {
    ImageSkipped {
        path: PathBuf,
        error: String,
    },
    MeasurementRejected {
        value: f64,
        error: String,
    },
    RoundCompleted {
        decision: Decision,
    },
    RoundFailed {
        group_value: f64,
        error: String,
    },
    TargetPublished {
        target: i64,
        attempts: u32,
    },
    PublishFailed {
        target: i64,
        error: String,
    },
}

/// What happened to the actuator in a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PublishOutcome {
    /// Target unchanged and the device already has it.
    Skipped,
    Published { attempts: u32 },
    Failed { error: String },
}

/// Outcome of one completed decision round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundReport {
    pub decision: Decision,
    pub publish: PublishOutcome,
}

/// The closed-loop controller. Generic over the metric and the actuator
/// transport so tests can plug in scripted implementations.
pub struct FocusController<M: MetricSource + 'static, S: ActuatorSink> {
    metric: Arc<M>,
    sink: S,
    batcher: Batcher,
    climber: HillClimber,
    store: ParameterStore,
    retry: RetryPolicy,
    /// Most recent events, oldest first, at most `event_capacity` long.
    events: VecDeque<ControllerEvent>,
    event_capacity: usize,
    events_dropped: u64,
    /// False once a publish has exhausted its retries, until one succeeds.
    actuator_in_sync: bool,
    images_measured: u64,
}

impl<M: MetricSource + 'static, S: ActuatorSink> FocusController<M, S> {
    /// Create a controller seeded from the target in `store`.
    pub fn new(
        config: &FocusConfig,
        metric: M,
        sink: S,
        store: ParameterStore,
        direction: Direction,
    ) -> BfResult<Self> {
        config.validate()?;
        let batcher = Batcher::new(config.image_group_size)?;
        let climber = HillClimber::new(store.target(), direction, ClimberSettings::from(config))?;

        info!(
            initial_target = store.target(),
            bounds = %climber.bounds(),
            direction = %direction,
            group_size = config.image_group_size,
            "focus controller ready"
        );

        Ok(Self {
            metric: Arc::new(metric),
            sink,
            batcher,
            climber,
            store,
            retry: RetryPolicy::from(&config.retry),
            events: VecDeque::with_capacity(config.event_log_capacity.min(1_024)),
            event_capacity: config.event_log_capacity,
            events_dropped: 0,
            actuator_in_sync: true,
            images_measured: 0,
        })
    }

    /// Like [`FocusController::new`], drawing the initial direction from the
    /// configured seed.
    pub fn from_config(
        config: &FocusConfig,
        metric: M,
        sink: S,
        store: ParameterStore,
    ) -> BfResult<Self> {
        Self::new(config, metric, sink, store, random_direction(config.seed))
    }

    pub fn climber(&self) -> &HillClimber {
        &self.climber
    }

    pub fn history(&self) -> &FocusHistory {
        self.climber.history()
    }

    pub fn batcher(&self) -> &Batcher {
        &self.batcher
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn store(&self) -> &ParameterStore {
        &self.store
    }

    /// Retained events, oldest first.
    pub fn events(&self) -> &VecDeque<ControllerEvent> {
        &self.events
    }

    pub fn drain_events(&mut self) -> Vec<ControllerEvent> {
        self.events.drain(..).collect()
    }

    /// Events discarded because the log was full.
    pub fn events_dropped(&self) -> u64 {
        self.events_dropped
    }

    fn record(&mut self, event: ControllerEvent) {
        if self.event_capacity == 0 {
            self.events_dropped += 1;
            return;
        }
        while self.events.len() >= self.event_capacity {
            self.events.pop_front();
            self.events_dropped += 1;
        }
        self.events.push_back(event);
    }

    pub fn actuator_in_sync(&self) -> bool {
        self.actuator_in_sync
    }

    pub fn images_measured(&self) -> u64 {
        self.images_measured
    }

    /// Measure one image and feed it through. Returns a report when the image
    /// completed a group.
    ///
    /// Undecodable images are skipped without shortening the batch; the
    /// group waits for the next good image.
    pub async fn handle_image(&mut self, path: &Path) -> BfResult<Option<RoundReport>> {
        let metric = Arc::clone(&self.metric);
        let owned = path.to_path_buf();
        let measured = tokio::task::spawn_blocking(move || metric.measure(&owned))
            .await
            .map_err(|e| internal_error!("metric task failed: {e}"))?;

        match measured {
            Ok(value) => {
                self.images_measured += 1;
                self.handle_measurement(value).await
            }
            Err(e @ BfError::ImageDecode { .. }) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable image");
                self.record(ControllerEvent::ImageSkipped {
                    path: path.to_path_buf(),
                    error: e.to_string(),
                });
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Feed one raw measurement.
    pub async fn handle_measurement(&mut self, value: f64) -> BfResult<Option<RoundReport>> {
        let group_value = match self.batcher.push(value) {
            Ok(Some(group_value)) => group_value,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!(value, error = %e, "measurement rejected");
                self.record(ControllerEvent::MeasurementRejected {
                    value,
                    error: e.to_string(),
                });
                return Err(e);
            }
        };

        self.run_round(group_value).await.map(Some)
    }

    /// One decision round for a complete group.
    pub async fn run_round(&mut self, group_value: f64) -> BfResult<RoundReport> {
        let decision = match self.climber.decide(group_value) {
            Ok(decision) => decision,
            Err(e) => {
                error!(group_value, error = %e, "decision round failed, state unchanged");
                self.record(ControllerEvent::RoundFailed {
                    group_value,
                    error: e.to_string(),
                });
                return Err(e);
            }
        };

        if decision.is_hold() {
            self.batcher.reset();
            info!(
                round = decision.round,
                group_value,
                focus = decision.target,
                held = true,
                outcome = %decision.outcome,
                "decision round"
            );
        } else {
            info!(
                round = decision.round,
                group_value,
                focus = decision.target,
                outcome = %decision.outcome,
                direction = %decision.direction,
                record = decision.record_value,
                "decision round"
            );
        }

        self.record(ControllerEvent::RoundCompleted {
            decision: decision.clone(),
        });

        let publish = if decision.target_changed() || !self.actuator_in_sync {
            self.publish(decision.target).await
        } else {
            PublishOutcome::Skipped
        };

        Ok(RoundReport { decision, publish })
    }

    /// Write the parameter file and send it, with retries. Failures are
    /// logged and recorded, never propagated: the loop keeps optimizing.
    async fn publish(&mut self, target: i64) -> PublishOutcome {
        let result = match self.store.write_target(target) {
            Ok(()) => publish_with_retry(&mut self.sink, target, &self.retry).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(attempts) => {
                if !self.actuator_in_sync {
                    info!(focus = target, "actuator back in sync");
                }
                self.actuator_in_sync = true;
                self.record(ControllerEvent::TargetPublished { target, attempts });
                PublishOutcome::Published { attempts }
            }
            Err(e) => {
                self.actuator_in_sync = false;
                error!(
                    focus = target,
                    sink = self.sink.name(),
                    error = %e,
                    "actuator out of sync: device may not hold the current target"
                );
                self.record(ControllerEvent::PublishFailed {
                    target,
                    error: e.to_string(),
                });
                PublishOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    /// Consume image paths until the channel closes or `shutdown` flips.
    ///
    /// Round-local failures are logged and skipped; anything else stops the
    /// loop.
    pub async fn run(
        &mut self,
        mut images: mpsc::Receiver<PathBuf>,
        mut shutdown: watch::Receiver<bool>,
    ) -> BfResult<()> {
        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("focus controller stopping");
                        return Ok(());
                    }
                }
                next = images.recv() => {
                    let Some(path) = next else {
                        info!("image source closed, focus controller stopping");
                        return Ok(());
                    };
                    match self.handle_image(&path).await {
                        Ok(_) => {}
                        Err(e) if e.is_round_local() => {}
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }
}
