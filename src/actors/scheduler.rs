//! PollingScheduler - drives periodic metric sampling
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick ─┐
//!             ├→ [no poll in flight?] spawn extract() ──→ evaluate → Metric (+ Alert) → Broadcaster
//! TriggerNow ─┘                                      └──→ Error ─────────────────────→ Broadcaster
//!     ↑
//!     └─── Commands (TriggerNow, Reschedule, GetState, Stop)
//! ```
//!
//! The extraction runs as its own task so the actor keeps answering commands
//! while it waits. The in-flight slot holds that task; as long as it is
//! occupied no other poll can start, and it is emptied on every way out
//! (success, failure, panic, abort on stop).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval, interval_at};
use tracing::{debug, info, instrument, trace, warn};

use crate::broadcaster::Broadcaster;
use crate::config::ConfigStore;
use crate::evaluator::MetricSample;
use crate::extractor::{ExtractionError, MetricExtractor};

use super::messages::{Event, SchedulerCommand, SchedulerState, TriggerOutcome};

type PollTask = JoinHandle<Result<String, ExtractionError>>;

/// Why a poll cycle was started
#[derive(Debug, Clone, Copy)]
enum PollReason {
    Tick,
    Manual,
}

/// Actor owning the poll timer and the in-flight guard
pub struct PollingScheduler {
    /// Source of raw metric text
    extractor: Arc<dyn MetricExtractor>,

    /// Shared runtime configuration (threshold is read at evaluation time)
    config: ConfigStore,

    /// Fan-out to observers
    broadcaster: Broadcaster,

    /// Command receiver for control messages
    command_rx: mpsc::Receiver<SchedulerCommand>,

    /// Upper bound for a single extraction
    extract_timeout: Duration,

    /// Current timer interval
    interval_ms: u32,

    /// Currently running extraction, if any
    in_flight: Option<PollTask>,
}

impl PollingScheduler {
    /// Create a new scheduler actor
    pub fn new(
        extractor: Arc<dyn MetricExtractor>,
        config: ConfigStore,
        broadcaster: Broadcaster,
        command_rx: mpsc::Receiver<SchedulerCommand>,
        extract_timeout: Duration,
    ) -> Self {
        let interval_ms = config.get().poll_interval_ms;

        Self {
            extractor,
            config,
            broadcaster,
            command_rx,
            extract_timeout,
            interval_ms,
            in_flight: None,
        }
    }

    /// Run the actor's main loop
    ///
    /// The first tick fires immediately, so one poll happens right away. The
    /// loop runs until a Stop command arrives or every handle is dropped.
    #[instrument(skip(self), fields(interval_ms = self.interval_ms))]
    pub async fn run(mut self) {
        debug!("starting polling scheduler");

        let mut ticker = interval(Duration::from_millis(self.interval_ms as u64));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let stop_reply = loop {
            tokio::select! {
                result = wait_for(&mut self.in_flight) => {
                    self.in_flight = None;
                    self.complete_poll(result).await;
                }

                _ = ticker.tick() => {
                    self.begin_poll(PollReason::Tick);
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(SchedulerCommand::TriggerNow { respond_to }) => {
                            debug!("received TriggerNow command");
                            let outcome = self.begin_poll(PollReason::Manual);
                            let _ = respond_to.send(outcome);
                        }

                        Some(SchedulerCommand::Reschedule { interval_ms }) => {
                            debug!("rescheduling from {}ms to {interval_ms}ms", self.interval_ms);
                            self.interval_ms = interval_ms;
                            ticker = rescheduled(interval_ms);
                        }

                        Some(SchedulerCommand::GetState { respond_to }) => {
                            let _ = respond_to.send(self.state());
                        }

                        Some(SchedulerCommand::Stop { respond_to }) => {
                            debug!("received Stop command");
                            break Some(respond_to);
                        }

                        None => {
                            warn!("command channel closed, shutting down");
                            break None;
                        }
                    }
                }
            }
        };

        self.command_rx.close();
        if let Some(task) = self.in_flight.take() {
            debug!("aborting in-flight poll");
            task.abort();
        }

        self.extractor.close().await;
        info!("polling scheduler stopped");

        if let Some(respond_to) = stop_reply {
            let _ = respond_to.send(());
        }
    }

    fn state(&self) -> SchedulerState {
        SchedulerState {
            interval_ms: self.interval_ms,
            poll_in_flight: self.in_flight.is_some(),
        }
    }

    /// Start a poll cycle unless one is already running
    fn begin_poll(&mut self, reason: PollReason) -> TriggerOutcome {
        if self.in_flight.is_some() {
            debug!(?reason, "poll already in flight, skipping");
            return TriggerOutcome::AlreadyInFlight;
        }

        trace!(?reason, "starting poll");

        let extractor = self.extractor.clone();
        let timeout = self.extract_timeout;
        self.in_flight = Some(tokio::spawn(async move {
            tokio::time::timeout(timeout, extractor.extract())
                .await
                .unwrap_or(Err(ExtractionError::Timeout(timeout)))
        }));

        TriggerOutcome::Started
    }

    /// Evaluate the extraction result and publish the resulting events
    ///
    /// The threshold is read now, so a change made while the extraction was
    /// running already applies to this sample.
    #[instrument(skip_all)]
    async fn complete_poll(&self, result: Result<String, ExtractionError>) {
        match result {
            Ok(raw) => {
                let threshold = self.config.get().threshold;
                let sample = MetricSample::from_raw(raw);
                trace!("sampled {} from {:?}", sample.value, sample.raw);

                let alert = sample.is_alert(threshold);
                let MetricSample {
                    raw,
                    value,
                    timestamp,
                } = sample;

                self.broadcaster
                    .broadcast(&Event::Metric {
                        value,
                        raw,
                        threshold,
                        ts: timestamp,
                    })
                    .await;

                if alert {
                    info!("value {value} is below threshold {threshold}");
                    self.broadcaster
                        .broadcast(&Event::Alert {
                            value,
                            threshold,
                            ts: timestamp,
                        })
                        .await;
                }
            }
            Err(e) => {
                warn!("poll failed: {e}");
                self.broadcaster
                    .broadcast(&Event::Error {
                        message: e.to_string(),
                        ts: chrono::Utc::now(),
                    })
                    .await;
            }
        }
    }
}

/// Resolve once the in-flight task finishes; pending forever when idle
async fn wait_for(slot: &mut Option<PollTask>) -> Result<String, ExtractionError> {
    match slot {
        Some(task) => task
            .await
            .unwrap_or_else(|e| Err(ExtractionError::failure(format!("poll task failed: {e}")))),
        None => std::future::pending().await,
    }
}

/// Timer whose first tick is one full interval from now
fn rescheduled(interval_ms: u32) -> Interval {
    let period = Duration::from_millis(interval_ms as u64);
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Handle for controlling a PollingScheduler
///
/// This handle provides a typed API for sending commands to the actor.
/// It can be cloned and shared across tasks.
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    /// Spawn a new scheduler actor
    ///
    /// Polling starts immediately at the interval currently held by `config`.
    pub fn spawn(
        extractor: Arc<dyn MetricExtractor>,
        config: ConfigStore,
        broadcaster: Broadcaster,
        extract_timeout: Duration,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = PollingScheduler::new(extractor, config, broadcaster, cmd_rx, extract_timeout);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Run one additional poll now, unless one is already in flight
    pub async fn trigger_now(&self) -> Result<TriggerOutcome> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::TriggerNow { respond_to: tx })
            .await
            .context("failed to send TriggerNow command")?;

        rx.await.context("failed to receive response")
    }

    /// Restart the timer at a new interval
    pub async fn reschedule(&self, interval_ms: u32) -> Result<()> {
        self.sender
            .send(SchedulerCommand::Reschedule { interval_ms })
            .await
            .context("failed to send Reschedule command")?;
        Ok(())
    }

    /// Get the current scheduler state
    pub async fn state(&self) -> Result<SchedulerState> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::GetState { respond_to: tx })
            .await
            .context("failed to send GetState command")?;

        rx.await.context("failed to receive response")
    }

    /// Stop polling and close the extractor
    ///
    /// Resolves once the extractor is closed. Stopping an already stopped
    /// scheduler is a no-op.
    pub async fn stop(&self) {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(SchedulerCommand::Stop { respond_to: tx })
            .await
            .is_err()
        {
            trace!("scheduler already stopped");
            return;
        }

        let _ = rx.await;
    }

    /// Whether the actor has terminated
    pub fn is_stopped(&self) -> bool {
        self.sender.is_closed()
    }
}
