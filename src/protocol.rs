//! Control protocol spoken by observers
//!
//! Inbound messages are small JSON objects tagged by `type`:
//!
//! | type                | payload          | effect                                      |
//! |---------------------|------------------|---------------------------------------------|
//! | `setThreshold`      | `value`          | update threshold, broadcast Config + Info   |
//! | `setPollIntervalMs` | `value` (≥ 1000) | update interval, reschedule, Config + Info  |
//! | `getConfig`         |                  | send Config to the requesting observer only |
//! | `checkNow`          |                  | trigger an out-of-band poll                 |
//!
//! Anything that fails to decode or validate is dropped. The sender gets no
//! reply; the reason is only logged.

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument, trace, warn};

use crate::actors::messages::{Event, TriggerOutcome};
use crate::actors::scheduler::SchedulerHandle;
use crate::broadcaster::{Broadcaster, DeliveryError, ObserverId};
use crate::config::{Config, ConfigStore, ValidationError};

/// A decoded inbound message
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ControlMessage {
    SetThreshold {
        #[serde(default)]
        value: Value,
    },
    SetPollIntervalMs {
        #[serde(default)]
        value: Value,
    },
    GetConfig,
    CheckNow,
}

impl ControlMessage {
    /// Decode one inbound text frame
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

/// Why an inbound message had no effect
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed or unknown message: {0}")]
    Malformed(String),

    #[error("rejected: {0}")]
    Rejected(#[from] ValidationError),

    #[error("reply not delivered: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("scheduler is not running")]
    SchedulerUnavailable,
}

/// What a handled message did
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    ThresholdUpdated(Config),
    IntervalUpdated(Config),
    ConfigSent,
    PollTriggered(TriggerOutcome),
}

/// Interpret a JSON payload as a number
///
/// Numbers and numeric strings are accepted; everything else is rejected.
pub fn numeric_value(value: &Value) -> Result<f64, ValidationError> {
    match value {
        Value::Number(number) => number.as_f64().ok_or(ValidationError::NotNumeric),
        Value::String(text) => {
            let text = text.trim();
            if text.is_empty() {
                return Err(ValidationError::NotNumeric);
            }
            text.parse::<f64>().map_err(|_| ValidationError::NotNumeric)
        }
        _ => Err(ValidationError::NotNumeric),
    }
}

/// Applies observer requests to the configuration and the scheduler
#[derive(Clone)]
pub struct ControlProtocol {
    config: ConfigStore,
    broadcaster: Broadcaster,
    scheduler: SchedulerHandle,
}

impl ControlProtocol {
    pub fn new(config: ConfigStore, broadcaster: Broadcaster, scheduler: SchedulerHandle) -> Self {
        Self {
            config,
            broadcaster,
            scheduler,
        }
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Greet a freshly registered observer with the current configuration
    pub async fn on_connect(&self, observer: ObserverId) -> Result<(), DeliveryError> {
        self.broadcaster
            .send_to(observer, &Event::from(self.config.get()))
            .await
    }

    /// Handle one inbound frame, logging and swallowing any rejection
    pub async fn dispatch(&self, from: ObserverId, text: &str) {
        match self.handle_message(from, text).await {
            Ok(outcome) => trace!(observer = %from, "handled {outcome:?}"),
            Err(e) => debug!(observer = %from, "ignoring message: {e}"),
        }
    }

    /// Handle one inbound frame
    #[instrument(skip(self, text), fields(observer = %from))]
    pub async fn handle_message(&self, from: ObserverId, text: &str) -> Result<Outcome, ProtocolError> {
        match ControlMessage::decode(text)? {
            ControlMessage::SetThreshold { value } => {
                let applied = self.config.set_threshold(numeric_value(&value)?)?;
                let config = applied.config;

                self.broadcaster.broadcast(&Event::from(config)).await;
                self.broadcaster
                    .broadcast(&Event::Info {
                        message: format!("Threshold updated to {}", config.threshold),
                    })
                    .await;

                Ok(Outcome::ThresholdUpdated(config))
            }

            ControlMessage::SetPollIntervalMs { value } => {
                let applied = self.config.set_poll_interval_ms(numeric_value(&value)?)?;
                let config = applied.config;

                if applied.changed
                    && let Err(e) = self.scheduler.reschedule(config.poll_interval_ms).await
                {
                    warn!("could not reschedule: {e:#}");
                }

                self.broadcaster.broadcast(&Event::from(config)).await;
                self.broadcaster
                    .broadcast(&Event::Info {
                        message: format!(
                            "Poll interval set to {} s",
                            (config.poll_interval_ms as f64 / 1000.0).round()
                        ),
                    })
                    .await;

                Ok(Outcome::IntervalUpdated(config))
            }

            ControlMessage::GetConfig => {
                self.broadcaster
                    .send_to(from, &Event::from(self.config.get()))
                    .await?;
                Ok(Outcome::ConfigSent)
            }

            ControlMessage::CheckNow => {
                let outcome = self.scheduler.trigger_now().await.map_err(|e| {
                    warn!("could not trigger poll: {e:#}");
                    ProtocolError::SchedulerUnavailable
                })?;
                Ok(Outcome::PollTriggered(outcome))
            }
        }
    }
}
