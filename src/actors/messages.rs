//! Message types for actor communication
//!
//! ## Design Principles
//!
//! 1. **Commands**: Request/response messages sent to the scheduler via mpsc
//! 2. **Events**: Notifications serialized once and fanned out to every observer
//! 3. **Immutability**: Events are cloneable and never modified after creation

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::sync::oneshot;

use crate::config::Config;

/// Everything that is ever pushed to observers
///
/// Serialized as a JSON object with a lowercase `type` tag, e.g.
/// `{"type":"config","threshold":600,"pollIntervalMs":15000}`.
/// A `NaN` value is serialized as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Event {
    /// A freshly evaluated sample
    Metric {
        #[serde(deserialize_with = "nullable_f64")]
        value: f64,
        raw: String,
        threshold: f64,
        #[serde(serialize_with = "iso8601")]
        ts: DateTime<Utc>,
    },

    /// A sample fell below the threshold
    Alert {
        #[serde(deserialize_with = "nullable_f64")]
        value: f64,
        threshold: f64,
        #[serde(serialize_with = "iso8601")]
        ts: DateTime<Utc>,
    },

    /// Current runtime configuration
    Config {
        threshold: f64,
        #[serde(rename = "pollIntervalMs")]
        poll_interval_ms: u32,
    },

    /// Human readable notice (configuration changes)
    Info { message: String },

    /// A poll cycle failed
    Error {
        message: String,
        #[serde(serialize_with = "iso8601")]
        ts: DateTime<Utc>,
    },
}

impl From<Config> for Event {
    fn from(config: Config) -> Self {
        Event::Config {
            threshold: config.threshold,
            poll_interval_ms: config.poll_interval_ms,
        }
    }
}

impl Event {
    /// The tag this event is serialized with
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Metric { .. } => "metric",
            Event::Alert { .. } => "alert",
            Event::Config { .. } => "config",
            Event::Info { .. } => "info",
            Event::Error { .. } => "error",
        }
    }
}

fn iso8601<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn nullable_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

/// Answer to a manual poll request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A new poll cycle was started
    Started,

    /// A poll was already running, the request was dropped
    AlreadyInFlight,
}

/// Snapshot of the scheduler's own state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerState {
    /// Interval the timer currently runs at
    pub interval_ms: u32,

    /// Whether an extraction is currently running
    pub poll_in_flight: bool,
}

/// Commands that can be sent to the PollingScheduler
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Run one extra poll outside the regular cadence
    ///
    /// Dropped if a poll is already in flight.
    TriggerNow {
        respond_to: oneshot::Sender<TriggerOutcome>,
    },

    /// Restart the timer at a new interval
    ///
    /// An in-flight poll is not affected; the next tick fires one full
    /// interval after the reschedule.
    Reschedule { interval_ms: u32 },

    /// Get the current scheduler state
    GetState {
        respond_to: oneshot::Sender<SchedulerState>,
    },

    /// Stop the timer, abort any in-flight poll and close the extractor
    ///
    /// The response is sent once the extractor has been closed.
    Stop { respond_to: oneshot::Sender<()> },
}
