//! Actor-based polling
//!
//! The scheduler runs as an independent async task and is controlled through
//! a cloneable handle that talks to it over a Tokio channel.
//!
//! ## Architecture Overview
//!
//! ```text
//!   ControlProtocol ──commands──▶ PollingScheduler ──extract()──▶ MetricExtractor
//!          │                             │
//!          │ Config / Info               │ Metric / Alert / Error
//!          ▼                             ▼
//!   ┌─────────────────────────────────────────┐
//!   │               Broadcaster               │
//!   └───────┬──────────────┬──────────────┬───┘
//!           ▼              ▼              ▼
//!      Observer 1     Observer 2     Observer N
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: The scheduler has an mpsc command channel for control messages
//! 2. **Events**: Published through the Broadcaster, one queue per observer
//! 3. **Request/Response**: oneshot channels for state queries and acknowledgements

pub mod messages;
pub mod scheduler;
