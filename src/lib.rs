//! Threshold watch
//!
//! Periodically samples a single numeric metric from an authenticated source,
//! compares it against a mutable threshold and streams the results to every
//! connected observer. Observers may change the threshold and the poll
//! interval at runtime, or force an immediate sample.

pub mod actors;
#[cfg(feature = "api")]
pub mod api;
pub mod broadcaster;
pub mod config;
pub mod evaluator;
pub mod extractor;
pub mod protocol;
