//! Threshold evaluation
//!
//! Turns the raw text scraped from the source into a number and decides
//! whether it should raise an alert.
//!
//! ```text
//! "523,4 kW" → strip → "523,4" → first comma to point → "523.4" → 523.4
//! ```
//!
//! Anything that does not parse becomes `NaN`. A `NaN` sample never alerts,
//! but it is still reported so observers can see the parse failure.

use chrono::{DateTime, Utc};

/// One reading taken during a single poll cycle
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    /// Text exactly as returned by the extractor
    pub raw: String,

    /// Parsed value, `NaN` if the raw text was not a number
    pub value: f64,

    /// When the sample was evaluated
    pub timestamp: DateTime<Utc>,
}

impl MetricSample {
    pub fn from_raw(raw: String) -> Self {
        let value = parse_metric(&raw);
        Self {
            raw,
            value,
            timestamp: Utc::now(),
        }
    }

    /// Whether this sample is below `threshold`
    pub fn is_alert(&self, threshold: f64) -> bool {
        is_alert(self.value, threshold)
    }
}

/// Keep only digits, commas, periods and minus signs, then turn the first
/// comma into a decimal point.
pub fn normalize(raw: &str) -> String {
    let stripped: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, ',' | '.' | '-'))
        .collect();

    stripped.replacen(',', ".", 1)
}

/// Parse a localized metric string, yielding `NaN` when it is not a number
pub fn parse_metric(raw: &str) -> f64 {
    let normalized = normalize(raw);
    if normalized.is_empty() {
        return f64::NAN;
    }

    normalized.parse::<f64>().unwrap_or(f64::NAN)
}

/// Strictly-below comparison; `NaN` never alerts
pub fn is_alert(value: f64, threshold: f64) -> bool {
    !value.is_nan() && value < threshold
}
