//! # Console Display
//!
//! Terminal consumer of the sample channel. Owns everything that is shown;
//! the session never touches it.

use crate::sample_channel::HeartRateSample;
use crate::session::ConnectionState;
use crate::statistics::Statistics;

const WAITING: &str = "Waiting for data...";

#[derive(Debug, Default)]
pub struct HeartRateDisplay {
    latest: Option<HeartRateSample>,
}

impl HeartRateDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a drained batch. Returns the line to print when something new arrived.
    pub fn update(&mut self, samples: Vec<HeartRateSample>) -> Option<String> {
        let newest = samples.into_iter().last()?;
        self.latest = Some(newest);
        Some(self.current())
    }

    pub fn current(&self) -> String {
        match self.latest {
            Some(sample) => format!("{} bpm", sample.value),
            None => WAITING.to_string(),
        }
    }
}

pub fn format_statistics(stats: &Statistics) -> String {
    match (stats.mean(), stats.max(), stats.min()) {
        (Some(mean), Some(max), Some(min)) => format!(
            "avg {:.1} | max {} | min {} | {} samples",
            mean,
            max,
            min,
            stats.count()
        ),
        _ => WAITING.to_string(),
    }
}

/// End-of-session line, with the raw totals behind the average
pub fn format_summary(stats: &Statistics) -> String {
    match stats.mean() {
        Some(mean) => format!(
            "{} samples, avg {:.1} bpm ({} / {}), max {}, min {}",
            stats.count(),
            mean,
            stats.sum(),
            stats.count(),
            stats.max().unwrap_or_default(),
            stats.min().unwrap_or_default()
        ),
        None => "no heart rate received".to_string(),
    }
}

pub fn format_state(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Idle => "Idle",
        ConnectionState::Connecting => "Connecting...",
        ConnectionState::Connected => "Connected",
        ConnectionState::Disconnected => "Disconnected, reconnecting...",
        ConnectionState::Stopping => "Stopping...",
        ConnectionState::Stopped => "Stopped",
    }
}
