use std::collections::HashMap;
use std::time::Instant;

/// Structured observer for session lifecycle events.
///
/// Injected into the capture session so front-ends choose where diagnostics
/// go without the session writing to stdout itself.
pub trait SessionLogger: Send {
    /// A named session event, e.g. a phase transition or a capture result.
    fn event(&mut self, kind: &str, detail: &str);

    /// Record how long a named step took.
    fn timing(&mut self, stage: &str, duration_ms: f64);

    /// Log a human-readable status message.
    fn info(&mut self, message: &str);

    /// Emit an end-of-session summary. Default: no-op.
    fn summary(&self) {}
}

/// Discards everything. Used by tests and embedders with their own reporting.
pub struct NullSessionLogger;

impl SessionLogger for NullSessionLogger {
    fn event(&mut self, _kind: &str, _detail: &str) {}
    fn timing(&mut self, _stage: &str, _duration_ms: f64) {}
    fn info(&mut self, _message: &str) {}
}

/// Forwards to the `log` facade and keeps per-step timing statistics for a
/// summary at session end.
pub struct LogSessionLogger {
    timings: HashMap<String, Vec<f64>>,
    events: HashMap<String, usize>,
    start_time: Instant,
}

impl LogSessionLogger {
    pub fn new() -> Self {
        Self {
            timings: HashMap::new(),
            events: HashMap::new(),
            start_time: Instant::now(),
        }
    }

    /// Returns the formatted summary, or `None` if nothing was recorded.
    pub fn summary_string(&self) -> Option<String> {
        if self.timings.is_empty() && self.events.is_empty() {
            return None;
        }

        let elapsed_s = self.start_time.elapsed().as_secs_f64();
        let mut lines = vec![format!("Session summary ({elapsed_s:.1}s):")];

        let mut stages: Vec<_> = self.timings.keys().collect();
        stages.sort();
        for stage in stages {
            let durations = &self.timings[stage];
            let total_ms: f64 = durations.iter().sum();
            let avg_ms = total_ms / durations.len().max(1) as f64;
            lines.push(format!(
                "  {stage:12}: {n} x avg {avg_ms:6.1}ms",
                n = durations.len()
            ));
        }

        let mut kinds: Vec<_> = self.events.iter().collect();
        kinds.sort();
        for (kind, count) in kinds {
            lines.push(format!("  {kind}: {count}"));
        }

        Some(lines.join("\n"))
    }

    pub fn timings_for(&self, stage: &str) -> Option<&[f64]> {
        self.timings.get(stage).map(|v| v.as_slice())
    }

    pub fn event_count(&self, kind: &str) -> usize {
        self.events.get(kind).copied().unwrap_or(0)
    }
}

impl Default for LogSessionLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLogger for LogSessionLogger {
    fn event(&mut self, kind: &str, detail: &str) {
        *self.events.entry(kind.to_string()).or_default() += 1;
        log::debug!("[{kind}] {detail}");
    }

    fn timing(&mut self, stage: &str, duration_ms: f64) {
        self.timings
            .entry(stage.to_string())
            .or_default()
            .push(duration_ms);
    }

    fn info(&mut self, message: &str) {
        log::info!("{message}");
    }

    fn summary(&self) {
        if let Some(text) = self.summary_string() {
            log::info!("\n{text}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_logger_all_methods_are_noop() {
        let mut logger = NullSessionLogger;
        logger.event("phase", "idle -> awaiting_user");
        logger.timing("capture", 5.0);
        logger.info("hello");
        logger.summary();
    }

    #[test]
    fn test_timing_records_values() {
        let mut logger = LogSessionLogger::new();
        logger.timing("capture", 20.0);
        logger.timing("capture", 30.0);
        logger.timing("persist", 5.0);

        let capture = logger.timings_for("capture").unwrap();
        assert_eq!(capture.len(), 2);
        assert!((capture[1] - 30.0).abs() < f64::EPSILON);
        assert_eq!(logger.timings_for("persist").unwrap().len(), 1);
    }

    #[test]
    fn test_events_are_counted_by_kind() {
        let mut logger = LogSessionLogger::new();
        logger.event("no_face", "frontal");
        logger.event("no_face", "frontal");
        logger.event("captured", "frontal");

        assert_eq!(logger.event_count("no_face"), 2);
        assert_eq!(logger.event_count("captured"), 1);
        assert_eq!(logger.event_count("cancelled"), 0);
    }

    #[test]
    fn test_summary_lists_stages_and_events() {
        let mut logger = LogSessionLogger::new();
        logger.timing("capture", 12.0);
        logger.event("captured", "left");

        let summary = logger.summary_string().unwrap();
        assert!(summary.contains("Session summary"));
        assert!(summary.contains("capture"));
        assert!(summary.contains("captured: 1"));
    }

    #[test]
    fn test_empty_summary_returns_none() {
        assert!(LogSessionLogger::new().summary_string().is_none());
    }
}
