//! Operator-facing log of the last poll cycle.
//!
//! Separate from `tracing`: it holds only the lines of the most recent
//! cycle so they can be shown as-is next to the job.

use chrono::Utc;

#[derive(Debug, Clone, Default)]
pub struct PollLog {
    lines: Vec<String>,
}

impl PollLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.lines.clear();
    }

    pub fn log(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    /// Appends a line with the failure cause on the same line.
    pub fn log_error(&mut self, line: &str, err: &dyn std::error::Error) {
        self.lines.push(format!("{line}: {err}"));
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn timestamp() -> String {
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_drops_previous_cycle() {
        let mut log = PollLog::new();
        log.log("first");
        log.reset();
        log.log("second");
        assert_eq!(log.lines(), ["second".to_string()]);
    }

    #[test]
    fn errors_are_inlined() {
        let mut log = PollLog::new();
        let err = std::io::Error::other("boom");
        log.log_error("Cannot fetch pull request list", &err);
        assert_eq!(log.lines()[0], "Cannot fetch pull request list: boom");
    }

    #[test]
    fn timestamp_is_utc() {
        assert!(PollLog::timestamp().ends_with(" UTC"));
    }
}
