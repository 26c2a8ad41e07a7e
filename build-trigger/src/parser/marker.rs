//! Build start/finish marker comments.
//!
//! Markers are the only record of what was built: the resolver replays them
//! on every poll to decide whether a commit pair still needs a build. Text
//! must stay byte-compatible with markers written by earlier runs.

use regex::{Regex, RegexBuilder};

use crate::errors::ConfigError;

const STARTED_TAG: &str = "BuildStarted";
const FINISHED_TAG: &str = "BuildFinished";

/// Structural view over a comment body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Marker {
    Started { source: String, destination: String },
    Finished { source: String, destination: String },
    None,
}

impl Marker {
    pub fn is_marker(&self) -> bool {
        !matches!(self, Marker::None)
    }

    /// `(source, destination)` hashes embedded in the marker.
    pub fn hashes(&self) -> Option<(&str, &str)> {
        match self {
            Marker::Started {
                source,
                destination,
            }
            | Marker::Finished {
                source,
                destination,
            } => Some((source.as_str(), destination.as_str())),
            Marker::None => None,
        }
    }
}

/// Recognizes and renders the markers of one job.
///
/// The job name is used literally when rendering and escaped when matching,
/// so markers of other jobs on the same pull request are never recognized.
#[derive(Debug, Clone)]
pub struct MarkerMatcher {
    job: String,
    started: Regex,
    finished: Regex,
}

impl MarkerMatcher {
    pub fn new(job: impl Into<String>) -> Result<Self, ConfigError> {
        let job = job.into();
        let started = marker_regex(STARTED_TAG, &job)?;
        let finished = marker_regex(FINISHED_TAG, &job)?;
        Ok(Self {
            job,
            started,
            finished,
        })
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    /// Start is checked before finish.
    pub fn classify(&self, text: &str) -> Marker {
        if let Some(caps) = self.started.captures(text) {
            return Marker::Started {
                source: caps[1].to_string(),
                destination: caps[2].to_string(),
            };
        }
        if let Some(caps) = self.finished.captures(text) {
            return Marker::Finished {
                source: caps[1].to_string(),
                destination: caps[2].to_string(),
            };
        }
        Marker::None
    }

    pub fn is_finished(&self, text: &str) -> bool {
        self.finished.is_match(text)
    }

    pub fn render_started(&self, source: &str, destination: &str) -> String {
        format!("[*{STARTED_TAG}* **{}**] {source} into {destination}", self.job)
    }

    /// Finish marker followed by the result line. `label` is the status
    /// glyph text, `duration` is already formatted.
    pub fn render_finished(
        &self,
        source: &str,
        destination: &str,
        label: &str,
        build_url: &str,
        build_number: u64,
        duration: &str,
    ) -> String {
        format!(
            "[*{FINISHED_TAG}* **{}**] {source} into {destination} \n\n \
             **[{label}]({build_url})** - Build *&#x0023;{build_number}* which took *{duration}*",
            self.job
        )
    }
}

fn marker_regex(tag: &str, job: &str) -> Result<Regex, ConfigError> {
    let pattern = format!(
        r"\[\*{tag}\* \*\*{}\*\*\] ([0-9a-f]+) into ([0-9a-f]+)",
        regex::escape(job)
    );
    RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| ConfigError::InvalidJobName {
            name: job.to_string(),
            source,
        })
}
