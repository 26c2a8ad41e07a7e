use regex::Regex;

use crate::errors::ConfigError;

/// Comma-separated phrases matched as case-insensitive substrings.
///
/// Entries are trimmed; blank entries are dropped so that `"a,,b"` or a
/// trailing comma never matches every text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhraseList {
    phrases: Vec<String>,
}

impl PhraseList {
    pub fn parse(raw: &str) -> Self {
        let phrases = raw
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_lowercase)
            .collect();
        Self { phrases }
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }

    /// True when any phrase occurs in `text`, ignoring case.
    pub fn matches(&self, text: &str) -> bool {
        if text.is_empty() || self.phrases.is_empty() {
            return false;
        }
        let haystack = text.to_lowercase();
        self.phrases.iter().any(|p| haystack.contains(p.as_str()))
    }
}

/// Destination-branch filter built from comma-separated regexes.
///
/// Each pattern must match the whole branch name. An empty filter accepts
/// every branch.
#[derive(Debug, Clone, Default)]
pub struct BranchFilter {
    patterns: Vec<Regex>,
}

impl BranchFilter {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let patterns = raw
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| {
                Regex::new(&format!("^(?:{p})$")).map_err(|source| {
                    ConfigError::InvalidBranchPattern {
                        pattern: p.to_string(),
                        source,
                    }
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn accepts(&self, branch: &str) -> bool {
        self.patterns.is_empty() || self.patterns.iter().any(|re| re.is_match(branch))
    }
}
