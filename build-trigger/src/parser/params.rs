use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

static PARAM_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^p:(\w+)=(.*)$").expect("valid parameter regex"));

/// Collects `p:<name>=<value>` lines from a comment body.
///
/// Lines are split on `\r\n`, `\n` or `\r`. The value is the rest of the line
/// and may be empty or contain `=`. When a name repeats, the last line wins.
pub fn extract_parameters(text: &str) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    for line in split_lines(text) {
        if let Some(caps) = PARAM_LINE.captures(line) {
            params.insert(caps[1].to_string(), caps[2].to_string());
        }
    }
    params
}

fn split_lines(text: &str) -> impl Iterator<Item = &str> {
    // `\r\n` is split as `\r` + `\n`; the empty piece in between is harmless.
    text.split(['\r', '\n'])
}
