//! Inline Graphite tag parsing (`metric.path;key=value;key2=value2`).

use crate::schema::Labels;
use std::fmt;

/// The identifier carried tags that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagParseError {
    pub identifier: String,
}

impl fmt::Display for TagParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error parsing tags on {}", self.identifier)
    }
}

impl std::error::Error for TagParseError {}

/// Split a raw identifier into its base name and inline tags.
///
/// Parsing is strict: the number of `;` must equal the number of `=` and
/// every tag segment needs a `=`. Any violation rejects the whole identifier.
/// A repeated key keeps its last value.
pub fn parse_metric_name_and_tags(raw: &str) -> Result<(String, Labels), TagParseError> {
    if !raw.contains(';') {
        return Ok((raw.to_string(), Labels::new()));
    }

    let err = || TagParseError {
        identifier: raw.to_string(),
    };

    if raw.matches(';').count() != raw.matches('=').count() {
        return Err(err());
    }

    let mut segments = raw.split(';');
    let name = segments.next().unwrap_or_default();
    let mut labels = Labels::new();
    for segment in segments {
        let (key, value) = segment.split_once('=').ok_or_else(err)?;
        labels.insert(key.to_string(), value.to_string());
    }

    Ok((name.to_string(), labels))
}
