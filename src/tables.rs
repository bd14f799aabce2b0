//! Decode-time lookup tables
//!
//! Both tables are plain data supplied by configuration. The codec consults them
//! while converting an element tree; nothing else mutates them.

use std::collections::HashSet;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};

/// Dotted element paths that always decode to a list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListTable {
    paths: HashSet<String>,
}

impl ListTable {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Whether `path` is enrolled
    ///
    /// Matching is exact and case-sensitive. With a verb, entries are also tried
    /// relative to the `{verb}Response` segment of the path, so `searchResult.item`
    /// matches `findItemsResponse.searchResult.item` for `findItems`.
    pub fn contains(&self, path: &str, verb: Option<&str>) -> bool {
        if self.paths.contains(path) {
            return true;
        }

        let Some(verb) = verb else {
            return false;
        };

        let root = format!("{verb}Response");
        let mut segments = path.split('.');
        if !segments.any(|segment| segment == root) {
            return false;
        }

        let relative: Vec<&str> = segments.collect();
        !relative.is_empty() && self.paths.contains(&relative.join("."))
    }
}

/// Leaf field names whose text is parsed into a timestamp
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DateTimeTable {
    names: HashSet<String>,
}

impl DateTimeTable {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            names: names
                .into_iter()
                .map(|name| name.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Case-insensitive membership test
    pub fn contains(&self, name: &str) -> bool {
        !self.names.is_empty() && self.names.contains(&name.to_ascii_lowercase())
    }

    /// Parse `text` if `name` is enrolled; `None` leaves the text as it was
    pub fn coerce(&self, name: &str, text: &str) -> Option<DateTime<FixedOffset>> {
        if self.contains(name) {
            parse_timestamp(text)
        } else {
            None
        }
    }
}

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse the timestamp shapes services put on the wire
///
/// RFC 3339 first, then naive date-times and bare dates, which are taken as UTC.
pub fn parse_timestamp(text: &str) -> Option<DateTime<FixedOffset>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts);
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc().fixed_offset());
        }
    }

    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().fixed_offset())
}
