//! Request-target parsing: raw path, decoded path and the query string.
//!
//! The query is everything after the *last* `?` of the target. Entries are
//! `&`-delimited, each split on its first `=`; the value is URL-decoded.
//! An entry without `=` is rejected, which surfaces as a protocol error.

use percent_encoding::percent_decode_str;

use crate::protocol::ParseError;

/// A parsed origin-form request target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTarget {
    raw_path: String,
    path: String,
    raw_query: Option<String>,
    query: QueryParams,
}

impl RequestTarget {
    pub fn parse(target: &str) -> Result<Self, ParseError> {
        let (raw_path, raw_query) = match target.rsplit_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (target, None),
        };

        let query = match raw_query {
            Some(query) => QueryParams::parse(query)?,
            None => QueryParams::default(),
        };

        Ok(Self {
            raw_path: raw_path.to_string(),
            path: decode(raw_path),
            raw_query: raw_query.map(ToString::to_string),
            query,
        })
    }

    /// The path exactly as received, still percent-encoded
    pub fn raw_path(&self) -> &str {
        &self.raw_path
    }

    /// The percent-decoded path
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn raw_query(&self) -> Option<&str> {
        self.raw_query.as_deref()
    }

    pub fn query(&self) -> &QueryParams {
        &self.query
    }

    /// The original target, path plus raw query
    pub fn original(&self) -> String {
        match &self.raw_query {
            Some(query) => format!("{}?{}", self.raw_path, query),
            None => self.raw_path.clone(),
        }
    }
}

/// Ordered, multi-valued query parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    entries: Vec<(String, String)>,
}

impl QueryParams {
    pub fn parse(query: &str) -> Result<Self, ParseError> {
        let mut entries = Vec::new();
        for entry in query.split('&').filter(|entry| !entry.is_empty()) {
            let (name, value) =
                entry.split_once('=').ok_or_else(|| ParseError::invalid_query(format!("entry '{entry}' has no '='")))?;
            entries.push((name.to_string(), decode_query_value(value)));
        }
        Ok(Self { entries })
    }

    /// First value for `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.iter().find(|(key, _)| key == name).map(|(_, value)| value.as_str())
    }

    /// All values for `name`, in wire order
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries.iter().filter(move |(key, _)| key == name).map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Percent-decodes `input`, replacing invalid UTF-8 sequences.
pub fn decode(input: &str) -> String {
    percent_decode_str(input).decode_utf8_lossy().into_owned()
}

fn decode_query_value(value: &str) -> String {
    if value.contains('+') { decode(&value.replace('+', " ")) } else { decode(value) }
}
