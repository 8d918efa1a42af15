//! Path patterns and segment matching.
//!
//! A pattern is split on `/` into segments:
//!
//! - `prefix:name`: the request segment must start with `prefix`; the rest
//!   (URL-decoded, non-empty) is captured as `name`
//! - a segment containing any of `? * $ ( )`: an anchored regex where `?`
//!   is any single character, `*` any run of characters and `$ ( )` keep
//!   their regex meaning
//! - anything else: a literal
//!
//! Matching is pure: parameters are only returned for a complete match.

use ferrule_http::protocol::percent_decode;
use regex::{Regex, RegexBuilder};

use crate::request::PathParams;

/// Matching options of a router.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterOptions {
    /// Literals compare case-sensitively
    pub case_sensitive: bool,
    /// A trailing slash is significant
    pub strict: bool,
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Param { prefix: String, name: String },
    Pattern { sensitive: Regex, insensitive: Regex },
}

#[derive(Debug, Clone)]
pub struct RoutePattern {
    raw: String,
    segments: Vec<Segment>,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid route pattern '{pattern}': {source}")]
pub struct PatternError {
    pattern: String,
    source: regex::Error,
}

impl RoutePattern {
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        let raw = if pattern.is_empty() { "/" } else { pattern };
        let segments = raw
            .split('/')
            .map(|segment| compile_segment(segment).map_err(|source| PatternError { pattern: raw.to_string(), source }))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { raw: raw.to_string(), segments })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Matches `path` (still percent-encoded) against this pattern.
    pub fn matches(&self, path: &str, options: RouterOptions) -> Option<PathParams> {
        let mut pattern_segments = self.segments.as_slice();
        let mut path = if path.is_empty() { "/" } else { path };

        if !options.strict {
            path = trim_trailing_slash(path);
            if self.raw.len() > 1 && self.raw.ends_with('/') {
                pattern_segments = &pattern_segments[..pattern_segments.len() - 1];
            }
        }

        let path_segments = path.split('/').collect::<Vec<_>>();
        if path_segments.len() != pattern_segments.len() {
            return None;
        }

        let mut params = PathParams::default();
        for (segment, value) in pattern_segments.iter().zip(path_segments) {
            match segment {
                Segment::Literal(literal) => {
                    let equal = if options.case_sensitive { literal == value } else { literal.eq_ignore_ascii_case(value) };
                    if !equal {
                        return None;
                    }
                }
                Segment::Param { prefix, name } => {
                    let rest = strip_prefix(value, prefix, options.case_sensitive)?;
                    if rest.is_empty() {
                        return None;
                    }
                    params.push(name.clone(), percent_decode(rest));
                }
                Segment::Pattern { sensitive, insensitive } => {
                    let regex = if options.case_sensitive { sensitive } else { insensitive };
                    if !regex.is_match(value) {
                        return None;
                    }
                }
            }
        }

        Some(params)
    }
}

fn compile_segment(segment: &str) -> Result<Segment, regex::Error> {
    if let Some((prefix, name)) = segment.split_once(':') {
        return Ok(Segment::Param { prefix: prefix.to_string(), name: name.to_string() });
    }

    if !segment.contains(['?', '*', '$', '(', ')']) {
        return Ok(Segment::Literal(segment.to_string()));
    }

    let mut source = String::with_capacity(segment.len() + 8);
    source.push('^');
    for ch in segment.chars() {
        match ch {
            '?' => source.push('.'),
            '*' => source.push_str(".*"),
            '$' | '(' | ')' => source.push(ch),
            ch => source.push_str(&regex::escape(ch.encode_utf8(&mut [0; 4]))),
        }
    }
    source.push('$');

    Ok(Segment::Pattern {
        sensitive: RegexBuilder::new(&source).build()?,
        insensitive: RegexBuilder::new(&source).case_insensitive(true).build()?,
    })
}

fn trim_trailing_slash(path: &str) -> &str {
    if path.len() > 1 { path.strip_suffix('/').unwrap_or(path) } else { path }
}

fn strip_prefix<'a>(value: &'a str, prefix: &str, case_sensitive: bool) -> Option<&'a str> {
    if case_sensitive {
        return value.strip_prefix(prefix);
    }
    let head = value.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &value[prefix.len()..])
}
