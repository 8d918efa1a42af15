//! `Accept` header negotiation.
//!
//! Each candidate media type is scored against every parsed `Accept` entry:
//! an exact type is worth 4, an exact subtype 2 and matching parameters 1.
//! The best entry for a candidate is the one with the highest score, then
//! quality, then the earliest position in the header. Candidates are then
//! ordered by quality, score, entry position and finally their own position.

use std::cmp::Ordering;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::trace;

static MEDIA_TYPE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([^\s/;]+)/([^;\s]+)\s*(?:;(.*))?$").expect("media type regex is valid"));

const ANY: &str = "*/*";

/// One parsed `type/subtype;params` entry.
#[derive(Debug, Clone, PartialEq)]
struct MediaRange<'a> {
    full: &'a str,
    kind: &'a str,
    subtype: &'a str,
    params: Vec<(String, String)>,
    quality: f32,
    index: usize,
}

/// How well a candidate matched one entry.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Specificity {
    score: u8,
    quality: f32,
    entry: usize,
    candidate: usize,
}

/// Returns `candidates` acceptable under `accept`, most preferred first.
///
/// A missing header accepts everything. With no candidates, the media types
/// listed in the header are returned in preference order.
pub fn preferred_media_types<'a>(accept: Option<&'a str>, candidates: &[&'a str]) -> Vec<&'a str> {
    let accepted = parse_accept(accept.unwrap_or(ANY));

    if candidates.is_empty() {
        let mut ranges: Vec<_> = accepted.iter().filter(|range| range.quality > 0.0).collect();
        ranges.sort_by(|a, b| compare_ranges(a, b));
        return ranges.into_iter().map(|range| range.full).collect();
    }

    let mut matched = candidates
        .iter()
        .enumerate()
        .filter_map(|(index, candidate)| {
            let best = best_match(candidate, index, &accepted)?;
            (best.quality > 0.0).then_some((*candidate, best))
        })
        .collect::<Vec<_>>();

    matched.sort_by(|(_, a), (_, b)| compare_specificity(a, b));
    trace!(accept, matched = matched.len(), "negotiated media types");
    matched.into_iter().map(|(candidate, _)| candidate).collect()
}

/// The single most preferred candidate, if any is acceptable.
pub fn preferred_media_type<'a>(accept: Option<&'a str>, candidates: &[&'a str]) -> Option<&'a str> {
    preferred_media_types(accept, candidates).into_iter().next()
}

fn parse_accept(accept: &str) -> Vec<MediaRange<'_>> {
    let ranges = split_quoted(accept, ',')
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| parse_media_range(entry, index))
        .collect::<Vec<_>>();

    if ranges.is_empty() {
        // nothing parsable degrades to accepting anything
        return parse_media_range(ANY, 0).into_iter().collect();
    }
    ranges
}

fn parse_media_range(entry: &str, index: usize) -> Option<MediaRange<'_>> {
    let captures = MEDIA_TYPE_REGEX.captures(entry)?;
    let kind = captures.get(1)?;
    let subtype = captures.get(2)?;

    let mut params = Vec::new();
    let mut quality = 1.0;
    if let Some(raw_params) = captures.get(3) {
        for param in split_quoted(raw_params.as_str(), ';') {
            let Some((key, value)) = param.split_once('=') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = unquote(value.trim());

            if key == "q" {
                quality = value.parse::<f32>().ok().filter(|q| q.is_finite() && *q >= 0.0)?;
                // parameters after `q` are accept-extensions
                break;
            }
            params.push((key, value.to_string()));
        }
    }

    Some(MediaRange {
        full: &entry[kind.start()..subtype.end()],
        kind: kind.as_str(),
        subtype: subtype.as_str(),
        params,
        quality,
        index,
    })
}

fn best_match(candidate: &str, candidate_index: usize, accepted: &[MediaRange<'_>]) -> Option<Specificity> {
    let candidate_range = parse_media_range(candidate, candidate_index)?;

    accepted
        .iter()
        .filter_map(|range| specify(&candidate_range, range, candidate_index))
        .max_by(|a, b| {
            a.score
                .cmp(&b.score)
                .then_with(|| a.quality.partial_cmp(&b.quality).unwrap_or(Ordering::Equal))
                .then_with(|| b.entry.cmp(&a.entry))
        })
}

fn specify(candidate: &MediaRange<'_>, range: &MediaRange<'_>, candidate_index: usize) -> Option<Specificity> {
    let mut score = 0;

    if range.kind.eq_ignore_ascii_case(candidate.kind) {
        score |= 4;
    } else if range.kind != "*" {
        return None;
    }

    if range.subtype.eq_ignore_ascii_case(candidate.subtype) {
        score |= 2;
    } else if range.subtype != "*" {
        return None;
    }

    if !range.params.is_empty() {
        let all_match = range.params.iter().all(|(key, value)| {
            value == "*"
                || candidate
                    .params
                    .iter()
                    .find(|(candidate_key, _)| candidate_key == key)
                    .is_some_and(|(_, candidate_value)| candidate_value.eq_ignore_ascii_case(value))
        });
        if !all_match {
            return None;
        }
        score |= 1;
    }

    Some(Specificity { score, quality: range.quality, entry: range.index, candidate: candidate_index })
}

/// Quality desc, score desc, entry order asc, candidate order asc.
fn compare_specificity(a: &Specificity, b: &Specificity) -> Ordering {
    b.quality
        .partial_cmp(&a.quality)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.score.cmp(&a.score))
        .then_with(|| a.entry.cmp(&b.entry))
        .then_with(|| a.candidate.cmp(&b.candidate))
}

fn compare_ranges(a: &MediaRange<'_>, b: &MediaRange<'_>) -> Ordering {
    b.quality.partial_cmp(&a.quality).unwrap_or(Ordering::Equal).then_with(|| a.index.cmp(&b.index))
}

/// Splits on `separator`, except inside double-quoted strings.
fn split_quoted(input: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;

    for (offset, ch) in input.char_indices() {
        if ch == '"' {
            in_quotes = !in_quotes;
        } else if ch == separator && !in_quotes {
            parts.push(&input[start..offset]);
            start = offset + ch.len_utf8();
        }
    }
    parts.push(&input[start..]);
    parts
}

fn unquote(value: &str) -> &str {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') { &value[1..value.len() - 1] } else { value }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_header_accepts_everything_in_candidate_order() {
        let preferred = preferred_media_types(None, &["text/html", "application/json"]);
        assert_eq!(preferred, vec!["text/html", "application/json"]);
    }

    #[test]
    fn quality_orders_candidates() {
        let accept = "text/html;q=0.5, application/json";
        let preferred = preferred_media_types(Some(accept), &["text/html", "application/json"]);
        assert_eq!(preferred, vec!["application/json", "text/html"]);
    }

    #[test]
    fn zero_quality_excludes() {
        let accept = "application/json, text/*;q=0";
        let preferred = preferred_media_types(Some(accept), &["text/plain", "application/json"]);
        assert_eq!(preferred, vec!["application/json"]);
    }

    #[test]
    fn more_specific_entry_wins() {
        // text/html matches both entries; the exact one carries q=1
        let accept = "text/*;q=0.2, text/html";
        let preferred = preferred_media_types(Some(accept), &["text/plain", "text/html"]);
        assert_eq!(preferred, vec!["text/html", "text/plain"]);
    }

    #[test]
    fn exact_header_selects_only_that_type() {
        let candidates = ["text/html", "application/json", "text/plain"];
        assert_eq!(preferred_media_types(Some("application/json"), &candidates), vec!["application/json"]);
        assert_eq!(preferred_media_type(Some("application/json"), &candidates), Some("application/json"));
    }

    #[test]
    fn negotiation_is_idempotent() {
        let accept = "text/*;q=0.3, application/json;q=0.9, */*;q=0.1";
        let candidates = ["image/png", "text/plain", "application/json", "text/html"];

        let once = preferred_media_types(Some(accept), &candidates);
        let twice = preferred_media_types(Some(accept), &once);
        assert_eq!(once, vec!["application/json", "text/plain", "text/html", "image/png"]);
        assert_eq!(once, twice);
    }

    #[test]
    fn parameters_must_match() {
        let accept = "text/html;level=1, text/html;q=0.5";
        let preferred = preferred_media_types(Some(accept), &["text/html", "text/html;level=1"]);
        assert_eq!(preferred, vec!["text/html;level=1", "text/html"]);
    }

    #[test]
    fn quoted_commas_do_not_split() {
        let accept = r#"text/plain;format="a,b", application/json;q=0.1"#;
        let preferred = preferred_media_types(Some(accept), &["application/json", r#"text/plain;format="a,b""#]);
        assert_eq!(preferred, vec![r#"text/plain;format="a,b""#, "application/json"]);
    }

    #[test]
    fn unparsable_header_degrades_to_any() {
        let preferred = preferred_media_types(Some("garbage"), &["text/html"]);
        assert_eq!(preferred, vec!["text/html"]);
    }

    #[test]
    fn no_candidates_lists_accepted_types() {
        let accept = "text/html;q=0.8, application/json, image/*;q=0";
        assert_eq!(preferred_media_types(Some(accept), &[]), vec!["application/json", "text/html"]);
    }

    #[test]
    fn unmatched_candidate_is_dropped() {
        assert!(preferred_media_types(Some("application/json"), &["text/html"]).is_empty());
    }
}
