//! Predicate evaluation: given a candidate stub and a request, decide
//! whether the stub matches and how much of its predicate surface the
//! request satisfies. Matching is a conjunction over the header and input
//! sides; ranking is the sum of per-kind scores from `deeply`.

use serde_json::{Map, Value};

use crate::query::{Query, StreamQuery};
use crate::stub::{InputData, InputHeader, Stub};

/// Full predicate match for a unary query.
pub(crate) fn match_query(query: &Query, stub: &Stub) -> bool {
    match_headers(&query.headers, &stub.headers) && match_input(&query.data, &stub.input)
}

/// Rank for a unary query. Header rank is zero for stubs without header
/// predicates rather than a penalty.
pub(crate) fn rank_query(query: &Query, stub: &Stub) -> f64 {
    rank_headers(&query.headers, &stub.headers) + rank_input(&query.data, &stub.input)
}

/// Full predicate match for the unified stream-shaped query: stream stubs
/// compare message-by-message, non-stream stubs accept a single-message
/// query against `input`.
pub(crate) fn match_stream_query(query: &StreamQuery, stub: &Stub) -> bool {
    if !match_headers(&query.headers, &stub.headers) {
        return false;
    }

    let messages = effective_messages(&query.input);
    if !stub.stream.is_empty() {
        return match_stream_elements(messages, &stub.stream);
    }
    if messages.len() == 1 {
        return match_input(&messages[0], &stub.input);
    }

    // Several messages but no stream predicates: nothing to match them against.
    false
}

pub(crate) fn rank_stream_query(query: &StreamQuery, stub: &Stub) -> f64 {
    let headers_rank = rank_headers(&query.headers, &stub.headers);

    let messages = effective_messages(&query.input);
    if !stub.stream.is_empty() {
        return headers_rank + rank_stream_elements(messages, &stub.stream);
    }
    if messages.len() == 1 {
        return headers_rank + rank_input(&messages[0], &stub.input);
    }

    headers_rank
}

fn match_headers(headers: &Map<String, Value>, expected: &InputHeader) -> bool {
    check_equals(&expected.equals, headers, false)
        && check_contains(&expected.contains, headers)
        && check_matches(&expected.matches, headers)
}

fn match_input(data: &Map<String, Value>, input: &InputData) -> bool {
    check_equals(&input.equals, data, input.ignore_array_order)
        && check_contains(&input.contains, data)
        && check_matches(&input.matches, data)
}

fn rank_headers(headers: &Map<String, Value>, expected: &InputHeader) -> f64 {
    if expected.is_empty() {
        return 0.0;
    }

    deeply::rank_match(&expected.equals, headers)
        + deeply::rank_match(&expected.contains, headers)
        + deeply::rank_match(&expected.matches, headers)
}

fn rank_input(data: &Map<String, Value>, input: &InputData) -> f64 {
    deeply::rank_match(&input.equals, data)
        + deeply::rank_match(&input.contains, data)
        + deeply::rank_match(&input.matches, data)
}

/// Message list with a single empty trailing message elided; common
/// client-streaming terminator.
fn effective_messages(input: &[Map<String, Value>]) -> &[Map<String, Value>] {
    match input.split_last() {
        Some((last, rest)) if last.is_empty() => rest,
        _ => input,
    }
}

/// Positional match of a message sequence against stream predicates; the
/// lengths must agree exactly.
fn match_stream_elements(messages: &[Map<String, Value>], stream: &[InputData]) -> bool {
    if messages.len() != stream.len() {
        return false;
    }

    messages
        .iter()
        .zip(stream)
        .all(|(message, pattern)| match_input(message, pattern))
}

/// Positional rank of a message sequence; zero when the lengths differ.
fn rank_stream_elements(messages: &[Map<String, Value>], stream: &[InputData]) -> f64 {
    if messages.len() != stream.len() {
        return 0.0;
    }

    messages
        .iter()
        .zip(stream)
        .map(|(message, pattern)| rank_input(message, pattern))
        .sum()
}

fn check_equals(expected: &Map<String, Value>, actual: &Map<String, Value>, ignore_order: bool) -> bool {
    if expected.is_empty() {
        return true;
    }
    if ignore_order {
        deeply::equals_ignore_array_order(expected, actual)
    } else {
        deeply::equals(expected, actual)
    }
}

fn check_contains(expected: &Map<String, Value>, actual: &Map<String, Value>) -> bool {
    expected.is_empty() || deeply::contains(expected, actual)
}

fn check_matches(expected: &Map<String, Value>, actual: &Map<String, Value>) -> bool {
    expected.is_empty() || deeply::matches(expected, actual)
}
