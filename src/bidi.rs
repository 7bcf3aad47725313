//! Stateful selection for bidirectional streaming: a session holds a
//! snapshot of the candidates for one `(service, method)` pair and prunes
//! the pool as messages arrive. Client-stream stubs are tested position by
//! position against their `stream` predicates; unary and server-stream
//! stubs act as fallbacks tested against `input` on every message.
//!
//! Field names in a message are resolved leniently: the predicate key is
//! tried literally, then in its camelCase form, then in its snake_case
//! form, and the first hit wins. This absorbs the protobuf/JSON naming
//! split without stubs having to declare both spellings.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::query::BidiQuery;
use crate::searcher::PRIORITY_WEIGHT;
use crate::strings::{to_camel_case, to_snake_case};
use crate::stub::{InputData, Stub};
use crate::Error;

/// Rank contribution of one satisfied predicate field.
const FIELD_WEIGHT: f64 = 100.0;

/// A per-query handle for bidirectional selection.
///
/// `next` calls on one session are serialised by an internal mutex;
/// distinct sessions are independent. The session stays usable after a
/// failed match, but its candidate pool is empty from that point on and
/// further calls keep answering [`Error::StubNotFound`].
#[derive(Debug)]
pub struct BidiSession {
    service: String,
    method: String,
    internal: bool,
    used: Arc<RwLock<HashSet<Uuid>>>,
    message_count: AtomicUsize,
    state: Mutex<SessionState>,
}

#[derive(Debug)]
struct SessionState {
    all_stubs: Vec<Arc<Stub>>,
    candidates: Vec<Arc<Stub>>,
    index: usize,
    first_call: bool,
}

impl BidiSession {
    pub(crate) fn new(
        query: &BidiQuery,
        snapshot: Vec<Arc<Stub>>,
        used: Arc<RwLock<HashSet<Uuid>>>,
    ) -> Self {
        Self {
            service: query.service.clone(),
            method: query.method.clone(),
            internal: query.internal(),
            used,
            message_count: AtomicUsize::new(0),
            state: Mutex::new(SessionState {
                all_stubs: snapshot,
                candidates: Vec::new(),
                index: 0,
                first_call: true,
            }),
        }
    }

    /// Zero-based ordinal of the message currently expected by the session.
    pub fn message_index(&self) -> usize {
        self.message_count.load(Ordering::Relaxed)
    }

    /// Feed the next client message and resolve the best surviving stub.
    pub fn next(&self, message: &Map<String, Value>) -> Result<Arc<Stub>, Error> {
        if message.is_empty() || self.service.is_empty() || self.method.is_empty() {
            return Err(Error::StubNotFound);
        }

        let mut state = self.state.lock().expect("bidi session lock poisoned");

        if state.first_call {
            state.first_call = false;
            state.candidates = state
                .all_stubs
                .iter()
                .filter(|stub| {
                    !stub.stream.is_empty() || stub.is_unary() || stub.is_server_stream()
                })
                .cloned()
                .collect();
        } else {
            state.index += 1;
            self.message_count.store(state.index, Ordering::Relaxed);
            let position = state.index;
            state
                .candidates
                .retain(|stub| stub.stream.is_empty() || position < stub.stream.len());
        }

        let position = state.index;
        let matching: Vec<Arc<Stub>> = state
            .candidates
            .iter()
            .filter(|stub| stub_matches_message(stub, message, position))
            .cloned()
            .collect();

        let mut best: Option<(f64, Arc<Stub>)> = None;
        for stub in &matching {
            let score =
                rank_stub(stub, message, position) + f64::from(stub.priority) * PRIORITY_WEIGHT;
            tracing::trace!(id = %stub.id, score, position, "bidi candidate matched");

            let better = match &best {
                None => true,
                Some((best_score, best_stub)) => {
                    score > *best_score || (score == *best_score && stub.id < best_stub.id)
                }
            };
            if better {
                best = Some((score, Arc::clone(stub)));
            }
        }

        match best {
            Some((_, stub)) => {
                state.candidates = matching;
                if !self.internal {
                    self.used
                        .write()
                        .expect("usage lock poisoned")
                        .insert(stub.id);
                }
                Ok(stub)
            }
            None => {
                state.candidates.clear();
                Err(Error::StubNotFound)
            }
        }
    }
}

/// Does the stub's predicate group for this position accept the message?
fn stub_matches_message(stub: &Stub, message: &Map<String, Value>, position: usize) -> bool {
    if !stub.stream.is_empty() {
        return position < stub.stream.len()
            && match_input_data(&stub.stream[position], message);
    }
    match_input_data(&stub.input, message)
}

fn rank_stub(stub: &Stub, message: &Map<String, Value>, position: usize) -> f64 {
    let group = if stub.stream.is_empty() {
        &stub.input
    } else if position < stub.stream.len() {
        &stub.stream[position]
    } else {
        return 0.0;
    };
    rank_input_data(group, message)
}

/// Per-field match of one predicate group against a message. A group with
/// no predicate fields matches nothing; a pattern-less stub must not
/// swallow every conversation.
fn match_input_data(input: &InputData, message: &Map<String, Value>) -> bool {
    if input.is_empty() {
        return false;
    }

    input.equals.iter().all(|(key, want)| {
        find_value_with_variations(message, key)
            .is_some_and(|have| deeply::value_equals(want, have, input.ignore_array_order))
    }) && input.contains.iter().all(|(key, want)| {
        find_value_with_variations(message, key)
            .is_some_and(|have| deeply::value_contains(want, have))
    }) && input.matches.iter().all(|(key, want)| {
        find_value_with_variations(message, key)
            .is_some_and(|have| deeply::value_matches(want, have))
    })
}

/// Number of satisfied predicate fields, weighted. Mirrors the match logic
/// so that fuller stubs outrank sparser ones at the same priority.
fn rank_input_data(input: &InputData, message: &Map<String, Value>) -> f64 {
    let mut satisfied = 0usize;

    satisfied += input
        .equals
        .iter()
        .filter(|(key, want)| {
            find_value_with_variations(message, key)
                .is_some_and(|have| deeply::value_equals(want, have, input.ignore_array_order))
        })
        .count();
    satisfied += input
        .contains
        .iter()
        .filter(|(key, want)| {
            find_value_with_variations(message, key)
                .is_some_and(|have| deeply::value_contains(want, have))
        })
        .count();
    satisfied += input
        .matches
        .iter()
        .filter(|(key, want)| {
            find_value_with_variations(message, key)
                .is_some_and(|have| deeply::value_matches(want, have))
        })
        .count();

    satisfied as f64 * FIELD_WEIGHT
}

/// Look a field up by its literal name, then by its camelCase form, then by
/// its snake_case form; the first hit wins.
fn find_value_with_variations<'a>(
    message: &'a Map<String, Value>,
    key: &str,
) -> Option<&'a Value> {
    if let Some(value) = message.get(key) {
        return Some(value);
    }
    if let Some(value) = message.get(&to_camel_case(key)) {
        return Some(value);
    }
    message.get(&to_snake_case(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stub(value: serde_json::Value) -> Stub {
        let mut stub: Stub = serde_json::from_value(value).expect("stub decodes");
        stub.id = Uuid::new_v4();
        stub
    }

    fn message(value: serde_json::Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn session_over(stubs: Vec<Stub>) -> BidiSession {
        let query = BidiQuery {
            service: "test".into(),
            method: "method".into(),
            ..BidiQuery::default()
        };
        let snapshot = stubs.into_iter().map(Arc::new).collect();
        BidiSession::new(&query, snapshot, Arc::new(RwLock::new(HashSet::new())))
    }

    #[test]
    fn stream_stub_matches_at_position() {
        let candidate = stub(json!({
            "service": "test", "method": "method",
            "stream": [{"equals": {"key": "value"}}],
        }));

        assert!(stub_matches_message(&candidate, &message(json!({"key": "value"})), 0));
        assert!(!stub_matches_message(&candidate, &message(json!({"key": "different"})), 0));
        assert!(!stub_matches_message(&candidate, &message(json!({"key": "value"})), 1));
    }

    #[test]
    fn predicate_less_group_matches_nothing() {
        let candidate = stub(json!({"service": "test", "method": "method"}));
        assert!(!stub_matches_message(&candidate, &message(json!({"key": "value"})), 0));
    }

    #[test]
    fn rank_weights_satisfied_fields() {
        let input: InputData = serde_json::from_value(json!({
            "equals": {"key1": "value1", "key2": "value2"},
        }))
        .expect("decodes");

        let full = rank_input_data(&input, &message(json!({"key1": "value1", "key2": "value2"})));
        assert_eq!(full, 200.0);

        let none = rank_input_data(&input, &message(json!({"key3": "value3"})));
        assert_eq!(none, 0.0);
    }

    #[test]
    fn field_lookup_tries_case_variations() {
        let data = message(json!({"camelCase": "value"}));
        assert_eq!(
            find_value_with_variations(&data, "camel_case"),
            Some(&json!("value"))
        );

        let data = message(json!({"snake_case": "value"}));
        assert_eq!(
            find_value_with_variations(&data, "snakeCase"),
            Some(&json!("value"))
        );

        assert_eq!(find_value_with_variations(&data, "non_existing"), None);
    }

    #[test]
    fn message_index_starts_at_zero_and_tracks_progress() {
        let session = session_over(vec![stub(json!({
            "service": "test", "method": "method",
            "stream": [
                {"equals": {"step": 1}},
                {"equals": {"step": 2}},
            ],
        }))]);

        assert_eq!(session.message_index(), 0);
        session.next(&message(json!({"step": 1}))).expect("matches");
        assert_eq!(session.message_index(), 0);
        session.next(&message(json!({"step": 2}))).expect("matches");
        assert_eq!(session.message_index(), 1);
    }

    #[test]
    fn rejects_empty_message() {
        let session = session_over(vec![stub(json!({
            "service": "test", "method": "method",
            "input": {"equals": {"key": "value"}},
        }))]);

        assert_eq!(
            session.next(&Map::new()).expect_err("empty message"),
            Error::StubNotFound
        );
        // The guard does not consume the session.
        assert!(session.next(&message(json!({"key": "value"}))).is_ok());
    }

    #[test]
    fn failed_match_exhausts_the_pool_but_not_the_handle() {
        let session = session_over(vec![stub(json!({
            "service": "test", "method": "method",
            "stream": [
                {"equals": {"message": "hello"}},
                {"equals": {"message": "world"}},
            ],
        }))]);

        session.next(&message(json!({"message": "hello"}))).expect("matches");
        assert_eq!(
            session
                .next(&message(json!({"message": "unknown"})))
                .expect_err("no candidate"),
            Error::StubNotFound
        );
        assert_eq!(
            session
                .next(&message(json!({"message": "world"})))
                .expect_err("pool is exhausted"),
            Error::StubNotFound
        );
    }
}
