use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A declarative response template keyed by `(service, method)`.
///
/// A stub matches an incoming request when every predicate in `headers` and
/// `input` (or, for streaming shapes, `stream`) is satisfied. The `output`
/// side is opaque to selection and carried through unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stub {
    /// Unique identifier; a nil UUID is replaced on registration.
    #[serde(default)]
    pub id: Uuid,
    /// gRPC service name, fully-qualified or bare.
    pub service: String,
    /// gRPC method name.
    pub method: String,
    /// Higher priority wins ties between stubs with comparable ranks.
    #[serde(default)]
    pub priority: i32,
    /// Predicates over request metadata.
    #[serde(default)]
    pub headers: InputHeader,
    /// Predicates over the request payload.
    #[serde(default)]
    pub input: InputData,
    /// Ordered predicate groups for client-streaming and bidi requests.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stream: Vec<InputData>,
    /// The canned response.
    #[serde(default)]
    pub output: Output,
}

impl Stub {
    /// Single request message, single response document.
    pub fn is_unary(&self) -> bool {
        self.stream.is_empty() && self.output.stream.is_empty()
    }

    /// Ordered request messages, single response document.
    pub fn is_client_stream(&self) -> bool {
        !self.stream.is_empty() && self.output.stream.is_empty()
    }

    /// Single request message, ordered response messages.
    pub fn is_server_stream(&self) -> bool {
        self.stream.is_empty() && !self.output.stream.is_empty()
    }

    /// Ordered messages on both sides.
    pub fn is_bidirectional(&self) -> bool {
        !self.stream.is_empty() && !self.output.stream.is_empty()
    }
}

impl index::Value for Stub {
    fn key(&self) -> Uuid {
        self.id
    }

    fn left(&self) -> &str {
        &self.service
    }

    fn right(&self) -> &str {
        &self.method
    }

    fn score(&self) -> i64 {
        i64::from(self.priority)
    }
}

/// Predicates over the request payload: `equals` for exact comparison,
/// `contains` for subset comparison, `matches` for regex comparison.
/// An empty predicate map is trivially satisfied.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputData {
    /// Treat sequences as multisets when evaluating `equals`.
    #[serde(default, skip_serializing_if = "is_false")]
    pub ignore_array_order: bool,
    #[serde(default)]
    pub equals: Map<String, Value>,
    #[serde(default)]
    pub contains: Map<String, Value>,
    #[serde(default)]
    pub matches: Map<String, Value>,
}

impl InputData {
    /// Total number of predicate fields across the three kinds.
    pub fn len(&self) -> usize {
        self.equals.len() + self.contains.len() + self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Predicates over request metadata. Header comparisons are always
/// order-sensitive; there is no `ignoreArrayOrder` on this side.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputHeader {
    #[serde(default)]
    pub equals: Map<String, Value>,
    #[serde(default)]
    pub contains: Map<String, Value>,
    #[serde(default)]
    pub matches: Map<String, Value>,
}

impl InputHeader {
    /// Total number of predicate fields across the three kinds.
    pub fn len(&self) -> usize {
        self.equals.len() + self.contains.len() + self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The canned response carried through selection unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Output {
    /// Response metadata.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Single response document (unary and client-streaming stubs).
    #[serde(default)]
    pub data: Map<String, Value>,
    /// Ordered response documents (server-streaming and bidi stubs).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stream: Vec<Value>,
    /// Error message returned instead of a payload when non-empty.
    #[serde(default)]
    pub error: String,
    /// gRPC status code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u32>,
    /// Artificial delay before the response is sent.
    #[serde(default, with = "serde_delay", skip_serializing_if = "Option::is_none")]
    pub delay: Option<Duration>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// (De)serialization for `Output.delay`: accepts either a bare number of
/// milliseconds or a suffixed string such as `"100ms"` or `"2s"`, and
/// serializes as a millisecond string.
mod serde_delay {
    use std::time::Duration;

    use serde::de::Error as DeError;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Millis(u64),
        Text(String),
    }

    pub fn serialize<S>(delay: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match delay {
            Some(duration) => serializer.serialize_str(&format!("{}ms", duration.as_millis())),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Repr>::deserialize(deserializer)? {
            None => Ok(None),
            Some(Repr::Millis(ms)) => Ok(Some(Duration::from_millis(ms))),
            Some(Repr::Text(text)) => parse(&text).map(Some).map_err(DeError::custom),
        }
    }

    fn parse(text: &str) -> Result<Duration, String> {
        let split = text
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .ok_or_else(|| format!("delay {text:?} is missing a unit suffix"))?;
        let (number, unit) = text.split_at(split);
        let value: f64 = number
            .parse()
            .map_err(|_| format!("delay {text:?} has an invalid numeric part"))?;

        let nanos_per_unit: f64 = match unit {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60.0 * 1e9,
            "h" => 3600.0 * 1e9,
            other => return Err(format!("delay has an unknown unit {other:?}")),
        };

        Ok(Duration::from_nanos((value * nanos_per_unit) as u64))
    }
}
