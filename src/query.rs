use bitflags::bitflags;
use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;

/// Request header that marks a query as internal. Internal queries are
/// answered normally but never recorded by the usage tracker.
pub const INTERNAL_HEADER: &str = "x-gripmock-requestinternal";

bitflags! {
    /// Behaviour switches carried by the registry and by individual queries.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct Toggles: u32 {
        /// Title-case each word of `query.method` before dispatching.
        const METHOD_TITLE = 1 << 0;
        /// The query originates from an internal caller; skip usage marking.
        const REQUEST_INTERNAL = 1 << 1;
    }
}

impl Toggles {
    /// Derive query toggles from a request's header names:
    /// [`INTERNAL_HEADER`] present with any value sets
    /// [`Toggles::REQUEST_INTERNAL`].
    pub fn from_header_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            if name.as_ref().eq_ignore_ascii_case(INTERNAL_HEADER) {
                return Toggles::REQUEST_INTERNAL;
            }
        }
        Toggles::empty()
    }
}

/// A unary selection request: one payload document matched against each
/// candidate's `input` predicates. When `id` is set, selection is by id
/// within the `(service, method)` namespace.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Query {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub service: String,
    pub method: String,
    #[serde(default)]
    pub headers: Map<String, Value>,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(skip)]
    pub toggles: Toggles,
}

impl Query {
    /// Decode the contractual JSON body shape. Decode errors propagate
    /// verbatim; the engine does not reinterpret them.
    pub fn from_slice(body: &[u8], toggles: Toggles) -> serde_json::Result<Self> {
        let mut query: Query = serde_json::from_slice(body)?;
        query.toggles = toggles;
        Ok(query)
    }

    pub fn with_toggles(mut self, toggles: Toggles) -> Self {
        self.toggles = toggles;
        self
    }

    pub fn internal(&self) -> bool {
        self.toggles.contains(Toggles::REQUEST_INTERNAL)
    }
}

/// A selection request carrying an ordered list of payload messages; the
/// unified form used for client-streaming and for unary requests expressed
/// as a one-message stream.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamQuery {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub service: String,
    pub method: String,
    #[serde(default)]
    pub headers: Map<String, Value>,
    #[serde(default)]
    pub input: Vec<Map<String, Value>>,
    #[serde(skip)]
    pub toggles: Toggles,
}

impl StreamQuery {
    pub fn from_slice(body: &[u8], toggles: Toggles) -> serde_json::Result<Self> {
        let mut query: StreamQuery = serde_json::from_slice(body)?;
        query.toggles = toggles;
        Ok(query)
    }

    pub fn with_toggles(mut self, toggles: Toggles) -> Self {
        self.toggles = toggles;
        self
    }

    pub fn internal(&self) -> bool {
        self.toggles.contains(Toggles::REQUEST_INTERNAL)
    }
}

/// Opens a bidirectional selection session; messages flow in afterwards
/// through the stateful handle.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BidiQuery {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub service: String,
    pub method: String,
    #[serde(default)]
    pub headers: Map<String, Value>,
    #[serde(skip)]
    pub toggles: Toggles,
}

impl BidiQuery {
    pub fn from_slice(body: &[u8], toggles: Toggles) -> serde_json::Result<Self> {
        let mut query: BidiQuery = serde_json::from_slice(body)?;
        query.toggles = toggles;
        Ok(query)
    }

    pub fn with_toggles(mut self, toggles: Toggles) -> Self {
        self.toggles = toggles;
        self
    }

    pub fn internal(&self) -> bool {
        self.toggles.contains(Toggles::REQUEST_INTERNAL)
    }
}
