//! # Stubber
//!
//! The in-memory matching engine of a programmable gRPC mock server: a
//! registry of declarative response stubs keyed by `(service, method)`,
//! and the selection logic that picks the best stub for an incoming
//! request.
//!
//! ## Selection pipeline
//!
//! A query resolves its candidate set through the concurrent index (both
//! the fully-qualified and the unqualified service name are tried), each
//! candidate is scored by structural comparison of the request payload and
//! headers against the stub's `equals` / `contains` / `matches` predicates,
//! and ties break on explicit priority then on id. When nothing matches,
//! the highest-ranked near-miss is surfaced as `similar` for debugging.
//!
//! Bidirectional streaming uses a stateful handle instead: the candidate
//! pool is pruned as each message arrives (see [`BidiSession`]).
//!
//! ## Example
//!
//! ```
//! use serde_json::json;
//! use stubber::{Query, Registry, Stub, Toggles};
//!
//! let registry = Registry::new(Toggles::empty());
//! registry.put_many(vec![serde_json::from_value::<Stub>(json!({
//!     "service": "Greeter",
//!     "method": "SayHello",
//!     "input": {"equals": {"name": "world"}},
//!     "output": {"data": {"message": "hello world"}},
//! })).unwrap()]);
//!
//! let query: Query = serde_json::from_value(json!({
//!     "service": "Greeter",
//!     "method": "SayHello",
//!     "data": {"name": "world"},
//! })).unwrap();
//!
//! let result = registry.find_by_query(query).unwrap();
//! assert_eq!(result.found().unwrap().output.data["message"], "hello world");
//! ```
//!
//! The registry is safe for concurrent use: lookups run under shared
//! locks, mutations are exclusive, and handed-out stubs are immutable
//! shared views that stay valid across later upserts.

mod bidi;
mod matcher;
mod query;
mod searcher;
mod strings;
mod stub;

pub use bidi::BidiSession;
pub use deeply::{clear_regex_cache, regex_cache_stats};
pub use query::{BidiQuery, Query, StreamQuery, Toggles, INTERNAL_HEADER};
pub use searcher::SearchResult;
pub use strings::{to_camel_case, to_snake_case};
pub use stub::{InputData, InputHeader, Output, Stub};

use std::sync::Arc;

use thiserror::Error as ThisError;
use uuid::Uuid;

use searcher::Searcher;
use strings::title_case_words;

/// Errors surfaced by the registry.
#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Neither the service name nor its unqualified suffix is registered.
    #[error("service not found")]
    ServiceNotFound,
    /// The service is known but has no such method.
    #[error("method not found")]
    MethodNotFound,
    /// No stub matched and no near-miss was worth surfacing.
    #[error("stub not found")]
    StubNotFound,
}

impl From<index::StorageError> for Error {
    fn from(err: index::StorageError) -> Self {
        match err {
            index::StorageError::LeftNotFound => Error::ServiceNotFound,
            index::StorageError::RightNotFound => Error::MethodNotFound,
        }
    }
}

/// The public facade over the stub index, the selectors, and the usage
/// tracker.
pub struct Registry {
    searcher: Searcher,
    toggles: Toggles,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(Toggles::empty())
    }
}

impl Registry {
    pub fn new(toggles: Toggles) -> Self {
        Self {
            searcher: Searcher::new(),
            toggles,
        }
    }

    /// Register stubs, assigning a fresh id to any entry whose id is nil.
    /// Returns the ids in input order.
    pub fn put_many(&self, stubs: Vec<Stub>) -> Vec<Uuid> {
        let stubs: Vec<Stub> = stubs
            .into_iter()
            .map(|mut stub| {
                if stub.id.is_nil() {
                    stub.id = Uuid::new_v4();
                }
                stub
            })
            .collect();

        tracing::debug!(count = stubs.len(), "registering stubs");
        self.searcher.upsert(stubs)
    }

    /// Re-register stubs that already carry an id; entries with a nil id
    /// are silently skipped. Returns the ids that were applied.
    pub fn update_many(&self, stubs: Vec<Stub>) -> Vec<Uuid> {
        let stubs: Vec<Stub> = stubs.into_iter().filter(|stub| !stub.id.is_nil()).collect();

        tracing::debug!(count = stubs.len(), "updating stubs");
        self.searcher.upsert(stubs)
    }

    /// Delete stubs by id, returning how many existed.
    pub fn delete_by_id(&self, ids: &[Uuid]) -> usize {
        self.searcher.del(ids)
    }

    pub fn find_by_id(&self, id: Uuid) -> Option<Arc<Stub>> {
        self.searcher.find_by_id(id)
    }

    /// Every stub registered under `(service, method)`, including those
    /// reachable through the unqualified suffix of a dotted service name,
    /// sorted by descending priority.
    pub fn find_by(&self, service: &str, method: &str) -> Result<Vec<Arc<Stub>>, Error> {
        self.searcher.find_by(service, method)
    }

    /// Unary selection. With [`Toggles::METHOD_TITLE`] set the method name
    /// is title-cased word by word before dispatch.
    pub fn find_by_query(&self, mut query: Query) -> Result<SearchResult, Error> {
        if self.toggles.contains(Toggles::METHOD_TITLE) {
            query.method = title_case_words(&query.method);
        }
        self.searcher.find(&query)
    }

    /// Selection for the unified stream-shaped query.
    pub fn find_by_stream_query(&self, query: StreamQuery) -> Result<SearchResult, Error> {
        self.searcher.find_stream(&query)
    }

    /// Open a stateful bidirectional session over the current candidates.
    pub fn find_by_bidi_query(&self, query: BidiQuery) -> Result<BidiSession, Error> {
        self.searcher.find_bidi(&query)
    }

    /// Snapshot of every registered stub, in no particular order.
    pub fn all(&self) -> Vec<Arc<Stub>> {
        self.searcher.all()
    }

    /// Stubs that have been served as `found` to non-internal queries.
    pub fn used(&self) -> Vec<Arc<Stub>> {
        self.searcher.used()
    }

    /// Live stubs never served to a non-internal query.
    pub fn unused(&self) -> Vec<Arc<Stub>> {
        self.searcher.unused()
    }

    /// Drop every stub and forget all usage history.
    pub fn clear(&self) {
        tracing::debug!("clearing registry");
        self.searcher.clear();
    }
}
