//! Stub selection: walks the candidate bucket for a `(service, method)`
//! pair, scores every candidate, and resolves the best full match plus the
//! best near-miss. Also owns the usage tracker that records which stubs
//! have been served to non-internal callers.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use index::Storage;
use uuid::Uuid;

use crate::bidi::BidiSession;
use crate::matcher;
use crate::query::{BidiQuery, Query, StreamQuery};
use crate::stub::Stub;
use crate::Error;

/// Weight applied to a stub's priority so that priority dominates
/// tie-breaking within a bounded rank band.
pub(crate) const PRIORITY_WEIGHT: f64 = 10_000.0;

/// Outcome of a selection: the best full match, or failing that the
/// highest-ranked near-miss for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct SearchResult {
    found: Option<Arc<Stub>>,
    similar: Option<Arc<Stub>>,
}

impl SearchResult {
    /// The chosen stub; every predicate was satisfied.
    pub fn found(&self) -> Option<&Arc<Stub>> {
        self.found.as_ref()
    }

    /// The highest-ranked non-matching candidate, surfaced when nothing
    /// matched to aid debugging.
    pub fn similar(&self) -> Option<&Arc<Stub>> {
        self.similar.as_ref()
    }
}

pub(crate) struct Searcher {
    storage: Storage<Stub>,
    used: Arc<RwLock<HashSet<Uuid>>>,
}

impl Searcher {
    pub fn new() -> Self {
        Self {
            storage: Storage::new(),
            used: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    pub fn upsert(&self, stubs: Vec<Stub>) -> Vec<Uuid> {
        self.storage.upsert(stubs)
    }

    pub fn del(&self, ids: &[Uuid]) -> usize {
        self.storage.del(ids)
    }

    pub fn clear(&self) {
        self.storage.clear();
        self.used.write().expect("usage lock poisoned").clear();
    }

    pub fn find_by_id(&self, id: Uuid) -> Option<Arc<Stub>> {
        self.storage.find_by_id(id)
    }

    pub fn find_by(&self, service: &str, method: &str) -> Result<Vec<Arc<Stub>>, Error> {
        Ok(self.storage.find_all(service, method)?)
    }

    pub fn all(&self) -> Vec<Arc<Stub>> {
        self.storage.values()
    }

    /// Stubs that have been returned as `found` to non-internal queries.
    /// Deleted stubs drop out because the id lookup misses.
    pub fn used(&self) -> Vec<Arc<Stub>> {
        let used = self.used.read().expect("usage lock poisoned");
        self.storage.find_by_ids(used.iter())
    }

    /// Live stubs never recorded by the usage tracker.
    pub fn unused(&self) -> Vec<Arc<Stub>> {
        let used = self.used.read().expect("usage lock poisoned").clone();
        self.all()
            .into_iter()
            .filter(|stub| !used.contains(&stub.id))
            .collect()
    }

    fn mark(&self, internal: bool, id: Uuid) {
        if internal {
            return;
        }
        self.used.write().expect("usage lock poisoned").insert(id);
    }

    pub fn find(&self, query: &Query) -> Result<SearchResult, Error> {
        if let Some(id) = query.id {
            return self.search_by_id(query.internal(), &query.service, &query.method, id);
        }

        let candidates = self.storage.find_all(&query.service, &query.method)?;
        self.select(
            query.internal(),
            candidates,
            |stub| matcher::match_query(query, stub),
            |stub| matcher::rank_query(query, stub),
        )
    }

    pub fn find_stream(&self, query: &StreamQuery) -> Result<SearchResult, Error> {
        if let Some(id) = query.id {
            return self.search_by_id(query.internal(), &query.service, &query.method, id);
        }

        let candidates = self.storage.find_all(&query.service, &query.method)?;
        self.select(
            query.internal(),
            candidates,
            |stub| matcher::match_stream_query(query, stub),
            |stub| matcher::rank_stream_query(query, stub),
        )
    }

    /// Open a stateful bidi session over a snapshot of the current
    /// candidates. Id-based queries pre-seed the pool with the single stub.
    pub fn find_bidi(&self, query: &BidiQuery) -> Result<BidiSession, Error> {
        let snapshot = match query.id {
            Some(id) => vec![self
                .storage
                .find_by_id(id)
                .ok_or(Error::ServiceNotFound)?],
            None => self.storage.find_all(&query.service, &query.method)?,
        };

        Ok(BidiSession::new(query, snapshot, Arc::clone(&self.used)))
    }

    /// By-id selection: the `(service, method)` namespace must resolve, then
    /// the id is looked up globally. An unknown id reads as an unknown
    /// namespace to the caller.
    fn search_by_id(
        &self,
        internal: bool,
        service: &str,
        method: &str,
        id: Uuid,
    ) -> Result<SearchResult, Error> {
        self.storage.find_all(service, method)?;

        let stub = self.storage.find_by_id(id).ok_or(Error::ServiceNotFound)?;
        self.mark(internal, id);
        Ok(SearchResult {
            found: Some(stub),
            similar: None,
        })
    }

    /// Single deterministic walk over the candidates: sorted by descending
    /// priority then ascending id, so equal scores resolve to the lowest id.
    fn select<M, R>(
        &self,
        internal: bool,
        mut candidates: Vec<Arc<Stub>>,
        match_fn: M,
        rank_fn: R,
    ) -> Result<SearchResult, Error>
    where
        M: Fn(&Stub) -> bool,
        R: Fn(&Stub) -> f64,
    {
        candidates.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));

        let mut best_found: Option<Arc<Stub>> = None;
        let mut best_found_score = f64::NEG_INFINITY;
        let mut best_similar: Option<Arc<Stub>> = None;
        let mut best_similar_score = 0.0;

        for stub in candidates {
            let score = rank_fn(&stub) + f64::from(stub.priority) * PRIORITY_WEIGHT;
            tracing::trace!(id = %stub.id, score, "scored candidate");

            if score > best_similar_score {
                best_similar = Some(Arc::clone(&stub));
                best_similar_score = score;
            }
            if score > best_found_score && match_fn(&stub) {
                best_found = Some(stub);
                best_found_score = score;
            }
        }

        if let Some(found) = best_found {
            self.mark(internal, found.id);
            return Ok(SearchResult {
                found: Some(found),
                similar: None,
            });
        }
        if best_similar.is_some() {
            return Ok(SearchResult {
                found: None,
                similar: best_similar,
            });
        }
        Err(Error::StubNotFound)
    }
}
