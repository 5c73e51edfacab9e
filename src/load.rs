//! Asynchronous subgraph loading: transport boundary, loader records, and
//! the subgraph cache.
//!
//! A `load` node fetches a remote subgraph description without ever blocking
//! traversal. Its lifecycle is a small state machine driven from two sides:
//! traversal visits (synchronous, on the engine's thread) and transport
//! completions (asynchronous, delivered over a channel and applied by the
//! engine between passes). The machine itself is stepped by the traversal in
//! [`engine`](crate::engine); this module owns the data types, the transport
//! boundary, and the cache that decides when an attached subgraph must be
//! fetched again.
//!
//! ```text
//! Initial --visit--> Loading --reply--> Loaded --visit--> Attached
//!                       |                                    |
//!                       +--timeout/error--> Error    (evicted from cache)
//!                                                            |
//!                                                            v
//!                                                         Initial
//! ```
//!
//! `Error` is absorbing: a node that failed to load never renders again; the
//! failure is reported once through the engine's event queue and the rest of
//! the tree keeps drawing.

use crate::config::Config;
use crate::node::{NodeDef, NodeId};
use log::debug;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::mpsc::Sender;

/// Parses a transport payload into a subgraph definition.
///
/// The engine is agnostic to the payload format; the parser decides. An `Err`
/// is reported as a [`LoadError::Parse`](crate::error::LoadError::Parse).
pub type SubgraphParser = Rc<dyn Fn(&[u8]) -> Result<NodeDef, String>>;

/// Configuration of one `load` node.
#[derive(Clone)]
pub struct LoadParams {
    /// Location of the subgraph description. Mandatory.
    pub uri: String,
    /// Extra parameters handed to the transport with the request.
    pub request_params: HashMap<String, String>,
    /// Parser for the fetched payload. Mandatory.
    pub parser: Option<SubgraphParser>,
}

impl LoadParams {
    pub fn new(uri: impl Into<String>, parser: impl Fn(&[u8]) -> Result<NodeDef, String> + 'static) -> Self {
        Self {
            uri: uri.into(),
            request_params: HashMap::new(),
            parser: Some(Rc::new(parser)),
        }
    }

    pub fn with_request_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.request_params.insert(key.into(), value.into());
        self
    }
}

impl fmt::Debug for LoadParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadParams")
            .field("uri", &self.uri)
            .field("request_params", &self.request_params)
            .field("parser", &self.parser.as_ref().map(|_| ".."))
            .finish()
    }
}

/// Where a load node is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadState {
    /// Ready to start the load.
    Initial,
    /// Request in flight; visits skip the subtree.
    Loading,
    /// Payload parsed, subgraph awaiting attachment on the next visit.
    Loaded,
    /// Subgraph integrated into the tree.
    Attached,
    /// Load or parse failed; terminal.
    Error,
}

/// The per-node-instance loader record.
pub struct LoadRecord {
    pub config: Config<LoadParams>,
    /// Params resolved on first visit (the config may be dynamic).
    pub params: Option<LoadParams>,
    pub state: LoadState,
    /// Serial of the most recent request, drawn from an engine-wide counter.
    /// Arena slots are reused, so the serial must be unique across node
    /// instances, not just within one; a reply that does not carry it is
    /// stale and dropped.
    pub serial: u64,
    /// Cache handle for the resolved subgraph, once loaded.
    pub handle: Option<CacheHandle>,
    /// Parsed subgraph waiting for the attach visit. Boxed: a subgraph may
    /// itself contain further load nodes.
    pub pending: Option<Box<NodeDef>>,
}

impl LoadRecord {
    pub fn new(config: Config<LoadParams>) -> Self {
        Self {
            config,
            params: None,
            state: LoadState::Initial,
            serial: 0,
            handle: None,
            pending: None,
        }
    }
}

/// One request handed to the transport.
pub struct LoadRequest {
    pub uri: String,
    pub request_params: HashMap<String, String>,
    /// The load node this request belongs to.
    pub node: NodeId,
    /// Engine-unique serial for staleness detection; echoed in the reply.
    pub serial: u64,
    reply: Sender<LoadReply>,
}

impl LoadRequest {
    /// Completes the request with a payload.
    pub fn succeed(self, payload: Vec<u8>) {
        self.finish(LoadOutcome::Success(payload));
    }

    /// Completes the request as timed out.
    pub fn timeout(self) {
        self.finish(LoadOutcome::Timeout);
    }

    /// Completes the request with a transport failure.
    pub fn fail(self, message: impl Into<String>) {
        self.finish(LoadOutcome::Error(message.into()));
    }

    fn finish(self, outcome: LoadOutcome) {
        // The engine may be gone by completion time; that is fine.
        let _ = self.reply.send(LoadReply {
            node: self.node,
            serial: self.serial,
            outcome,
        });
    }
}

/// A completed load, queued on the engine's reply channel.
pub struct LoadReply {
    pub node: NodeId,
    pub serial: u64,
    pub outcome: LoadOutcome,
}

/// How a request ended.
pub enum LoadOutcome {
    Success(Vec<u8>),
    Timeout,
    Error(String),
}

/// The transport boundary: something that can fetch subgraph payloads.
///
/// `begin` must not block; the fetch runs out of band and the request is
/// completed (from any thread) through its reply channel. The engine applies
/// completions before the next traversal pass.
pub trait SubgraphTransport {
    fn begin(&mut self, request: LoadRequest);
}

pub(crate) fn make_request(
    uri: String,
    request_params: HashMap<String, String>,
    node: NodeId,
    serial: u64,
    reply: Sender<LoadReply>,
) -> LoadRequest {
    LoadRequest {
        uri,
        request_params,
        node,
        serial,
        reply,
    }
}

/// A transport that queues requests for its owner to complete by hand.
///
/// Useful for tests and for hosts that want to service loads from their own
/// event loop. Keep a [`ManualTransport::queue`] handle before moving the
/// transport into the engine:
///
/// ```no_run
/// use phalanx::load::ManualTransport;
///
/// let transport = ManualTransport::new();
/// let queue = transport.queue();
/// // ... move `transport` into a SceneGraph, render once ...
/// for request in queue.borrow_mut().drain(..) {
///     request.succeed(b"payload".to_vec());
/// }
/// ```
pub struct ManualTransport {
    queue: Rc<RefCell<Vec<LoadRequest>>>,
}

impl ManualTransport {
    pub fn new() -> Self {
        Self {
            queue: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Shared handle onto the pending request queue.
    pub fn queue(&self) -> Rc<RefCell<Vec<LoadRequest>>> {
        self.queue.clone()
    }
}

impl Default for ManualTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SubgraphTransport for ManualTransport {
    fn begin(&mut self, request: LoadRequest) {
        debug!("[load] request queued for '{}'", request.uri);
        self.queue.borrow_mut().push(request);
    }
}

/// Handle into the [`SubgraphCache`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CacheHandle(u64);

/// An explicit, owned LRU cache of resolved subgraphs.
///
/// Attachment inserts; every attached visit touches; inserting past capacity
/// evicts the least recently touched entry, and [`SubgraphCache::evict`]
/// drops a specific one on demand (external memory pressure, asset reload).
/// A load node that finds its handle gone regresses to `Initial` and fetches
/// again — that is the whole recovery protocol, so eviction is always safe.
pub struct SubgraphCache {
    entries: HashMap<u64, String>,
    /// Least recently used first.
    order: Vec<u64>,
    capacity: usize,
    next: u64,
}

impl SubgraphCache {
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: Vec::new(),
            capacity: capacity.max(1),
            next: 0,
        }
    }

    /// Registers a freshly loaded subgraph, evicting the least recently used
    /// entry if the cache is full.
    pub fn insert(&mut self, uri: &str) -> CacheHandle {
        if self.entries.len() >= self.capacity {
            let oldest = self.order.remove(0);
            let evicted = self.entries.remove(&oldest);
            debug!("[load] cache full, evicted '{}'", evicted.unwrap_or_default());
        }
        let handle = CacheHandle(self.next);
        self.next += 1;
        self.entries.insert(handle.0, uri.to_string());
        self.order.push(handle.0);
        handle
    }

    /// Whether the subgraph behind `handle` is still resident.
    pub fn contains(&self, handle: CacheHandle) -> bool {
        self.entries.contains_key(&handle.0)
    }

    /// Marks `handle` as recently used.
    pub fn touch(&mut self, handle: CacheHandle) {
        if let Some(pos) = self.order.iter().position(|&h| h == handle.0) {
            let h = self.order.remove(pos);
            self.order.push(h);
        }
    }

    /// Drops a specific entry. Returns whether it was resident.
    pub fn evict(&mut self, handle: CacheHandle) -> bool {
        if self.entries.remove(&handle.0).is_some() {
            self.order.retain(|&h| h != handle.0);
            true
        } else {
            false
        }
    }

    /// Drops every entry loaded from `uri`. Returns how many were resident.
    pub fn evict_by_uri(&mut self, uri: &str) -> usize {
        let doomed: Vec<u64> = self
            .entries
            .iter()
            .filter(|(_, entry_uri)| entry_uri.as_str() == uri)
            .map(|(&h, _)| h)
            .collect();
        for h in &doomed {
            self.entries.remove(h);
            self.order.retain(|o| o != h);
        }
        doomed.len()
    }

    /// Finalizes the in-flight request bookkeeping for `handle`.
    pub fn finish_loading(&mut self, handle: CacheHandle) {
        if let Some(uri) = self.entries.get(&handle.0) {
            debug!("[load] finished loading '{uri}'");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for SubgraphCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn lru_insert_evicts_the_least_recently_touched() {
        let mut cache = SubgraphCache::with_capacity(2);
        let a = cache.insert("a");
        let b = cache.insert("b");

        // Touch `a` so `b` becomes the eviction candidate.
        cache.touch(a);
        let c = cache.insert("c");

        assert!(cache.contains(a));
        assert!(!cache.contains(b));
        assert!(cache.contains(c));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn explicit_evict_is_reported() {
        let mut cache = SubgraphCache::new();
        let h = cache.insert("wing");
        assert!(cache.evict(h));
        assert!(!cache.evict(h));
        assert!(!cache.contains(h));
    }

    #[test]
    fn pending_subgraphs_may_nest_further_loads() {
        let outer = LoadParams::new("http://example.com/outer.scene", |_| {
            Err("unused".to_string())
        });
        let leaf = LoadParams::new("http://example.com/leaf.scene", |_| {
            Err("unused".to_string())
        });

        let mut record = LoadRecord::new(Config::Fixed(outer));
        record.pending = Some(Box::new(crate::dsl::load(leaf)));
        assert!(record.pending.is_some());
    }

    #[test]
    fn manual_transport_replies_through_the_channel() {
        let (tx, rx) = mpsc::channel();
        let mut transport = ManualTransport::new();
        let queue = transport.queue();

        transport.begin(make_request(
            "http://example.com/a.scene".into(),
            HashMap::new(),
            NodeId(7),
            3,
            tx,
        ));

        let request = queue.borrow_mut().pop().unwrap();
        assert_eq!(request.uri, "http://example.com/a.scene");
        request.succeed(vec![1, 2, 3]);

        let reply = rx.try_recv().unwrap();
        assert_eq!(reply.node, NodeId(7));
        assert_eq!(reply.serial, 3);
        assert!(matches!(reply.outcome, LoadOutcome::Success(ref p) if p == &[1, 2, 3]));
    }
}
