//! Fetch Coordinator: resolve a capsule key locally or from live peers.
//!
//! - Local first: a verified local capsule is returned without touching the network.
//! - Single-flight: concurrent fetches of one key share one background attempt and
//!   all observe its outcome.
//! - One pass over the catalog snapshot, most-recently-seen peer first. Every response
//!   is verified; a failure is charged to that peer and the next one is tried.
//! - The first verified capsule is written to the store before waiters are released.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;

use capsule_mesh_core::path_validation::validate_capsule_name;
use capsule_mesh_core::{observability, Capsule, CapsuleStore, StoreError, TrustError};

use crate::catalog::{PeerCatalog, PeerRecord};
use crate::key::CapsuleKey;
use crate::transport::{PeerFailure, PeerFailureKind, PeerTransport};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error(
        "capsule {key} unavailable ({attempted} peer(s) tried, last failure: {})",
        describe(.last_failure)
    )]
    Unavailable {
        key: CapsuleKey,
        attempted: usize,
        last_failure: Option<PeerFailureKind>,
    },

    #[error("fetch of {key} timed out after {waited_ms} ms")]
    Timeout { key: CapsuleKey, waited_ms: u64 },

    #[error("local copy of {key} is corrupt: {reason}")]
    CorruptLocal { key: CapsuleKey, reason: String },

    #[error("store error for {key}: {message}")]
    Store { key: CapsuleKey, message: String },
}

fn describe(kind: &Option<PeerFailureKind>) -> String {
    kind.map(|k| k.to_string())
        .unwrap_or_else(|| "none".to_string())
}

type Outcome = Result<Capsule, FetchError>;

/// Publisher allowlist applied to fetched capsules. Empty accepts any valid signature.
#[derive(Debug, Clone, Default)]
pub struct TrustPolicy {
    allowed: HashSet<String>,
}

impl TrustPolicy {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn allowlist<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: keys.into_iter().map(Into::into).collect(),
        }
    }

    pub fn allows(&self, publisher: &str) -> bool {
        self.allowed.is_empty() || self.allowed.contains(publisher)
    }
}

/// Optional progress hook. All methods default to no-ops.
pub trait FetchObserver: Send + Sync {
    fn on_attempt(&self, _key: &CapsuleKey, _peer: &PeerRecord) {}

    fn on_peer_failed(&self, _key: &CapsuleKey, _peer: &PeerRecord, _failure: &PeerFailure) {}

    fn on_fetched(&self, _key: &CapsuleKey, _peer: &PeerRecord, _capsule: &Capsule) {}
}

struct NoopObserver;

impl FetchObserver for NoopObserver {}

struct Inner {
    store: Arc<CapsuleStore>,
    catalog: Arc<PeerCatalog>,
    transport: Arc<dyn PeerTransport>,
    policy: TrustPolicy,
    observer: Arc<dyn FetchObserver>,
    peer_timeout: Duration,
    in_flight: Mutex<HashMap<CapsuleKey, watch::Receiver<Option<Outcome>>>>,
}

#[derive(Clone)]
pub struct FetchCoordinator {
    inner: Arc<Inner>,
}

pub struct FetchCoordinatorBuilder {
    store: Arc<CapsuleStore>,
    catalog: Arc<PeerCatalog>,
    transport: Arc<dyn PeerTransport>,
    policy: TrustPolicy,
    observer: Arc<dyn FetchObserver>,
    peer_timeout: Duration,
}

impl FetchCoordinatorBuilder {
    pub fn policy(mut self, policy: TrustPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn FetchObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Bound on a single peer attempt; a peer exceeding it counts as unreachable.
    pub fn peer_timeout(mut self, timeout: Duration) -> Self {
        self.peer_timeout = timeout;
        self
    }

    pub fn build(self) -> FetchCoordinator {
        FetchCoordinator {
            inner: Arc::new(Inner {
                store: self.store,
                catalog: self.catalog,
                transport: self.transport,
                policy: self.policy,
                observer: self.observer,
                peer_timeout: self.peer_timeout,
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }
}

impl FetchCoordinator {
    pub fn builder(
        store: Arc<CapsuleStore>,
        catalog: Arc<PeerCatalog>,
        transport: Arc<dyn PeerTransport>,
    ) -> FetchCoordinatorBuilder {
        FetchCoordinatorBuilder {
            store,
            catalog,
            transport,
            policy: TrustPolicy::any(),
            observer: Arc::new(NoopObserver),
            peer_timeout: capsule_mesh_core::config::schema::DEFAULT_PEER_TIMEOUT,
        }
    }

    pub fn store(&self) -> &Arc<CapsuleStore> {
        &self.inner.store
    }

    pub fn catalog(&self) -> &Arc<PeerCatalog> {
        &self.inner.catalog
    }

    /// Number of keys with a network attempt in progress.
    pub fn in_flight(&self) -> usize {
        self.inner
            .in_flight
            .lock()
            .map(|m| m.len())
            .unwrap_or(0)
    }

    /// Resolve `key` to a verified capsule.
    pub async fn fetch(&self, key: &CapsuleKey) -> Result<Capsule, FetchError> {
        if let Some(capsule) = lookup_local(&self.inner, key).await? {
            tracing::debug!(key = %key, "Served from local store");
            return Ok(capsule);
        }

        let mut rx = self.join_or_start(key);
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(value) => (*value).clone(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| {
            Err(FetchError::Store {
                key: key.clone(),
                message: "fetch task ended without an outcome".to_string(),
            })
        })
    }

    /// [`fetch`](Self::fetch) bounded by `deadline`. On expiry the caller gets
    /// [`FetchError::Timeout`]; the shared background attempt keeps running and may
    /// still fill the store.
    pub async fn fetch_with_deadline(
        &self,
        key: &CapsuleKey,
        deadline: Duration,
    ) -> Result<Capsule, FetchError> {
        match tokio::time::timeout(deadline, self.fetch(key)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::info!(
                    key = %key,
                    deadline_ms = deadline.as_millis() as u64,
                    "Fetch deadline expired"
                );
                Err(FetchError::Timeout {
                    key: key.clone(),
                    waited_ms: deadline.as_millis() as u64,
                })
            }
        }
    }

    fn join_or_start(&self, key: &CapsuleKey) -> watch::Receiver<Option<Outcome>> {
        let mut in_flight = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        if let Some(rx) = in_flight.get(key) {
            // A dropped sender means the task died without publishing; start over.
            if rx.has_changed().is_ok() {
                tracing::debug!(key = %key, "Joining in-flight fetch");
                return rx.clone();
            }
        }
        let (tx, rx) = watch::channel(None);
        in_flight.insert(key.clone(), rx.clone());
        tokio::spawn(run_fetch(self.inner.clone(), key.clone(), tx));
        rx
    }
}

async fn lookup_local(inner: &Arc<Inner>, key: &CapsuleKey) -> Result<Option<Capsule>, FetchError> {
    let store = inner.store.clone();
    let lookup = key.clone();
    let found = tokio::task::spawn_blocking(move || match &lookup {
        CapsuleKey::Name(name) => store.read(name),
        CapsuleKey::Digest(digest) => store.find_by_digest(digest),
    })
    .await
    .map_err(|e| FetchError::Store {
        key: key.clone(),
        message: e.to_string(),
    })?;

    match found {
        Ok(capsule) => Ok(Some(capsule)),
        Err(StoreError::NotFound(_)) => Ok(None),
        Err(StoreError::CorruptEntry { reason, .. }) => Err(FetchError::CorruptLocal {
            key: key.clone(),
            reason,
        }),
        Err(e) => Err(FetchError::Store {
            key: key.clone(),
            message: e.to_string(),
        }),
    }
}

async fn run_fetch(inner: Arc<Inner>, key: CapsuleKey, tx: watch::Sender<Option<Outcome>>) {
    let outcome = resolve(&inner, &key).await;
    // Remove and publish under the lock so a late caller either joins before the
    // outcome is sent or starts fresh after the entry is gone.
    let mut in_flight = inner.in_flight.lock().unwrap_or_else(|p| p.into_inner());
    in_flight.remove(&key);
    tx.send_replace(Some(outcome));
}

async fn resolve(inner: &Arc<Inner>, key: &CapsuleKey) -> Outcome {
    // Another request may have filled the store since the caller looked.
    if let Some(capsule) = lookup_local(inner, key).await? {
        return Ok(capsule);
    }

    let peers = inner.catalog.snapshot();
    tracing::debug!(key = %key, peers = peers.len(), "Fetching from peers");

    let mut attempted = 0;
    let mut last_failure = None;
    for peer in &peers {
        attempted += 1;
        inner.observer.on_attempt(key, peer);

        let timed = tokio::time::timeout(inner.peer_timeout, attempt(inner, peer, key)).await;
        let result = match timed {
            Ok(result) => result,
            Err(_) => Err(PeerFailure::Unreachable(format!(
                "no response within {} ms",
                inner.peer_timeout.as_millis()
            ))),
        };

        match result {
            Ok(capsule) => {
                persist(inner, &capsule).await;
                tracing::info!(
                    key = %key,
                    peer = %peer.node_id,
                    digest = %capsule.digest,
                    bytes = capsule.payload.len(),
                    "Fetched capsule"
                );
                inner.observer.on_fetched(key, peer, &capsule);
                return Ok(capsule);
            }
            Err(failure) => {
                tracing::debug!(
                    key = %key,
                    peer = %peer.node_id,
                    err = %failure,
                    "Peer attempt failed"
                );
                inner.observer.on_peer_failed(key, peer, &failure);
                last_failure = Some(failure.kind());
            }
        }
    }

    tracing::info!(key = %key, attempted, "Capsule unavailable from all live peers");
    Err(FetchError::Unavailable {
        key: key.clone(),
        attempted,
        last_failure,
    })
}

/// One peer: download, then check it answers `key`, is self-consistent and is
/// from an allowed publisher.
async fn attempt(
    inner: &Inner,
    peer: &PeerRecord,
    key: &CapsuleKey,
) -> Result<Capsule, PeerFailure> {
    let capsule = inner.transport.get_capsule(peer, key).await?;

    let rejection = if let Err(e) = validate_capsule_name(&capsule.name) {
        Some(PeerFailure::Corrupt(format!("invalid capsule name: {e}")))
    } else if !key.matches(&capsule) {
        Some(PeerFailure::Corrupt(format!(
            "answered {} ({}) for {key}",
            capsule.name, capsule.digest
        )))
    } else if let Err(e) = capsule.verify() {
        Some(match e {
            TrustError::DigestMismatch { .. } | TrustError::Malformed(_) => {
                PeerFailure::Corrupt(e.to_string())
            }
            TrustError::Untrusted { .. } => PeerFailure::Untrusted(e.to_string()),
        })
    } else if !inner.policy.allows(&capsule.publisher_public_key) {
        Some(PeerFailure::Untrusted(format!(
            "publisher {} is not in the trusted set",
            capsule.publisher_public_key
        )))
    } else {
        None
    };

    match rejection {
        Some(failure) => {
            observability::security_capsule_rejected(
                &peer.node_id,
                &key.to_string(),
                &failure.to_string(),
            );
            Err(failure)
        }
        None => Ok(capsule),
    }
}

/// Cache a verified capsule. A failed write is logged; the capsule is still returned.
async fn persist(inner: &Inner, capsule: &Capsule) {
    let store = inner.store.clone();
    let copy = capsule.clone();
    let result = tokio::task::spawn_blocking(move || store.write_if_absent(&copy)).await;
    match result {
        Ok(Ok(true)) => {}
        // Local entries are only replaced by publication or explicit removal.
        Ok(Ok(false)) => tracing::warn!(
            capsule = %capsule.name,
            digest = %capsule.digest,
            "Not caching fetched capsule: name already taken in local store"
        ),
        Ok(Err(e)) => {
            tracing::warn!(capsule = %capsule.name, err = %e, "Failed to cache fetched capsule")
        }
        Err(e) => {
            tracing::warn!(capsule = %capsule.name, err = %e, "Cache write task failed")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use capsule_mesh_core::Keypair;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    #[derive(Clone)]
    enum Behaviour {
        Serve(Capsule),
        Missing,
    }

    #[derive(Default)]
    struct MockTransport {
        peers: HashMap<SocketAddr, (Behaviour, Duration)>,
        calls: Mutex<HashMap<SocketAddr, usize>>,
    }

    impl MockTransport {
        fn with(mut self, addr: SocketAddr, behaviour: Behaviour, delay: Duration) -> Self {
            self.peers.insert(addr, (behaviour, delay));
            self
        }

        fn calls(&self, addr: SocketAddr) -> usize {
            self.calls.lock().unwrap().get(&addr).copied().unwrap_or(0)
        }

        fn total_calls(&self) -> usize {
            self.calls.lock().unwrap().values().sum()
        }
    }

    #[async_trait]
    impl PeerTransport for MockTransport {
        async fn list_capsules(&self, _peer: &PeerRecord) -> Result<Vec<String>, PeerFailure> {
            Ok(vec![])
        }

        async fn get_capsule(
            &self,
            peer: &PeerRecord,
            _key: &CapsuleKey,
        ) -> Result<Capsule, PeerFailure> {
            *self.calls.lock().unwrap().entry(peer.address).or_insert(0) += 1;
            let Some((behaviour, delay)) = self.peers.get(&peer.address).cloned() else {
                return Err(PeerFailure::Unreachable("connection refused".into()));
            };
            tokio::time::sleep(delay).await;
            match behaviour {
                Behaviour::Serve(capsule) => Ok(capsule),
                Behaviour::Missing => Err(PeerFailure::NotFound),
            }
        }
    }

    #[derive(Default)]
    struct CountingObserver {
        attempts: AtomicUsize,
        failures: AtomicUsize,
        fetched: AtomicUsize,
    }

    impl FetchObserver for CountingObserver {
        fn on_attempt(&self, _key: &CapsuleKey, _peer: &PeerRecord) {
            self.attempts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_peer_failed(&self, _key: &CapsuleKey, _peer: &PeerRecord, _f: &PeerFailure) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }

        fn on_fetched(&self, _key: &CapsuleKey, _peer: &PeerRecord, _c: &Capsule) {
            self.fetched.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn capsule(name: &str, payload: &[u8]) -> Capsule {
        let pair = Keypair::from_seed(&[5u8; 32]);
        Capsule::publish(name, payload.to_vec(), &pair).unwrap()
    }

    fn tampered(capsule: &Capsule) -> Capsule {
        let mut bad = capsule.clone();
        bad.payload = b"evil".to_vec();
        bad
    }

    struct Harness {
        _dir: tempfile::TempDir,
        store: Arc<CapsuleStore>,
        catalog: Arc<PeerCatalog>,
        transport: Arc<MockTransport>,
        now: Instant,
    }

    impl Harness {
        fn new(transport: MockTransport) -> Self {
            let dir = tempfile::tempdir().unwrap();
            Self {
                store: Arc::new(CapsuleStore::open(dir.path()).unwrap()),
                catalog: Arc::new(PeerCatalog::new(Duration::from_secs(60))),
                transport: Arc::new(transport),
                now: Instant::now(),
                _dir: dir,
            }
        }

        /// All peers share one `last_seen`, so snapshot order is by node id.
        fn peer(&self, id: &str, port: u16) {
            self.catalog.upsert(PeerRecord {
                node_id: id.to_string(),
                address: addr(port),
                last_seen: self.now,
            });
        }

        fn builder(&self) -> FetchCoordinatorBuilder {
            FetchCoordinator::builder(
                self.store.clone(),
                self.catalog.clone(),
                self.transport.clone(),
            )
        }

        fn coordinator(&self) -> FetchCoordinator {
            self.builder().build()
        }
    }

    fn name(n: &str) -> CapsuleKey {
        CapsuleKey::Name(n.to_string())
    }

    #[tokio::test]
    async fn test_local_capsule_needs_no_peer() {
        let c = capsule("doc", b"local");
        let h = Harness::new(MockTransport::default().with(
            addr(1),
            Behaviour::Serve(c.clone()),
            Duration::ZERO,
        ));
        h.store.write(&c).unwrap();
        h.peer("p1", 1);

        let got = h.coordinator().fetch(&name("doc")).await.unwrap();
        assert_eq!(got, c);
        assert_eq!(h.transport.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_fetches_share_one_request() {
        let c = capsule("shared", b"one copy for everyone");
        let h = Harness::new(MockTransport::default().with(
            addr(1),
            Behaviour::Serve(c.clone()),
            Duration::from_millis(100),
        ));
        h.peer("p1", 1);
        let coordinator = h.coordinator();

        let key = name("shared");
        let fetches = (0..8).map(|_| coordinator.fetch(&key));
        let results = futures_util::future::join_all(fetches).await;

        assert_eq!(h.transport.calls(addr(1)), 1);
        for result in results {
            assert_eq!(result.unwrap().payload, c.payload);
        }
        assert_eq!(coordinator.in_flight(), 0);
        assert_eq!(h.store.read("shared").unwrap(), c);
    }

    #[tokio::test]
    async fn test_corrupt_peer_falls_back_to_next() {
        let c = capsule("doc", b"genuine");
        let h = Harness::new(
            MockTransport::default()
                .with(addr(1), Behaviour::Serve(tampered(&c)), Duration::ZERO)
                .with(addr(2), Behaviour::Serve(c.clone()), Duration::ZERO),
        );
        h.peer("a-corrupt", 1);
        h.peer("b-valid", 2);
        let observer = Arc::new(CountingObserver::default());
        let coordinator = h.builder().observer(observer.clone()).build();

        let got = coordinator.fetch(&name("doc")).await.unwrap();
        assert_eq!(got.payload, b"genuine");
        assert_eq!(h.transport.calls(addr(1)), 1);
        assert_eq!(h.transport.calls(addr(2)), 1);
        assert_eq!(observer.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(observer.failures.load(Ordering::SeqCst), 1);
        assert_eq!(observer.fetched.load(Ordering::SeqCst), 1);
        assert_eq!(h.store.read("doc").unwrap().payload, b"genuine");
    }

    #[tokio::test]
    async fn test_no_peers_is_unavailable_immediately() {
        let h = Harness::new(MockTransport::default());
        let start = Instant::now();
        let err = h.coordinator().fetch(&name("ghost")).await.unwrap_err();
        assert_eq!(
            err,
            FetchError::Unavailable {
                key: name("ghost"),
                attempted: 0,
                last_failure: None,
            }
        );
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_all_peers_exhausted() {
        let c = capsule("doc", b"x");
        let h = Harness::new(
            MockTransport::default()
                .with(addr(1), Behaviour::Serve(tampered(&c)), Duration::ZERO)
                .with(addr(2), Behaviour::Missing, Duration::ZERO),
        );
        h.peer("a", 1);
        h.peer("b", 2);

        let err = h.coordinator().fetch(&name("doc")).await.unwrap_err();
        assert_eq!(
            err,
            FetchError::Unavailable {
                key: name("doc"),
                attempted: 2,
                last_failure: Some(PeerFailureKind::NotFound),
            }
        );
        assert!(h.store.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_capsule_for_key_is_rejected() {
        let other = capsule("other", b"not what you asked for");
        let h = Harness::new(MockTransport::default().with(
            addr(1),
            Behaviour::Serve(other),
            Duration::ZERO,
        ));
        h.peer("a", 1);

        let err = h.coordinator().fetch(&name("doc")).await.unwrap_err();
        assert!(matches!(
            err,
            FetchError::Unavailable {
                last_failure: Some(PeerFailureKind::Corrupt),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_slow_peer_times_out_and_next_is_tried() {
        let c = capsule("doc", b"fast");
        let h = Harness::new(
            MockTransport::default()
                .with(addr(1), Behaviour::Serve(c.clone()), Duration::from_secs(5))
                .with(addr(2), Behaviour::Serve(c.clone()), Duration::ZERO),
        );
        h.peer("a-slow", 1);
        h.peer("b-fast", 2);
        let coordinator = h.builder().peer_timeout(Duration::from_millis(50)).build();

        let start = Instant::now();
        let got = coordinator.fetch(&name("doc")).await.unwrap();
        assert_eq!(got, c);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_deadline_expires_but_cache_is_filled() {
        let c = capsule("doc", b"late but valid");
        let h = Harness::new(MockTransport::default().with(
            addr(1),
            Behaviour::Serve(c.clone()),
            Duration::from_millis(200),
        ));
        h.peer("a", 1);
        let coordinator = h.coordinator();

        let err = coordinator
            .fetch_with_deadline(&name("doc"), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Timeout { waited_ms: 20, .. }));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(h.store.read("doc").unwrap(), c);
        assert_eq!(h.transport.calls(addr(1)), 1);
    }

    #[tokio::test]
    async fn test_untrusted_publisher_rejected_by_policy() {
        let c = capsule("doc", b"signed by a stranger");
        let h = Harness::new(MockTransport::default().with(
            addr(1),
            Behaviour::Serve(c),
            Duration::ZERO,
        ));
        h.peer("a", 1);
        let trusted = Keypair::from_seed(&[42u8; 32]).public_key_base64();
        let coordinator = h.builder().policy(TrustPolicy::allowlist([trusted])).build();

        let err = coordinator.fetch(&name("doc")).await.unwrap_err();
        assert!(matches!(
            err,
            FetchError::Unavailable {
                last_failure: Some(PeerFailureKind::Untrusted),
                ..
            }
        ));
        assert!(h.store.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_by_digest_stores_under_name() {
        let c = capsule("by-digest", b"addressed by content");
        let h = Harness::new(MockTransport::default().with(
            addr(1),
            Behaviour::Serve(c.clone()),
            Duration::ZERO,
        ));
        h.peer("a", 1);
        let coordinator = h.coordinator();

        let key = CapsuleKey::Digest(c.digest.clone());
        assert_eq!(coordinator.fetch(&key).await.unwrap(), c);
        assert_eq!(h.store.read("by-digest").unwrap(), c);

        // Second lookup is local.
        coordinator.fetch(&key).await.unwrap();
        assert_eq!(h.transport.total_calls(), 1);
    }

    #[tokio::test]
    async fn test_digest_fetch_never_replaces_local_publication() {
        let mine = capsule("doc", b"published here");
        let theirs = capsule("doc", b"published elsewhere");
        let h = Harness::new(MockTransport::default().with(
            addr(1),
            Behaviour::Serve(theirs.clone()),
            Duration::ZERO,
        ));
        h.store.write(&mine).unwrap();
        h.peer("a", 1);
        let coordinator = h.coordinator();

        let key = CapsuleKey::Digest(theirs.digest.clone());
        assert_eq!(coordinator.fetch(&key).await.unwrap(), theirs);
        assert_eq!(h.store.read("doc").unwrap(), mine);
        assert_eq!(coordinator.fetch(&name("doc")).await.unwrap(), mine);
        assert_eq!(h.transport.total_calls(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_local_entry_is_surfaced() {
        let c = capsule("doc", b"original");
        let h = Harness::new(MockTransport::default());
        h.store.write(&c).unwrap();
        let path = h.store.root().join("doc.capsule.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let err = h.coordinator().fetch(&name("doc")).await.unwrap_err();
        assert!(matches!(err, FetchError::CorruptLocal { .. }));
    }

    #[test]
    fn test_trust_policy() {
        assert!(TrustPolicy::any().allows("anything"));
        let policy = TrustPolicy::allowlist(["k1", "k2"]);
        assert!(policy.allows("k2"));
        assert!(!policy.allows("k3"));
    }
}
