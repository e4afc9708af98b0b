//! Response cache capture
//!
//! A request may bind at most one [`Cache`]. Binding starts interception:
//! every body byte written through the request's [`CacheCapture`] goes to
//! the real transport and to the sink the cache handed out from
//! [`Cache::begin`]. When the response is complete, [`CacheCapture::finish`]
//! calls [`Cache::save`] with the final metadata, exactly once.
//!
//! Binding is idempotent: asking for a cache a second time within the same
//! request returns the cache that is already bound.

use crate::container::{Container, Provider};
use crate::error::{Error, Result};
use crate::http::{HttpRequest, HttpResponse, ResponseMetadata};
use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Write};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Write half handed to the capture by a cache.
pub type CacheSink = Box<dyn Write + Send>;

/// A cache implementation that can persist a rendered response.
#[async_trait]
pub trait Cache: Send + Sync + 'static {
    /// Start capturing the response to `request`; the returned sink receives
    /// a copy of every body byte.
    async fn begin(&self, request: &HttpRequest) -> Result<CacheSink>;

    /// Persist what was captured, given the final response metadata.
    async fn save(&self, metadata: &ResponseMetadata) -> Result<()>;

    /// Get the cache's name for debugging.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

// ============================================================================
// Shared Buffer
// ============================================================================

/// Clonable in-memory writer; all clones see the same bytes.
#[derive(Clone, Default)]
pub struct SharedBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the bytes written so far.
    pub fn contents(&self) -> Vec<u8> {
        self.inner.lock().clone()
    }

    /// Take the bytes written so far, leaving the buffer empty.
    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.inner.lock())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBuffer").field("len", &self.len()).finish()
    }
}

// ============================================================================
// Response Store
// ============================================================================

/// A stored response with its freshness window.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub cached_at: Instant,
    pub expires_at: Instant,
}

impl CachedResponse {
    pub fn new(metadata: &ResponseMetadata, body: Vec<u8>, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            status: metadata.status,
            headers: metadata.headers.clone(),
            body,
            cached_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_fresh(&self) -> bool {
        Instant::now() < self.expires_at
    }

    pub fn age(&self) -> Duration {
        self.cached_at.elapsed()
    }

    /// Replay as a response, tagged as a cache hit.
    pub fn to_response(&self) -> HttpResponse {
        let mut response = HttpResponse::new(self.status).with_body(self.body.clone());
        response.headers = self.headers.clone();
        response
            .headers
            .insert("Age".to_string(), self.age().as_secs().to_string());
        response
            .headers
            .insert("X-Cache".to_string(), "HIT".to_string());
        response
    }
}

/// Process-wide bounded store of captured responses.
///
/// Least recently used entries are evicted once `max_entries` is reached;
/// entries older than the TTL are never served.
pub struct ResponseStore {
    entries: Mutex<LruCache<String, CachedResponse>>,
    ttl: Duration,
    max_entries: usize,
}

impl ResponseStore {
    /// Methods whose responses are stored.
    pub const CACHEABLE_METHODS: &'static [&'static str] = &["GET", "HEAD"];

    /// Status codes whose responses are stored.
    pub const CACHEABLE_STATUS: &'static [u16] =
        &[200, 203, 204, 206, 300, 301, 404, 405, 410, 414, 501];

    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
            max_entries: capacity.get(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Whether a response to `method` with `status` may be stored.
    pub fn is_cacheable(method: &str, status: u16) -> bool {
        Self::CACHEABLE_METHODS
            .iter()
            .any(|m| m.eq_ignore_ascii_case(method))
            && Self::CACHEABLE_STATUS.contains(&status)
    }

    pub fn insert(&self, key: String, response: CachedResponse) {
        tracing::debug!(key = %key, status = response.status, "Storing cached response");
        self.entries.lock().put(key, response);
    }

    /// A fresh entry under `key`. Stale entries are dropped on sight.
    pub fn get(&self, key: &str) -> Option<CachedResponse> {
        let mut entries = self.entries.lock();
        let cached = entries.get(key)?.clone();
        if cached.is_fresh() {
            return Some(cached);
        }

        tracing::trace!(key, "Dropping stale cached response");
        entries.pop(key);
        None
    }

    /// Replay a fresh stored response for `request`, if any.
    pub fn lookup(&self, request: &HttpRequest) -> Option<HttpResponse> {
        self.get(&request.cache_key()).map(|c| c.to_response())
    }

    pub fn invalidate(&self, request: &HttpRequest) -> bool {
        self.entries.lock().pop(&request.cache_key()).is_some()
    }

    pub fn purge_stale(&self) {
        let mut entries = self.entries.lock();
        let stale: Vec<String> = entries
            .iter()
            .filter(|(_, cached)| !cached.is_fresh())
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            entries.pop(&key);
        }
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl fmt::Debug for ResponseStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseStore")
            .field("entries", &self.len())
            .field("max_entries", &self.max_entries)
            .field("ttl", &self.ttl)
            .finish()
    }
}

// ============================================================================
// Memory Cache
// ============================================================================

struct Pending {
    key: String,
    method: String,
    buffer: SharedBuffer,
}

/// Per-request [`Cache`] that saves into a shared [`ResponseStore`].
pub struct MemoryCache {
    store: Arc<ResponseStore>,
    pending: Mutex<Option<Pending>>,
}

impl MemoryCache {
    pub fn new(store: Arc<ResponseStore>) -> Self {
        Self {
            store,
            pending: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<ResponseStore> {
        &self.store
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn begin(&self, request: &HttpRequest) -> Result<CacheSink> {
        let buffer = SharedBuffer::new();
        let key = request.cache_key();
        tracing::trace!(key = %key, "Capturing response for cache");

        *self.pending.lock() = Some(Pending {
            key,
            method: request.method.clone(),
            buffer: buffer.clone(),
        });
        Ok(Box::new(buffer))
    }

    async fn save(&self, metadata: &ResponseMetadata) -> Result<()> {
        let pending = self
            .pending
            .lock()
            .take()
            .ok_or_else(|| Error::Cache("save called before begin".to_string()))?;

        if !ResponseStore::is_cacheable(&pending.method, metadata.status) {
            tracing::debug!(
                key = %pending.key,
                status = metadata.status,
                "Response not cacheable"
            );
            return Ok(());
        }

        let body = pending.buffer.take();
        let cached = CachedResponse::new(metadata, body, self.store.ttl());
        self.store.insert(pending.key, cached);
        Ok(())
    }

    fn name(&self) -> &str {
        "MemoryCache"
    }
}

/// Container provider creating a fresh [`Cache`] for each request.
#[derive(Clone)]
pub struct CacheFactory {
    create: Arc<dyn Fn() -> Arc<dyn Cache> + Send + Sync>,
}

impl CacheFactory {
    pub fn new<F>(create: F) -> Self
    where
        F: Fn() -> Arc<dyn Cache> + Send + Sync + 'static,
    {
        Self {
            create: Arc::new(create),
        }
    }

    /// A factory producing [`MemoryCache`]s over `store`.
    pub fn memory(store: Arc<ResponseStore>) -> Self {
        Self::new(move || Arc::new(MemoryCache::new(store.clone())) as Arc<dyn Cache>)
    }

    pub fn create(&self) -> Arc<dyn Cache> {
        (self.create)()
    }
}

impl Provider for CacheFactory {}

impl fmt::Debug for CacheFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CacheFactory(..)")
    }
}

// ============================================================================
// Capture
// ============================================================================

struct CacheBinding {
    cache: Arc<dyn Cache>,
    sink: CacheSink,
}

fn same_cache(a: &Arc<dyn Cache>, b: &Arc<dyn Cache>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Request-scoped response writer that tees body bytes into a bound cache.
pub struct CacheCapture {
    request: HttpRequest,
    transport: Box<dyn Write + Send>,
    binding: Option<CacheBinding>,
    finished: bool,
}

impl CacheCapture {
    pub fn new(request: HttpRequest, transport: Box<dyn Write + Send>) -> Self {
        Self {
            request,
            transport,
            binding: None,
            finished: false,
        }
    }

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    /// The bound cache, if any.
    pub fn cache(&self) -> Option<&Arc<dyn Cache>> {
        self.binding.as_ref().map(|b| &b.cache)
    }

    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Drop the binding after its sink failed. The cache is not saved.
    fn detach(&mut self, error: &io::Error) {
        if let Some(binding) = self.binding.take() {
            tracing::warn!(
                cache = binding.cache.name(),
                request = %self.request.cache_key(),
                error = %error,
                "Cache sink failed; response will not be cached"
            );
        }
    }

    /// Bind a cache to this request and start capturing.
    ///
    /// Without an explicit `cache`, a [`CacheFactory`] is resolved from the
    /// container; a missing factory is returned as
    /// [`Error::ProviderNotFound`]. Once bound, later calls return the bound
    /// cache and ignore any other instance passed in. After [`finish`] there
    /// is nothing left to save, so binding fails with [`Error::Cache`].
    ///
    /// [`finish`]: CacheCapture::finish
    pub async fn cache_request(
        &mut self,
        cache: Option<Arc<dyn Cache>>,
        container: &Container,
    ) -> Result<Arc<dyn Cache>> {
        if self.finished {
            return Err(Error::Cache("request already finished".to_string()));
        }

        if let Some(binding) = &self.binding {
            if let Some(other) = &cache
                && !same_cache(other, &binding.cache)
            {
                tracing::warn!(
                    bound = binding.cache.name(),
                    ignored = other.name(),
                    "Cache already bound to request; ignoring new instance"
                );
            }
            return Ok(binding.cache.clone());
        }

        let cache = match cache {
            Some(cache) => cache,
            None => container.resolve::<CacheFactory>()?.create(),
        };

        let sink = cache.begin(&self.request).await?;
        tracing::debug!(
            cache = cache.name(),
            request = %self.request.cache_key(),
            "Cache bound to request"
        );
        self.binding = Some(CacheBinding {
            cache: cache.clone(),
            sink,
        });
        Ok(cache)
    }

    /// End of request: hand the final metadata to the bound cache.
    ///
    /// Saves at most once; a second call, or a call with nothing bound, does
    /// nothing. A sink that fails to flush skips the save.
    pub async fn finish(&mut self, metadata: &ResponseMetadata) -> Result<()> {
        self.finished = true;
        self.transport.flush()?;

        let Some(mut binding) = self.binding.take() else {
            return Ok(());
        };
        if let Err(error) = binding.sink.flush() {
            self.binding = Some(binding);
            self.detach(&error);
            return Ok(());
        }
        drop(binding.sink);

        tracing::debug!(
            cache = binding.cache.name(),
            status = metadata.status,
            "Saving captured response"
        );
        binding.cache.save(metadata).await
    }
}

impl Write for CacheCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.transport.write(buf)?;
        if let Some(binding) = &mut self.binding
            && let Err(error) = binding.sink.write_all(&buf[..written])
        {
            self.detach(&error);
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.transport.flush()?;
        if let Some(binding) = &mut self.binding
            && let Err(error) = binding.sink.flush()
        {
            self.detach(&error);
        }
        Ok(())
    }
}

impl fmt::Debug for CacheCapture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheCapture")
            .field("request", &self.request.cache_key())
            .field("cache", &self.cache().map(|c| c.name().to_string()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingCache {
        sink: SharedBuffer,
        saves: AtomicUsize,
    }

    #[async_trait]
    impl Cache for CountingCache {
        async fn begin(&self, _request: &HttpRequest) -> Result<CacheSink> {
            Ok(Box::new(self.sink.clone()))
        }

        async fn save(&self, _metadata: &ResponseMetadata) -> Result<()> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// A cache whose sink rejects every write.
    #[derive(Default)]
    struct BrokenSinkCache {
        saves: AtomicUsize,
    }

    struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("cache disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl Cache for BrokenSinkCache {
        async fn begin(&self, _request: &HttpRequest) -> Result<CacheSink> {
            Ok(Box::new(FullDisk))
        }

        async fn save(&self, _metadata: &ResponseMetadata) -> Result<()> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn capture() -> (CacheCapture, SharedBuffer) {
        let transport = SharedBuffer::new();
        let capture = CacheCapture::new(
            HttpRequest::new("GET", "/users"),
            Box::new(transport.clone()),
        );
        (capture, transport)
    }

    #[tokio::test]
    async fn test_cache_request_is_idempotent() {
        let (mut capture, _) = capture();
        let container = Container::new();
        let first: Arc<dyn Cache> = Arc::new(CountingCache::default());
        let second: Arc<dyn Cache> = Arc::new(CountingCache::default());

        let a = capture
            .cache_request(Some(first.clone()), &container)
            .await
            .unwrap();
        let b = capture.cache_request(Some(second), &container).await.unwrap();
        let c = capture.cache_request(None, &container).await.unwrap();

        assert!(same_cache(&a, &first));
        assert!(same_cache(&b, &first));
        assert!(same_cache(&c, &first));
    }

    #[tokio::test]
    async fn test_writes_are_teed() {
        let (mut capture, transport) = capture();
        let cache = Arc::new(CountingCache::default());
        capture
            .cache_request(Some(cache.clone() as Arc<dyn Cache>), &Container::new())
            .await
            .unwrap();

        capture.write_all(b"hello").unwrap();
        assert_eq!(transport.contents(), b"hello");
        assert_eq!(cache.sink.contents(), b"hello");
    }

    #[tokio::test]
    async fn test_finish_saves_exactly_once() {
        let (mut capture, _) = capture();
        let cache = Arc::new(CountingCache::default());
        capture
            .cache_request(Some(cache.clone() as Arc<dyn Cache>), &Container::new())
            .await
            .unwrap();

        let metadata = HttpResponse::ok().metadata();
        capture.finish(&metadata).await.unwrap();
        capture.finish(&metadata).await.unwrap();

        assert_eq!(cache.saves.load(Ordering::SeqCst), 1);
        assert!(!capture.is_bound());
    }

    #[tokio::test]
    async fn test_failing_sink_detaches_without_touching_transport() {
        let (mut capture, transport) = capture();
        let cache = Arc::new(BrokenSinkCache::default());
        capture
            .cache_request(Some(cache.clone() as Arc<dyn Cache>), &Container::new())
            .await
            .unwrap();

        capture.write_all(b"hello").unwrap();
        assert!(!capture.is_bound());

        capture.finish(&HttpResponse::ok().metadata()).await.unwrap();
        assert_eq!(transport.contents(), b"hello");
        assert_eq!(cache.saves.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cache_request_after_finish_is_rejected() {
        let (mut capture, _) = capture();
        capture.finish(&HttpResponse::ok().metadata()).await.unwrap();

        let cache = Arc::new(CountingCache::default());
        let result = capture
            .cache_request(Some(cache.clone() as Arc<dyn Cache>), &Container::new())
            .await;

        assert!(matches!(result, Err(Error::Cache(_))));
        assert!(!capture.is_bound());
        capture.finish(&HttpResponse::ok().metadata()).await.unwrap();
        assert_eq!(cache.saves.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_finish_without_binding_is_noop() {
        let (mut capture, transport) = capture();
        capture.write_all(b"plain").unwrap();
        capture.finish(&HttpResponse::ok().metadata()).await.unwrap();
        assert_eq!(transport.contents(), b"plain");
    }

    #[tokio::test]
    async fn test_missing_factory_is_surfaced() {
        let (mut capture, _) = capture();
        let result = capture.cache_request(None, &Container::new()).await;
        assert!(matches!(result, Err(Error::ProviderNotFound(_))));
        assert!(!capture.is_bound());
    }

    #[tokio::test]
    async fn test_memory_cache_round_trip() {
        let store = Arc::new(ResponseStore::new(10, Duration::from_secs(60)));
        let container = Container::new();
        container.register(CacheFactory::memory(store.clone()));

        let (mut capture, _) = capture();
        capture.cache_request(None, &container).await.unwrap();
        capture.write_all(b"[1,2]").unwrap();

        let response = HttpResponse::ok().with_body(b"[1,2]".to_vec());
        capture.finish(&response.metadata()).await.unwrap();

        let hit = store.lookup(&HttpRequest::new("GET", "/users")).unwrap();
        assert_eq!(hit.body, b"[1,2]");
        assert_eq!(hit.headers.get("X-Cache"), Some(&"HIT".to_string()));
    }

    #[tokio::test]
    async fn test_memory_cache_skips_uncacheable() {
        let store = Arc::new(ResponseStore::new(10, Duration::from_secs(60)));
        let cache = MemoryCache::new(store.clone());

        cache.begin(&HttpRequest::new("POST", "/users")).await.unwrap();
        cache.save(&HttpResponse::ok().metadata()).await.unwrap();
        assert!(store.is_empty());

        let result = cache.save(&HttpResponse::ok().metadata()).await;
        assert!(matches!(result, Err(Error::Cache(_))));
    }

    #[test]
    fn test_store_evicts_least_recently_used() {
        let store = ResponseStore::new(2, Duration::from_secs(60));
        let metadata = HttpResponse::ok().metadata();
        let ttl = store.ttl();

        store.insert("a".into(), CachedResponse::new(&metadata, vec![1], ttl));
        store.insert("b".into(), CachedResponse::new(&metadata, vec![2], ttl));
        assert!(store.get("a").is_some());
        store.insert("c".into(), CachedResponse::new(&metadata, vec![3], ttl));

        assert!(store.get("a").is_some());
        assert!(store.get("b").is_none());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_store_never_serves_stale() {
        let store = ResponseStore::new(4, Duration::ZERO);
        let metadata = HttpResponse::ok().metadata();
        store.insert(
            "GET /".into(),
            CachedResponse::new(&metadata, Vec::new(), Duration::ZERO),
        );

        assert!(store.lookup(&HttpRequest::new("GET", "/")).is_none());
        assert!(store.is_empty());
    }
}
