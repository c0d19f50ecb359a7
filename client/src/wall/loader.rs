//! Asynchronous tile loader running in its own execution context
//!
//! The renderer talks to the loader only through two channels: requests go in,
//! responses come out. The loader side is a coordinator that owns the resource
//! cache and hands network fetches to platform specific dispatchers (a small
//! thread pool on native, `spawn_local` futures on the web). Nothing here is
//! shared with the render path.

use std::collections::HashSet;

use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures::{FutureExt, StreamExt};
use log::{debug, warn};

use super::cache::{ResourceCache, ResourceRef};
use super::geometry::TileKey;
use crate::config::{ImageSourceConfig, WallConfig};
use crate::error::{Result, WallError};

/// Request message: `{x, y, highRes, key}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub x: i64,
    pub y: i64,
    pub high_res: bool,
    pub key: String,
}

impl LoadRequest {
    pub fn for_key(key: TileKey) -> Self {
        Self {
            x: key.coord.x,
            y: key.coord.y,
            high_res: key.lod.is_high(),
            key: key.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    Cached,
    Loaded,
    Error,
}

/// Response message: `{key, imgSrc?, status, error?}`
#[derive(Debug, Clone)]
pub struct LoadResponse {
    pub key: String,
    pub resource: Option<ResourceRef>,
    pub status: LoadStatus,
    pub error: Option<String>,
}

impl LoadResponse {
    pub fn cached(key: String, resource: ResourceRef) -> Self {
        Self {
            key,
            resource: Some(resource),
            status: LoadStatus::Cached,
            error: None,
        }
    }

    pub fn loaded(key: String, resource: ResourceRef) -> Self {
        Self {
            key,
            resource: Some(resource),
            status: LoadStatus::Loaded,
            error: None,
        }
    }

    pub fn failed(key: String, error: impl Into<String>) -> Self {
        Self {
            key,
            resource: None,
            status: LoadStatus::Error,
            error: Some(error.into()),
        }
    }

    /// Handle string of the delivered resource
    pub fn img_src(&self) -> Option<&str> {
        self.resource.as_ref().map(|r| r.src())
    }
}

/// Anything that accepts load requests without blocking
pub trait RequestSink {
    fn submit(&mut self, request: LoadRequest);
}

/// Builds image URLs from the configured template
#[derive(Debug, Clone)]
pub struct ImageUrls {
    template: String,
    low_res: (u32, u32),
    high_res: (u32, u32),
}

impl ImageUrls {
    pub fn new(config: &ImageSourceConfig) -> Self {
        Self {
            template: config.url_template.clone(),
            low_res: config.low_res,
            high_res: config.high_res,
        }
    }

    pub fn url(&self, request: &LoadRequest) -> String {
        let (width, height) = if request.high_res {
            self.high_res
        } else {
            self.low_res
        };
        self.template
            .replace("{x}", &request.x.to_string())
            .replace("{y}", &request.y.to_string())
            .replace("{width}", &width.to_string())
            .replace("{height}", &height.to_string())
    }
}

/// Decode fetched bytes into RGBA pixels
pub fn decode_tile_image(data: &[u8]) -> Result<image::RgbaImage> {
    let img = image::load_from_memory(data)?;
    Ok(img.to_rgba8())
}

/// A network fetch the coordinator wants performed
#[derive(Debug, Clone)]
pub struct FetchJob {
    pub key: String,
    pub url: String,
}

/// Result of a fetch+decode, posted back to the coordinator
#[derive(Debug)]
pub struct FetchOutcome {
    pub key: String,
    pub result: Result<image::RgbaImage>,
}

/// Runs fetch jobs somewhere off the coordinator
pub trait FetchDispatch {
    fn dispatch(&self, job: FetchJob);
}

/// What the coordinator does with an incoming request
#[derive(Debug)]
pub enum Dispatch {
    Reply(LoadResponse),
    Fetch(FetchJob),
    /// Same key already in flight; its completion answers this request too
    Coalesced,
}

/// Loader-side state: cache, in-flight keys, resource ids
pub struct LoaderCoordinator {
    urls: ImageUrls,
    cache: ResourceCache,
    in_flight: HashSet<String>,
    next_resource: u64,
}

impl LoaderCoordinator {
    pub fn new(config: &WallConfig) -> Self {
        Self::with_cache(
            ImageUrls::new(&config.images),
            ResourceCache::new(config.loader.cache_max_entries, config.loader.cache_max_bytes),
        )
    }

    pub fn with_cache(urls: ImageUrls, cache: ResourceCache) -> Self {
        Self {
            urls,
            cache,
            in_flight: HashSet::new(),
            next_resource: 0,
        }
    }

    pub fn accept(&mut self, request: LoadRequest) -> Dispatch {
        if let Some(resource) = self.cache.get(&request.key) {
            return Dispatch::Reply(LoadResponse::cached(request.key, resource));
        }
        if !self.in_flight.insert(request.key.clone()) {
            return Dispatch::Coalesced;
        }
        let url = self.urls.url(&request);
        Dispatch::Fetch(FetchJob {
            key: request.key,
            url,
        })
    }

    pub fn complete(&mut self, outcome: FetchOutcome) -> LoadResponse {
        let FetchOutcome { key, result } = outcome;
        self.in_flight.remove(&key);

        match result {
            Ok(image) => {
                self.next_resource += 1;
                let resource = ResourceRef::new(format!("blob:wall/{}", self.next_resource), image);
                self.cache.insert(key.clone(), resource.clone());
                debug!(
                    "Loaded tile {} as {} (cache: {} entries, {:.0}% memory)",
                    key,
                    resource.src(),
                    self.cache.len(),
                    self.cache.stats().memory_usage_percent()
                );
                LoadResponse::loaded(key, resource)
            }
            Err(e) => {
                warn!("Failed to load tile {}: {}", key, e);
                LoadResponse::failed(key, e.to_string())
            }
        }
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    /// Message loop: runs until the renderer drops its side of the channel
    pub async fn run<D: FetchDispatch>(
        mut self,
        port: LoaderPort,
        mut fetched: UnboundedReceiver<FetchOutcome>,
        dispatch: D,
    ) {
        let LoaderPort {
            mut requests,
            responses,
        } = port;

        loop {
            let response = futures::select! {
                request = requests.next() => match request {
                    Some(request) => match self.accept(request) {
                        Dispatch::Reply(response) => Some(response),
                        Dispatch::Fetch(job) => {
                            dispatch.dispatch(job);
                            None
                        }
                        Dispatch::Coalesced => None,
                    },
                    None => break,
                },
                outcome = fetched.next() => outcome.map(|outcome| self.complete(outcome)),
                complete => break,
            };

            if let Some(response) = response {
                if responses.unbounded_send(response).is_err() {
                    break;
                }
            }
        }
        debug!("Tile loader stopped");
    }
}

/// Loader end of the message channels
pub struct LoaderPort {
    pub requests: UnboundedReceiver<LoadRequest>,
    pub responses: UnboundedSender<LoadResponse>,
}

/// Render-side handle to the loader
pub struct TileLoader {
    request_tx: UnboundedSender<LoadRequest>,
    response_rx: UnboundedReceiver<LoadResponse>,
    pending: HashSet<String>,
    #[cfg(not(target_arch = "wasm32"))]
    _coordinator: Option<std::thread::JoinHandle<()>>,
}

impl TileLoader {
    /// Handle plus the loader-side port, with nothing running on the port yet
    pub fn channel() -> (Self, LoaderPort) {
        let (request_tx, requests) = mpsc::unbounded();
        let (responses, response_rx) = mpsc::unbounded();
        let loader = Self {
            request_tx,
            response_rx,
            pending: HashSet::new(),
            #[cfg(not(target_arch = "wasm32"))]
            _coordinator: None,
        };
        (loader, LoaderPort { requests, responses })
    }

    /// Start a coordinator thread and a fetch pool reading from `source`
    #[cfg(not(target_arch = "wasm32"))]
    pub fn spawn<S: ImageSource>(config: &WallConfig, source: S) -> Result<Self> {
        let (mut loader, port) = Self::channel();
        let (done_tx, done_rx) = mpsc::unbounded();
        let pool = FetchPool::spawn(std::sync::Arc::new(source), config.loader.fetch_workers, done_tx)?;
        let coordinator = LoaderCoordinator::new(config);

        let handle = std::thread::Builder::new()
            .name("tile-loader".to_string())
            .spawn(move || pollster::block_on(coordinator.run(port, done_rx, pool)))
            .map_err(|e| WallError::LoaderUnavailable(e.to_string()))?;

        loader._coordinator = Some(handle);
        Ok(loader)
    }

    /// Start the coordinator as a local task using the browser fetch API
    #[cfg(target_arch = "wasm32")]
    pub fn spawn_web(config: &WallConfig) -> Result<Self> {
        let (loader, port) = Self::channel();
        let (done_tx, done_rx) = mpsc::unbounded();
        let dispatch = web::LocalDispatch::new(done_tx, config.images.user_agent.clone());
        let coordinator = LoaderCoordinator::new(config);
        wasm_bindgen_futures::spawn_local(coordinator.run(port, done_rx, dispatch));
        Ok(loader)
    }

    /// Queue a request; duplicates of a pending key are dropped
    pub fn request(&mut self, request: LoadRequest) {
        if self.pending.contains(&request.key) {
            return;
        }
        let key = request.key.clone();
        match self.request_tx.unbounded_send(request) {
            Ok(()) => {
                self.pending.insert(key);
            }
            Err(_) => warn!("Tile loader is gone, dropping request {}", key),
        }
    }

    /// Next available response, never blocks
    pub fn poll(&mut self) -> Option<LoadResponse> {
        match self.response_rx.next().now_or_never() {
            Some(Some(response)) => {
                self.pending.remove(&response.key);
                Some(response)
            }
            // closed or nothing ready
            Some(None) | None => None,
        }
    }

    pub fn is_loading(&self, key: &str) -> bool {
        self.pending.contains(key)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl RequestSink for TileLoader {
    fn submit(&mut self, request: LoadRequest) {
        self.request(request);
    }
}

/// Blocking byte source used by the native fetch pool
#[cfg(not(target_arch = "wasm32"))]
pub trait ImageSource: Send + Sync + 'static {
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// HTTP image source
#[cfg(not(target_arch = "wasm32"))]
pub struct HttpImageSource {
    client: reqwest::blocking::Client,
}

#[cfg(not(target_arch = "wasm32"))]
impl HttpImageSource {
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(user_agent)
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| WallError::LoaderUnavailable(format!("HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl ImageSource for HttpImageSource {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let fetch_error = |reason: String| WallError::Fetch {
            url: url.to_string(),
            reason,
        };
        let response = self.client.get(url).send().map_err(|e| fetch_error(e.to_string()))?;
        if !response.status().is_success() {
            return Err(fetch_error(format!("HTTP {}", response.status())));
        }
        let bytes = response.bytes().map_err(|e| fetch_error(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// Fixed set of threads performing blocking fetch+decode jobs
#[cfg(not(target_arch = "wasm32"))]
pub struct FetchPool {
    jobs: std::sync::mpsc::Sender<FetchJob>,
    _workers: Vec<std::thread::JoinHandle<()>>,
}

#[cfg(not(target_arch = "wasm32"))]
impl FetchPool {
    pub fn spawn<S: ImageSource>(
        source: std::sync::Arc<S>,
        workers: usize,
        done: UnboundedSender<FetchOutcome>,
    ) -> Result<Self> {
        use std::sync::{Arc, Mutex};

        let (jobs, job_rx) = std::sync::mpsc::channel::<FetchJob>();
        let job_rx = Arc::new(Mutex::new(job_rx));

        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers.max(1) {
            let job_rx = Arc::clone(&job_rx);
            let source = Arc::clone(&source);
            let done = done.clone();
            let handle = std::thread::Builder::new()
                .name(format!("tile-fetch-{}", i))
                .spawn(move || Self::worker_thread(job_rx, source, done))
                .map_err(|e| WallError::LoaderUnavailable(e.to_string()))?;
            handles.push(handle);
        }

        Ok(Self {
            jobs,
            _workers: handles,
        })
    }

    fn worker_thread<S: ImageSource>(
        job_rx: std::sync::Arc<std::sync::Mutex<std::sync::mpsc::Receiver<FetchJob>>>,
        source: std::sync::Arc<S>,
        done: UnboundedSender<FetchOutcome>,
    ) {
        loop {
            let job = match job_rx.lock() {
                Ok(rx) => rx.recv(),
                Err(_) => break,
            };
            let Ok(job) = job else {
                break; // Pool dropped
            };

            let result = source.fetch(&job.url).and_then(|bytes| decode_tile_image(&bytes));
            if done.unbounded_send(FetchOutcome { key: job.key, result }).is_err() {
                break; // Coordinator gone
            }
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl FetchDispatch for FetchPool {
    fn dispatch(&self, job: FetchJob) {
        if let Err(e) = self.jobs.send(job) {
            warn!("Fetch pool is gone, dropping job {}", e.0.key);
        }
    }
}

#[cfg(target_arch = "wasm32")]
mod web {
    use futures::channel::mpsc::UnboundedSender;

    use super::{FetchDispatch, FetchJob, FetchOutcome, decode_tile_image};
    use crate::error::{Result, WallError};

    /// Dispatches fetches as local futures on the browser event loop
    pub struct LocalDispatch {
        done: UnboundedSender<FetchOutcome>,
        user_agent: String,
    }

    impl LocalDispatch {
        pub fn new(done: UnboundedSender<FetchOutcome>, user_agent: String) -> Self {
            Self { done, user_agent }
        }
    }

    impl FetchDispatch for LocalDispatch {
        fn dispatch(&self, job: FetchJob) {
            let done = self.done.clone();
            let user_agent = self.user_agent.clone();
            wasm_bindgen_futures::spawn_local(async move {
                let result = fetch(&job.url, &user_agent)
                    .await
                    .and_then(|bytes| decode_tile_image(&bytes));
                let _ = done.unbounded_send(FetchOutcome { key: job.key, result });
            });
        }
    }

    async fn fetch(url: &str, user_agent: &str) -> Result<Vec<u8>> {
        use wasm_bindgen::JsCast;
        use wasm_bindgen_futures::JsFuture;
        use web_sys::{Request, RequestInit, RequestMode, Response};

        let fetch_error = |reason: String| WallError::Fetch {
            url: url.to_string(),
            reason,
        };

        let opts = RequestInit::new();
        opts.set_method("GET");
        opts.set_mode(RequestMode::Cors);

        let request = Request::new_with_str_and_init(url, &opts)
            .map_err(|e| fetch_error(format!("Failed to create request: {:?}", e)))?;

        // Browsers may refuse to set this header
        let _ = request.headers().set("User-Agent", user_agent);

        let window = web_sys::window().ok_or_else(|| fetch_error("No window object".to_string()))?;
        let resp_value = JsFuture::from(window.fetch_with_request(&request))
            .await
            .map_err(|e| fetch_error(format!("Fetch failed: {:?}", e)))?;

        let resp: Response = resp_value
            .dyn_into()
            .map_err(|_| fetch_error("Response is not a Response object".to_string()))?;

        if !resp.ok() {
            return Err(fetch_error(format!("HTTP {}", resp.status())));
        }

        let array_buffer = JsFuture::from(
            resp.array_buffer()
                .map_err(|e| fetch_error(format!("Failed to get array buffer: {:?}", e)))?,
        )
        .await
        .map_err(|e| fetch_error(format!("Failed to read array buffer: {:?}", e)))?;

        Ok(js_sys::Uint8Array::new(&array_buffer).to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wall::geometry::{Lod, TileCoord};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(width, height, image::Rgba([200, 10, 10, 255]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    /// Serves a small PNG for every URL except ones containing "broken"
    struct MemorySource {
        fetches: Arc<AtomicUsize>,
    }

    impl ImageSource for MemorySource {
        fn fetch(&self, url: &str) -> Result<Vec<u8>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if url.contains("broken") {
                return Err(WallError::Fetch {
                    url: url.to_string(),
                    reason: "HTTP 404 Not Found".to_string(),
                });
            }
            Ok(png_bytes(4, 2))
        }
    }

    fn request(x: i64, y: i64, lod: Lod) -> LoadRequest {
        LoadRequest::for_key(TileKey::new(TileCoord::new(x, y), lod))
    }

    fn wait_for_response(loader: &mut TileLoader) -> LoadResponse {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(response) = loader.poll() {
                return response;
            }
            assert!(Instant::now() < deadline, "no response from loader");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_request_carries_tier() {
        let req = request(3, -4, Lod::High);
        assert_eq!(req.key, "3,-4,1");
        assert!(req.high_res);
        assert!(!request(3, -4, Lod::Low).high_res);
    }

    #[test]
    fn test_url_template() {
        let urls = ImageUrls::new(&ImageSourceConfig::default());
        assert_eq!(
            urls.url(&request(3, -4, Lod::Low)),
            "https://picsum.photos/seed/3_-4/160/90.jpg"
        );
        assert_eq!(
            urls.url(&request(3, -4, Lod::High)),
            "https://picsum.photos/seed/3_-4/1600/900.jpg"
        );
    }

    #[test]
    fn test_coordinator_fetches_then_serves_from_cache() {
        let mut coordinator = LoaderCoordinator::new(&WallConfig::default());

        let job = match coordinator.accept(request(1, 2, Lod::Low)) {
            Dispatch::Fetch(job) => job,
            other => panic!("expected fetch, got {:?}", other),
        };
        assert_eq!(job.key, "1,2,0");
        assert!(matches!(coordinator.accept(request(1, 2, Lod::Low)), Dispatch::Coalesced));

        let loaded = coordinator.complete(FetchOutcome {
            key: job.key,
            result: decode_tile_image(&png_bytes(4, 2)),
        });
        assert_eq!(loaded.status, LoadStatus::Loaded);
        assert_eq!(loaded.resource.as_ref().map(|r| r.dimensions()), Some((4, 2)));

        match coordinator.accept(request(1, 2, Lod::Low)) {
            Dispatch::Reply(response) => {
                assert_eq!(response.status, LoadStatus::Cached);
                assert_eq!(response.img_src(), loaded.img_src());
            }
            other => panic!("expected cached reply, got {:?}", other),
        }
        assert_eq!(coordinator.cache().len(), 1);
    }

    #[test]
    fn test_coordinator_does_not_cache_failures() {
        let mut coordinator = LoaderCoordinator::new(&WallConfig::default());
        assert!(matches!(coordinator.accept(request(0, 0, Lod::Low)), Dispatch::Fetch(_)));

        let failed = coordinator.complete(FetchOutcome {
            key: "0,0,0".to_string(),
            result: decode_tile_image(b"not an image"),
        });
        assert_eq!(failed.status, LoadStatus::Error);
        assert!(failed.resource.is_none());
        assert!(failed.error.is_some());

        assert!(coordinator.cache().is_empty());
        assert!(matches!(coordinator.accept(request(0, 0, Lod::Low)), Dispatch::Fetch(_)));
    }

    #[test]
    fn test_spawned_loader_round_trip() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let source = MemorySource {
            fetches: Arc::clone(&fetches),
        };
        let mut loader = TileLoader::spawn(&WallConfig::default(), source).unwrap();

        loader.request(request(5, 6, Lod::Low));
        assert!(loader.is_loading("5,6,0"));
        let first = wait_for_response(&mut loader);
        assert_eq!(first.key, "5,6,0");
        assert_eq!(first.status, LoadStatus::Loaded);
        assert_eq!(loader.pending_count(), 0);

        loader.request(request(5, 6, Lod::Low));
        let second = wait_for_response(&mut loader);
        assert_eq!(second.status, LoadStatus::Cached);
        assert_eq!(second.img_src(), first.img_src());
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_spawned_loader_reports_errors() {
        let mut config = WallConfig::default();
        config.images.url_template = "https://example.invalid/broken/{x}/{y}".to_string();
        let source = MemorySource {
            fetches: Arc::new(AtomicUsize::new(0)),
        };
        let mut loader = TileLoader::spawn(&config, source).unwrap();

        loader.request(request(1, 1, Lod::Low));
        let response = wait_for_response(&mut loader);
        assert_eq!(response.status, LoadStatus::Error);
        assert!(response.error.unwrap().contains("404"));
    }

    #[test]
    fn test_poll_never_blocks() {
        let (mut loader, _port) = TileLoader::channel();
        assert!(loader.poll().is_none());
        loader.request(request(0, 0, Lod::Low));
        loader.request(request(0, 0, Lod::Low));
        assert_eq!(loader.pending_count(), 1);
        assert!(loader.poll().is_none());
    }
}
