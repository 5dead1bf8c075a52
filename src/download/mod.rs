use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, COOKIE};
use reqwest::StatusCode;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::cookies::{self, Cookie};
use crate::error::{MigrateError, Result};
use crate::store::AttachmentStore;

/// Exponential backoff schedule for transient fetch failures. Unlike the
/// per-URL candidate loop, the retry count here is a hard ceiling so a
/// single dead endpoint cannot stall a run forever.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub wait_min: Duration,
    pub wait_max: Duration,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            wait_min: Duration::from_secs(5),
            wait_max: Duration::from_secs(60),
            max_retries: 6,
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let wait = self
            .wait_min
            .saturating_mul(2u32.saturating_pow(attempt));
        wait.min(self.wait_max)
    }
}

#[derive(Debug, Clone)]
pub struct DownloaderOptions {
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub cookies: Vec<Cookie>,
}

impl Default for DownloaderOptions {
    fn default() -> Self {
        Self {
            concurrency: 5,
            retry: RetryPolicy::default(),
            cookies: Vec::new(),
        }
    }
}

/// Point-in-time counters for one downloader run.
#[derive(Debug, Clone, Copy, Default)]
pub struct DownloadStats {
    pub stored: usize,
    pub skipped_existing: usize,
    pub failed: usize,
    pub in_flight_peak: usize,
}

#[derive(Default)]
struct Counters {
    stored: AtomicUsize,
    skipped_existing: AtomicUsize,
    failed: AtomicUsize,
    in_flight: AtomicUsize,
    in_flight_peak: AtomicUsize,
}

impl Counters {
    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.in_flight_peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

enum FetchOutcome {
    Stored { bytes: usize },
    SkippedExisting,
}

/// Fetches attachments into an [`AttachmentStore`] with at most
/// `concurrency` transfers in flight. `submit` blocks the caller while the
/// pool is saturated, which is the backpressure bound; `await_idle` joins
/// every spawned fetch before the final snapshot is taken.
pub struct Downloader {
    store: Arc<AttachmentStore>,
    client: reqwest::Client,
    cookie_header: String,
    retry: RetryPolicy,
    semaphore: Arc<Semaphore>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl Downloader {
    pub fn new(store: Arc<AttachmentStore>, options: DownloaderOptions) -> Self {
        Self {
            store,
            client: reqwest::Client::new(),
            cookie_header: cookies::header_value(&options.cookies),
            retry: options.retry,
            semaphore: Arc::new(Semaphore::new(options.concurrency.max(1))),
            tasks: Mutex::new(Vec::new()),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Schedules a fetch for `key` unless it is already stored or has no
    /// candidate URLs. Returns true iff fetch work was scheduled. Awaiting a
    /// free concurrency slot happens here, in the caller, not in the task.
    pub async fn submit(self: &Arc<Self>, key: &str, urls: &[String]) -> bool {
        match self.store.scan_for_key(key) {
            Ok(path) => {
                info!("file for {} already exists, skipping: {}", key, path.display());
                self.counters.skipped_existing.fetch_add(1, Ordering::SeqCst);
                return false;
            }
            Err(MigrateError::NotFound) => {}
            Err(e) => {
                error!("could not scan for key {}, downloading anyway: {}", key, e);
            }
        }

        if urls.is_empty() {
            warn!("no candidate URL for key {}", key);
            return false;
        }

        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore closed");

        let this = Arc::clone(self);
        let key = key.to_string();
        let urls = urls.to_vec();
        let handle = tokio::spawn(async move {
            let _permit = permit;
            this.counters.enter();
            this.fetch_item(&key, &urls).await;
            this.counters.exit();
        });
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);
        true
    }

    /// Joins every outstanding fetch task. Returns only once all concurrency
    /// slots have been released; the store index then reflects all completed
    /// work and is safe to snapshot.
    pub async fn await_idle(&self) {
        loop {
            let handles: Vec<_> = {
                let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
                tasks.drain(..).collect()
            };
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    error!("fetch task panicked: {}", e);
                }
            }
        }
    }

    pub fn stats(&self) -> DownloadStats {
        DownloadStats {
            stored: self.counters.stored.load(Ordering::SeqCst),
            skipped_existing: self.counters.skipped_existing.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
            in_flight_peak: self.counters.in_flight_peak.load(Ordering::SeqCst),
        }
    }

    async fn fetch_item(&self, key: &str, urls: &[String]) {
        for (i, url) in urls.iter().enumerate() {
            match self.try_fetch_url(key, url).await {
                Ok(FetchOutcome::Stored { bytes }) => {
                    info!("successfully downloaded {} ({} byte(s)) from: {}", key, bytes, url);
                    self.counters.stored.fetch_add(1, Ordering::SeqCst);
                    return;
                }
                Ok(FetchOutcome::SkippedExisting) => {
                    info!("an attachment already exists for {}, skipping", key);
                    self.counters.skipped_existing.fetch_add(1, Ordering::SeqCst);
                    return;
                }
                Err(e) => {
                    warn!("failed to download candidate #{} for key {} at {}: {}", i, key, url, e);
                }
            }
        }
        error!("unable to download meaningful content for key {}, tried: {:?}", key, urls);
        self.counters.failed.fetch_add(1, Ordering::SeqCst);
    }

    /// One candidate URL: GET with retry/backoff on transient failures, then
    /// stream the body through the store's atomic writer. A final non-200 or
    /// an HTML body fails this candidate without exhausting the others.
    async fn try_fetch_url(&self, key: &str, url: &str) -> Result<FetchOutcome> {
        let resp = self.get_with_retry(url).await?;

        if resp.status() != StatusCode::OK {
            return Err(MigrateError::Download(format!(
                "non-OK status code {}",
                resp.status()
            )));
        }

        let media_type = media_type_of(&resp);
        if media_type == "text/html" {
            // Real attachments are never HTML; this is almost certainly an
            // error or login page.
            return Err(MigrateError::Download(format!(
                "got media type {:?}, probably error page",
                media_type
            )));
        }

        let mut writer = match self.store.reserve_write(key, &media_type) {
            Ok(w) => w,
            Err(MigrateError::AlreadyExists) => return Ok(FetchOutcome::SkippedExisting),
            Err(e) => {
                error!("failed to create attachment writer for {}: {}", key, e);
                return Err(e);
            }
        };

        let mut resp = resp;
        let mut written = 0usize;
        loop {
            match resp.chunk().await {
                Ok(Some(chunk)) => {
                    writer.write_all(&chunk)?;
                    written += chunk.len();
                }
                Ok(None) => break,
                Err(e) => {
                    // Writer is dropped on return, removing the temp file.
                    return Err(e.into());
                }
            }
        }
        writer.close()?;

        Ok(FetchOutcome::Stored { bytes: written })
    }

    async fn get_with_retry(&self, url: &str) -> Result<reqwest::Response> {
        let mut attempt: u32 = 0;
        loop {
            let mut request = self.client.get(url);
            if !self.cookie_header.is_empty() {
                request = request.header(COOKIE, &self.cookie_header);
            }

            let transient = match request.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if !is_transient_status(status) {
                        return Ok(resp);
                    }
                    format!("transient status {}", status)
                }
                Err(e) if attempt >= self.retry.max_retries => return Err(e.into()),
                Err(e) => format!("request error: {}", e),
            };

            if attempt >= self.retry.max_retries {
                return Err(MigrateError::Download(format!(
                    "{} after {} attempt(s)",
                    transient,
                    attempt + 1
                )));
            }

            let wait = self.retry.backoff(attempt);
            warn!("{} for {}, retrying in {:?}", transient, url, wait);
            tokio::time::sleep(wait).await;
            attempt += 1;
        }
    }
}

/// 5xx plus 429: the server may recover, so these back off and retry rather
/// than failing the candidate URL outright.
fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// Media type from the Content-Type header with any parameters stripped.
fn media_type_of(resp: &reqwest::Response) -> String {
    resp.headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|ct| ct.split(';').next())
        .map(|mt| mt.trim().to_ascii_lowercase())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            wait_min: Duration::from_secs(5),
            wait_max: Duration::from_secs(60),
            max_retries: 10,
        };
        assert_eq!(policy.backoff(0), Duration::from_secs(5));
        assert_eq!(policy.backoff(1), Duration::from_secs(10));
        assert_eq!(policy.backoff(2), Duration::from_secs(20));
        assert_eq!(policy.backoff(4), Duration::from_secs(60));
        assert_eq!(policy.backoff(30), Duration::from_secs(60));
    }

    #[test]
    fn transient_statuses() {
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_transient_status(StatusCode::BAD_GATEWAY));
        assert!(!is_transient_status(StatusCode::NOT_FOUND));
        assert!(!is_transient_status(StatusCode::OK));
    }
}
