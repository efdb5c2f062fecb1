//! Remote content sources

use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use uncvmfs_fs::ContentId;

use crate::error::DownloadError;

/// Timeout for a single object fetch
const FETCH_TIMEOUT: Duration = Duration::from_secs(300);

/// Fetches object content by identity.
///
/// Implementations are shared by all pool workers and must be callable
/// concurrently.
pub trait Fetcher: Send + Sync {
    /// Stream the bytes of `id` into `sink`, returning the number written.
    ///
    /// The bytes are not verified here; the content store checks them
    /// against `id` before accepting them.
    fn fetch(&self, id: &ContentId, sink: &mut dyn Write) -> Result<u64, DownloadError>;
}

/// Fetches objects over HTTP from `<base>/data/<hh>/<rest>`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    base_url: String,
}

impl HttpFetcher {
    pub fn new(base_url: &str) -> crate::Result<Self> {
        let client = Client::builder().timeout(FETCH_TIMEOUT).build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn url_for(&self, id: &ContentId) -> String {
        let (head, tail) = id.fan_out();
        format!("{}/data/{}/{}", self.base_url, head, tail)
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, id: &ContentId, sink: &mut dyn Write) -> Result<u64, DownloadError> {
        let failed = |e: reqwest::Error| DownloadError::Fetch {
            id: *id,
            message: e.to_string(),
        };

        let response = self.client.get(self.url_for(id)).send().map_err(failed)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(DownloadError::Missing { id: *id });
        }
        let mut response = response.error_for_status().map_err(failed)?;
        response.copy_to(sink).map_err(failed)
    }
}

/// Serves objects from memory.
///
/// Records how many fetches ran and how many ran at the same time, and can
/// be told to slow down or to return corrupted bytes.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    blobs: HashMap<ContentId, Vec<u8>>,
    corrupt: Mutex<HashMap<ContentId, usize>>,
    delay: Option<Duration>,
    fetches: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl MemoryFetcher {
    pub fn new(blobs: impl IntoIterator<Item = (ContentId, Vec<u8>)>) -> Self {
        Self {
            blobs: blobs.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Sleep this long inside every fetch.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Serve wrong bytes for the next `times` fetches of `id`.
    pub fn corrupt(self, id: ContentId, times: usize) -> Self {
        self.corrupt
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, times);
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Highest number of fetches observed running at once
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn serve(&self, id: &ContentId, sink: &mut dyn Write) -> Result<u64, DownloadError> {
        let blob = self
            .blobs
            .get(id)
            .ok_or(DownloadError::Missing { id: *id })?;

        let corrupted = {
            let mut corrupt = self.corrupt.lock().unwrap_or_else(PoisonError::into_inner);
            match corrupt.get_mut(id) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            }
        };

        let bytes: &[u8] = if corrupted { b"corrupted bytes" } else { blob };
        sink.write_all(bytes)?;
        Ok(bytes.len() as u64)
    }
}

impl Fetcher for MemoryFetcher {
    fn fetch(&self, id: &ContentId, sink: &mut dyn Write) -> Result<u64, DownloadError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        let result = self.serve(id, sink);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_url_uses_fan_out() {
        let fetcher = HttpFetcher::new("http://example.org/repo/").unwrap();
        let id = ContentId::of(b"hello world");
        assert_eq!(
            fetcher.url_for(&id),
            format!("http://example.org/repo/data/b9/{}", &id.to_hex()[2..])
        );
    }

    #[test]
    fn memory_fetcher_serves_known_blob() {
        let id = ContentId::of(b"abc");
        let fetcher = MemoryFetcher::new([(id, b"abc".to_vec())]);
        let mut out = Vec::new();
        assert_eq!(fetcher.fetch(&id, &mut out).unwrap(), 3);
        assert_eq!(out, b"abc");
        assert_eq!(fetcher.fetch_count(), 1);
    }

    #[test]
    fn memory_fetcher_corrupts_requested_times() {
        let id = ContentId::of(b"abc");
        let fetcher = MemoryFetcher::new([(id, b"abc".to_vec())]).corrupt(id, 1);

        let mut first = Vec::new();
        fetcher.fetch(&id, &mut first).unwrap();
        let mut second = Vec::new();
        fetcher.fetch(&id, &mut second).unwrap();

        assert_ne!(first, b"abc");
        assert_eq!(second, b"abc");
    }

    #[test]
    fn memory_fetcher_unknown_blob_is_missing() {
        let fetcher = MemoryFetcher::default();
        let mut out = Vec::new();
        let err = fetcher.fetch(&ContentId::of(b"nope"), &mut out).unwrap_err();
        assert!(matches!(err, DownloadError::Missing { .. }));
    }
}
