//! Thumbnail retrieval.
//!
//! `fetch_one` is the caller-driven single download and propagates every
//! failure. `fetch_many` wraps it for a whole batch and never lets one item
//! abort the rest: failures are collected into the report instead.

use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);
/// Upper bound on a single image body.
const MAX_IMAGE_BYTES: u64 = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("GET {url} returned HTTP {code}")]
    Status { url: String, code: u16 },
    #[error("GET {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("writing {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Source of raw image bytes.
pub trait ImageSource {
    fn get_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// `ImageSource` over plain HTTP GET.
#[derive(Clone)]
pub struct HttpImageSource {
    agent: ureq::Agent,
    max_bytes: u64,
}

impl Default for HttpImageSource {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpImageSource {
    pub fn new() -> Self {
        Self::with_max_bytes(MAX_IMAGE_BYTES)
    }

    /// Source that refuses bodies larger than `max_bytes`.
    pub fn with_max_bytes(max_bytes: u64) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(DOWNLOAD_TIMEOUT).build(),
            max_bytes,
        }
    }
}

impl ImageSource for HttpImageSource {
    fn get_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.agent.get(url).call().map_err(|err| match err {
            ureq::Error::Status(code, _) => FetchError::Status {
                url: url.to_owned(),
                code,
            },
            ureq::Error::Transport(transport) => FetchError::Transport {
                url: url.to_owned(),
                message: transport.to_string(),
            },
        })?;

        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(self.max_bytes.saturating_add(1))
            .read_to_end(&mut bytes)
            .map_err(|err| FetchError::Transport {
                url: url.to_owned(),
                message: err.to_string(),
            })?;
        if bytes.len() as u64 > self.max_bytes {
            return Err(FetchError::Transport {
                url: url.to_owned(),
                message: format!("body exceeds {} bytes", self.max_bytes),
            });
        }
        Ok(bytes)
    }
}

/// One item of a bulk request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailJob {
    pub video_id: String,
    pub url: String,
}

#[derive(Debug)]
pub struct FetchFailure {
    pub video_id: String,
    pub cause: FetchError,
}

/// Result of a bulk fetch. Every key of `saved` points at a file that existed
/// when the report was returned.
#[derive(Debug, Default)]
pub struct BulkFetchReport {
    pub saved: HashMap<String, PathBuf>,
    pub failures: Vec<FetchFailure>,
}

/// Deterministic on-disk location of a thumbnail.
pub fn thumbnail_path(dir: &Path, video_id: &str) -> PathBuf {
    dir.join(format!("{video_id}.jpg"))
}

pub struct ThumbnailFetcher<S> {
    source: S,
}

impl<S: ImageSource> ThumbnailFetcher<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// Downloads `url` to `{dir}/{video_id}.jpg`, creating `dir` if needed.
    pub fn fetch_one(&self, url: &str, video_id: &str, dir: &Path) -> Result<PathBuf, FetchError> {
        let bytes = self.source.get_bytes(url)?;
        fs::create_dir_all(dir).map_err(|source| FetchError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = thumbnail_path(dir, video_id);
        fs::write(&path, &bytes).map_err(|source| FetchError::Io {
            path: path.clone(),
            source,
        })?;
        debug!(video_id, bytes = bytes.len(), path = %path.display(), "thumbnail saved");
        Ok(path)
    }

    /// Fetches every job in input order. A failed item is logged and recorded
    /// in `failures`; it never stops the remaining items.
    pub fn fetch_many(&self, jobs: &[ThumbnailJob], dir: &Path) -> BulkFetchReport {
        let mut report = BulkFetchReport::default();
        for job in jobs {
            match self.fetch_one(&job.url, &job.video_id, dir) {
                Ok(path) => {
                    report.saved.insert(job.video_id.clone(), path);
                }
                Err(cause) => {
                    warn!(video_id = %job.video_id, error = %cause, "thumbnail download failed");
                    report.failures.push(FetchFailure {
                        video_id: job.video_id.clone(),
                        cause,
                    });
                }
            }
        }
        info!(
            requested = jobs.len(),
            saved = report.saved.len(),
            failed = report.failures.len(),
            "thumbnail batch finished"
        );
        report
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::collections::HashSet;

    use super::{FetchError, ImageSource};

    /// Serves `bytes-for:<url>` for every URL except the configured failures.
    #[derive(Default)]
    pub struct FakeImages {
        pub failing_urls: HashSet<String>,
    }

    impl FakeImages {
        pub fn failing(urls: &[&str]) -> Self {
            Self {
                failing_urls: urls.iter().map(|u| (*u).to_owned()).collect(),
            }
        }
    }

    impl ImageSource for FakeImages {
        fn get_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
            if self.failing_urls.contains(url) {
                return Err(FetchError::Status {
                    url: url.to_owned(),
                    code: 404,
                });
            }
            Ok(format!("bytes-for:{url}").into_bytes())
        }
    }
}
