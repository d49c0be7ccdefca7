//! Archive transport: `https://` via ureq and local `file:` URIs.

use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("unsupported URI scheme in '{0}'")]
    UnsupportedScheme(String),
    #[error("refusing unencrypted transport for '{0}'")]
    InsecureTransport(String),
    #[error("HTTP {code} for {uri}")]
    Status { uri: String, code: u16 },
    #[error("transport error for {uri}: {message}")]
    Transport { uri: String, message: String },
    #[error("{uri} exceeds the {limit}-byte download limit")]
    TooLarge { uri: String, limit: u64 },
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl FetchError {
    /// Transport faults, timeouts, 5xx and 429 are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status { code, .. } => *code >= 500 || *code == 429,
            _ => false,
        }
    }
}

pub trait Fetcher: Send + Sync {
    fn fetch(&self, uri: &str) -> Result<Vec<u8>, FetchError>;
}

/// HTTP(S) fetcher. Each attempt is bounded by `timeout`.
pub struct HttpFetcher {
    agent: ureq::Agent,
    max_bytes: u64,
    allow_insecure: bool,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, max_bytes: u64, allow_insecure: bool) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
            max_bytes,
            allow_insecure,
        }
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, uri: &str) -> Result<Vec<u8>, FetchError> {
        if uri.starts_with("http://") && !self.allow_insecure {
            return Err(FetchError::InsecureTransport(uri.to_owned()));
        }
        if !uri.starts_with("https://") && !uri.starts_with("http://") {
            return Err(FetchError::UnsupportedScheme(uri.to_owned()));
        }
        tracing::debug!("GET {uri}");
        let resp = match self.agent.get(uri).call() {
            Ok(r) => r,
            Err(ureq::Error::StatusCode(code)) => {
                return Err(FetchError::Status {
                    uri: uri.to_owned(),
                    code,
                });
            }
            Err(e) => {
                return Err(FetchError::Transport {
                    uri: uri.to_owned(),
                    message: e.to_string(),
                });
            }
        };

        let code = resp.status().as_u16();
        if code >= 400 {
            return Err(FetchError::Status {
                uri: uri.to_owned(),
                code,
            });
        }

        let mut body = Vec::new();
        resp.into_body()
            .into_reader()
            .take(self.max_bytes.saturating_add(1))
            .read_to_end(&mut body)
            .map_err(|e| FetchError::Transport {
                uri: uri.to_owned(),
                message: e.to_string(),
            })?;
        if body.len() as u64 > self.max_bytes {
            return Err(FetchError::TooLarge {
                uri: uri.to_owned(),
                limit: self.max_bytes,
            });
        }
        Ok(body)
    }
}

/// Reads `file:` URIs (`file:/abs/path` or `file:///abs/path`).
pub struct FileFetcher {
    max_bytes: u64,
}

impl FileFetcher {
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }

    pub fn path_of(uri: &str) -> Option<PathBuf> {
        let rest = uri.strip_prefix("file:")?;
        let rest = rest.strip_prefix("//").unwrap_or(rest);
        if rest.is_empty() {
            return None;
        }
        Some(PathBuf::from(rest))
    }
}

impl Fetcher for FileFetcher {
    fn fetch(&self, uri: &str) -> Result<Vec<u8>, FetchError> {
        let path = Self::path_of(uri).ok_or_else(|| FetchError::UnsupportedScheme(uri.to_owned()))?;
        tracing::debug!("read {}", path.display());
        let io_err = |source| FetchError::Io {
            path: path.clone(),
            source,
        };
        let len = std::fs::metadata(&path).map_err(io_err)?.len();
        if len > self.max_bytes {
            return Err(FetchError::TooLarge {
                uri: uri.to_owned(),
                limit: self.max_bytes,
            });
        }
        std::fs::read(&path).map_err(io_err)
    }
}

/// Dispatches on the URI scheme.
pub struct DefaultFetcher {
    http: HttpFetcher,
    file: FileFetcher,
}

impl DefaultFetcher {
    pub fn new(timeout: Duration, max_bytes: u64, allow_insecure: bool) -> Self {
        Self {
            http: HttpFetcher::new(timeout, max_bytes, allow_insecure),
            file: FileFetcher::new(max_bytes),
        }
    }
}

impl Fetcher for DefaultFetcher {
    fn fetch(&self, uri: &str) -> Result<Vec<u8>, FetchError> {
        if uri.starts_with("file:") {
            self.file.fetch(uri)
        } else if uri.starts_with("https://") || uri.starts_with("http://") {
            self.http.fetch(uri)
        } else {
            Err(FetchError::UnsupportedScheme(uri.to_owned()))
        }
    }
}
