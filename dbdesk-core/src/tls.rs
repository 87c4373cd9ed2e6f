//! SSL/TLS mode resolution shared by every network driver.
//!
//! A connection's `ssl` flag and `sslConfig` record resolve to a [`TlsPlan`].
//! Each driver maps the plan's [`TlsParams`] onto its native client options
//! and dials through [`connect_with_plan`], which owns the `prefer` fallback.

use crate::config::{ConnectionConfig, SslMode};
use crate::error::{DbDeskError, Result};
use std::future::Future;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Concrete TLS parameters for one attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsParams {
    /// Reject certificates that do not chain to a trusted root
    pub verify_certificate: bool,
    /// Reject certificates whose name does not match the host
    pub verify_hostname: bool,
    /// CA bundle (PEM text or path)
    pub ca: Option<String>,
    /// Client certificate (PEM text or path)
    pub cert: Option<String>,
    /// Client key (PEM text or path)
    pub key: Option<String>,
}

impl TlsParams {
    /// Whether a client identity was supplied.
    pub fn has_client_identity(&self) -> bool {
        self.cert.is_some() && self.key.is_some()
    }
}

/// How a connection negotiates TLS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsPlan {
    /// Plaintext only
    Disabled,
    /// TLS is mandatory
    Enabled(TlsParams),
    /// TLS first, then one plaintext retry
    Prefer(TlsParams),
}

impl TlsPlan {
    /// Resolves the plan for a connection config.
    ///
    /// An explicit `sslConfig.mode` wins; otherwise the legacy `ssl: true`
    /// flag means `require`.
    pub fn resolve(config: &ConnectionConfig) -> Self {
        let legacy = config.ssl.unwrap_or(false);
        let ssl = config.ssl_config.clone().unwrap_or_default();
        let mode = match ssl.mode {
            SslMode::Disable if legacy => SslMode::Require,
            mode => mode,
        };
        let reject_unauthorized = ssl.reject_unauthorized;

        match mode {
            SslMode::Disable => Self::Disabled,
            SslMode::Require => {
                let verify = reject_unauthorized.unwrap_or(true);
                Self::Enabled(TlsParams {
                    verify_certificate: verify,
                    verify_hostname: verify,
                    ca: ssl.ca,
                    cert: ssl.cert,
                    key: ssl.key,
                })
            }
            SslMode::VerifyCa => Self::Enabled(TlsParams {
                verify_certificate: true,
                verify_hostname: false,
                ca: ssl.ca,
                cert: None,
                key: None,
            }),
            SslMode::VerifyFull => Self::Enabled(TlsParams {
                verify_certificate: true,
                verify_hostname: true,
                ca: ssl.ca,
                cert: ssl.cert,
                key: ssl.key,
            }),
            SslMode::Prefer => {
                let verify = reject_unauthorized.unwrap_or(false);
                Self::Prefer(TlsParams {
                    verify_certificate: verify,
                    verify_hostname: verify,
                    ca: ssl.ca,
                    cert: ssl.cert,
                    key: ssl.key,
                })
            }
        }
    }

    /// Whether the first attempt uses TLS.
    pub fn uses_tls(&self) -> bool {
        !matches!(self, Self::Disabled)
    }

    /// Parameters of the first attempt.
    pub fn params(&self) -> Option<&TlsParams> {
        match self {
            Self::Disabled => None,
            Self::Enabled(params) | Self::Prefer(params) => Some(params),
        }
    }
}

/// Runs `attempt` according to the plan.
///
/// `attempt` receives `Some(params)` for a TLS attempt and `None` for a
/// plaintext one. Under `prefer`, a failed TLS attempt is retried once in
/// plaintext and the retry's error is the one returned. Anything the failed
/// attempt built is dropped before the retry starts.
///
/// # Errors
/// Returns the error of the last attempt made.
pub async fn connect_with_plan<T, F, Fut>(plan: &TlsPlan, mut attempt: F) -> Result<T>
where
    F: FnMut(Option<TlsParams>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match plan {
        TlsPlan::Disabled => attempt(None).await,
        TlsPlan::Enabled(params) => attempt(Some(params.clone())).await,
        TlsPlan::Prefer(params) => match attempt(Some(params.clone())).await {
            Ok(handle) => Ok(handle),
            Err(tls_error) => {
                warn!(
                    "TLS attempt failed, retrying without TLS: {}",
                    tls_error
                );
                attempt(None).await
            }
        },
    }
}

/// Whether a material string holds PEM text rather than a path.
pub fn is_inline_pem(source: &str) -> bool {
    source.contains("-----BEGIN")
}

/// Loads PEM bytes from inline text or a file path.
///
/// # Errors
/// Returns a TLS error if the file cannot be read.
pub fn load_pem(source: &str) -> Result<Vec<u8>> {
    if is_inline_pem(source) {
        return Ok(source.as_bytes().to_vec());
    }
    std::fs::read(source).map_err(|e| {
        DbDeskError::tls(format!("Failed to read PEM file '{}': {}", source, e))
    })
}

/// A PEM source available as a file on disk.
///
/// Inline PEM text is written to a uniquely named temporary file that is
/// removed when this value drops; path sources are used as-is.
#[derive(Debug)]
pub struct PemFile {
    path: PathBuf,
    temporary: bool,
}

impl PemFile {
    /// Materializes a PEM source as a file.
    ///
    /// # Errors
    /// Returns a TLS error if the temporary file cannot be written.
    pub fn materialize(source: &str) -> Result<Self> {
        if !is_inline_pem(source) {
            return Ok(Self {
                path: PathBuf::from(source),
                temporary: false,
            });
        }
        let path = std::env::temp_dir().join(format!("dbdesk-{}.pem", uuid::Uuid::new_v4()));
        std::fs::write(&path, source.as_bytes()).map_err(|e| {
            DbDeskError::tls(format!("Failed to write temporary PEM file: {}", e))
        })?;
        debug!("Wrote inline PEM material to {}", path.display());
        Ok(Self {
            path,
            temporary: true,
        })
    }

    /// Materializes a client certificate and key as one combined file.
    ///
    /// # Errors
    /// Returns a TLS error if either source cannot be read or the file cannot
    /// be written.
    pub fn combine(cert: &str, key: &str) -> Result<Self> {
        let mut combined = load_pem(cert)?;
        if !combined.ends_with(b"\n") {
            combined.push(b'\n');
        }
        combined.extend(load_pem(key)?);
        let text = String::from_utf8(combined)
            .map_err(|_| DbDeskError::tls("PEM material is not valid UTF-8"))?;
        Self::materialize(&text)
    }

    /// Path of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PemFile {
    fn drop(&mut self) {
        if self.temporary {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
