//! S3-compatible HTTP archive store.
//!
//! Objects live at `<endpoint>/<bucket>/<key>`. Uploads are a single `PUT`
//! carrying the archive SHA-256 in the `x-amz-meta-sha256` header; existence
//! checks are a `HEAD` that compares the returned header.

use super::{check_key, ArchiveStore, ArchiveStoreError, Result};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Object metadata header holding the archive checksum.
pub const SHA256_HEADER: &str = "x-amz-meta-sha256";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub struct HttpArchiveStore {
    agent: ureq::Agent,
    endpoint: String,
    bucket: String,
    token: Option<String>,
}

impl HttpArchiveStore {
    pub fn new(endpoint: &str, bucket: &str, token: Option<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(REQUEST_TIMEOUT)
            .build();
        Self {
            agent,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
            token,
        }
    }

    fn object_url(&self, key: &str) -> Result<String> {
        check_key(key)?;
        Ok(format!("{}/{}/{}", self.endpoint, self.bucket, key))
    }

    fn authorize(&self, request: ureq::Request) -> ureq::Request {
        match &self.token {
            Some(token) => request.set("Authorization", &format!("Bearer {}", token)),
            None => request,
        }
    }
}

fn map_ureq_error(key: &str, err: ureq::Error) -> ArchiveStoreError {
    match err {
        ureq::Error::Status(status @ (401 | 403), _) => ArchiveStoreError::Auth {
            key: key.to_string(),
            status,
        },
        ureq::Error::Status(status, _) => ArchiveStoreError::Status {
            key: key.to_string(),
            status,
        },
        ureq::Error::Transport(transport) => ArchiveStoreError::Transport {
            key: key.to_string(),
            message: transport.to_string(),
        },
    }
}

impl ArchiveStore for HttpArchiveStore {
    fn store(&self, key: &str, path: &Path) -> Result<()> {
        let url = self.object_url(key)?;
        let body = std::fs::read(path).map_err(|source| ArchiveStoreError::Io {
            key: key.to_string(),
            source,
        })?;
        let sha = oa_bundle::sha256_hex(&body);

        let request = self
            .authorize(self.agent.put(&url))
            .set("Content-Type", "application/zip")
            .set(SHA256_HEADER, &sha);
        request
            .send_bytes(&body)
            .map_err(|e| map_ureq_error(key, e))?;

        debug!(key, url = %url, bytes = body.len(), "Uploaded archive object");
        Ok(())
    }

    fn exists(&self, key: &str, expected_sha: Option<&str>) -> Result<bool> {
        let url = self.object_url(key)?;
        let response = match self.authorize(self.agent.head(&url)).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(404, _)) => return Ok(false),
            Err(e) => return Err(map_ureq_error(key, e)),
        };

        let Some(expected) = expected_sha else {
            return Ok(true);
        };
        match response.header(SHA256_HEADER) {
            Some(actual) if actual.eq_ignore_ascii_case(expected) => Ok(true),
            Some(actual) => Err(ArchiveStoreError::ChecksumMismatch {
                key: key.to_string(),
                expected: expected.to_string(),
                actual: actual.to_string(),
            }),
            None => {
                warn!(key, "Archive object has no checksum metadata");
                Err(ArchiveStoreError::Unverifiable {
                    key: key.to_string(),
                    message: format!("response carries no {} header", SHA256_HEADER),
                })
            }
        }
    }

    fn describe(&self) -> String {
        format!("http:{}/{}", self.endpoint, self.bucket)
    }
}
