//! Object-storage client for remote picture placement.
//!
//! A deliberately small REST client: `PutObject` plus `ListBucketCname`,
//! which is all this crate needs. Requests carry the header-signature
//! scheme (HMAC-SHA1 over verb, content type, date, and canonicalized
//! resource, base64-encoded into the `Authorization` header).
//!
//! The CNAME listing exists so uploaded pictures can be linked through a
//! bucket-bound custom domain instead of the provider's default
//! `{bucket}.{endpoint}` host. The lookup happens once per run; callers
//! cache the result for the run's duration.

use crate::config::StorageConfig;
use crate::placement::{ObjectStore, UploadError};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use once_cell::sync::Lazy;
use regex::Regex;
use sha1::Sha1;
use std::time::Duration;
use tracing::{debug, warn};

type HmacSha1 = Hmac<Sha1>;

/// Per-request timeout. Uploads are single PNGs (a few hundred KB), so a
/// request that takes longer than this is effectively failed anyway and the
/// caller's local fallback should take over.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// A bucket handle for the object-storage REST API.
pub struct OssBucket {
    config: StorageConfig,
    client: reqwest::Client,
}

impl OssBucket {
    pub fn new(config: StorageConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    /// `https://{bucket}.{endpoint}` — the provider's default host for this
    /// bucket.
    fn bucket_host(&self) -> String {
        format!("https://{}.{}", self.config.bucket, self.config.endpoint)
    }

    /// Sign one request with the header-signature scheme.
    ///
    /// String to sign:
    /// `VERB \n Content-MD5 \n Content-Type \n Date \n CanonicalizedResource`
    /// (Content-MD5 is unused here and stays empty; no canonicalized
    /// service headers are sent.)
    fn authorization(&self, verb: &str, content_type: &str, date: &str, resource: &str) -> String {
        let string_to_sign = format!("{verb}\n\n{content_type}\n{date}\n{resource}");
        // HMAC keys of any length are valid; new_from_slice cannot fail.
        let mut mac = HmacSha1::new_from_slice(self.config.access_key_secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(string_to_sign.as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());
        format!("OSS {}:{}", self.config.access_key_id, signature)
    }

    fn http_date() -> String {
        Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
    }

    /// List the bucket's bound CNAME records and return the enabled domains.
    async fn list_enabled_cnames(&self) -> Result<Vec<String>, UploadError> {
        let date = Self::http_date();
        let resource = format!("/{}/?cname", self.config.bucket);
        let auth = self.authorization("GET", "", &date, &resource);

        let response = self
            .client
            .get(format!("{}/?cname", self.bucket_host()))
            .header("Date", date)
            .header("Authorization", auth)
            .send()
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::Rejected {
                status: status.as_u16(),
            });
        }

        let xml = response
            .text()
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))?;
        Ok(parse_enabled_domains(&xml))
    }
}

#[async_trait]
impl ObjectStore for OssBucket {
    async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<(), UploadError> {
        let date = Self::http_date();
        let resource = format!("/{}/{}", self.config.bucket, key);
        let auth = self.authorization("PUT", "image/png", &date, &resource);

        debug!("Uploading {} bytes to {}", body.len(), key);
        let response = self
            .client
            .put(format!("{}/{}", self.bucket_host(), key))
            .header("Date", date)
            .header("Authorization", auth)
            .header("Content-Type", "image/png")
            .body(body)
            .send()
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(UploadError::Rejected {
                status: status.as_u16(),
            })
        }
    }

    /// One lookup per run. Errors are logged and swallowed — an unreachable
    /// CNAME API only means the default domain is used, not that the run
    /// should fail.
    async fn custom_domain(&self) -> Option<String> {
        match self.list_enabled_cnames().await {
            Ok(domains) => match domains.into_iter().next() {
                Some(domain) => {
                    debug!("Found bound custom domain: {domain}");
                    Some(domain)
                }
                None => {
                    warn!("No bound custom domain; using the default bucket domain");
                    None
                }
            },
            Err(e) => {
                warn!("CNAME lookup failed ({e}); using the default bucket domain");
                None
            }
        }
    }

    fn object_url(&self, key: &str, custom_domain: Option<&str>) -> String {
        match custom_domain {
            Some(domain) => format!("https://{domain}/{key}"),
            None => format!(
                "https://{}.{}/{}",
                self.config.bucket, self.config.endpoint, key
            ),
        }
    }
}

// The CNAME listing is a small fixed-shape XML document; two capture
// patterns are enough and keep a full XML parser out of the dependency
// tree.
static RE_CNAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<Cname>(.*?)</Cname>").unwrap());
static RE_DOMAIN: Lazy<Regex> = Lazy::new(|| Regex::new(r"<Domain>([^<]*)</Domain>").unwrap());
static RE_STATUS: Lazy<Regex> = Lazy::new(|| Regex::new(r"<Status>([^<]*)</Status>").unwrap());

/// Extract the domains of all CNAME records whose status is `Enabled`,
/// in listing order.
fn parse_enabled_domains(xml: &str) -> Vec<String> {
    RE_CNAME
        .captures_iter(xml)
        .filter_map(|record| {
            let record = &record[1];
            let enabled = RE_STATUS
                .captures(record)
                .is_some_and(|s| s[1].trim() == "Enabled");
            if !enabled {
                return None;
            }
            RE_DOMAIN
                .captures(record)
                .map(|d| d[1].trim().to_string())
                .filter(|d| !d.is_empty())
        })
        .collect()
}
