//! External-Manager Client (spec §4.8): a typed client over the Sonarr/
//! Radarr/Whisparr/Lidarr v1/v3 API family, grounded in
//! `core::providers::tmdb::TmdbProvider` — a plain `reqwest::Client` wrapped
//! with a base URL and a per-call provider error, generalised to the v3/v1
//! fallback the arr family needs and gated by a per-instance
//! `KeyedRateLimiter` bucket.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::rate_limit::KeyedRateLimiter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArrKind {
    Sonarr,
    Radarr,
    Whisparr,
    Lidarr,
}

#[derive(Debug, thiserror::Error)]
pub enum ArrClientError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{kind:?} instance responded with status {status}")]
    UnexpectedStatus { kind: ArrKind, status: StatusCode },

    #[error("no reachable API version (tried v3 then v1)")]
    NoVersionReachable,
}

pub type ArrResult<T> = Result<T, ArrClientError>;

/// API version an operation was served from (fallback order is v3 then v1,
/// spec §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiVersion {
    V3,
    V1,
}

impl ApiVersion {
    fn as_str(&self) -> &'static str {
        match self {
            ApiVersion::V3 => "v3",
            ApiVersion::V1 => "v1",
        }
    }
}

const FALLBACK_ORDER: [ApiVersion; 2] = [ApiVersion::V3, ApiVersion::V1];

#[derive(Debug, Clone, Deserialize)]
pub struct RootFolder {
    pub id: i64,
    pub path: String,
    #[serde(rename = "freeSpace")]
    pub free_space: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BlocklistItem {
    pub id: i64,
    #[serde(rename = "sourceTitle")]
    pub source_title: String,
}

/// Per-instance client (spec §4.8). One instance owns one `base_url` +
/// encrypted API key; the rate limiter is shared with the caller so the
/// same bucket is consulted whether the request comes from a webhook, a
/// manual retry, or the remediation pipeline.
pub struct ArrClient {
    kind: ArrKind,
    base_url: String,
    api_key: String,
    client: Client,
    rate_limiter: Arc<KeyedRateLimiter>,
    rate_limit_key: String,
}

impl ArrClient {
    pub fn new(
        kind: ArrKind,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        rate_limiter: Arc<KeyedRateLimiter>,
        instance_id: i64,
    ) -> Self {
        Self {
            kind,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client builder"),
            rate_limiter,
            rate_limit_key: format!("arr-instance-{instance_id}"),
        }
    }

    async fn throttle(&self, deadline: Duration) {
        self.rate_limiter.acquire(&self.rate_limit_key, deadline).await;
    }

    fn url(&self, version: ApiVersion, path: &str) -> String {
        format!("{}/api/{}{}", self.base_url, version.as_str(), path)
    }

    /// Tries v3 then v1 for a GET request, returning the first version that
    /// responds without a transport error (spec §4.8 fallback order). A
    /// non-2xx response from v3 still counts as "reachable" and is
    /// returned rather than falling through to v1 — fallback is about API
    /// version availability, not every failure mode.
    async fn get_with_fallback<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        deadline: Duration,
    ) -> ArrResult<T> {
        let mut last_err: Option<ArrClientError> = None;
        for version in FALLBACK_ORDER {
            self.throttle(deadline).await;
            let url = self.url(version, path);
            let response = self
                .client
                .get(&url)
                .header("X-Api-Key", &self.api_key)
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    return Ok(resp.json::<T>().await?);
                }
                Ok(resp) => {
                    last_err = Some(ArrClientError::UnexpectedStatus {
                        kind: self.kind,
                        status: resp.status(),
                    });
                }
                Err(e) => {
                    last_err = Some(ArrClientError::Request(e));
                }
            }
        }
        Err(last_err.unwrap_or(ArrClientError::NoVersionReachable))
    }

    /// GET `/api/v{3|1}/system/status` with a 5s deadline; success on HTTP
    /// 200 from either version (spec §4.8 connection test).
    pub async fn test_connection(&self) -> bool {
        for version in FALLBACK_ORDER {
            self.throttle(Duration::from_secs(5)).await;
            let url = self.url(version, "/system/status");
            let result = self
                .client
                .get(&url)
                .header("X-Api-Key", &self.api_key)
                .timeout(Duration::from_secs(5))
                .send()
                .await;
            if matches!(&result, Ok(resp) if resp.status() == StatusCode::OK) {
                return true;
            }
        }
        false
    }

    pub async fn list_root_folders(&self, deadline: Duration) -> ArrResult<Vec<RootFolder>> {
        self.get_with_fallback("/rootfolder", deadline).await
    }

    pub async fn trigger_search(&self, media_id: i64, deadline: Duration) -> ArrResult<()> {
        let mut last_err: Option<ArrClientError> = None;
        for version in FALLBACK_ORDER {
            self.throttle(deadline).await;
            let url = self.url(version, "/command");
            let body = serde_json::json!({ "name": "MissingEpisodeSearch", "episodeIds": [media_id] });
            let response = self
                .client
                .post(&url)
                .header("X-Api-Key", &self.api_key)
                .json(&body)
                .send()
                .await;
            match response {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => {
                    last_err = Some(ArrClientError::UnexpectedStatus {
                        kind: self.kind,
                        status: resp.status(),
                    })
                }
                Err(e) => last_err = Some(ArrClientError::Request(e)),
            }
        }
        Err(last_err.unwrap_or(ArrClientError::NoVersionReachable))
    }

    pub async fn read_blocklist(&self, deadline: Duration) -> ArrResult<Vec<BlocklistItem>> {
        #[derive(Deserialize)]
        struct BlocklistPage {
            records: Vec<BlocklistItem>,
        }
        let page: BlocklistPage = self.get_with_fallback("/blocklist", deadline).await?;
        Ok(page.records)
    }

    pub async fn add_to_blocklist(&self, source_title: &str, deadline: Duration) -> ArrResult<()> {
        let mut last_err: Option<ArrClientError> = None;
        for version in FALLBACK_ORDER {
            self.throttle(deadline).await;
            let url = self.url(version, "/blocklist");
            let body: Value = serde_json::json!({ "sourceTitle": source_title });
            let response = self
                .client
                .post(&url)
                .header("X-Api-Key", &self.api_key)
                .json(&body)
                .send()
                .await;
            match response {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => {
                    last_err = Some(ArrClientError::UnexpectedStatus {
                        kind: self.kind,
                        status: resp.status(),
                    })
                }
                Err(e) => last_err = Some(ArrClientError::Request(e)),
            }
        }
        Err(last_err.unwrap_or(ArrClientError::NoVersionReachable))
    }

    pub async fn delete_media_file(&self, file_id: i64, deadline: Duration) -> ArrResult<()> {
        let mut last_err: Option<ArrClientError> = None;
        for version in FALLBACK_ORDER {
            self.throttle(deadline).await;
            let url = self.url(version, &format!("/moviefile/{file_id}"));
            let response = self
                .client
                .delete(&url)
                .header("X-Api-Key", &self.api_key)
                .send()
                .await;
            match response {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => {
                    last_err = Some(ArrClientError::UnexpectedStatus {
                        kind: self.kind,
                        status: resp.status(),
                    })
                }
                Err(e) => last_err = Some(ArrClientError::Request(e)),
            }
        }
        Err(last_err.unwrap_or(ArrClientError::NoVersionReachable))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_base_and_version_without_double_slash() {
        let limiter = Arc::new(KeyedRateLimiter::new(5, 5));
        let client = ArrClient::new(ArrKind::Sonarr, "http://sonarr:8989/", "key", limiter, 1);
        assert_eq!(
            client.url(ApiVersion::V3, "/system/status"),
            "http://sonarr:8989/api/v3/system/status"
        );
    }
}
