//! Edge/content tier
//!
//! Reads are plain HTTP GETs against the distribution's base URL. Writes and
//! deletes go to the origin object store behind it, when one is configured;
//! without one the tier is read-only.

use crate::cache::backend::codec::decode_bytes;
use crate::cache::backend::CacheBackend;
use crate::cache::config::CdnConfig;
use crate::cache::types::{CacheTier, CacheValue};
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Origin store the distribution serves from
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        cache_control: &str,
    ) -> Result<()>;

    async fn delete_object(&self, key: &str) -> Result<bool>;
}

pub struct CdnBackend {
    http: Client,
    base_url: String,
    default_cache_control: String,
    origin: Option<Arc<dyn ObjectStore>>,
}

impl CdnBackend {
    pub fn new(config: &CdnConfig, origin: Option<Arc<dyn ObjectStore>>) -> Result<Self> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        if origin.is_none() {
            warn!(
                "CDN tier at {} has no origin store; writes will be rejected",
                config.base_url
            );
        }

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            default_cache_control: config.cache_control.clone(),
            origin,
        })
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }

    fn cache_control(&self, ttl: Option<Duration>) -> String {
        match ttl {
            Some(ttl) => format!("public, max-age={}", ttl.as_secs()),
            None => self.default_cache_control.clone(),
        }
    }
}

/// Body and content type published for a value
fn publish_body(value: &CacheValue) -> Result<(Vec<u8>, &'static str)> {
    match value {
        CacheValue::Json(json) => Ok((serde_json::to_vec(json)?, "application/json")),
        CacheValue::Binary(bytes) => Ok((bytes.clone(), "application/octet-stream")),
    }
}

#[async_trait]
impl CacheBackend for CdnBackend {
    fn tier(&self) -> CacheTier {
        CacheTier::Cdn
    }

    async fn get(&self, key: &str) -> Result<Option<CacheValue>> {
        let response = self.http.get(self.url_for(key)).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!(key = key, "CDN cache MISS");
                Ok(None)
            }
            status if status.is_success() => {
                let body = response.bytes().await?;
                debug!(key = key, "CDN cache HIT");
                Ok(Some(decode_bytes(&body)))
            }
            status => Err(CacheError::backend(
                CacheTier::Cdn,
                format!("GET {} returned {}", key, status),
            )),
        }
    }

    async fn set(&self, key: &str, value: &CacheValue, ttl: Option<Duration>) -> Result<bool> {
        let origin = match &self.origin {
            Some(origin) => origin,
            None => {
                warn!(key = key, "CDN write skipped: no origin store configured");
                return Ok(false);
            }
        };

        let (body, content_type) = publish_body(value)?;
        origin
            .put_object(key, body, content_type, &self.cache_control(ttl))
            .await?;
        debug!(key = key, "CDN object published");
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        match &self.origin {
            Some(origin) => origin.delete_object(key).await,
            None => {
                debug!(key = key, "CDN delete skipped: no origin store configured");
                Ok(false)
            }
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let response = self.http.head(self.url_for(key)).send().await?;
        Ok(response.status().is_success())
    }

    /// A distribution cannot be wiped through this tier
    async fn clear(&self) -> Result<bool> {
        warn!("CDN clear is not supported; invalidate through the distribution instead");
        Ok(false)
    }

    async fn size(&self) -> Result<usize> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backend::LocalObjectStore;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve `/known` with a JSON body and 404 for anything else
    async fn start_origin() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                let (mut socket, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                let mut buf = vec![0u8; 4096];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]);

                let response = if request.starts_with("GET /known ") {
                    let body = r#"{"calories":420}"#;
                    format!(
                        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    )
                } else {
                    "HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                        .to_string()
                };
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        format!("http://{}", addr)
    }

    fn config(base_url: String) -> CdnConfig {
        CdnConfig {
            base_url,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_get_hit_and_miss() {
        let base_url = start_origin().await;
        let backend = CdnBackend::new(&config(base_url), None).unwrap();

        assert_eq!(
            backend.get("known").await.unwrap(),
            Some(CacheValue::Json(json!({"calories": 420})))
        );
        assert_eq!(backend.get("unknown").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_only_without_origin() {
        let backend = CdnBackend::new(&config("http://127.0.0.1:9".to_string()), None).unwrap();

        assert!(!backend.set("k", &"v".into(), None).await.unwrap());
        assert!(!backend.delete("k").await.unwrap());
        assert!(!backend.clear().await.unwrap());
        assert_eq!(backend.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_publish_through_origin() {
        let origin = Arc::new(LocalObjectStore::new());
        let backend = CdnBackend::new(
            &config("http://127.0.0.1:9/".to_string()),
            Some(origin.clone()),
        )
        .unwrap();

        assert!(backend
            .set("img/logo", &CacheValue::Binary(vec![7, 7]), Some(Duration::from_secs(600)))
            .await
            .unwrap());
        assert!(backend
            .set("menu", &CacheValue::Json(json!(["soup"])), None)
            .await
            .unwrap());

        let logo = origin.object("img/logo").await.unwrap();
        assert_eq!(logo.body, vec![7, 7]);
        assert_eq!(logo.content_type, "application/octet-stream");
        assert_eq!(logo.cache_control, "public, max-age=600");

        let menu = origin.object("menu").await.unwrap();
        assert_eq!(menu.content_type, "application/json");
        assert_eq!(menu.cache_control, "public, max-age=3600");

        assert!(backend.delete("menu").await.unwrap());
        assert!(origin.object("menu").await.is_none());
    }
}
