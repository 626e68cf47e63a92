//! Gated HTTP transport with retry and latency logging
//!
//! All provider traffic goes through [`Transport`]. Reads retry transient
//! timeouts with a linear backoff; writes are additionally gated by a
//! process-wide flag so a staging instance can run read-only against a
//! real household.

use std::time::{Duration, Instant};

use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::error::{CloudError, Result};

/// Attempts per call, including the first
const TRIES: usize = 3;

/// Backoff between attempts is `attempt_index * BACKOFF_STEP`
const BACKOFF_STEP: Duration = Duration::from_millis(50);

/// Shared HTTP call wrapper for the Sonos cloud API
///
/// Mutating calls (`post`, `delete`) fail fast with
/// [`CloudError::WriteNotAllowed`] while the write gate is disabled, so
/// callers can distinguish "nothing happened" from "nothing was attempted".
/// The token endpoint uses [`Transport::post_form`], which is not gated:
/// keeping the credential alive is auth infrastructure, not a speaker
/// mutation.
#[derive(Debug, Clone)]
pub struct Transport {
    client: reqwest::Client,
    allow_write: bool,
}

impl Transport {
    pub fn new(client: reqwest::Client, allow_write: bool) -> Self {
        Self {
            client,
            allow_write,
        }
    }

    /// Whether the write gate currently permits mutating calls
    pub fn writes_allowed(&self) -> bool {
        self.allow_write
    }

    /// Standardized GET call
    pub async fn get(
        &self,
        url: &str,
        params: &[(&str, &str)],
        headers: HeaderMap,
    ) -> Result<serde_json::Value> {
        self.send_with_retry("GET", url, || {
            self.client.get(url).query(params).headers(headers.clone())
        })
        .await
    }

    /// Standardized POST call, write-gated
    pub async fn post(
        &self,
        url: &str,
        body: Option<serde_json::Value>,
        headers: HeaderMap,
    ) -> Result<serde_json::Value> {
        if !self.allow_write {
            warn!(url, "write gate disabled, refusing POST");
            return Err(CloudError::WriteNotAllowed);
        }
        self.send_with_retry("POST", url, || {
            let req = self.client.post(url).headers(headers.clone());
            match &body {
                Some(json) => req.json(json),
                None => req,
            }
        })
        .await
    }

    /// Standardized DELETE call, write-gated
    pub async fn delete(
        &self,
        url: &str,
        params: &[(&str, &str)],
        headers: HeaderMap,
    ) -> Result<serde_json::Value> {
        if !self.allow_write {
            warn!(url, "write gate disabled, refusing DELETE");
            return Err(CloudError::WriteNotAllowed);
        }
        self.send_with_retry("DELETE", url, || {
            self.client
                .delete(url)
                .query(params)
                .headers(headers.clone())
        })
        .await
    }

    /// Form-encoded POST for the OAuth token endpoint
    ///
    /// Not write-gated; retried like a read.
    pub async fn post_form(
        &self,
        url: &str,
        form: &[(&str, &str)],
        headers: HeaderMap,
    ) -> Result<serde_json::Value> {
        self.send_with_retry("POST", url, || {
            self.client.post(url).form(form).headers(headers.clone())
        })
        .await
    }

    async fn send_with_retry<F>(
        &self,
        method: &str,
        url: &str,
        build: F,
    ) -> Result<serde_json::Value>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        for attempt in 1..=TRIES {
            let started = Instant::now();
            match build().send().await {
                Ok(response) => {
                    let status = response.status();
                    let elapsed = started.elapsed().as_millis();
                    if !status.is_success() {
                        let body = response.text().await.unwrap_or_default();
                        warn!(url, status = status.as_u16(), body, "{method} rejected upstream");
                        return Err(CloudError::Upstream {
                            status: status.as_u16(),
                            body,
                        });
                    }
                    debug!(url, elapsed_ms = elapsed, "{method} ok");
                    return Self::read_json(response, status).await;
                }
                Err(err) if err.is_timeout() || err.is_connect() => {
                    if attempt == TRIES {
                        warn!(url, attempt, "{method} exceeded retries");
                        return Err(CloudError::RetriesExceeded {
                            url: url.to_string(),
                            source: err,
                        });
                    }
                    warn!(url, attempt, "{method} timed out, retrying");
                    tokio::time::sleep(BACKOFF_STEP * attempt as u32).await;
                }
                Err(err) => return Err(CloudError::Http(err)),
            }
        }
        unreachable!("retry loop returns on the final attempt")
    }

    /// Parse a response body as JSON, tolerating empty 2xx replies
    ///
    /// Playback commands answer 200/204 with no body.
    async fn read_json(response: reqwest::Response, status: StatusCode) -> Result<serde_json::Value> {
        if status == StatusCode::NO_CONTENT {
            return Ok(serde_json::Value::Null);
        }
        let text = response.text().await?;
        if text.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn transport(allow_write: bool) -> Transport {
        Transport::new(reqwest::Client::new(), allow_write)
    }

    #[tokio::test]
    async fn test_get_returns_json() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/households")
            .match_query(mockito::Matcher::UrlEncoded(
                "connectedOnly".into(),
                "true".into(),
            ))
            .with_header("content-type", "application/json")
            .with_body(r#"{"households":[{"id":"Sonos_abc"}]}"#)
            .create_async()
            .await;

        let url = format!("{}/households", server.url());
        let value = transport(false)
            .get(&url, &[("connectedOnly", "true")], HeaderMap::new())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(value["households"][0]["id"], "Sonos_abc");
    }

    #[tokio::test]
    async fn test_non_2xx_fails_without_retry() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/groups")
            .with_status(410)
            .with_body("gone")
            .expect(1)
            .create_async()
            .await;

        let url = format!("{}/groups", server.url());
        let err = transport(false)
            .get(&url, &[], HeaderMap::new())
            .await
            .unwrap_err();

        mock.assert_async().await;
        match err {
            CloudError::Upstream { status, body } => {
                assert_eq!(status, 410);
                assert_eq!(body, "gone");
            }
            other => panic!("expected Upstream, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_write_gate_blocks_post_and_delete() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", mockito::Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let url = format!("{}/groups/g1/playback/play", server.url());
        let t = transport(false);

        let err = t.post(&url, None, HeaderMap::new()).await.unwrap_err();
        assert!(matches!(err, CloudError::WriteNotAllowed));

        let err = t.delete(&url, &[], HeaderMap::new()).await.unwrap_err();
        assert!(matches!(err, CloudError::WriteNotAllowed));

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_post_form_bypasses_write_gate() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/oauth/access")
            .match_body(mockito::Matcher::UrlEncoded(
                "grant_type".into(),
                "refresh_token".into(),
            ))
            .with_body(r#"{"ok":true}"#)
            .create_async()
            .await;

        let url = format!("{}/oauth/access", server.url());
        let value = transport(false)
            .post_form(&url, &[("grant_type", "refresh_token")], HeaderMap::new())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(value["ok"], true);
    }

    #[tokio::test]
    async fn test_empty_body_tolerated() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/groups/g1/playback/pause")
            .with_status(200)
            .with_body("")
            .create_async()
            .await;

        let url = format!("{}/groups/g1/playback/pause", server.url());
        let value = transport(true)
            .post(&url, None, HeaderMap::new())
            .await
            .unwrap();
        assert!(value.is_null());
    }

    #[tokio::test]
    async fn test_connect_failure_retries_then_gives_up() {
        // Bind a port, then drop the listener so connections are refused.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let url = format!("http://127.0.0.1:{port}/households");
        let started = Instant::now();
        let err = transport(false)
            .get(&url, &[], HeaderMap::new())
            .await
            .unwrap_err();

        // Two backoff sleeps: 50ms after the first attempt, 100ms after
        // the second.
        assert!(started.elapsed() >= Duration::from_millis(150));
        match err {
            CloudError::RetriesExceeded { url: failed, .. } => {
                assert!(failed.contains("/households"));
            }
            other => panic!("expected RetriesExceeded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_twice_then_success_on_third_attempt() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // First two connections stall past the client timeout; the third
        // gets a real response. Each connection is handled in its own
        // task so a stalled one never delays the next accept.
        tokio::spawn(async move {
            for attempt in 0..3u32 {
                let (mut socket, _) = listener.accept().await.unwrap();
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    if attempt < 2 {
                        tokio::time::sleep(Duration::from_millis(500)).await;
                    } else {
                        let body = r#"{"ok":true}"#;
                        let response = format!(
                            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        );
                        socket.write_all(response.as_bytes()).await.unwrap();
                    }
                });
            }
        });

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(200))
            .build()
            .unwrap();
        let transport = Transport::new(client, false);

        let url = format!("http://{addr}/slow");
        let started = Instant::now();
        let value = transport.get(&url, &[], HeaderMap::new()).await.unwrap();

        assert_eq!(value["ok"], true);
        // Two timed-out attempts plus 50ms + 100ms of backoff.
        assert!(started.elapsed() >= Duration::from_millis(550));
    }
}
