//! HTTP callback sink
//!
//! Delivers lifecycle responses to the pre-signed `ResponseURL` with a
//! single PUT. The URL was signed without a content type, so the request
//! must carry an empty one.

use async_trait::async_trait;
use ipsync_core::lifecycle::LifecycleResponse;
use ipsync_core::traits::CallbackSink;
use ipsync_core::{Error, Result};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use std::time::Duration;

pub struct HttpCallbackSink {
    client: reqwest::Client,
}

impl HttpCallbackSink {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

/// The URL without its query string; the signature never reaches the logs
fn redact(url: &str) -> &str {
    url.split_once('?').map_or(url, |(base, _)| base)
}

#[async_trait]
impl CallbackSink for HttpCallbackSink {
    async fn deliver(&self, response_url: &str, response: &LifecycleResponse) -> Result<()> {
        let body = response.to_body()?;
        tracing::debug!(
            "Sending {:?} response ({} bytes) to {}",
            response.status,
            body.len(),
            redact(response_url)
        );

        let reply = self
            .client
            .put(response_url)
            .header(CONTENT_TYPE, "")
            .header(CONTENT_LENGTH, body.len())
            .body(body)
            .send()
            .await
            .map_err(|e| {
                Error::callback(format!(
                    "PUT to {} failed: {}",
                    redact(response_url),
                    e.without_url()
                ))
            })?;

        let status = reply.status();
        if !status.is_success() {
            let text = reply
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(Error::callback(format!(
                "{} answered HTTP {}: {}",
                redact(response_url),
                status,
                text
            )));
        }

        tracing::info!("Response delivered, status code: {}", status.as_u16());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipsync_core::lifecycle::LifecycleStatus;
    use std::collections::BTreeMap;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    fn response() -> LifecycleResponse {
        LifecycleResponse {
            status: LifecycleStatus::Success,
            reason: "See the details in the function logs".to_string(),
            physical_resource_id: "ipsync-seed-1".to_string(),
            stack_id: "stack".to_string(),
            request_id: "r-1".to_string(),
            logical_resource_id: "SeedIpSet".to_string(),
            no_echo: false,
            data: BTreeMap::new(),
        }
    }

    /// Accept one request, hand its raw text back, answer with `status`
    async fn capture_once(status: &'static str) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut seen = Vec::new();
            let mut buf = vec![0u8; 4096];

            // Headers, then exactly Content-Length bytes of body
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                seen.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&seen).to_string();
                if let Some((head, body)) = text.split_once("\r\n\r\n") {
                    let expected = head
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if body.len() >= expected {
                        break;
                    }
                }
            }

            let reply = format!(
                "HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                status
            );
            socket.write_all(reply.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            let _ = tx.send(String::from_utf8_lossy(&seen).to_string());
        });

        (format!("http://{}/r-1?X-Amz-Signature=secret", addr), rx)
    }

    #[tokio::test]
    async fn test_put_with_empty_content_type() {
        let (url, request) = capture_once("200 OK").await;
        let sink = HttpCallbackSink::new(Duration::from_secs(5)).unwrap();

        sink.deliver(&url, &response()).await.unwrap();

        let raw = request.await.unwrap();
        let (head, body) = raw.split_once("\r\n\r\n").unwrap();
        assert!(head.starts_with("PUT /r-1?X-Amz-Signature=secret HTTP/1.1"));
        assert!(
            head.lines()
                .any(|l| l.to_ascii_lowercase().trim_end() == "content-type:"),
            "content type must be present and empty: {}",
            head
        );

        let sent: LifecycleResponse = serde_json::from_str(body).unwrap();
        assert_eq!(sent, response());
    }

    #[tokio::test]
    async fn test_rejected_delivery_is_callback_error() {
        let (url, _request) = capture_once("403 Forbidden").await;
        let sink = HttpCallbackSink::new(Duration::from_secs(5)).unwrap();

        let err = sink.deliver(&url, &response()).await.unwrap_err();
        assert!(matches!(err, Error::CallbackDelivery(_)));
        assert!(err.to_string().contains("403"));
        assert!(!err.to_string().contains("secret"));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        let sink = HttpCallbackSink::new(Duration::from_secs(2)).unwrap();
        let err = sink
            .deliver("http://127.0.0.1:1/r-1?X-Amz-Signature=secret", &response())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "CallbackDeliveryError");
        assert!(!err.to_string().contains("secret"));
    }

    #[test]
    fn test_redact() {
        assert_eq!(redact("https://cfn.example/r?sig=1"), "https://cfn.example/r");
        assert_eq!(redact("https://cfn.example/r"), "https://cfn.example/r");
    }
}
