use async_trait::async_trait;
use log::warn;
use serde_json::Value;
use thiserror::Error;

use crate::protocol::UpdateRequest;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to send update request: {0}")]
    Request(#[source] reqwest::Error),
    #[error("failed to read update response: {0}")]
    Body(#[source] reqwest::Error),
    /// Failure reported by a non-HTTP transport.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

/// Sends the version-check request and returns the response body.
///
/// Only failures to exchange a request and response are errors. Whatever
/// body the server answered with is returned, whatever the HTTP status.
#[async_trait]
pub trait UpdateTransport: Send + Sync {
    async fn post_update(&self, url: &str, request: &UpdateRequest)
    -> Result<Value, TransportError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl UpdateTransport for HttpTransport {
    async fn post_update(
        &self,
        url: &str,
        request: &UpdateRequest,
    ) -> Result<Value, TransportError> {
        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(TransportError::Request)?;

        let status = response.status();
        let body = response.text().await.map_err(TransportError::Body)?;
        if !status.is_success() {
            warn!(
                "Update server answered HTTP {status}{}",
                response_snippet(&body, 160)
            );
        }

        Ok(decode_body(body))
    }
}

/// JSON bodies decode to their value; anything else is kept as a string.
fn decode_body(body: String) -> Value {
    serde_json::from_str(&body).unwrap_or(Value::String(body))
}

fn response_snippet(body: &str, max_chars: usize) -> String {
    let snippet: String = body.chars().take(max_chars).collect();
    if snippet.is_empty() {
        String::new()
    } else {
        format!(": {snippet}")
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Map, json};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::{HttpTransport, TransportError, UpdateTransport, decode_body, response_snippet};
    use crate::config::Config;
    use crate::info::VersionInfo;
    use crate::outcome::StatusCode;
    use crate::protocol::UpdateRequest;
    use crate::query::check_for_update;
    use pushy_platform::Platform;

    #[test]
    fn response_snippet_truncates_and_prefixes() {
        assert_eq!(response_snippet("", 10), "");
        assert_eq!(response_snippet("bad gateway", 3), ": bad");
    }

    #[test]
    fn other_errors_display_their_message() {
        assert_eq!(TransportError::other("timeout").to_string(), "timeout");
    }

    #[test]
    fn non_json_bodies_are_kept_as_text() {
        assert_eq!(
            decode_body(r#"{"success":true}"#.to_string()),
            json!({ "success": true })
        );
        assert_eq!(decode_body("<html>".to_string()), json!("<html>"));
        assert_eq!(decode_body(String::new()), json!(""));
    }

    /// Answer one connection with `status` and `body`.
    async fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let address = listener.local_addr().expect("listener should have an address");

        tokio::spawn(async move {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let mut request = Vec::new();
            let mut buffer = [0_u8; 4096];
            loop {
                match socket.read(&mut buffer).await {
                    Ok(0) | Err(_) => break,
                    Ok(read) => request.extend_from_slice(&buffer[..read]),
                }
                if let Some(head_end) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                    let head = String::from_utf8_lossy(&request[..head_end]).to_lowercase();
                    let length = head
                        .lines()
                        .find_map(|line| line.strip_prefix("content-length:"))
                        .and_then(|value| value.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if request.len() >= head_end + 4 + length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
        });

        format!("http://{address}")
    }

    fn local() -> VersionInfo {
        VersionInfo {
            app_id: "__UNI__ABC".to_string(),
            native_version_name: "1.0.0".to_string(),
            native_version_code: 10,
            resource_version_name: "1.0.0".to_string(),
            resource_version_code: 5,
            platform: Platform::Android,
            device_uuid: None,
            system_info: Map::new(),
        }
    }

    fn config(update_url: String) -> Config {
        Config {
            project_id: "project-1".to_string(),
            update_url,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn error_status_body_is_returned_for_classification() {
        let base = serve_once(
            "400 Bad Request",
            r#"{"success":false,"message":"project not found"}"#,
        )
        .await;
        let transport = HttpTransport::new(reqwest::Client::new());

        let body = transport
            .post_update(&format!("{base}/api/update"), &UpdateRequest::new("p", &local()))
            .await
            .expect("a 400 answer is still a response");
        assert_eq!(body["message"], "project not found");
    }

    #[tokio::test]
    async fn rejected_request_keeps_server_message() {
        let base = serve_once(
            "400 Bad Request",
            r#"{"success":false,"message":"project not found"}"#,
        )
        .await;
        let transport = HttpTransport::new(reqwest::Client::new());

        let outcome = check_for_update(&transport, &local(), &config(base)).await;

        assert_eq!(outcome.status_code, StatusCode::ServerRejected);
        assert_eq!(outcome.message, "project not found");
    }

    #[tokio::test]
    async fn html_body_is_a_rejection_not_a_transport_failure() {
        let base = serve_once("200 OK", "<html>maintenance</html>").await;
        let transport = HttpTransport::new(reqwest::Client::new());

        let outcome = check_for_update(&transport, &local(), &config(base)).await;

        assert_eq!(outcome.status_code, StatusCode::ServerRejected);
        assert_eq!(
            outcome.response,
            Some(json!("<html>maintenance</html>"))
        );
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transport_failure() {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let address = listener.local_addr().expect("listener should have an address");
        drop(listener);
        let transport = HttpTransport::new(reqwest::Client::new());

        let outcome =
            check_for_update(&transport, &local(), &config(format!("http://{address}"))).await;

        assert_eq!(outcome.status_code, StatusCode::TransportFailed);
        assert!(outcome.error.is_some());
    }
}
