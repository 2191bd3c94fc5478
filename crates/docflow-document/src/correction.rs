// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// OCR text correction through an Ollama-compatible chat endpoint.

use async_trait::async_trait;
use docflow_core::capability::{CorrectionRequest, TextCorrector};
use docflow_core::error::CapabilityError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

/// Instruction sent with every correction request.
pub const SYSTEM_PROMPT: &str = "You are an OCR error correction specialist. Given text extracted \
from scanned documents, your job is to correct only the garbled, misspelled, or non-detectable \
words caused by OCR errors, without making any changes to the document content, order, or \
meaning. Do not add, rephrase, or remove text. Output only the corrected text.";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: String,
}

/// Corrects text with a model served at `host`.
#[derive(Debug, Clone)]
pub struct OllamaCorrector {
    host: String,
    client: Client,
}

impl OllamaCorrector {
    pub fn new(host: impl Into<String>) -> Result<Self, CapabilityError> {
        let client = Client::builder()
            .build()
            .map_err(|e| CapabilityError::Failed(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            host: host.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Whether the service answers its model listing.
    pub async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.host);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl TextCorrector for OllamaCorrector {
    fn host(&self) -> &str {
        &self.host
    }

    #[instrument(skip_all, fields(host = %self.host, model = %request.model, chars = request.text.len()))]
    async fn correct(&self, request: CorrectionRequest) -> Result<String, CapabilityError> {
        let body = ChatRequest {
            model: &request.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &request.text,
                },
            ],
            stream: false,
        };

        let url = format!("{}/api/chat", self.host);
        let resp = self
            .client
            .post(&url)
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    CapabilityError::Unavailable(e.to_string())
                } else {
                    CapabilityError::Failed(e.to_string())
                }
            })?;

        let status = resp.status();
        if status.is_server_error() {
            let detail = resp.text().await.unwrap_or_default();
            warn!(%status, "correction service error");
            return Err(CapabilityError::Unavailable(format!("HTTP {status}: {detail}")));
        }
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(CapabilityError::Failed(format!("HTTP {status}: {detail}")));
        }

        let reply: ChatResponse = resp
            .json()
            .await
            .map_err(|e| CapabilityError::Malformed(e.to_string()))?;
        let corrected = reply.message.content.trim().to_string();
        if corrected.is_empty() {
            return Err(CapabilityError::Malformed("empty correction".into()));
        }
        debug!(corrected_chars = corrected.len(), "text corrected");
        Ok(corrected)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    /// Serve a single canned HTTP response and return the base URL.
    async fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                if request_complete(&request) {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });
        format!("http://{addr}")
    }

    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let length = text[..header_end]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        request.len() >= header_end + 4 + length
    }

    fn request(text: &str) -> CorrectionRequest {
        CorrectionRequest {
            text: text.into(),
            language: "ara".into(),
            model: "command-r7b-arabic".into(),
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn returns_trimmed_reply() {
        let host = serve_once("200 OK", r#"{"message":{"role":"assistant","content":"  fixed text \n"}}"#).await;
        let corrector = OllamaCorrector::new(host).unwrap();
        assert_eq!(corrector.correct(request("fxied text")).await.unwrap(), "fixed text");
    }

    #[tokio::test]
    async fn server_error_is_unavailable() {
        let host = serve_once("503 Service Unavailable", r#"{"error":"loading"}"#).await;
        let corrector = OllamaCorrector::new(host).unwrap();
        let err = corrector.correct(request("text")).await.unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn missing_model_is_failure() {
        let host = serve_once("404 Not Found", r#"{"error":"model not found"}"#).await;
        let corrector = OllamaCorrector::new(host).unwrap();
        let err = corrector.correct(request("text")).await.unwrap_err();
        assert!(matches!(err, CapabilityError::Failed(_)));
    }

    #[tokio::test]
    async fn unexpected_body_is_malformed() {
        let host = serve_once("200 OK", r#"{"done":true}"#).await;
        let corrector = OllamaCorrector::new(host).unwrap();
        let err = corrector.correct(request("text")).await.unwrap_err();
        assert!(matches!(err, CapabilityError::Malformed(_)));
    }

    #[tokio::test]
    async fn refused_connection_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let corrector = OllamaCorrector::new(format!("http://{addr}/")).unwrap();
        assert_eq!(corrector.host(), format!("http://{addr}"));
        let err = corrector.correct(request("text")).await.unwrap_err();
        assert!(err.is_unavailable());
    }
}
