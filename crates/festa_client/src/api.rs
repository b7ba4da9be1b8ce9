//! HTTP side-channels next to the socket: model listing and document upload.

use std::path::Path;

use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::debug;

use crate::models::ModelInfo;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("server is unavailable")]
    Unavailable,
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ApiError {
    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_connect() {
            Self::Unavailable
        } else {
            Self::Http(err)
        }
    }
}

/// Upload response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UploadReceipt {
    pub filename: String,
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// `GET /models`.
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, ApiError> {
        let url = format!("{}/models", self.base_url);
        debug!(%url, "listing models");
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(ApiError::from_reqwest)?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    /// `POST /upload` with the file as multipart field `file`.
    pub async fn upload(&self, path: &Path) -> Result<UploadReceipt, ApiError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| ApiError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let form = Form::new().part("file", Part::bytes(bytes).file_name(file_name));

        let url = format!("{}/upload", self.base_url);
        debug!(%url, file = %path.display(), "uploading");
        let resp = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(ApiError::from_reqwest)?
            .error_for_status()?;
        Ok(resp.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    /// Serve one canned HTTP response and return the base URL.
    async fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut tcp, _) = listener.accept().await.unwrap();
            read_request(&mut tcp).await;
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            tcp.write_all(response.as_bytes()).await.unwrap();
            let _ = tcp.shutdown().await;
        });
        format!("http://127.0.0.1:{}", port)
    }

    /// Consume headers and body so closing the socket does not reset it.
    async fn read_request(tcp: &mut tokio::net::TcpStream) {
        let mut data = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = tcp.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            data.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&data).to_lowercase();
            let Some(header_end) = text.find("\r\n\r\n") else {
                continue;
            };
            let body_len = data.len() - header_end - 4;
            let content_length = text[..header_end]
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok());
            match content_length {
                Some(len) if body_len >= len => return,
                Some(_) => continue,
                None if text.contains("transfer-encoding: chunked") => {
                    if text.ends_with("0\r\n\r\n") {
                        return;
                    }
                }
                None => return,
            }
        }
    }

    #[tokio::test]
    async fn lists_models() {
        let base = serve_once(
            "200 OK",
            r#"[{"id":"deepseek-chat","name":"DeepSeek Chat","description":"general"}]"#,
        )
        .await;
        let models = ApiClient::new(base).list_models().await.unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].id, "deepseek-chat");
        assert_eq!(models[0].name, "DeepSeek Chat");
    }

    #[tokio::test]
    async fn http_error_status_is_an_error() {
        let base = serve_once("500 Internal Server Error", r#"{"detail":"boom"}"#).await;
        let err = ApiClient::new(base).list_models().await.unwrap_err();
        assert!(matches!(err, ApiError::Http(_)));
    }

    #[tokio::test]
    async fn upload_of_missing_file_fails_before_sending() {
        let err = ApiClient::new("http://127.0.0.1:9")
            .upload(Path::new("/definitely/not/here.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Io { .. }));
    }

    #[tokio::test]
    async fn upload_reports_filename() {
        let base = serve_once("200 OK", r#"{"filename":"paper.pdf"}"#).await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paper.pdf");
        std::fs::write(&path, b"%PDF-1.4").unwrap();
        let receipt = ApiClient::new(base).upload(&path).await.unwrap();
        assert_eq!(receipt.filename, "paper.pdf");
    }
}
