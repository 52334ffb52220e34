use std::path::Path;

use log::{debug, info};
use reqwest::Client;
use tokio::{fs::File, io::AsyncWriteExt};

use crate::{
    config::AcquisitionSettings,
    dataset,
    error::{AcquisitionError, AcquireError, DatasetError},
    model::ArchiveRequest,
    progress,
};

/// HTTP client for the weather archive.
#[derive(Debug, Clone)]
pub struct ArchiveClient {
    endpoint: String,
    http: Client,
    show_progress: bool,
}

impl ArchiveClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            http: Client::new(),
            show_progress: true,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Stream the CSV export for `request` into `dest`. Returns the number of bytes written.
    ///
    /// On failure `dest` may hold a partial download.
    pub async fn download(
        &self,
        request: &ArchiveRequest,
        dest: &Path,
    ) -> Result<u64, AcquisitionError> {
        info!("Starting download...");

        let mut res = self
            .http
            .get(&self.endpoint)
            .query(&request.query_pairs())
            .send()
            .await
            .map_err(AcquisitionError::Network)?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(AcquisitionError::Transfer {
                status,
                body: truncate_body(&body),
            });
        }

        let declared = res.content_length();
        debug!("Archive responded {status}, declared length {declared:?}");

        let io_err = |source| AcquisitionError::Io {
            path: dest.to_path_buf(),
            source,
        };
        let mut file = File::create(dest).await.map_err(io_err)?;
        let bar = progress::download_progress(declared, self.show_progress);

        let mut received: u64 = 0;
        while let Some(chunk) = res.chunk().await.map_err(AcquisitionError::Network)? {
            file.write_all(&chunk).await.map_err(io_err)?;
            received += chunk.len() as u64;
            bar.set_position(received);
        }
        file.flush().await.map_err(io_err)?;
        bar.finish_and_clear();

        if let Some(expected) = declared.filter(|&expected| expected != received) {
            return Err(AcquisitionError::IncompleteBody { expected, received });
        }

        info!(
            "Download completed successfully ({}). File saved as: {}",
            progress::format_bytes(received),
            dest.display()
        );
        Ok(received)
    }
}

/// Download the configured range and normalize it in place. Returns the number
/// of data rows in the artifact.
pub async fn acquire(
    settings: &AcquisitionSettings,
    show_progress: bool,
) -> Result<usize, AcquireError> {
    let client = ArchiveClient::new(&settings.endpoint).with_progress(show_progress);
    client.download(&settings.request, &settings.data_file).await?;

    let path = settings.data_file.clone();
    let rows = tokio::task::spawn_blocking(move || dataset::normalize(&path))
        .await
        .map_err(|e| DatasetError::io(&settings.data_file, std::io::Error::other(e)))??;

    info!("Dataset ready with {rows} rows");
    Ok(rows)
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
        sync::oneshot,
    };

    /// Serve one raw HTTP response and hand back the request head.
    async fn serve_once(response: Vec<u8>) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
            socket.write_all(&response).await.unwrap();
            socket.shutdown().await.unwrap();
        });

        (format!("http://{addr}/v1/archive"), rx)
    }

    fn request() -> ArchiveRequest {
        ArchiveRequest::new(
            12.9184,
            79.1325,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
        )
    }

    const BODY: &str = "latitude,longitude\n12.9,79.1\n\ntime,rain (mm)\n2024-01-01T00:00,0.0\n";

    #[tokio::test]
    async fn download_writes_declared_length() {
        let response = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: text/csv\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{BODY}",
            BODY.len()
        );
        let (url, head) = serve_once(response.into_bytes()).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("data.csv");

        let written = ArchiveClient::new(url)
            .with_progress(false)
            .download(&request(), &dest)
            .await
            .unwrap();

        assert_eq!(written, BODY.len() as u64);
        assert_eq!(std::fs::metadata(&dest).unwrap().len(), BODY.len() as u64);

        let head = head.await.unwrap();
        assert!(head.starts_with("GET /v1/archive?"));
        assert!(head.contains("start_date=2024-01-01"));
        assert!(head.contains("format=csv"));
        assert!(head.contains("timezone=auto"));
    }

    #[tokio::test]
    async fn download_without_declared_length_reads_to_eof() {
        let response = format!("HTTP/1.1 200 OK\r\nconnection: close\r\n\r\n{BODY}");
        let (url, _head) = serve_once(response.into_bytes()).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("data.csv");

        let written = ArchiveClient::new(url)
            .with_progress(false)
            .download(&request(), &dest)
            .await
            .unwrap();

        assert_eq!(written, BODY.len() as u64);
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), BODY);
    }

    #[tokio::test]
    async fn non_success_status_is_a_transfer_error() {
        let body = "{\"error\":true,\"reason\":\"bad date\"}";
        let response = format!(
            "HTTP/1.1 400 Bad Request\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        let (url, _head) = serve_once(response.into_bytes()).await;
        let dir = tempfile::tempdir().unwrap();

        let err = ArchiveClient::new(url)
            .with_progress(false)
            .download(&request(), &dir.path().join("data.csv"))
            .await
            .unwrap_err();

        match err {
            AcquisitionError::Transfer { status, body } => {
                assert_eq!(status.as_u16(), 400);
                assert!(body.contains("bad date"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn truncated_body_fails() {
        let response = b"HTTP/1.1 200 OK\r\ncontent-length: 500\r\nconnection: close\r\n\r\ntime,rain\n".to_vec();
        let (url, _head) = serve_once(response).await;
        let dir = tempfile::tempdir().unwrap();

        let err = ArchiveClient::new(url)
            .with_progress(false)
            .download(&request(), &dir.path().join("data.csv"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AcquisitionError::Network(_) | AcquisitionError::IncompleteBody { .. }
        ));
    }

    #[tokio::test]
    async fn unreachable_archive_is_a_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let dir = tempfile::tempdir().unwrap();
        let err = ArchiveClient::new(format!("http://{addr}/v1/archive"))
            .with_progress(false)
            .download(&request(), &dir.path().join("data.csv"))
            .await
            .unwrap_err();

        assert!(matches!(err, AcquisitionError::Network(_)));
    }

    #[tokio::test]
    async fn acquire_downloads_and_normalizes() {
        let response = format!(
            "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{BODY}",
            BODY.len()
        );
        let (url, _head) = serve_once(response.into_bytes()).await;
        let dir = tempfile::tempdir().unwrap();

        let settings = AcquisitionSettings {
            endpoint: url,
            request: request(),
            data_file: dir.path().join("data.csv"),
        };

        let rows = acquire(&settings, false).await.unwrap();
        assert_eq!(rows, 1);
        let out = std::fs::read_to_string(&settings.data_file).unwrap();
        assert!(out.starts_with("time,water_amount\n"));
    }

    #[tokio::test]
    async fn acquire_skips_normalize_on_download_failure() {
        let response = b"HTTP/1.1 500 Internal Server Error\r\ncontent-length: 0\r\nconnection: close\r\n\r\n".to_vec();
        let (url, _head) = serve_once(response).await;
        let dir = tempfile::tempdir().unwrap();

        let settings = AcquisitionSettings {
            endpoint: url,
            request: request(),
            data_file: dir.path().join("data.csv"),
        };

        let err = acquire(&settings, false).await.unwrap_err();
        assert!(matches!(err, AcquireError::Download(AcquisitionError::Transfer { .. })));
        assert!(!settings.data_file.exists());
    }

    #[test]
    fn truncate_body_respects_char_boundaries() {
        let long = "°".repeat(300);
        let out = truncate_body(&long);
        assert!(out.ends_with("..."));
        assert_eq!(out.chars().count(), 203);
    }
}
