//! Firmware images and where they come from

use std::path::PathBuf;

use tracing::{debug, info, instrument};

use crate::Error;

/// A complete firmware image, ready to be streamed to the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    bytes: Vec<u8>,
}

impl FirmwareImage {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl From<Vec<u8>> for FirmwareImage {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

/// Produces the image for one update. Any failure is a
/// [`Error::FirmwareFetchFailed`]; a source never hands out a partial image.
#[async_trait::async_trait]
pub trait FirmwareSource: Send + Sync {
    async fn fetch(&self) -> Result<FirmwareImage, Error>;

    fn describe(&self) -> String;
}

/// An image already in memory
#[async_trait::async_trait]
impl FirmwareSource for FirmwareImage {
    async fn fetch(&self) -> Result<FirmwareImage, Error> {
        Ok(self.clone())
    }

    fn describe(&self) -> String {
        format!("in-memory image ({} bytes)", self.len())
    }
}

/// Release artifact served over HTTP(S)
#[derive(Debug, Clone)]
pub struct HttpFirmwareSource {
    url: String,
    client: reqwest::Client,
}

impl HttpFirmwareSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl FirmwareSource for HttpFirmwareSource {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn fetch(&self) -> Result<FirmwareImage, Error> {
        let fetch_failed = |reason: String| Error::FirmwareFetchFailed(format!("{}: {reason}", self.url));

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| fetch_failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fetch_failed(format!("server returned {status}")));
        }

        let expected = response.content_length();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| fetch_failed(e.to_string()))?;
        debug!(received = bytes.len(), ?expected, "download finished");

        if let Some(expected) = expected {
            if bytes.len() as u64 != expected {
                return Err(fetch_failed(format!(
                    "received {} of {expected} bytes",
                    bytes.len()
                )));
            }
        }
        if bytes.is_empty() {
            return Err(fetch_failed("empty response body".to_string()));
        }

        info!(bytes = bytes.len(), "firmware downloaded");
        Ok(FirmwareImage::new(bytes.to_vec()))
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Image file on local disk
#[derive(Debug, Clone)]
pub struct FileFirmwareSource {
    path: PathBuf,
}

impl FileFirmwareSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl FirmwareSource for FileFirmwareSource {
    async fn fetch(&self) -> Result<FirmwareImage, Error> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            Error::FirmwareFetchFailed(format!("{}: {e}", self.path.display()))
        })?;
        if bytes.is_empty() {
            return Err(Error::FirmwareFetchFailed(format!(
                "{}: file is empty",
                self.path.display()
            )));
        }
        Ok(FirmwareImage::new(bytes))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Serves exactly one raw HTTP response and returns its URL
    async fn serve_once(response: Vec<u8>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = stream.read(&mut request).await;
            stream.write_all(&response).await.unwrap();
            stream.shutdown().await.unwrap();
        });
        format!("http://{addr}/heimdall-esp32s3.bin")
    }

    fn response(status: &str, body: &[u8]) -> Vec<u8> {
        let mut out = format!(
            "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        )
        .into_bytes();
        out.extend_from_slice(body);
        out
    }

    #[tokio::test]
    async fn downloads_the_body() {
        let url = serve_once(response("200 OK", &[0xE9, 0x01, 0x02, 0x03])).await;

        let image = HttpFirmwareSource::new(url).fetch().await.unwrap();

        assert_eq!(image.as_bytes(), &[0xE9, 0x01, 0x02, 0x03]);
    }

    #[tokio::test]
    async fn not_found_is_a_fetch_error() {
        let url = serve_once(response("404 Not Found", b"Not Found")).await;

        let err = HttpFirmwareSource::new(url).fetch().await.unwrap_err();

        assert!(matches!(err, Error::FirmwareFetchFailed(ref m) if m.contains("404")));
    }

    #[tokio::test]
    async fn truncated_body_is_a_fetch_error() {
        let mut raw = b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\nConnection: close\r\n\r\n".to_vec();
        raw.extend_from_slice(&[0u8; 10]);
        let url = serve_once(raw).await;

        let err = HttpFirmwareSource::new(url).fetch().await.unwrap_err();

        assert!(matches!(err, Error::FirmwareFetchFailed(_)));
    }

    #[tokio::test]
    async fn empty_body_is_a_fetch_error() {
        let url = serve_once(response("200 OK", b"")).await;

        let err = HttpFirmwareSource::new(url).fetch().await.unwrap_err();

        assert!(matches!(err, Error::FirmwareFetchFailed(ref m) if m.contains("empty")));
    }

    #[tokio::test]
    async fn unreachable_server_is_a_fetch_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = HttpFirmwareSource::new(format!("http://{addr}/fw.bin"))
            .fetch()
            .await
            .unwrap_err();

        assert!(matches!(err, Error::FirmwareFetchFailed(_)));
    }

    #[tokio::test]
    async fn reads_local_file() {
        let path = std::env::temp_dir().join(format!("reptrap-fw-{}.bin", std::process::id()));
        std::fs::write(&path, [1u8, 2, 3]).unwrap();

        let image = FileFirmwareSource::new(&path).fetch().await.unwrap();

        assert_eq!(image.len(), 3);
        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn missing_file_is_a_fetch_error() {
        let err = FileFirmwareSource::new("/nonexistent/heimdall.bin")
            .fetch()
            .await
            .unwrap_err();

        assert!(matches!(err, Error::FirmwareFetchFailed(_)));
    }
}
