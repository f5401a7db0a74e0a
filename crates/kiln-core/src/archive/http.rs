use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use reqwest::header::{CONTENT_LENGTH, HeaderMap};

use crate::archive::error::TransferError;

/// Body of a transfer, delivered in chunks
pub type ByteStream = BoxStream<'static, Result<Bytes, TransferError>>;

/// Transport used by the provisioner and nightly discovery
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Check that `url` is reachable. Returns the advertised length, if any.
    async fn probe(&self, url: &str) -> Result<Option<u64>, TransferError>;

    /// Start a transfer of `url`
    async fn fetch(&self, url: &str) -> Result<ByteStream, TransferError>;

    /// Fetch a small text document
    async fn get_text(&self, url: &str) -> Result<String, TransferError>;
}

/// [`HttpClient`] backed by `reqwest`
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Build a client whose transfers give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, TransferError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("kiln/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

fn check_status(url: &str, response: reqwest::Response) -> Result<reqwest::Response, TransferError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(TransferError::Status { url: url.to_string(), status: status.as_u16() })
    }
}

/// Length announced in the `Content-Length` header.
///
/// A HEAD response has no body, so `Response::content_length` reports zero;
/// the header is the only place the real size shows up.
pub(crate) fn advertised_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|len| *len > 0)
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn probe(&self, url: &str) -> Result<Option<u64>, TransferError> {
        let response = check_status(url, self.client.head(url).send().await?)?;
        Ok(advertised_length(response.headers()))
    }

    async fn fetch(&self, url: &str) -> Result<ByteStream, TransferError> {
        let response = check_status(url, self.client.get(url).send().await?)?;
        Ok(response.bytes_stream().map(|chunk| chunk.map_err(TransferError::from)).boxed())
    }

    async fn get_text(&self, url: &str) -> Result<String, TransferError> {
        let response = check_status(url, self.client.get(url).send().await?)?;
        Ok(response.text().await?)
    }
}
