use async_trait::async_trait;
use progress_core::model::ProgressBatch;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use tokio::runtime::Handle;
use url::Url;

use super::{JSON_CONTENT_TYPE, ReliableTransport};
use crate::error::TransportError;

/// `reqwest`-backed reliable transport.
///
/// The request runs on its own tokio task, so dropping the awaiting flush
/// does not cancel it.
#[derive(Clone, Default)]
pub struct HttpReliableTransport {
    client: Client,
}

impl HttpReliableTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::with_client(Client::new())
    }

    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ReliableTransport for HttpReliableTransport {
    async fn post_batch(
        &self,
        url: &Url,
        batch: &ProgressBatch,
        token: &str,
    ) -> Result<(), TransportError> {
        let runtime = Handle::try_current().map_err(|_| TransportError::Unsupported)?;
        let body = batch.to_json_bytes()?;
        let request = self
            .client
            .post(url.clone())
            .bearer_auth(token)
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .body(body);

        let task = runtime.spawn(async move { request.send().await });
        let response = task.await.map_err(|_| TransportError::Aborted)??;

        if !response.status().is_success() {
            return Err(TransportError::HttpStatus(response.status()));
        }
        Ok(())
    }
}
