use async_trait::async_trait;

use crate::transport::Sender;

/// Real HTTP delivery through a shared `reqwest` connection pool.
///
/// Timeouts configured on the client surface as sender errors and are
/// retried like any other transport failure.
#[async_trait]
impl Sender for reqwest::Client {
    type Error = reqwest::Error;

    #[tracing::instrument(skip_all, fields(method = %request.method(), url = %request.url()))]
    async fn send(&mut self, request: reqwest::Request) -> Result<reqwest::Response, Self::Error> {
        let response = self.execute(request).await?;
        tracing::debug!(status = %response.status(), "Response received");
        Ok(response)
    }
}
