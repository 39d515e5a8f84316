use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

use super::client::HttpClient;

/// Default client with the fixed feed-fetch timeouts.
///
/// A hung feed fetch exhausts the total timeout and fails the run; there is
/// no retry at this layer.
pub struct BasicClient(reqwest::Client);

impl BasicClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self(client))
    }
}

#[async_trait]
impl HttpClient for BasicClient {
    async fn execute(&self, req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        self.0.execute(req).await
    }
}
