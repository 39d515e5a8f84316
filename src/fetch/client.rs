use async_trait::async_trait;
use reqwest::{Request, Response};

/// Minimal HTTP execution seam so feed ingestors can be driven without a
/// live network in tests.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}
