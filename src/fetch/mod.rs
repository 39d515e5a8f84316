//! HTTP fetch helpers for external feeds.

mod basic;
mod client;

pub use basic::BasicClient;
pub use client::HttpClient;

use anyhow::{Result, anyhow};
use serde::de::DeserializeOwned;

/// Fetches a URL and returns the response body as text.
pub async fn fetch_text<C: HttpClient>(client: &C, url: &str) -> Result<String> {
    let req = reqwest::Request::new(reqwest::Method::GET, url.parse()?);

    let resp = client.execute(req).await?;
    if !resp.status().is_success() {
        return Err(anyhow!("GET {url} returned status {}", resp.status()));
    }
    Ok(resp.text().await?)
}

/// Fetches a URL with an explicit `User-Agent` and deserializes the JSON body.
///
/// The weather provider rejects requests without an identifying user agent.
pub async fn fetch_json<C: HttpClient, T: DeserializeOwned>(
    client: &C,
    url: &str,
    user_agent: &str,
) -> Result<T> {
    let mut req = reqwest::Request::new(reqwest::Method::GET, url.parse()?);
    req.headers_mut()
        .insert(reqwest::header::USER_AGENT, user_agent.parse()?);

    let resp = client.execute(req).await?;
    if !resp.status().is_success() {
        return Err(anyhow!("GET {url} returned status {}", resp.status()));
    }
    Ok(resp.json().await?)
}
