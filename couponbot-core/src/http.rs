//! Outbound HTTP abstraction.
//!
//! The only outbound call the coupon service makes is the best-effort public
//! address lookup. Going through a trait keeps that lookup mockable, so tests
//! never touch the network.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::Error;

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(3);

#[async_trait]
pub trait HttpClient: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn get(&self, url: String, headers: HashMap<String, String>) -> Result<String, Self::Error>;
}

#[derive(Clone)]
pub struct DefaultHttpClient {
    client: reqwest::Client,
}

impl DefaultHttpClient {
    pub fn new() -> Result<Self, Error> {
        Self::with_timeout(DEFAULT_HTTP_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for DefaultHttpClient {
    type Error = Error;

    async fn get(&self, url: String, headers: HashMap<String, String>) -> Result<String, Self::Error> {
        let mut request = self.client.get(&url);
        for (key, value) in headers {
            request = request.header(&key, value);
        }
        let response = request
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(response)
    }
}
