//! Best-effort lookup of the caller's public address.
//!
//! The address is only stored alongside a claim for later abuse review.
//! Any failure here is logged and the claim proceeds without it.

use std::collections::HashMap;

use serde::Deserialize;
use tracing::warn;

use crate::http::HttpClient;

pub const DEFAULT_IP_LOOKUP_URL: &str = "https://api.ipify.org?format=json";

#[derive(Debug, Deserialize)]
struct IpLookupResponse {
    ip: String,
}

pub struct IpResolver<C: HttpClient> {
    client: C,
    url: String,
}

impl<C: HttpClient> IpResolver<C> {
    pub fn new(client: C) -> Self {
        Self::with_url(client, DEFAULT_IP_LOOKUP_URL)
    }

    pub fn with_url(client: C, url: &str) -> Self {
        Self {
            client,
            url: url.to_string(),
        }
    }

    pub async fn resolve(&self) -> Option<String> {
        let body = match self.client.get(self.url.clone(), HashMap::new()).await {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to get IP address: {}", e);
                return None;
            }
        };
        match serde_json::from_str::<IpLookupResponse>(&body) {
            Ok(parsed) if !parsed.ip.trim().is_empty() => Some(parsed.ip.trim().to_string()),
            Ok(_) => None,
            Err(e) => {
                warn!("Unexpected IP lookup response: {}", e);
                None
            }
        }
    }
}
