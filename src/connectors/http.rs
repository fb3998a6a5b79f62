//! Transport port for connectors. The trait boundary lets tests inject fake
//! transports; `ReqwestHttp` is the production adapter and the only place in
//! the crate that talks to the network.

use std::time::Duration;

use async_trait::async_trait;

use crate::common::error::Result;

#[derive(Debug, Clone)]
pub struct HttpGetResult {
    pub status: u16,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait HttpFetch: Send + Sync {
    async fn get(&self, url: &str) -> Result<HttpGetResult>;
}

pub struct ReqwestHttp {
    client: reqwest::Client,
}

impl ReqwestHttp {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpFetch for ReqwestHttp {
    async fn get(&self, url: &str) -> Result<HttpGetResult> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status().as_u16();
        let bytes = resp.bytes().await?.to_vec();
        Ok(HttpGetResult { status, bytes })
    }
}
