use anyhow::{Context, Result};
use reqwest::blocking::Client as HttpClient;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

/// The single seam through which the engine touches the network.
///
/// A reply with a non-2xx status is still `Ok`; `Err` means the exchange
/// itself failed (DNS, connect, TLS, body read).
pub trait HttpTransport: Send + Sync {
    fn post_json(&self, url: &str, headers: &[(&str, &str)], body: &Value) -> Result<HttpReply>;
    fn get(&self, url: &str) -> Result<HttpReply>;
}

/// Blocking reqwest client with its default settings. No request timeout is
/// configured here.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    http: HttpClient,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            http: HttpClient::new(),
        }
    }
}

impl HttpTransport for ReqwestTransport {
    fn post_json(&self, url: &str, headers: &[(&str, &str)], body: &Value) -> Result<HttpReply> {
        let mut request = self.http.post(url).json(body);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = request
            .send()
            .with_context(|| format!("request failed ({url})"))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .with_context(|| format!("response body read failed ({url})"))?;
        Ok(HttpReply {
            status,
            body: body.to_vec(),
        })
    }

    fn get(&self, url: &str) -> Result<HttpReply> {
        let response = self
            .http
            .get(url)
            .send()
            .with_context(|| format!("request failed ({url})"))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .with_context(|| format!("response body read failed ({url})"))?;
        Ok(HttpReply {
            status,
            body: body.to_vec(),
        })
    }
}
