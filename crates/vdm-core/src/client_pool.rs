//! Per-origin HTTP client pool.
//!
//! One `reqwest::Client` per `scheme://host[:port]`, created on first use and
//! shared by every controller and worker hitting that origin. Clients carry
//! keep-alive limits and the optional download proxy; certificate checks are
//! disabled for compatibility with the media origins this service fronts.

use anyhow::{Context, Result};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use url::Url;

use crate::config::DownloadConfig;

pub struct ClientPool {
    request_timeout: Duration,
    keepalive: Duration,
    pool_per_host: usize,
    proxy_url: Option<String>,
    clients: RwLock<HashMap<String, Client>>,
}

impl ClientPool {
    pub fn new(cfg: &DownloadConfig) -> Self {
        Self {
            request_timeout: cfg.request_timeout(),
            keepalive: cfg.keepalive(),
            pool_per_host: cfg.pool_per_host,
            proxy_url: cfg.use_proxy.then(|| cfg.proxy_url.clone()).flatten(),
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Shared client for the URL's origin, created on first use.
    pub fn get(&self, url: &str) -> Result<Client> {
        let key = origin_key(url)?;
        if let Some(client) = self.clients.read().unwrap().get(&key) {
            return Ok(client.clone());
        }

        let mut clients = self.clients.write().unwrap();
        // A racing caller may have created it between the two locks.
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }
        let client = self.build_client()?;
        clients.insert(key, client.clone());
        Ok(client)
    }

    fn build_client(&self) -> Result<Client> {
        let mut builder = Client::builder()
            .connect_timeout(self.request_timeout)
            .read_timeout(self.request_timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .danger_accept_invalid_certs(true)
            .pool_max_idle_per_host(self.pool_per_host)
            .pool_idle_timeout(self.keepalive)
            .tcp_keepalive(self.keepalive);

        if let Some(proxy) = &self.proxy_url {
            builder = builder.proxy(reqwest::Proxy::all(proxy).context("invalid proxy URL")?);
        }

        builder.build().context("failed to build HTTP client")
    }

    /// Drop every pooled client, closing idle connections. Called on graceful
    /// shutdown.
    pub fn close_all(&self) {
        self.clients.write().unwrap().clear();
    }
}

/// Origin key for a URL: `scheme://host[:port]` (port omitted when default).
fn origin_key(url: &str) -> Result<String> {
    let parsed = Url::parse(url).with_context(|| format!("invalid URL: {url}"))?;
    let host = parsed
        .host_str()
        .with_context(|| format!("URL has no host: {url}"))?;
    Ok(match parsed.port() {
        Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
        None => format!("{}://{}", parsed.scheme(), host),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_key_scheme_host_port() {
        assert_eq!(
            origin_key("https://cdn.example.com/v/1.mp4").unwrap(),
            "https://cdn.example.com"
        );
        assert_eq!(
            origin_key("http://127.0.0.1:8080/file").unwrap(),
            "http://127.0.0.1:8080"
        );
        assert!(origin_key("not a url").is_err());
    }

    #[test]
    fn same_origin_reuses_client() {
        let pool = ClientPool::new(&DownloadConfig::default());
        let _a = pool.get("http://example.com/a").unwrap();
        let _b = pool.get("http://example.com/b").unwrap();
        let _c = pool.get("http://other.example.com/c").unwrap();
        assert_eq!(pool.clients.read().unwrap().len(), 2);

        pool.close_all();
        assert!(pool.clients.read().unwrap().is_empty());
    }
}
