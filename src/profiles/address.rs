//! Public server address for links.

use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;

use crate::config::LinksConfig;

#[derive(Debug, Error)]
pub enum AddressError {
    #[error("address lookup failed: {0}")]
    Lookup(#[from] reqwest::Error),

    #[error("address lookup returned something that is not an IP: {0:?}")]
    Invalid(String),
}

/// The configured address, or one discovered through the lookup URL.
pub async fn resolve(config: &LinksConfig) -> Result<String, AddressError> {
    if let Some(address) = config.server_address.as_deref().map(str::trim) {
        if !address.is_empty() {
            return Ok(address.to_string());
        }
    }
    let ip = discover(
        &config.address_lookup_url,
        Duration::from_secs(config.lookup_timeout_secs),
    )
    .await?;
    tracing::info!(address = %ip, url = %config.address_lookup_url, "Discovered public address");
    Ok(ip.to_string())
}

/// GET `url` and parse the trimmed body as an IP address.
pub async fn discover(url: &str, timeout: Duration) -> Result<IpAddr, AddressError> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    let body = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    let trimmed = body.trim();
    trimmed
        .parse()
        .map_err(|_| AddressError::Invalid(trimmed.chars().take(64).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// One-shot HTTP server answering every request with `body`.
    async fn serve(body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });
        format!("http://{}/", addr)
    }

    #[tokio::test]
    async fn test_configured_address_wins() {
        let config = LinksConfig {
            server_address: Some(" vpn.example.net ".to_string()),
            address_lookup_url: "http://127.0.0.1:9/".to_string(),
            ..LinksConfig::default()
        };
        assert_eq!(resolve(&config).await.unwrap(), "vpn.example.net");
    }

    #[tokio::test]
    async fn test_discover_trims_body() {
        let url = serve("198.51.100.20\n").await;
        let ip = discover(&url, Duration::from_secs(5)).await.unwrap();
        assert_eq!(ip.to_string(), "198.51.100.20");
    }

    #[tokio::test]
    async fn test_discover_rejects_html() {
        let url = serve("<html>captive portal</html>").await;
        assert!(matches!(
            discover(&url, Duration::from_secs(5)).await,
            Err(AddressError::Invalid(_))
        ));
    }
}
