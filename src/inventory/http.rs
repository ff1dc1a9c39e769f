//! HTTP inventory endpoint

use async_trait::async_trait;
use netmap_core::error::InventoryError;
use netmap_core::inventory::{DeviceInventory, filter_recent};
use netmap_core::Device;
use std::time::Duration;

/// Fetches a JSON array of devices with a GET on every call.
#[derive(Debug, Clone)]
pub struct HttpInventory {
    client: reqwest::Client,
    url: String,
    window: chrono::Duration,
}

impl HttpInventory {
    pub fn new(url: String, timeout: Duration, window: chrono::Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url, window })
    }
}

#[async_trait]
impl DeviceInventory for HttpInventory {
    async fn list_active_devices(&self) -> Result<Vec<Device>, InventoryError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| InventoryError::Unavailable(format!("{}: {}", self.url, e)))?;

        if !response.status().is_success() {
            return Err(InventoryError::Unavailable(format!(
                "{} returned {}",
                self.url,
                response.status()
            )));
        }

        let devices: Vec<Device> = response
            .json()
            .await
            .map_err(|e| InventoryError::Malformed(format!("{}: {}", self.url, e)))?;

        let total = devices.len();
        let active = filter_recent(devices, self.window, chrono::Utc::now());
        tracing::debug!(
            "Fetched {} devices from {} ({} within recency window)",
            total,
            self.url,
            active.len()
        );
        Ok(active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and return the URL.
    async fn serve_once(status: &'static str, body: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        });
        format!("http://{}/devices", addr)
    }

    #[tokio::test]
    async fn test_fetches_devices() {
        let body = format!(
            r#"[{{"id": "sw1", "ip": "10.0.0.2", "role": "switch", "mac": "00:11:22:33:44:55", "stats": {{"lastSeen": "{}"}}}}]"#,
            chrono::Utc::now().to_rfc3339()
        );
        let url = serve_once("200 OK", body).await;
        let inventory = HttpInventory::new(url, Duration::from_secs(5), chrono::Duration::hours(1)).unwrap();

        let devices = inventory.list_active_devices().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].mac.as_deref(), Some("00:11:22:33:44:55"));
    }

    #[tokio::test]
    async fn test_error_status_is_unavailable() {
        let url = serve_once("503 Service Unavailable", "{}".to_string()).await;
        let inventory = HttpInventory::new(url, Duration::from_secs(5), chrono::Duration::hours(1)).unwrap();

        assert!(matches!(
            inventory.list_active_devices().await,
            Err(InventoryError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_unexpected_body_is_malformed() {
        let url = serve_once("200 OK", r#"{"devices": 3}"#.to_string()).await;
        let inventory = HttpInventory::new(url, Duration::from_secs(5), chrono::Duration::hours(1)).unwrap();

        assert!(matches!(
            inventory.list_active_devices().await,
            Err(InventoryError::Malformed(_))
        ));
    }
}
