use std::time::Duration;
use tokio::net::TcpStream;

use crate::{AppError, Result};

/// Startup reachability check: opens (and drops) one TCP connection to
/// `address` within `timeout`.
pub async fn ensure_online(address: &str, timeout: Duration) -> Result<()> {
    match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
        Ok(Ok(_stream)) => {
            tracing::debug!(%address, "Network reachable");
            Ok(())
        }
        Ok(Err(e)) => Err(AppError::Network {
            address: address.to_string(),
            message: e.to_string(),
        }),
        Err(_) => Err(AppError::Network {
            address: address.to_string(),
            message: format!("no response within {:?}", timeout),
        }),
    }
}
