//! gRPC utilities.

use std::time::Duration;

use tonic::transport::Channel;

/// How long to wait for a TCP connection to a worker pod.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Failure talking to a remote worker.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("invalid address {address}: {message}")]
    InvalidAddress { address: String, message: String },

    #[error("connection failed: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("rpc failed: {0}")]
    Status(#[from] tonic::Status),
}

/// Connect to a gRPC endpoint.
///
/// Creates a channel connected to the given address.
/// The address should be in the format "host:port".
pub async fn connect_channel(address: &str) -> Result<Channel, RpcError> {
    let channel = Channel::from_shared(format!("http://{}", address))
        .map_err(|e| RpcError::InvalidAddress {
            address: address.to_string(),
            message: e.to_string(),
        })?
        .connect_timeout(CONNECT_TIMEOUT)
        .connect()
        .await?;
    Ok(channel)
}
