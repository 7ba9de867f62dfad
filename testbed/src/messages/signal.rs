use crate::error::{Result, TestbedError};
use std::time::Duration;
use tokio::{io::AsyncWriteExt, net::TcpStream};
use tracing::info;

/// Body a receiver waits for before it reports the experiment as ended.
/// Read as exactly this many bytes; there is no other framing.
pub const END_OF_EXPERIMENT: &str = "end_of_experiment";

/// Optional readiness marker a receiver writes to the first peer that
/// connects to its termination port.
pub const START_OF_EXPERIMENT: &str = "start_of_experiment";

/// Marker the controller prints once it has reset and is ready for a program.
pub const CONTROLLER_READY: &str = "arduino_available";

/// Port the receiver listens on for the end of experiment notification.
pub const DEFAULT_TERMINATION_PORT: u16 = 8011;

/// Tell a receiver the experiment is over.
///
/// * `address`: termination listener, e.g. `127.0.0.1:8011`.
/// * `connect_timeout`: how long to wait for the connection to be accepted.
pub async fn notify_end_of_experiment(address: &str, connect_timeout: Duration) -> Result<()> {
    let mut stream = tokio::time::timeout(connect_timeout, TcpStream::connect(address))
        .await
        .map_err(|_| {
            TestbedError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("no answer from {address} within {connect_timeout:?}"),
            ))
        })??;

    stream.write_all(END_OF_EXPERIMENT.as_bytes()).await?;
    stream.shutdown().await?;
    info!(%address, "sent end of experiment");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::{io::AsyncReadExt, net::TcpListener};

    #[tokio::test]
    async fn test_notify_writes_marker_only() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let reader = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            socket.read_to_end(&mut received).await.unwrap();
            received
        });

        notify_end_of_experiment(&address, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(reader.await.unwrap(), END_OF_EXPERIMENT.as_bytes());
    }

    #[tokio::test]
    async fn test_notify_fails_without_listener() {
        // Bind then drop to find a port with nothing behind it.
        let address = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };

        let result = notify_end_of_experiment(&address, Duration::from_millis(500)).await;
        assert!(matches!(result, Err(TestbedError::Io(_))));
    }
}
