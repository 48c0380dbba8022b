//! Handing an action's result to the process that started it.
//!
//! The parent binds a PULL socket and passes its address as
//! `--result_address`; the child connects a PUSH socket and sends one JSON
//! object, `{"result": <value>}`, when it finishes.

use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;
use zeromq::{PullSocket, PushSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

use crate::error::{Error, Result};

/// Longest wait for the parent to take the result.
const SEND_TIMEOUT: Duration = Duration::from_secs(30);

fn zmq_error(address: &str, err: impl std::fmt::Display) -> Error {
    Error::transport(address, err.to_string())
}

/// Send `value` to the listener at `address`.
pub async fn publish(address: &str, value: &Value) -> Result<()> {
    let payload = json!({ "result": value }).to_string();
    debug!("Publishing result to {}", address);

    let mut socket = PushSocket::new();
    let send = async {
        socket.connect(address).await.map_err(|e| zmq_error(address, e))?;
        socket
            .send(ZmqMessage::from(payload))
            .await
            .map_err(|e| zmq_error(address, e))
    };
    tokio::time::timeout(SEND_TIMEOUT, send)
        .await
        .map_err(|_| Error::timeout(format!("result delivery to {}", address), SEND_TIMEOUT.as_secs()))??;
    let _ = socket.close().await;
    Ok(())
}

/// The parent's end: a bound socket waiting for one result.
pub struct ResultListener {
    socket: PullSocket,
    address: String,
}

impl ResultListener {
    /// Bind to an ephemeral loopback port.
    pub async fn bind() -> Result<Self> {
        let mut socket = PullSocket::new();
        let endpoint = socket
            .bind("tcp://127.0.0.1:0")
            .await
            .map_err(|e| zmq_error("tcp://127.0.0.1:0", e))?;
        Ok(Self {
            socket,
            address: endpoint.to_string(),
        })
    }

    /// Address to hand to the child.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Wait up to `timeout` for the result value.
    pub async fn receive(&mut self, timeout: Duration) -> Result<Option<Value>> {
        let message = match tokio::time::timeout(timeout, self.socket.recv()).await {
            Ok(received) => received.map_err(|e| zmq_error(&self.address, e))?,
            Err(_) => return Ok(None),
        };
        let Some(frame) = message.get(0) else {
            return Ok(None);
        };
        let mut envelope: Value = serde_json::from_slice(frame)?;
        Ok(envelope.get_mut("result").map(Value::take))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_and_receive() {
        let mut listener = ResultListener::bind().await.unwrap();
        let address = listener.address().to_string();
        assert!(address.starts_with("tcp://127.0.0.1:"));

        let sender = tokio::spawn(async move { publish(&address, &json!({"volumeID": 12})).await });
        let value = listener.receive(Duration::from_secs(10)).await.unwrap();
        sender.await.unwrap().unwrap();
        assert_eq!(value, Some(json!({"volumeID": 12})));
    }

    #[tokio::test]
    async fn test_receive_times_out_empty() {
        let mut listener = ResultListener::bind().await.unwrap();
        assert_eq!(listener.receive(Duration::from_millis(50)).await.unwrap(), None);
    }
}
