use tokio::sync::mpsc;

use crate::ride::{ConnectionId, message::ServerMessage};

/// Receiving side of an accepted connection.
///
/// Obtain this via `SessionGateway::connect`. Everything the gateway, the
/// router or the broadcaster sends to this connection arrives here. Dropping
/// the handle does not leave the ride; call `SessionGateway::disconnect`.
#[derive(Debug)]
#[must_use = "Connection must be drained, otherwise its queue fills and messages are dropped"]
pub struct Connection {
    id: ConnectionId,
    receiver: mpsc::Receiver<ServerMessage>,
}

impl Connection {
    pub(crate) fn new(id: ConnectionId, receiver: mpsc::Receiver<ServerMessage>) -> Self {
        Self { id, receiver }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Waits for the next message. `None` once the gateway has forgotten the connection.
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.receiver.recv().await
    }

    /// Attempts to receive the next message without waiting.
    pub fn try_recv(&mut self) -> Result<ServerMessage, mpsc::error::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Takes every message that is already queued.
    pub fn drain(&mut self) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.receiver.try_recv() {
            messages.push(message);
        }
        messages
    }
}
