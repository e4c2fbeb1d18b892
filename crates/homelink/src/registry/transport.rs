//! Per-connection outbound channel with a close signal.

use homelink_protocol::ServerMessage;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Sender half held by the registry for one hub connection.
///
/// Cloning is cheap; all clones feed the same connection and share the same
/// close signal.
#[derive(Debug, Clone)]
pub struct HubTransport {
    tx: mpsc::Sender<ServerMessage>,
    closed: CancellationToken,
}

/// Receiver half drained by the connection's send loop.
#[derive(Debug)]
pub struct TransportReceiver {
    rx: mpsc::Receiver<ServerMessage>,
    closed: CancellationToken,
}

impl HubTransport {
    /// Create a transport pair with room for `capacity` queued messages.
    pub fn channel(capacity: usize) -> (HubTransport, TransportReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let closed = CancellationToken::new();
        (
            HubTransport {
                tx,
                closed: closed.clone(),
            },
            TransportReceiver { rx, closed },
        )
    }

    /// Queue a message for the connection.
    ///
    /// Fails if the transport was closed or the receiver is gone.
    pub async fn send(&self, message: ServerMessage) -> Result<(), ServerMessage> {
        if self.closed.is_cancelled() {
            return Err(message);
        }
        self.tx.send(message).await.map_err(|e| e.0)
    }

    /// Signal the connection to shut down.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }

    /// Token cancelled when this transport is closed.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}

impl TransportReceiver {
    /// Next queued message, or `None` once the transport is closed or every
    /// sender is dropped.
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => None,
            msg = self.rx.recv() => msg,
        }
    }

    /// Token cancelled when the transport is closed.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}
