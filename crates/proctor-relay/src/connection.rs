use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use proctor_core::{ConnectionClosed, Envelope};
use tokio::sync::mpsc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Unique id for one accepted socket.
///
/// A reconnect is a brand-new socket with a brand-new id; registry removal
/// is guarded by it so a stale teardown cannot evict a replacement.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnId(String);

impl ConnId {
    pub fn new() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Anything a `ConnectionRegistry` can hold.
pub trait Conn {
    fn id(&self) -> &ConnId;
}

/// Handle to a grading-agent socket, as stored in the server registry.
///
/// The socket itself is owned by its accepting task; this handle only sees
/// it through channels, so it is cheap to clone and holding one does not
/// keep the connection alive.
#[derive(Clone)]
pub struct ServerConn {
    id: ConnId,
    outbound: mpsc::Sender<Bytes>,
    replies: Arc<Mutex<mpsc::Receiver<String>>>,
}

/// Channel ends consumed by the task pumping the agent socket.
///
/// Dropping them is how transport closure becomes visible to handle
/// holders: `forward` starts failing and the reply stream ends.
pub struct ServerConnPipes {
    pub outbound_rx: mpsc::Receiver<Bytes>,
    pub reply_tx: mpsc::Sender<String>,
}

impl ServerConn {
    pub fn channel(capacity: usize) -> (Self, ServerConnPipes) {
        let (outbound, outbound_rx) = mpsc::channel(capacity);
        let (reply_tx, reply_rx) = mpsc::channel(capacity);
        let conn = Self {
            id: ConnId::new(),
            outbound,
            replies: Arc::new(Mutex::new(reply_rx)),
        };
        (conn, ServerConnPipes { outbound_rx, reply_tx })
    }

    pub fn id(&self) -> &ConnId {
        &self.id
    }

    /// Forward a trigger payload verbatim to the agent.
    pub async fn forward(&self, payload: Bytes) -> Result<(), ConnectionClosed> {
        self.outbound.send(payload).await.map_err(|_| ConnectionClosed)
    }

    /// Claim exclusive access to the reply stream.
    ///
    /// Replies carry no correlation id, so the next reply belongs to
    /// whoever holds this guard; a contended claim means a run is already
    /// in flight for this connection. Claiming discards anything already
    /// queued: a prior holder may have given up with its reply still in
    /// flight, and a queued reply belongs to no caller.
    pub fn try_acquire_replies(&self) -> Option<OwnedMutexGuard<mpsc::Receiver<String>>> {
        let mut guard = Arc::clone(&self.replies).try_lock_owned().ok()?;
        while guard.try_recv().is_ok() {}
        Some(guard)
    }
}

impl Conn for ServerConn {
    fn id(&self) -> &ConnId {
        &self.id
    }
}

/// Handle to a browser socket, as stored in the client registry.
#[derive(Clone)]
pub struct ClientConn {
    id: ConnId,
    tx: mpsc::Sender<String>,
}

impl ClientConn {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { id: ConnId::new(), tx }, rx)
    }

    pub fn id(&self) -> &ConnId {
        &self.id
    }

    /// Best-effort push. Delivery is never queued beyond the send buffer:
    /// a full queue or a gone socket drops the message.
    pub fn send(&self, text: String) -> bool {
        match self.tx.try_send(text) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(
                    conn_id = %self.id,
                    msg_len = msg.len(),
                    "client send queue full, dropping message"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn send_event(&self, event: &Envelope) -> bool {
        self.send(event.to_json())
    }
}

impl Conn for ClientConn {
    fn id(&self) -> &ConnId {
        &self.id
    }
}
