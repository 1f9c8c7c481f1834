use anyhow::{Result, anyhow};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::ws::messages::WsMessage;

/// Single-process broadcast bus. Every connection gets a bounded outbound
/// buffer; a consumer that falls behind is dropped rather than letting a
/// producer block.
pub struct NotificationHub {
    connections: Mutex<HashMap<u64, mpsc::Sender<WsMessage>>>,
    next_id: AtomicU64,
    last_sent: Mutex<HashMap<String, Instant>>,
}

impl NotificationHub {
    /// Outbound messages buffered per connection before it is dropped.
    pub const SEND_BUFFER: usize = 256;
    pub const PING_INTERVAL: Duration = Duration::from_secs(54);
    pub const PONG_DEADLINE: Duration = Duration::from_secs(60);
    /// Floor between broadcasts of one debounced message type (≤ 5 Hz).
    const DEBOUNCE_INTERVAL: Duration = Duration::from_millis(200);

    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    fn connections_guard(
        &self,
    ) -> Result<MutexGuard<'_, HashMap<u64, mpsc::Sender<WsMessage>>>> {
        self.connections
            .lock()
            .map_err(|_| anyhow!("Failed to lock hub connection table"))
    }

    fn last_sent_guard(&self) -> Result<MutexGuard<'_, HashMap<String, Instant>>> {
        self.last_sent
            .lock()
            .map_err(|_| anyhow!("Failed to lock hub debounce table"))
    }

    pub fn register(&self) -> Result<(u64, mpsc::Receiver<WsMessage>)> {
        let (sender, receiver) = mpsc::channel(Self::SEND_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.connections_guard()?.insert(id, sender);
        log::debug!("ws connection {id} registered");
        Ok((id, receiver))
    }

    pub fn unregister(&self, id: u64) -> Result<()> {
        self.connections_guard()?.remove(&id);
        log::debug!("ws connection {id} unregistered");
        Ok(())
    }

    pub fn connection_count(&self) -> Result<usize> {
        Ok(self.connections_guard()?.len())
    }

    /// Fans a message out to every connection. Connections whose buffer is
    /// full are removed on the spot.
    pub fn broadcast(&self, message_type: &str, data: JsonValue) -> Result<()> {
        let message = WsMessage::new(message_type, data);
        let mut overflowed = Vec::new();
        {
            let connections = self.connections_guard()?;
            for (id, sender) in connections.iter() {
                match sender.try_send(message.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => overflowed.push(*id),
                    Err(mpsc::error::TrySendError::Closed(_)) => overflowed.push(*id),
                }
            }
        }
        for id in overflowed {
            log::warn!("ws connection {id} dropped: send buffer overflow");
            self.unregister(id)?;
        }
        Ok(())
    }

    /// Broadcast limited per message type; intermediate snapshots within the
    /// debounce window are skipped.
    pub fn broadcast_debounced(&self, message_type: &str, data: JsonValue) -> Result<()> {
        {
            let mut last_sent = self.last_sent_guard()?;
            let now = Instant::now();
            if let Some(last) = last_sent.get(message_type) {
                if now.duration_since(*last) < Self::DEBOUNCE_INTERVAL {
                    return Ok(());
                }
            }
            last_sent.insert(message_type.to_string(), now);
        }
        self.broadcast(message_type, data)
    }

    /// Direct send to one connection (used for the setup burst).
    pub fn send_to(&self, id: u64, message_type: &str, data: JsonValue) -> Result<()> {
        let message = WsMessage::new(message_type, data);
        let sender = self.connections_guard()?.get(&id).cloned();
        if let Some(sender) = sender {
            if sender.try_send(message).is_err() {
                self.unregister(id)?;
            }
        }
        Ok(())
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}
