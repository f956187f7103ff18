//! Per-instance WebSocket subscriber registry.
//!
//! Each open viewer socket is driven by its own task; the registry only holds the sending half
//! of a channel into that task. Broadcasting or closing therefore never blocks on the network.
//! The registry is owned by the object server and handed to its handlers by reference.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Close code for a normal shutdown.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code for a policy violation (bad path, unknown instance).
pub const CLOSE_POLICY: u16 = 1008;

/// Instruction for a socket task.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketCommand {
    /// Send a text frame.
    Frame(String),
    /// Send a close frame and end the task.
    Close { code: u16, reason: String },
}

/// `(project_id, instance_id)`
pub type InstanceKey = (String, String);

pub type ConnectionId = u64;

#[derive(Default)]
pub struct ConnectionRegistry {
    sets: Mutex<HashMap<InstanceKey, HashMap<ConnectionId, mpsc::UnboundedSender<SocketCommand>>>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(project_id: &str, instance_id: &str) -> InstanceKey {
        (project_id.to_string(), instance_id.to_string())
    }

    fn lock(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<InstanceKey, HashMap<ConnectionId, mpsc::UnboundedSender<SocketCommand>>>>
    {
        // A poisoned map is still structurally valid; keep serving.
        self.sets.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a subscriber and return its id plus the receiving end its task should drain.
    pub fn register(
        &self,
        project_id: &str,
        instance_id: &str,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<SocketCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock()
            .entry(Self::key(project_id, instance_id))
            .or_default()
            .insert(id, tx);
        log::debug!("Registered socket {} for {}/{}", id, project_id, instance_id);
        (id, rx)
    }

    /// Remove a subscriber; the instance's set is dropped once empty.
    pub fn unregister(&self, project_id: &str, instance_id: &str, connection: ConnectionId) {
        let key = Self::key(project_id, instance_id);
        let mut sets = self.lock();
        if let Some(set) = sets.get_mut(&key) {
            set.remove(&connection);
            if set.is_empty() {
                sets.remove(&key);
            }
        }
    }

    /// Queue `frame` to every open subscriber of the instance; returns how many accepted it.
    ///
    /// Subscribers whose task has already ended are skipped, not removed; they unregister
    /// themselves.
    pub fn broadcast(&self, project_id: &str, instance_id: &str, frame: &str) -> usize {
        let sets = self.lock();
        let Some(set) = sets.get(&Self::key(project_id, instance_id)) else {
            return 0;
        };
        set.values()
            .filter(|tx| !tx.is_closed())
            .filter(|tx| tx.send(SocketCommand::Frame(frame.to_string())).is_ok())
            .count()
    }

    /// Close every subscriber of one instance and drop its set.
    pub fn close_instance(&self, project_id: &str, instance_id: &str, code: u16, reason: &str) -> usize {
        let removed = self.lock().remove(&Self::key(project_id, instance_id));
        removed.map_or(0, |set| Self::send_close(set.into_values(), code, reason))
    }

    /// Close every subscriber of every instance.
    pub fn close_all(&self, code: u16, reason: &str) -> usize {
        let drained: Vec<_> = self.lock().drain().flat_map(|(_, set)| set.into_values()).collect();
        Self::send_close(drained.into_iter(), code, reason)
    }

    fn send_close(
        senders: impl Iterator<Item = mpsc::UnboundedSender<SocketCommand>>,
        code: u16,
        reason: &str,
    ) -> usize {
        senders
            .filter(|tx| {
                tx.send(SocketCommand::Close {
                    code,
                    reason: reason.to_string(),
                })
                .is_ok()
            })
            .count()
    }

    pub fn connection_count(&self, project_id: &str, instance_id: &str) -> usize {
        self.lock()
            .get(&Self::key(project_id, instance_id))
            .map_or(0, HashMap::len)
    }

    pub fn total_connections(&self) -> usize {
        self.lock().values().map(HashMap::len).sum()
    }
}
