//! Connected client sessions and fan-out delivery.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use tracing::debug;

use crate::models::ServerEvent;

pub type SessionId = String;
pub type ClientSender = mpsc::UnboundedSender<ServerEvent>;

/// Tracks connected websocket sessions.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<SessionId, ClientSender>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, session_id: SessionId, sender: ClientSender) {
        let mut w = self.sessions.write().await;
        w.insert(session_id, sender);
    }

    pub async fn unregister(&self, session_id: &str) {
        let mut w = self.sessions.write().await;
        w.remove(session_id);
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Sends `event` to every connected session and returns how many received it.
    /// Sessions whose socket task has ended are dropped from the registry.
    pub async fn broadcast(&self, event: ServerEvent) -> usize {
        let mut delivered = 0;
        let mut gone = Vec::new();

        {
            let r = self.sessions.read().await;
            for (id, sender) in r.iter() {
                if sender.send(event.clone()).is_ok() {
                    delivered += 1;
                } else {
                    gone.push(id.clone());
                }
            }
        }

        if !gone.is_empty() {
            let mut w = self.sessions.write().await;
            for id in gone {
                debug!(session_id = %id, "pruning closed session");
                w.remove(&id);
            }
        }

        delivered
    }
}
