//! Clients (agent instances) attached to the worker

use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

pub type ClientId = Uuid;

/// Messages the worker sends to an attached client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// The worker now controls this client
    Controlled,
    /// Bring this client to the foreground
    Focus,
}

struct ClientEntry {
    id: ClientId,
    controlled: bool,
    tx: mpsc::UnboundedSender<ClientMessage>,
}

#[derive(Default)]
pub struct ClientRegistry {
    clients: Vec<ClientEntry>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, tx: mpsc::UnboundedSender<ClientMessage>, controlled: bool) -> ClientId {
        let id = Uuid::new_v4();
        self.clients.push(ClientEntry { id, controlled, tx });
        debug!("client {} attached (controlled: {})", id, controlled);
        id
    }

    pub fn detach(&mut self, id: ClientId) {
        self.clients.retain(|c| c.id != id);
    }

    /// Open clients, controlled or not, in attach order
    pub fn ids(&mut self) -> Vec<ClientId> {
        self.clients.retain(|c| !c.tx.is_closed());
        self.clients.iter().map(|c| c.id).collect()
    }

    pub fn is_controlled(&self, id: ClientId) -> bool {
        self.clients.iter().any(|c| c.id == id && c.controlled)
    }

    /// Take control of every open client
    pub fn claim(&mut self) -> usize {
        self.clients.retain(|c| !c.tx.is_closed());
        for client in self.clients.iter_mut().filter(|c| !c.controlled) {
            client.controlled = true;
            let _ = client.tx.send(ClientMessage::Controlled);
        }
        self.clients.len()
    }

    /// Returns false when the client is gone
    pub fn focus(&mut self, id: ClientId) -> bool {
        match self.clients.iter().find(|c| c.id == id) {
            Some(client) => client.tx.send(ClientMessage::Focus).is_ok(),
            None => false,
        }
    }
}
