use super::payload::WorkerMessage;
use super::BridgeError;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tokio::sync::mpsc;
use uuid::Uuid;

pub type ClientId = Uuid;

/// Foreground contexts connected to the bridge, in connection order.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: Vec<(ClientId, mpsc::UnboundedSender<WorkerMessage>)>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&mut self) -> (ClientId, mpsc::UnboundedReceiver<WorkerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.clients.push((id, tx));
        (id, rx)
    }

    pub fn disconnect(&mut self, id: ClientId) -> bool {
        let before = self.clients.len();
        self.clients.retain(|(cid, _)| *cid != id);
        before != self.clients.len()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Clients whose receiver is gone are dropped on the way.
    pub fn broadcast(&mut self, msg: &WorkerMessage) -> usize {
        self.clients.retain(|(_, tx)| tx.send(msg.clone()).is_ok());
        self.clients.len()
    }

    pub fn send(&mut self, id: ClientId, msg: WorkerMessage) -> bool {
        let Some(pos) = self.clients.iter().position(|(cid, _)| *cid == id) else {
            return false;
        };
        if self.clients[pos].1.send(msg).is_ok() {
            true
        } else {
            self.clients.remove(pos);
            false
        }
    }

    /// Deliver to the first live client, the one a click should focus.
    pub fn focus(&mut self, msg: WorkerMessage) -> Option<ClientId> {
        while let Some((id, tx)) = self.clients.first() {
            if tx.send(msg.clone()).is_ok() {
                return Some(*id);
            }
            self.clients.remove(0);
        }
        None
    }
}

/// Opens the admin console when no client is connected.
#[async_trait]
pub trait WindowOpener: Send + Sync {
    async fn open(&self, url: &str) -> Result<(), BridgeError>;
}

#[derive(Debug, Clone)]
pub struct CommandOpener {
    program: String,
}

impl CommandOpener {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl WindowOpener for CommandOpener {
    async fn open(&self, url: &str) -> Result<(), BridgeError> {
        let status = Command::new(&self.program)
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| BridgeError::Open(format!("{}: {}", self.program, e)))?;
        if !status.success() {
            return Err(BridgeError::Open(format!(
                "{} exited with status {}",
                self.program, status
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn focus(order: &str) -> WorkerMessage {
        WorkerMessage::Focus {
            order_id: Some(order.into()),
        }
    }

    #[test]
    fn broadcast_prunes_closed_clients() {
        let mut reg = ClientRegistry::new();
        let (_a, mut rx_a) = reg.connect();
        let (_b, rx_b) = reg.connect();
        drop(rx_b);
        assert_eq!(reg.broadcast(&focus("x")), 1);
        assert_eq!(rx_a.try_recv().unwrap(), focus("x"));
    }

    #[test]
    fn focus_prefers_oldest_live_client() {
        let mut reg = ClientRegistry::new();
        let (a, rx_a) = reg.connect();
        let (b, mut rx_b) = reg.connect();
        drop(rx_a);
        assert_eq!(reg.focus(focus("ord-1")), Some(b));
        assert_eq!(rx_b.try_recv().unwrap(), focus("ord-1"));
        assert!(!reg.disconnect(a));
        assert!(reg.disconnect(b));
        assert_eq!(reg.focus(focus("ord-1")), None);
    }

    #[tokio::test]
    async fn missing_opener_is_an_error() {
        let opener = CommandOpener::new("definitely-not-an-opener");
        assert!(matches!(
            opener.open("http://localhost/").await,
            Err(BridgeError::Open(_))
        ));
    }
}
