//! Thin interface over the external message-oriented transport. The session
//! core only needs to register outbound payloads, push them, and receive
//! inbound messages as discrete events on one serialized queue; the wire
//! protocol itself (framing, device names, query semantics) is consumed from
//! the underlying standard, not reimplemented here.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use shared::{domain::Peer, protocol::Message};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("no active channel connector to {}", peer.as_str())]
    NotConnected { peer: Peer },
    #[error("channel to {} closed by remote", peer.as_str())]
    Closed { peer: Peer },
}

/// One point-to-point channel connector. Two independent instances exist per
/// session: one to the robot, one to the scanner.
#[async_trait]
pub trait LinkConnector: Send + Sync {
    fn peer(&self) -> Peer;
    fn is_connected(&self) -> bool;

    /// Announce an outbound payload by name before the first push. Pushing an
    /// unregistered name is tolerated by `LoopbackLink` but reported.
    async fn register_outbound(&self, name: &str) -> Result<(), LinkError>;

    /// Transmit one message.
    async fn push(&self, message: Message) -> Result<(), LinkError>;

    /// Withdraw a previously registered outbound payload.
    async fn unregister(&self, name: &str) -> Result<(), LinkError>;
}

/// Placeholder connector used before a channel is attached. Every send is
/// rejected at the boundary, which the session logs and surfaces.
pub struct MissingLinkConnector {
    peer: Peer,
}

impl MissingLinkConnector {
    pub fn new(peer: Peer) -> Self {
        Self { peer }
    }
}

#[async_trait]
impl LinkConnector for MissingLinkConnector {
    fn peer(&self) -> Peer {
        self.peer
    }

    fn is_connected(&self) -> bool {
        false
    }

    async fn register_outbound(&self, _name: &str) -> Result<(), LinkError> {
        Err(LinkError::NotConnected { peer: self.peer })
    }

    async fn push(&self, _message: Message) -> Result<(), LinkError> {
        Err(LinkError::NotConnected { peer: self.peer })
    }

    async fn unregister(&self, _name: &str) -> Result<(), LinkError> {
        Err(LinkError::NotConnected { peer: self.peer })
    }
}

/// In-process duplex channel: the near end implements [`LinkConnector`], the
/// far end plays the peer in tests and demos. Inbound messages are delivered
/// through a single mpsc queue, preserving arrival order.
pub struct LoopbackLink {
    peer: Peer,
    outbound: mpsc::UnboundedSender<Message>,
    registered: Mutex<HashSet<String>>,
}

pub struct LoopbackRemote {
    peer: Peer,
    outbound: mpsc::UnboundedReceiver<Message>,
    inbound: mpsc::UnboundedSender<Message>,
}

impl LoopbackLink {
    /// Build a connected pair plus the serialized inbound receiver the
    /// session loop consumes.
    pub fn pair(peer: Peer) -> (Self, LoopbackRemote, mpsc::UnboundedReceiver<Message>) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        (
            Self {
                peer,
                outbound: outbound_tx,
                registered: Mutex::new(HashSet::new()),
            },
            LoopbackRemote {
                peer,
                outbound: outbound_rx,
                inbound: inbound_tx,
            },
            inbound_rx,
        )
    }
}

#[async_trait]
impl LinkConnector for LoopbackLink {
    fn peer(&self) -> Peer {
        self.peer
    }

    fn is_connected(&self) -> bool {
        !self.outbound.is_closed()
    }

    async fn register_outbound(&self, name: &str) -> Result<(), LinkError> {
        self.registered
            .lock()
            .expect("registration set poisoned")
            .insert(name.to_string());
        Ok(())
    }

    async fn push(&self, message: Message) -> Result<(), LinkError> {
        if !self
            .registered
            .lock()
            .expect("registration set poisoned")
            .contains(&message.name)
        {
            warn!(name = %message.name, peer = self.peer.as_str(), "push of unregistered outbound payload");
        }
        self.outbound
            .send(message)
            .map_err(|_| LinkError::Closed { peer: self.peer })
    }

    async fn unregister(&self, name: &str) -> Result<(), LinkError> {
        self.registered
            .lock()
            .expect("registration set poisoned")
            .remove(name);
        Ok(())
    }
}

impl LoopbackRemote {
    pub fn peer(&self) -> Peer {
        self.peer
    }

    /// Deliver a message from the peer into the session's inbound queue.
    pub fn deliver(&self, message: Message) -> bool {
        self.inbound.send(message).is_ok()
    }

    /// Next message the session pushed, if any has arrived.
    pub fn try_next_outbound(&mut self) -> Option<Message> {
        self.outbound.try_recv().ok()
    }

    pub async fn next_outbound(&mut self) -> Option<Message> {
        self.outbound.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::protocol::MessageBody;

    fn text(name: &str) -> Message {
        Message {
            name: name.into(),
            body: MessageBody::Text { text: name.into() },
        }
    }

    #[tokio::test]
    async fn missing_connector_rejects_sends() {
        let link = MissingLinkConnector::new(Peer::Robot);
        assert!(!link.is_connected());
        assert!(matches!(
            link.push(text("CMD_000000000000")).await,
            Err(LinkError::NotConnected { peer: Peer::Robot })
        ));
    }

    #[tokio::test]
    async fn loopback_delivers_outbound_in_order() {
        let (link, mut remote, _inbound) = LoopbackLink::pair(Peer::Scanner);
        link.register_outbound("PLANE_0").await.unwrap();
        link.push(text("PLANE_0")).await.unwrap();
        link.push(text("PLANE_0")).await.unwrap();
        assert_eq!(remote.next_outbound().await.unwrap().name, "PLANE_0");
        assert!(remote.try_next_outbound().is_some());
        assert!(remote.try_next_outbound().is_none());
    }

    #[tokio::test]
    async fn loopback_inbound_preserves_arrival_order() {
        let (_link, remote, mut inbound) = LoopbackLink::pair(Peer::Robot);
        assert!(remote.deliver(text("A")));
        assert!(remote.deliver(text("B")));
        assert_eq!(inbound.recv().await.unwrap().name, "A");
        assert_eq!(inbound.recv().await.unwrap().name, "B");
    }

    #[tokio::test]
    async fn push_after_remote_drop_is_closed_error() {
        let (link, remote, _inbound) = LoopbackLink::pair(Peer::Robot);
        drop(remote);
        assert!(matches!(
            link.push(text("CMD_000000000001")).await,
            Err(LinkError::Closed { peer: Peer::Robot })
        ));
    }
}
