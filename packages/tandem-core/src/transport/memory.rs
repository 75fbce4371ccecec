//! In-process peer transport.
//!
//! Connections created from the same [`MemoryNetwork`] find each other
//! through the session descriptions they exchange, the way real engines do,
//! but without any sockets. The chat channel opens once both ends hold a
//! local and a remote description.
//!
//! Like a real engine, a candidate added before the remote description is
//! an error, so tests exercise the session's buffering for real.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{PeerConnection, PeerConnector, PeerEvent, PeerEventSender};
use crate::error::{Error, Result};
use crate::protocol::{IceCandidate, SdpKind, SessionDescription};
use crate::room::Role;

const SDP_PREFIX: &str = "memory:";

/// Shared switchboard for in-process peer connections.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    endpoints: HashMap<u64, Endpoint>,
    reject_remote_descriptions: bool,
}

struct Endpoint {
    role: Role,
    events: PeerEventSender,
    peer: Option<u64>,
    local: Option<SdpKind>,
    remote: Option<SdpKind>,
    applied: Vec<IceCandidate>,
    open: bool,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of live connections, oldest first.
    pub fn connection_ids(&self) -> Vec<u64> {
        let mut ids: Vec<_> = self.inner.lock().endpoints.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Candidates applied to a connection, in application order.
    pub fn applied_candidates(&self, id: u64) -> Vec<IceCandidate> {
        self.inner
            .lock()
            .endpoints
            .get(&id)
            .map(|e| e.applied.clone())
            .unwrap_or_default()
    }

    /// Number of connections with an open chat channel.
    pub fn open_channels(&self) -> usize {
        self.inner.lock().endpoints.values().filter(|e| e.open).count()
    }

    /// Make every following remote description fail (or succeed again).
    pub fn reject_remote_descriptions(&self, reject: bool) {
        self.inner.lock().reject_remote_descriptions = reject;
    }

    fn remove(&self, id: u64) {
        let mut inner = self.inner.lock();
        let Some(endpoint) = inner.endpoints.remove(&id) else {
            return;
        };
        if !endpoint.open {
            return;
        }
        if let Some(peer) = endpoint.peer.and_then(|p| inner.endpoints.get_mut(&p)) {
            if peer.open {
                peer.open = false;
                let _ = peer.events.send(PeerEvent::ChannelClosed);
            }
        }
    }
}

impl Inner {
    fn endpoint(&mut self, id: u64) -> Result<&mut Endpoint> {
        self.endpoints
            .get_mut(&id)
            .ok_or_else(|| Error::TransportError(format!("memory connection {id} is closed")))
    }

    /// Open the chat channel on both ends once both have exchanged descriptions.
    fn maybe_open(&mut self, id: u64) {
        let Some(peer_id) = self.endpoints.get(&id).and_then(|e| e.peer) else {
            return;
        };
        let ready = |e: &Endpoint, other: u64| {
            !e.open && e.local.is_some() && e.remote.is_some() && e.peer == Some(other)
        };
        let both_ready = matches!(
            (self.endpoints.get(&id), self.endpoints.get(&peer_id)),
            (Some(a), Some(b)) if ready(a, peer_id) && ready(b, id)
        );
        if !both_ready {
            return;
        }
        for endpoint_id in [id, peer_id] {
            if let Some(endpoint) = self.endpoints.get_mut(&endpoint_id) {
                endpoint.open = true;
                let _ = endpoint.events.send(PeerEvent::ChannelOpen);
            }
        }
    }
}

#[async_trait]
impl PeerConnector for MemoryNetwork {
    async fn connect(&self, role: Role, events: PeerEventSender) -> Result<Box<dyn PeerConnection>> {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.endpoints.insert(
            id,
            Endpoint {
                role,
                events,
                peer: None,
                local: None,
                remote: None,
                applied: Vec::new(),
                open: false,
            },
        );
        tracing::debug!(connection = id, role = ?role, "Memory peer connection created");
        Ok(Box::new(MemoryConnection {
            id,
            network: self.clone(),
        }))
    }
}

/// One end of an in-process peer connection.
pub struct MemoryConnection {
    id: u64,
    network: MemoryNetwork,
}

impl MemoryConnection {
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[async_trait]
impl PeerConnection for MemoryConnection {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let mut inner = self.network.inner.lock();
        let endpoint = inner.endpoint(self.id)?;
        if endpoint.role != Role::Initiator {
            return Err(Error::TransportError("only the initiator creates offers".into()));
        }
        Ok(SessionDescription::offer(format!("{SDP_PREFIX}{}", self.id)))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let mut inner = self.network.inner.lock();
        let endpoint = inner.endpoint(self.id)?;
        if endpoint.remote != Some(SdpKind::Offer) {
            return Err(Error::TransportError(
                "cannot answer without a remote offer".into(),
            ));
        }
        Ok(SessionDescription::answer(format!("{SDP_PREFIX}{}", self.id)))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        let mut inner = self.network.inner.lock();
        let endpoint = inner.endpoint(self.id)?;
        endpoint.local = Some(description.kind);
        let _ = endpoint.events.send(PeerEvent::LocalCandidate(IceCandidate {
            candidate: format!("candidate:memory {} 1 udp 1 127.0.0.1 9 typ host", self.id),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }));
        inner.maybe_open(self.id);
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let mut inner = self.network.inner.lock();
        if inner.reject_remote_descriptions {
            return Err(Error::TransportError("remote description rejected".into()));
        }
        let peer_id = description
            .sdp
            .strip_prefix(SDP_PREFIX)
            .and_then(|id| id.parse::<u64>().ok())
            .ok_or_else(|| Error::TransportError(format!("unknown sdp: {}", description.sdp)))?;
        if !inner.endpoints.contains_key(&peer_id) {
            return Err(Error::TransportError(format!(
                "memory connection {peer_id} is closed"
            )));
        }

        let endpoint = inner.endpoint(self.id)?;
        let expected = match endpoint.role {
            Role::Initiator => SdpKind::Answer,
            Role::Responder => SdpKind::Offer,
        };
        if description.kind != expected {
            return Err(Error::TransportError(format!(
                "expected remote {:?}, got {:?}",
                expected, description.kind
            )));
        }
        endpoint.remote = Some(description.kind);
        endpoint.peer = Some(peer_id);
        inner.maybe_open(self.id);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let mut inner = self.network.inner.lock();
        let endpoint = inner.endpoint(self.id)?;
        if endpoint.remote.is_none() {
            return Err(Error::TransportError(
                "candidate added before remote description".into(),
            ));
        }
        endpoint.applied.push(candidate);
        Ok(())
    }

    async fn send(&self, text: &str) -> Result<()> {
        let inner = self.network.inner.lock();
        let peer = inner
            .endpoints
            .get(&self.id)
            .filter(|e| e.open)
            .and_then(|e| e.peer)
            .and_then(|p| inner.endpoints.get(&p))
            .filter(|p| p.open)
            .ok_or(Error::ChannelClosed)?;
        peer.events
            .send(PeerEvent::ChannelMessage(text.to_owned()))
            .map_err(|_| Error::ChannelClosed)
    }

    async fn close(&self) {
        self.network.remove(self.id);
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.network.remove(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn candidate(n: u32) -> IceCandidate {
        IceCandidate {
            candidate: format!("candidate:{n}"),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }

    #[tokio::test]
    async fn test_handshake_opens_both_ends() {
        let network = MemoryNetwork::new();
        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel();
        let a = network.connect(Role::Initiator, a_tx).await.unwrap();
        let b = network.connect(Role::Responder, b_tx).await.unwrap();

        let offer = a.create_offer().await.unwrap();
        a.set_local_description(offer.clone()).await.unwrap();
        b.set_remote_description(offer).await.unwrap();
        let answer = b.create_answer().await.unwrap();
        b.set_local_description(answer.clone()).await.unwrap();
        assert_eq!(network.open_channels(), 0);
        a.set_remote_description(answer).await.unwrap();
        assert_eq!(network.open_channels(), 2);

        assert!(matches!(a_rx.recv().await, Some(PeerEvent::LocalCandidate(_))));
        assert_eq!(a_rx.recv().await, Some(PeerEvent::ChannelOpen));
        assert!(matches!(b_rx.recv().await, Some(PeerEvent::LocalCandidate(_))));
        assert_eq!(b_rx.recv().await, Some(PeerEvent::ChannelOpen));

        a.send("ping").await.unwrap();
        assert_eq!(b_rx.recv().await, Some(PeerEvent::ChannelMessage("ping".into())));

        drop(a);
        assert_eq!(b_rx.recv().await, Some(PeerEvent::ChannelClosed));
        assert!(matches!(b.send("gone").await, Err(Error::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_candidate_before_remote_description_fails() {
        let network = MemoryNetwork::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let b = network.connect(Role::Responder, tx).await.unwrap();
        assert!(b.add_ice_candidate(candidate(1)).await.is_err());
        assert!(network.applied_candidates(1).is_empty());
    }

    #[tokio::test]
    async fn test_send_before_open_fails() {
        let network = MemoryNetwork::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let a = network.connect(Role::Initiator, tx).await.unwrap();
        assert!(matches!(a.send("early").await, Err(Error::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_rejected_remote_description() {
        let network = MemoryNetwork::new();
        let (a_tx, _a_rx) = mpsc::unbounded_channel();
        let (b_tx, _b_rx) = mpsc::unbounded_channel();
        let a = network.connect(Role::Initiator, a_tx).await.unwrap();
        let b = network.connect(Role::Responder, b_tx).await.unwrap();
        let offer = a.create_offer().await.unwrap();

        network.reject_remote_descriptions(true);
        assert!(b.set_remote_description(offer.clone()).await.is_err());
        network.reject_remote_descriptions(false);
        b.set_remote_description(offer).await.unwrap();
        b.add_ice_candidate(candidate(7)).await.unwrap();
        assert_eq!(network.applied_candidates(2), vec![candidate(7)]);
    }
}
