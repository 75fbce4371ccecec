//! Native peer transport backed by the `webrtc` crate.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use super::{PeerConnection, PeerConnector, PeerEvent, PeerEventSender, CHAT_CHANNEL_LABEL};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::protocol::{IceCandidate, SdpKind, SessionDescription};
use crate::room::Role;

fn transport_error(err: webrtc::Error) -> Error {
    Error::TransportError(err.to_string())
}

/// Creates webrtc-rs peer connections.
#[derive(Debug, Clone)]
pub struct WebRtcConnector {
    ice_servers: Vec<String>,
}

impl WebRtcConnector {
    pub fn new(ice_servers: Vec<String>) -> Self {
        Self { ice_servers }
    }

    /// Connector using the ICE servers of a client configuration.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.ice_servers.clone())
    }

    async fn open(&self, role: Role, events: PeerEventSender) -> Result<WebRtcConnection> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(transport_error)?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(transport_error)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };
        let config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };
        let pc = Arc::new(api.new_peer_connection(config).await.map_err(transport_error)?);
        let channel: Arc<Mutex<Option<Arc<RTCDataChannel>>>> = Arc::new(Mutex::new(None));

        {
            let events = events.clone();
            pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let events = events.clone();
                Box::pin(async move {
                    let Some(candidate) = candidate else {
                        return;
                    };
                    match candidate.to_json() {
                        Ok(init) => {
                            let _ = events.send(PeerEvent::LocalCandidate(IceCandidate {
                                candidate: init.candidate,
                                sdp_mid: init.sdp_mid,
                                sdp_mline_index: init.sdp_mline_index,
                                username_fragment: init.username_fragment,
                            }));
                        }
                        Err(e) => tracing::warn!(error = %e, "Failed to serialize local candidate"),
                    }
                })
            }));
        }

        match role {
            Role::Initiator => {
                let dc = pc
                    .create_data_channel(CHAT_CHANNEL_LABEL, None)
                    .await
                    .map_err(transport_error)?;
                wire_channel(&dc, events);
                *channel.lock() = Some(dc);
            }
            Role::Responder => {
                let slot = channel.clone();
                pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                    let slot = slot.clone();
                    let events = events.clone();
                    Box::pin(async move {
                        if dc.label() != CHAT_CHANNEL_LABEL {
                            tracing::debug!(label = dc.label(), "Ignoring unexpected data channel");
                            return;
                        }
                        wire_channel(&dc, events);
                        *slot.lock() = Some(dc);
                    })
                }));
            }
        }

        Ok(WebRtcConnection { pc, channel })
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn connect(&self, role: Role, events: PeerEventSender) -> Result<Box<dyn PeerConnection>> {
        Ok(Box::new(self.open(role, events).await?))
    }
}

fn wire_channel(dc: &Arc<RTCDataChannel>, events: PeerEventSender) {
    {
        let events = events.clone();
        dc.on_open(Box::new(move || {
            let _ = events.send(PeerEvent::ChannelOpen);
            Box::pin(async {})
        }));
    }
    {
        let events = events.clone();
        dc.on_close(Box::new(move || {
            let _ = events.send(PeerEvent::ChannelClosed);
            Box::pin(async {})
        }));
    }
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        if !msg.is_string {
            tracing::debug!(bytes = msg.data.len(), "Ignoring binary data channel message");
        } else {
            match String::from_utf8(msg.data.to_vec()) {
                Ok(text) => {
                    let _ = events.send(PeerEvent::ChannelMessage(text));
                }
                Err(e) => tracing::warn!(error = %e, "Dropping non-UTF-8 data channel message"),
            }
        }
        Box::pin(async {})
    }));
}

/// One webrtc-rs peer connection and its chat channel.
pub struct WebRtcConnection {
    pc: Arc<RTCPeerConnection>,
    channel: Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
}

impl Drop for WebRtcConnection {
    fn drop(&mut self) {
        // The engine's ICE and SCTP tasks only stop on close.
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("Peer connection dropped outside a runtime, not closed");
            return;
        };
        let pc = self.pc.clone();
        runtime.spawn(async move {
            if let Err(e) = pc.close().await {
                tracing::debug!(error = %e, "Failed to close dropped peer connection");
            }
        });
    }
}

fn to_rtc(description: SessionDescription) -> Result<RTCSessionDescription> {
    let parsed = match description.kind {
        SdpKind::Offer => RTCSessionDescription::offer(description.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(description.sdp),
        SdpKind::Pranswer => RTCSessionDescription::pranswer(description.sdp),
        SdpKind::Rollback => {
            return Err(Error::TransportError("rollback descriptions are not supported".into()))
        }
    };
    parsed.map_err(transport_error)
}

fn from_rtc(description: RTCSessionDescription) -> Result<SessionDescription> {
    let kind = match description.sdp_type {
        RTCSdpType::Offer => SdpKind::Offer,
        RTCSdpType::Answer => SdpKind::Answer,
        RTCSdpType::Pranswer => SdpKind::Pranswer,
        RTCSdpType::Rollback => SdpKind::Rollback,
        RTCSdpType::Unspecified => {
            return Err(Error::TransportError("engine produced an unspecified description".into()))
        }
    };
    Ok(SessionDescription {
        kind,
        sdp: description.sdp,
    })
}

#[async_trait]
impl PeerConnection for WebRtcConnection {
    async fn create_offer(&self) -> Result<SessionDescription> {
        from_rtc(self.pc.create_offer(None).await.map_err(transport_error)?)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        from_rtc(self.pc.create_answer(None).await.map_err(transport_error)?)
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.pc
            .set_local_description(to_rtc(description)?)
            .await
            .map_err(transport_error)
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.pc
            .set_remote_description(to_rtc(description)?)
            .await
            .map_err(transport_error)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc.add_ice_candidate(init).await.map_err(transport_error)
    }

    async fn send(&self, text: &str) -> Result<()> {
        let dc = self.channel.lock().clone().ok_or(Error::ChannelClosed)?;
        dc.send_text(text.to_owned())
            .await
            .map(|_| ())
            .map_err(transport_error)
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            tracing::warn!(error = %e, "Failed to close peer connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

    #[test]
    fn test_description_conversion() {
        let ours = SessionDescription::offer("v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n");
        let rtc = to_rtc(ours.clone()).unwrap();
        assert_eq!(rtc.sdp_type, RTCSdpType::Offer);
        assert_eq!(from_rtc(rtc).unwrap(), ours);
    }

    #[tokio::test]
    async fn test_drop_closes_peer_connection() {
        let (events, _rx) = tokio::sync::mpsc::unbounded_channel();
        let connector = WebRtcConnector::from_config(&ClientConfig::default());
        let connection = connector.open(Role::Initiator, events).await.unwrap();
        let pc = connection.pc.clone();
        assert_ne!(pc.connection_state(), RTCPeerConnectionState::Closed);

        drop(connection);
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while pc.connection_state() != RTCPeerConnectionState::Closed {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[test]
    fn test_from_config_uses_client_ice_servers() {
        let config = ClientConfig {
            ice_servers: vec!["stun:stun.example.org:3478".into()],
            ..ClientConfig::default()
        };
        assert_eq!(
            WebRtcConnector::from_config(&config).ice_servers,
            vec!["stun:stun.example.org:3478".to_string()]
        );
    }

    #[test]
    fn test_rollback_is_rejected() {
        let rollback = SessionDescription {
            kind: SdpKind::Rollback,
            sdp: String::new(),
        };
        assert!(to_rtc(rollback).is_err());
    }
}
