//! Peer connection setup: API construction, ICE servers and data channel
//! creation for either role.

use super::control::{attach_dc_handlers, attach_pc_handlers};
use super::{EventSink, RtcTransport};
use crate::core::config::{IceConfig, DATA_CHANNEL_LABEL};
use crate::core::connection::transport::{Connector, Transport, TransportEvents};
use crate::core::connection::types::Role;
use crate::core::signaling::PeerId;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::info;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;

/// Opens webrtc-rs peer connections, one per link.
pub struct RtcConnector {
    api: API,
    ice: IceConfig,
    low_water: usize,
}

impl RtcConnector {
    /// `low_water` is the buffered amount below which channels report
    /// [`TransportEvent::BufferedAmountLow`](crate::core::connection::types::TransportEvent).
    pub fn new(ice: &IceConfig, low_water: usize) -> Result<Self> {
        Ok(Self {
            api: create_webrtc_api(ice)?,
            ice: ice.clone(),
            low_water,
        })
    }

    fn ice_servers(&self) -> Vec<RTCIceServer> {
        self.ice
            .servers
            .iter()
            .map(|s| RTCIceServer {
                urls: s.urls.clone(),
                username: s.username.clone(),
                credential: s.credential.clone(),
            })
            .collect()
    }
}

fn create_webrtc_api(ice: &IceConfig) -> Result<API> {
    let mut me = MediaEngine::default();
    let reg = register_default_interceptors(Registry::new(), &mut me)?;

    let mut se = SettingEngine::default();
    se.set_include_loopback_candidate(ice.include_loopback);

    Ok(APIBuilder::new()
        .with_setting_engine(se)
        .with_media_engine(me)
        .with_interceptor_registry(reg)
        .build())
}

#[async_trait]
impl Connector for RtcConnector {
    async fn open(&self, peer: &PeerId, role: Role) -> Result<(Arc<dyn Transport>, TransportEvents)> {
        let pc = Arc::new(
            self.api
                .new_peer_connection(RTCConfiguration {
                    ice_servers: self.ice_servers(),
                    ..Default::default()
                })
                .await?,
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx);
        let channel: Arc<RwLock<Option<Arc<RTCDataChannel>>>> = Arc::new(RwLock::new(None));

        attach_pc_handlers(&pc, peer, sink.clone());

        match role {
            Role::Offerer => {
                // Ordered + fully reliable (SCTP default, no partial reliability).
                let init = RTCDataChannelInit {
                    ordered: Some(true),
                    ..Default::default()
                };
                let dc = pc.create_data_channel(DATA_CHANNEL_LABEL, Some(init)).await?;
                attach_dc_handlers(&dc, peer, sink.clone(), self.low_water).await;
                *channel.write().await = Some(dc);
            }
            Role::Answerer => {
                let channel = channel.clone();
                let sink = sink.clone();
                let peer = peer.clone();
                let low_water = self.low_water;
                pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                    let channel = channel.clone();
                    let sink = sink.clone();
                    let peer = peer.clone();
                    Box::pin(async move {
                        info!(event = "dc_received", peer = %peer, label = %dc.label());
                        *channel.write().await = Some(dc.clone());
                        attach_dc_handlers(&dc, &peer, sink, low_water).await;
                    })
                }));
            }
        }

        info!(event = "webrtc_opened", peer = %peer, role = %role);
        let transport = RtcTransport {
            peer: peer.clone(),
            pc,
            channel,
            sink,
        };
        Ok((Arc::new(transport) as Arc<dyn Transport>, rx))
    }
}
