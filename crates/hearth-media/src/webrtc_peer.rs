use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use hearth_shared::constants::STUN_SERVERS;
use hearth_shared::{IceCandidate, SdpType, SessionDescription};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_PCMU};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::audio::{Speaker, FRAME_MS};
use crate::codec::{decode_pcmu, encode_pcmu, resample, PCMU_CLOCK_RATE};
use crate::{AudioFrame, LinkEvent, LinkState, LocalAudio, MediaError, PeerLink, PeerLinkFactory};

fn link_err(e: webrtc::Error) -> MediaError {
    MediaError::Link(e.to_string())
}

fn pcmu_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_PCMU.to_owned(),
        clock_rate: PCMU_CLOCK_RATE,
        channels: 1,
        sdp_fmtp_line: String::new(),
        rtcp_feedback: vec![],
    }
}

/// Opens webrtc-rs peer connections carrying one PCMU audio track each way.
#[derive(Debug, Clone)]
pub struct WebRtcLinkFactory {
    ice_servers: Vec<String>,
    play_remote: bool,
}

impl Default for WebRtcLinkFactory {
    fn default() -> Self {
        Self {
            ice_servers: STUN_SERVERS.iter().map(|s| s.to_string()).collect(),
            play_remote: true,
        }
    }
}

impl WebRtcLinkFactory {
    pub fn new(ice_servers: Vec<String>) -> Self {
        Self {
            ice_servers,
            ..Self::default()
        }
    }

    /// Skip remote playback (useful on machines without an output device).
    pub fn without_playback(mut self) -> Self {
        self.play_remote = false;
        self
    }

    async fn peer_connection(&self) -> Result<RTCPeerConnection, MediaError> {
        let mut media_engine = MediaEngine::default();
        // PCMU only, so both sides always agree on a codec we can encode.
        media_engine
            .register_codec(
                RTCRtpCodecParameters {
                    capability: pcmu_capability(),
                    payload_type: 0,
                    ..Default::default()
                },
                RTPCodecType::Audio,
            )
            .map_err(link_err)?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(link_err)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };

        api.new_peer_connection(config).await.map_err(link_err)
    }
}

#[async_trait]
impl PeerLinkFactory for WebRtcLinkFactory {
    async fn open(
        &self,
        audio: &mut LocalAudio,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Arc<dyn PeerLink>, MediaError> {
        let pc = Arc::new(self.peer_connection().await?);

        let track = Arc::new(TrackLocalStaticSample::new(
            pcmu_capability(),
            "audio".to_owned(),
            "hearth".to_owned(),
        ));
        let sender = pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(link_err)?;

        // RTCP has to be read for the interceptors to run.
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });

        if let Some(frames) = audio.take_frames() {
            tokio::spawn(send_local_audio(frames, track));
        }

        let candidate_tx = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let tx = candidate_tx.clone();
            Box::pin(async move {
                // `None` marks the end of gathering.
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = tx.send(LinkEvent::LocalCandidate(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        }));
                    }
                    Err(e) => warn!(error = %e, "Failed to serialize local ICE candidate"),
                }
            })
        }));

        let state_tx = events;
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let mapped = match state {
                RTCPeerConnectionState::New | RTCPeerConnectionState::Unspecified => LinkState::New,
                RTCPeerConnectionState::Connecting => LinkState::Connecting,
                RTCPeerConnectionState::Connected => LinkState::Connected,
                RTCPeerConnectionState::Disconnected => LinkState::Disconnected,
                RTCPeerConnectionState::Failed => LinkState::Failed,
                RTCPeerConnectionState::Closed => LinkState::Closed,
            };
            debug!(state = ?mapped, "Peer connection state changed");
            let _ = state_tx.send(LinkEvent::StateChanged(mapped));
            Box::pin(async {})
        }));

        let play_remote = self.play_remote;
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
            Box::pin(async move {
                if play_remote {
                    tokio::spawn(play_remote_audio(track));
                }
            })
        }));

        info!("Peer link opened");
        Ok(Arc::new(WebRtcLink { pc }))
    }
}

async fn send_local_audio(mut frames: mpsc::Receiver<AudioFrame>, track: Arc<TrackLocalStaticSample>) {
    let duration = Duration::from_millis(u64::from(FRAME_MS));
    while let Some(frame) = frames.recv().await {
        let pcm = resample(&frame.samples, frame.sample_rate, PCMU_CLOCK_RATE);
        let sample = Sample {
            data: Bytes::from(encode_pcmu(&pcm)),
            duration,
            ..Default::default()
        };
        if let Err(e) = track.write_sample(&sample).await {
            debug!(error = %e, "Local audio track closed");
            break;
        }
    }
}

async fn play_remote_audio(track: Arc<TrackRemote>) {
    let speaker = match Speaker::spawn() {
        Ok(speaker) => speaker,
        Err(e) => {
            warn!(error = %e, "Cannot play remote audio");
            return;
        }
    };
    let output = speaker.sender();

    info!("Remote audio track started");
    while let Ok((packet, _)) = track.read_rtp().await {
        let frame = AudioFrame {
            samples: decode_pcmu(&packet.payload),
            sample_rate: PCMU_CLOCK_RATE,
        };
        if output.send(frame).is_err() {
            break;
        }
    }
    debug!("Remote audio track ended");
}

pub struct WebRtcLink {
    pc: Arc<RTCPeerConnection>,
}

impl WebRtcLink {
    fn to_rtc(desc: &SessionDescription) -> Result<RTCSessionDescription, MediaError> {
        match desc.kind {
            SdpType::Offer => RTCSessionDescription::offer(desc.sdp.clone()),
            SdpType::Answer => RTCSessionDescription::answer(desc.sdp.clone()),
        }
        .map_err(link_err)
    }
}

#[async_trait]
impl PeerLink for WebRtcLink {
    async fn create_offer(&self) -> Result<SessionDescription, MediaError> {
        let offer = self.pc.create_offer(None).await.map_err(link_err)?;
        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(link_err)?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, MediaError> {
        let answer = self.pc.create_answer(None).await.map_err(link_err)?;
        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(link_err)?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<(), MediaError> {
        let desc = Self::to_rtc(desc)?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(link_err)
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), MediaError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate.clone(),
            sdp_mid: candidate.sdp_mid.clone(),
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment.clone(),
        };
        self.pc.add_ice_candidate(init).await.map_err(link_err)
    }

    async fn close(&self) -> Result<(), MediaError> {
        self.pc.close().await.map_err(link_err)?;
        info!("Peer link closed");
        Ok(())
    }
}
