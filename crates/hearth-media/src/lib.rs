//! # hearth-media
//!
//! Media capabilities used by the call controller.
//!
//! The controller only talks to the traits defined here:
//!
//! - [`MediaSource`] acquires the microphone and hands back a [`LocalAudio`]
//!   capture that must be stopped on hangup
//! - [`PeerLinkFactory`] opens a [`PeerLink`], the peer-to-peer audio
//!   connection negotiated through SDP offer/answer and ICE candidates
//! - [`tone::Chime`] plays the short notification tone
//!
//! Desktop implementations live in [`audio`] (cpal) and [`webrtc_peer`]
//! (webrtc-rs). Tests substitute their own.

pub mod audio;
pub mod codec;
pub mod signaling;
pub mod tone;
pub mod webrtc_peer;

use std::sync::Arc;

use async_trait::async_trait;
use hearth_shared::{IceCandidate, SessionDescription};
use thiserror::Error;
use tokio::sync::mpsc;

pub use signaling::IceLedger;
pub use tone::{Chime, SilentChime, ToneChime};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// The microphone could not be opened. Shown to the user.
    #[error("Microphone access denied: {0}")]
    AccessDenied(String),

    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Peer link error: {0}")]
    Link(String),
}

/// A block of mono samples in `[-1.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// A live microphone capture.
///
/// Frames arrive on the receiver returned by [`LocalAudio::take_frames`].
/// The capture is released by [`LocalAudio::stop`] or on drop.
pub struct LocalAudio {
    frames: Option<mpsc::Receiver<AudioFrame>>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl LocalAudio {
    pub fn new(frames: mpsc::Receiver<AudioFrame>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            frames: Some(frames),
            release: Some(Box::new(release)),
        }
    }

    /// Hand the frame stream to a consumer. Returns `None` once taken.
    pub fn take_frames(&mut self) -> Option<mpsc::Receiver<AudioFrame>> {
        self.frames.take()
    }

    pub fn stop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }

    pub fn is_live(&self) -> bool {
        self.release.is_some()
    }
}

impl Drop for LocalAudio {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for LocalAudio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalAudio")
            .field("live", &self.is_live())
            .finish()
    }
}

/// Connectivity of a peer link, mirroring the WebRTC connection states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl LinkState {
    /// States after which the call cannot recover.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LinkState::Disconnected | LinkState::Failed | LinkState::Closed
        )
    }
}

/// Something the link reports on its own schedule.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// A local ICE candidate that the remote side needs.
    LocalCandidate(IceCandidate),
    StateChanged(LinkState),
}

#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire_audio(&self) -> Result<LocalAudio, MediaError>;
}

#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Create an offer and install it as the local description.
    async fn create_offer(&self) -> Result<SessionDescription, MediaError>;

    /// Create an answer to the applied remote offer and install it locally.
    async fn create_answer(&self) -> Result<SessionDescription, MediaError>;

    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<(), MediaError>;

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), MediaError>;

    async fn close(&self) -> Result<(), MediaError>;
}

#[async_trait]
pub trait PeerLinkFactory: Send + Sync {
    /// Open a link sending `audio`. Candidates and state changes are
    /// reported on `events` until the link closes.
    async fn open(
        &self,
        audio: &mut LocalAudio,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Arc<dyn PeerLink>, MediaError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn local_audio_releases_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let (_tx, rx) = mpsc::channel(1);

        let mut audio = LocalAudio::new(rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(audio.is_live());
        assert!(audio.take_frames().is_some());
        assert!(audio.take_frames().is_none());

        audio.stop();
        assert!(!audio.is_live());
        drop(audio);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn terminal_link_states() {
        assert!(LinkState::Failed.is_terminal());
        assert!(LinkState::Disconnected.is_terminal());
        assert!(!LinkState::Connecting.is_terminal());
        assert!(!LinkState::Connected.is_terminal());
    }
}
