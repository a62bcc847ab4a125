//! One-to-one voice calls.
//!
//! [`CallController`] owns the local side of at most one call and drives it
//! through `Idle -> Calling/Ringing -> Connected -> Idle`. Signaling goes
//! through a [`CallSignaling`] store that both parties poll; media goes
//! through the [`MediaSource`] and [`PeerLinkFactory`] capabilities.
//!
//! Every attempt gets an epoch. Background tasks and slow setup steps check
//! it before writing state, so results from an abandoned attempt are dropped
//! instead of clobbering the next one.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use hearth_media::{
    Chime, IceLedger, LinkEvent, LinkState, LocalAudio, MediaError, MediaSource, PeerLink,
    PeerLinkFactory,
};
use hearth_shared::constants::{INCOMING_CALL_POLL_INTERVAL, SESSION_POLL_INTERVAL};
use hearth_shared::{CallId, CallSession, SessionDescription, UserId, ValidationError};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::ClientError;
use crate::ports::CallSignaling;
use crate::schedule::{spawn_poll, Liveness, PollHandle, Tick};

#[derive(Error, Debug)]
pub enum CallError {
    #[error("Already in a call")]
    Busy,

    #[error("No incoming call to answer")]
    NotRinging,

    #[error(transparent)]
    Media(MediaError),

    #[error("Signaling failed: {0}")]
    Signaling(#[from] ClientError),

    #[error("Call setup failed: {0}")]
    Link(MediaError),

    #[error("Call attempt was cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallPhase {
    #[default]
    Idle,
    Calling,
    Ringing,
    Connected,
}

/// What the UI shows about the current call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CallSnapshot {
    pub phase: CallPhase,
    pub call_id: Option<CallId>,
    pub peer: Option<UserId>,
    /// Caller side only: the callee has not answered yet.
    pub awaiting_answer: bool,
}

#[derive(Debug, Clone)]
pub struct CallTiming {
    pub incoming_poll: Duration,
    pub session_poll: Duration,
}

impl Default for CallTiming {
    fn default() -> Self {
        Self {
            incoming_poll: INCOMING_CALL_POLL_INTERVAL,
            session_poll: SESSION_POLL_INTERVAL,
        }
    }
}

#[derive(Default)]
struct CallSlot {
    epoch: u64,
    phase: CallPhase,
    call_id: Option<CallId>,
    peer: Option<UserId>,
    /// The stored offer while ringing.
    offer: Option<SessionDescription>,
    /// Ringing, and this side is submitting its answer.
    answering: bool,
    awaiting_answer: bool,
    audio: Option<LocalAudio>,
    link: Option<Arc<dyn PeerLink>>,
    ledger: IceLedger,
    tasks: Vec<JoinHandle<()>>,
}

impl CallSlot {
    fn snapshot(&self) -> CallSnapshot {
        CallSnapshot {
            phase: self.phase,
            call_id: self.call_id,
            peer: self.peer.clone(),
            awaiting_answer: self.awaiting_answer,
        }
    }
}

struct Inner {
    me: UserId,
    signaling: Arc<dyn CallSignaling>,
    media: Arc<dyn MediaSource>,
    links: Arc<dyn PeerLinkFactory>,
    chime: Arc<dyn Chime>,
    timing: CallTiming,
    slot: Mutex<CallSlot>,
    state: watch::Sender<CallSnapshot>,
}

/// Resources released after a call leaves its slot. Runs outside the lock.
struct Teardown {
    signaling: Arc<dyn CallSignaling>,
    call_id: Option<CallId>,
    link: Option<Arc<dyn PeerLink>>,
}

impl Teardown {
    /// The session is already gone on the server; skip the DELETE.
    fn session_gone(mut self) -> Self {
        self.call_id = None;
        self
    }

    async fn finish(self) {
        if let Some(link) = self.link {
            if let Err(e) = link.close().await {
                debug!(error = %e, "Peer link close failed");
            }
        }

        if let Some(id) = self.call_id {
            match self.signaling.terminate(id).await {
                Ok(()) => debug!(call = %id, "Call session terminated"),
                Err(e) if e.is_not_found() => debug!(call = %id, "Call session already gone"),
                Err(e) => warn!(call = %id, error = %e, "Failed to terminate call session"),
            }
        }
    }
}

#[derive(Clone)]
pub struct CallController {
    inner: Arc<Inner>,
}

impl CallController {
    pub fn new(
        me: UserId,
        signaling: Arc<dyn CallSignaling>,
        media: Arc<dyn MediaSource>,
        links: Arc<dyn PeerLinkFactory>,
        chime: Arc<dyn Chime>,
        timing: CallTiming,
    ) -> Self {
        let (state, _) = watch::channel(CallSnapshot::default());
        Self {
            inner: Arc::new(Inner {
                me,
                signaling,
                media,
                links,
                chime,
                timing,
                slot: Mutex::new(CallSlot::default()),
                state,
            }),
        }
    }

    pub fn snapshot(&self) -> CallSnapshot {
        self.slot().snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<CallSnapshot> {
        self.inner.state.subscribe()
    }

    fn slot(&self) -> MutexGuard<'_, CallSlot> {
        self.inner.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, slot: &CallSlot) {
        self.inner.state.send_replace(slot.snapshot());
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.slot().epoch == epoch
    }

    /// Reset the slot to idle and hand back what still needs releasing.
    /// With `Some(epoch)`, only an attempt of that epoch is torn down.
    /// Local audio is stopped immediately.
    fn detach(&self, epoch: Option<u64>) -> Option<Teardown> {
        let mut slot = self.slot();
        if epoch.is_some_and(|e| e != slot.epoch) || slot.phase == CallPhase::Idle {
            return None;
        }

        let mut old = std::mem::take(&mut *slot);
        slot.epoch = old.epoch + 1;
        self.publish(&slot);
        drop(slot);

        for task in old.tasks.drain(..) {
            task.abort();
        }
        if let Some(mut audio) = old.audio.take() {
            audio.stop();
        }

        Some(Teardown {
            signaling: self.inner.signaling.clone(),
            call_id: old.call_id,
            link: old.link.take(),
        })
    }

    /// Release work for resources that never made it into the slot.
    fn orphaned(&self, call_id: Option<CallId>, link: Option<Arc<dyn PeerLink>>) -> Teardown {
        Teardown {
            signaling: self.inner.signaling.clone(),
            call_id,
            link,
        }
    }

    /// Tear down from a background task, which may be one of the tasks
    /// being aborted, so the release work runs on its own task.
    fn detach_in_background(&self, epoch: u64, session_gone: bool) {
        if let Some(teardown) = self.detach(Some(epoch)) {
            let teardown = if session_gone {
                teardown.session_gone()
            } else {
                teardown
            };
            tokio::spawn(teardown.finish());
        }
    }

    /// Hang up whatever call is active. No-op when idle.
    pub async fn hangup(&self) {
        if let Some(teardown) = self.detach(None) {
            info!("Hanging up");
            teardown.finish().await;
        }
    }

    // ─── Incoming calls ───

    /// One incoming-call poll.
    ///
    /// While idle, a waiting call moves this side to `Ringing` and plays the
    /// chime. While ringing, a call withdrawn by the caller (or picked up
    /// elsewhere) returns this side to `Idle`.
    pub async fn poll_incoming(&self) -> Result<(), ClientError> {
        let (phase, epoch, ringing) = {
            let slot = self.slot();
            (slot.phase, slot.epoch, slot.call_id)
        };

        match (phase, ringing) {
            (CallPhase::Idle, _) => {
                let Some(session) = self.inner.signaling.fetch_incoming(&self.inner.me).await?
                else {
                    return Ok(());
                };

                let mut slot = self.slot();
                if slot.epoch != epoch || slot.phase != CallPhase::Idle {
                    return Ok(());
                }
                slot.phase = CallPhase::Ringing;
                slot.call_id = Some(session.id);
                slot.peer = Some(session.peer_of(&self.inner.me).clone());
                slot.offer = Some(session.offer);
                self.publish(&slot);
                drop(slot);

                info!(call = %session.id, from = %session.from, "Incoming call");
                self.inner.chime.play();
            }
            (CallPhase::Ringing, Some(id)) => match self.inner.signaling.get(id).await {
                Err(e) if e.is_not_found() => {
                    info!(call = %id, "Caller hung up before answer");
                    if let Some(teardown) = self.detach(Some(epoch)) {
                        teardown.session_gone().finish().await;
                    }
                }
                Ok(session) if session.is_answered() && self.ringing_unanswered(epoch) => {
                    info!(call = %id, "Call answered elsewhere");
                    if let Some(teardown) = self.detach(Some(epoch)) {
                        teardown.session_gone().finish().await;
                    }
                }
                Ok(_) => {}
                Err(e) => return Err(e),
            },
            _ => {}
        }

        Ok(())
    }

    /// Still ringing for this attempt and not being answered from here.
    fn ringing_unanswered(&self, epoch: u64) -> bool {
        let slot = self.slot();
        slot.epoch == epoch && slot.phase == CallPhase::Ringing && !slot.answering
    }

    /// Poll for incoming calls every `timing.incoming_poll`.
    pub fn watch_incoming(&self) -> PollHandle {
        spawn_poll(
            self.inner.timing.incoming_poll,
            Liveness::new(),
            IncomingWatch {
                controller: self.clone(),
            },
        )
    }

    /// Refuse the ringing call. Media is never touched.
    pub async fn decline(&self) -> Result<(), CallError> {
        let epoch = {
            let slot = self.slot();
            if slot.phase != CallPhase::Ringing {
                return Err(CallError::NotRinging);
            }
            slot.epoch
        };

        if let Some(teardown) = self.detach(Some(epoch)) {
            info!("Declining call");
            teardown.finish().await;
        }
        Ok(())
    }

    /// Answer the ringing call.
    pub async fn accept(&self) -> Result<(), CallError> {
        let (epoch, call_id, offer) = {
            let mut slot = self.slot();
            if slot.answering {
                return Err(CallError::NotRinging);
            }
            match (slot.phase, slot.call_id, slot.offer.clone()) {
                (CallPhase::Ringing, Some(id), Some(offer)) => {
                    // From here on an answered session is ours.
                    slot.answering = true;
                    (slot.epoch, id, offer)
                }
                _ => return Err(CallError::NotRinging),
            }
        };

        match self.setup_answer(epoch, call_id, &offer).await {
            Ok(()) => {
                info!(call = %call_id, "Call accepted");
                Ok(())
            }
            Err(e) => {
                warn!(call = %call_id, error = %e, "Accepting call failed");
                if let Some(teardown) = self.detach(Some(epoch)) {
                    teardown.finish().await;
                }
                Err(e)
            }
        }
    }

    async fn setup_answer(
        &self,
        epoch: u64,
        call_id: CallId,
        offer: &SessionDescription,
    ) -> Result<(), CallError> {
        let (link, events) = self.open_media(epoch).await?;

        link.set_remote_description(offer)
            .await
            .map_err(CallError::Link)?;
        let answer = link.create_answer().await.map_err(CallError::Link)?;
        self.inner.signaling.submit_answer(call_id, &answer).await?;

        let mut slot = self.slot();
        if slot.epoch != epoch {
            return Err(CallError::Cancelled);
        }
        slot.phase = CallPhase::Connected;
        slot.offer = None;
        slot.answering = false;
        self.start_call_tasks(&mut slot, epoch, call_id, events);
        self.publish(&slot);
        Ok(())
    }

    // ─── Outgoing calls ───

    /// Call `peer`. Returns once the offer is stored; the answer is picked
    /// up in the background.
    pub async fn call(&self, peer: UserId) -> Result<CallId, CallError> {
        if peer == self.inner.me {
            return Err(ClientError::from(ValidationError::SelfTarget("call")).into());
        }

        let epoch = {
            let mut slot = self.slot();
            if slot.phase != CallPhase::Idle {
                return Err(CallError::Busy);
            }
            slot.phase = CallPhase::Calling;
            slot.peer = Some(peer.clone());
            slot.awaiting_answer = true;
            self.publish(&slot);
            slot.epoch
        };

        match self.setup_offer(epoch, &peer).await {
            Ok(id) => {
                info!(call = %id, peer = %peer, "Call initiated");
                Ok(id)
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "Call setup failed");
                if let Some(teardown) = self.detach(Some(epoch)) {
                    teardown.finish().await;
                }
                Err(e)
            }
        }
    }

    async fn setup_offer(&self, epoch: u64, peer: &UserId) -> Result<CallId, CallError> {
        let (link, events) = self.open_media(epoch).await?;

        let offer = link.create_offer().await.map_err(CallError::Link)?;
        let session = self
            .inner
            .signaling
            .initiate(&self.inner.me, peer, &offer)
            .await?;

        let installed = {
            let mut slot = self.slot();
            if slot.epoch == epoch {
                slot.call_id = Some(session.id);
                self.start_call_tasks(&mut slot, epoch, session.id, events);
                self.publish(&slot);
                true
            } else {
                false
            }
        };

        if !installed {
            // Hung up while the offer was in flight. The session would
            // otherwise block later calls to this callee.
            self.orphaned(Some(session.id), None).finish().await;
            return Err(CallError::Cancelled);
        }
        Ok(session.id)
    }

    /// Acquire the microphone and open a link, parking both in the slot so
    /// a hangup from here on releases them.
    async fn open_media(
        &self,
        epoch: u64,
    ) -> Result<(Arc<dyn PeerLink>, mpsc::UnboundedReceiver<LinkEvent>), CallError> {
        let mut audio = self
            .inner
            .media
            .acquire_audio()
            .await
            .map_err(CallError::Media)?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let link = match self.inner.links.open(&mut audio, events_tx).await {
            Ok(link) => link,
            Err(e) => {
                audio.stop();
                return Err(CallError::Link(e));
            }
        };

        let leftover = {
            let mut slot = self.slot();
            if slot.epoch == epoch {
                slot.audio = Some(audio);
                slot.link = Some(link.clone());
                None
            } else {
                Some(audio)
            }
        };

        if let Some(mut audio) = leftover {
            audio.stop();
            self.orphaned(None, Some(link)).finish().await;
            return Err(CallError::Cancelled);
        }
        Ok((link, events_rx))
    }

    fn start_call_tasks(
        &self,
        slot: &mut CallSlot,
        epoch: u64,
        call_id: CallId,
        events: mpsc::UnboundedReceiver<LinkEvent>,
    ) {
        let pump = tokio::spawn(self.clone().pump_link_events(epoch, call_id, events));
        let watcher = tokio::spawn(self.clone().watch_session(epoch, call_id));
        slot.tasks.extend([pump, watcher]);
    }

    /// Post local candidates and follow connectivity changes.
    async fn pump_link_events(
        self,
        epoch: u64,
        call_id: CallId,
        mut events: mpsc::UnboundedReceiver<LinkEvent>,
    ) {
        while let Some(event) = events.recv().await {
            match event {
                LinkEvent::LocalCandidate(candidate) => {
                    {
                        let mut slot = self.slot();
                        if slot.epoch != epoch {
                            break;
                        }
                        slot.ledger.record_local(&candidate);
                    }
                    if let Err(e) = self.inner.signaling.add_ice(call_id, &candidate).await {
                        warn!(call = %call_id, error = %e, "Failed to post ICE candidate");
                    }
                }
                LinkEvent::StateChanged(LinkState::Connected) => {
                    let mut slot = self.slot();
                    if slot.epoch != epoch {
                        break;
                    }
                    if slot.phase != CallPhase::Connected {
                        slot.phase = CallPhase::Connected;
                        self.publish(&slot);
                        info!(call = %call_id, "Call connected");
                    }
                }
                LinkEvent::StateChanged(state) if state.is_terminal() => {
                    info!(call = %call_id, ?state, "Peer link lost, hanging up");
                    self.detach_in_background(epoch, false);
                    break;
                }
                LinkEvent::StateChanged(state) => {
                    debug!(call = %call_id, ?state, "Peer link state");
                }
            }
        }
    }

    /// Poll the session: apply the answer once (caller side), then apply
    /// remote ICE candidates as they appear. A vanished session means the
    /// other side hung up.
    async fn watch_session(self, epoch: u64, call_id: CallId) {
        let mut interval = tokio::time::interval(self.inner.timing.session_poll);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if !self.is_current(epoch) {
                break;
            }

            match self.inner.signaling.get(call_id).await {
                Ok(session) => {
                    if let Err(e) = self.apply_session(epoch, &session).await {
                        warn!(call = %call_id, error = %e, "Applying answer failed, hanging up");
                        self.detach_in_background(epoch, false);
                        break;
                    }
                }
                Err(e) if e.is_not_found() => {
                    info!(call = %call_id, "Call ended by peer");
                    self.detach_in_background(epoch, true);
                    break;
                }
                Err(e) => warn!(call = %call_id, error = %e, "Session poll failed"),
            }
        }
    }

    async fn apply_session(&self, epoch: u64, session: &CallSession) -> Result<(), MediaError> {
        let (link, awaiting_answer) = {
            let slot = self.slot();
            if slot.epoch != epoch {
                return Ok(());
            }
            match &slot.link {
                Some(link) => (link.clone(), slot.awaiting_answer),
                None => return Ok(()),
            }
        };

        if awaiting_answer {
            // Candidates only make sense once the remote description is set.
            let Some(answer) = &session.answer else {
                return Ok(());
            };
            link.set_remote_description(answer).await?;

            let mut slot = self.slot();
            if slot.epoch != epoch {
                return Ok(());
            }
            slot.awaiting_answer = false;
            self.publish(&slot);
            info!(call = %session.id, "Answer received");
        }

        let fresh = {
            let mut slot = self.slot();
            if slot.epoch != epoch {
                return Ok(());
            }
            slot.ledger.fresh(&session.ice_candidates)
        };

        for candidate in fresh {
            if let Err(e) = link.add_ice_candidate(&candidate).await {
                debug!(error = %e, "Ignoring ICE candidate that failed to apply");
            }
        }
        Ok(())
    }
}

struct IncomingWatch {
    controller: CallController,
}

#[async_trait]
impl Tick for IncomingWatch {
    fn name(&self) -> &'static str {
        "incoming-call"
    }

    async fn tick(&mut self) -> Result<(), ClientError> {
        self.controller.poll_incoming().await
    }
}
