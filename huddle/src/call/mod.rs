//! Group call coordination.
//!
//! One call at a time: the coordinator runs a small state machine
//! (idle, requesting, conflict, active, ending) and serializes every
//! mutation behind an operation lock, so a double-click or a race with
//! the participant poll cannot produce two competing transitions.
//!
//! Teardown is deliberately forgiving: a call that is already gone on
//! the server counts as successfully ended, and local cleanup (media
//! release, state reset) happens no matter what the server said.

pub mod api;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use huddle_proto::call::{CallInfo, CallType, Participant};
use huddle_proto::event::ServerEvent;
use huddle_proto::ids::ConversationId;

use crate::config::CallConfig;
use crate::media::{MediaController, MediaDevices, MediaError};
use crate::session::SessionContext;
use api::{ApiError, CallApi};

/// A start request parked while a conflict is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingStart {
    /// Conversation the user tried to call in.
    pub conversation: ConversationId,
    /// Requested call type.
    pub call_type: CallType,
}

/// The call the local user is currently in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveCall {
    /// Server-side call description.
    pub info: CallInfo,
    /// Latest known participant list.
    pub participants: Vec<Participant>,
}

/// Phase of the call state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallPhase {
    /// Not in a call.
    Idle,
    /// A start or join request is in flight.
    Requesting,
    /// Starting failed because the conversation already has a call;
    /// waiting for the user to pick a resolution.
    Conflict {
        /// The call that is already active.
        existing: CallInfo,
        /// The start request that hit the conflict.
        pending: PendingStart,
    },
    /// In a call.
    Active(ActiveCall),
    /// Teardown in progress.
    Ending,
}

/// How the user wants to resolve a start conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictAction {
    /// Join the existing call instead.
    Join,
    /// End the existing call, then retry the original start.
    EndAndRetry,
    /// Force-clear the conversation's call state, then retry. Admin
    /// only.
    ForceCleanupAndRetry,
    /// Abandon the start request.
    Cancel,
}

/// Events emitted for the presentation layer.
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// The state machine moved to a new phase.
    PhaseChanged(CallPhase),
    /// The active call's participant list changed.
    ParticipantsUpdated(Vec<Participant>),
    /// Someone else started a call the local user can join.
    IncomingCall(CallInfo),
    /// The incoming call offer is no longer available.
    IncomingCallCleared,
    /// The call was entered with less media than requested.
    MediaDegraded {
        /// Camera could not be acquired.
        video_lost: bool,
        /// Microphone could not be acquired either.
        audio_lost: bool,
    },
}

/// Errors from call operations.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// A call or call operation is already in progress.
    #[error("a call operation is already in progress")]
    Busy,

    /// There is no conflict to resolve.
    #[error("no call conflict to resolve")]
    NoConflict,

    /// The local user may not perform this operation.
    #[error("operation requires the caller or an admin")]
    PermissionDenied,

    /// There is no incoming call offer.
    #[error("no incoming call offer")]
    NoIncomingCall,

    /// Signaling failure.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Local media failure.
    #[error(transparent)]
    Media(#[from] MediaError),
}

/// Coordinates the local user's participation in group calls.
pub struct CallCoordinator<A: CallApi, D: MediaDevices> {
    api: A,
    media: MediaController<D>,
    session: SessionContext,
    poll_interval: Duration,
    /// Serializes every state mutation. Held across awaits on purpose.
    op: tokio::sync::Mutex<()>,
    phase: parking_lot::Mutex<CallPhase>,
    incoming: parking_lot::Mutex<Option<CallInfo>>,
    events_tx: mpsc::Sender<CallEvent>,
    poll_task: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl<A: CallApi, D: MediaDevices> CallCoordinator<A, D> {
    /// Creates a coordinator and the receiver for its events.
    pub fn new(
        api: A,
        media: MediaController<D>,
        session: SessionContext,
        config: &CallConfig,
    ) -> (Arc<Self>, mpsc::Receiver<CallEvent>) {
        let (events_tx, events_rx) = mpsc::channel(config.event_buffer);
        (
            Arc::new(Self {
                api,
                media,
                session,
                poll_interval: config.participant_poll_interval,
                op: tokio::sync::Mutex::new(()),
                phase: parking_lot::Mutex::new(CallPhase::Idle),
                incoming: parking_lot::Mutex::new(None),
                events_tx,
                poll_task: parking_lot::Mutex::new(None),
            }),
            events_rx,
        )
    }

    /// Current phase snapshot.
    #[must_use]
    pub fn phase(&self) -> CallPhase {
        self.phase.lock().clone()
    }

    /// Current incoming call offer, if any.
    #[must_use]
    pub fn incoming_call(&self) -> Option<CallInfo> {
        self.incoming.lock().clone()
    }

    /// Starts a call in a conversation.
    ///
    /// On a conflict this returns `Ok` with the phase set to
    /// [`CallPhase::Conflict`]; the caller resolves it via
    /// [`resolve_conflict`](Self::resolve_conflict).
    ///
    /// # Errors
    ///
    /// [`CallError::Busy`] unless idle; signaling errors otherwise (the
    /// phase returns to idle on those).
    pub async fn start(
        self: &Arc<Self>,
        conversation: ConversationId,
        call_type: CallType,
    ) -> Result<(), CallError> {
        let _op = self.op.lock().await;
        if !matches!(*self.phase.lock(), CallPhase::Idle) {
            return Err(CallError::Busy);
        }
        self.set_phase(CallPhase::Requesting);
        let pending = PendingStart {
            conversation,
            call_type,
        };
        self.create_and_enter(pending).await
    }

    /// Resolves a pending start conflict.
    ///
    /// [`ConflictAction::EndAndRetry`] is allowed for the conflicting
    /// call's own caller as well as admins, mirroring [`end`](Self::end);
    /// [`ConflictAction::ForceCleanupAndRetry`] is admin-only.
    ///
    /// # Errors
    ///
    /// [`CallError::NoConflict`] outside the conflict phase;
    /// [`CallError::PermissionDenied`] when the action needs rights the
    /// local user lacks (the conflict stays pending); signaling errors
    /// otherwise.
    pub async fn resolve_conflict(
        self: &Arc<Self>,
        action: ConflictAction,
    ) -> Result<(), CallError> {
        let _op = self.op.lock().await;
        let (existing, pending) = {
            let phase = self.phase.lock();
            let CallPhase::Conflict { existing, pending } = &*phase else {
                return Err(CallError::NoConflict);
            };
            (existing.clone(), pending.clone())
        };

        match action {
            ConflictAction::Cancel => {
                self.set_phase(CallPhase::Idle);
                Ok(())
            }
            ConflictAction::Join => {
                self.set_phase(CallPhase::Requesting);
                match self.api.join_call(&existing.call_id).await {
                    Ok(info) => {
                        let call_type = info.call_type;
                        self.enter_active(info, call_type).await;
                        Ok(())
                    }
                    Err(ApiError::Gone) => {
                        // The conflicting call evaporated between the
                        // conflict report and the join. Reset hard; the
                        // user can start fresh.
                        tracing::info!("conflicting call disappeared before join");
                        self.set_phase(CallPhase::Idle);
                        Err(CallError::Api(ApiError::Gone))
                    }
                    Err(e) => {
                        self.set_phase(CallPhase::Idle);
                        Err(e.into())
                    }
                }
            }
            ConflictAction::EndAndRetry => {
                let is_own = existing.caller == self.session.user_id;
                if !is_own && !self.session.is_privileged() {
                    tracing::warn!(call_id = %existing.call_id, "end-and-retry refused: not caller or admin");
                    return Err(CallError::PermissionDenied);
                }
                self.set_phase(CallPhase::Requesting);
                match self.api.end_call(&existing.call_id).await {
                    Ok(()) | Err(ApiError::Gone) => {}
                    Err(e) => {
                        self.set_phase(CallPhase::Idle);
                        return Err(e.into());
                    }
                }
                self.create_and_enter(pending).await
            }
            ConflictAction::ForceCleanupAndRetry => {
                if !self.session.is_privileged() {
                    tracing::warn!("force cleanup refused: not an admin");
                    return Err(CallError::PermissionDenied);
                }
                self.set_phase(CallPhase::Requesting);
                match self.api.force_cleanup(&pending.conversation).await {
                    Ok(()) | Err(ApiError::Gone) => {}
                    Err(e) => {
                        self.set_phase(CallPhase::Idle);
                        return Err(e.into());
                    }
                }
                self.create_and_enter(pending).await
            }
        }
    }

    /// Leaves the active call.
    ///
    /// Local teardown always completes, whatever the server says; a
    /// call that is already gone counts as left. A no-op outside a
    /// call.
    pub async fn leave(self: &Arc<Self>) {
        let _op = self.op.lock().await;
        let Some(active) = self.take_active() else {
            return;
        };
        self.set_phase(CallPhase::Ending);
        match self.api.leave_call(&active.info.call_id).await {
            Ok(()) | Err(ApiError::Gone) => {}
            Err(e) => {
                tracing::warn!(err = %e, call_id = %active.info.call_id, "leave request failed, tearing down locally");
            }
        }
        self.teardown_local().await;
    }

    /// Ends the active call for everyone.
    ///
    /// # Errors
    ///
    /// [`CallError::PermissionDenied`] when the local user is neither
    /// the caller nor an admin — checked before anything is torn down.
    /// Server-side failures other than the call already being gone are
    /// logged but still end the call locally.
    pub async fn end(self: &Arc<Self>) -> Result<(), CallError> {
        let _op = self.op.lock().await;
        let active = {
            let phase = self.phase.lock();
            let CallPhase::Active(active) = &*phase else {
                return Ok(());
            };
            active.clone()
        };
        let is_own = active.info.caller == self.session.user_id;
        if !is_own && !self.session.is_privileged() {
            tracing::warn!(call_id = %active.info.call_id, "end refused: not caller or admin");
            return Err(CallError::PermissionDenied);
        }

        self.set_phase(CallPhase::Ending);
        match self.api.end_call(&active.info.call_id).await {
            Ok(()) | Err(ApiError::Gone) => {}
            Err(e) => {
                tracing::warn!(err = %e, call_id = %active.info.call_id, "end request failed, tearing down locally");
            }
        }
        self.teardown_local().await;
        Ok(())
    }

    /// Accepts the pending incoming call offer.
    ///
    /// # Errors
    ///
    /// [`CallError::NoIncomingCall`] without an offer,
    /// [`CallError::Busy`] unless idle, and [`ApiError::Gone`] when the
    /// call ended before the user accepted (the offer is cleared).
    pub async fn accept_incoming(self: &Arc<Self>) -> Result<(), CallError> {
        let _op = self.op.lock().await;
        let Some(offer) = self.incoming.lock().clone() else {
            return Err(CallError::NoIncomingCall);
        };
        if !matches!(*self.phase.lock(), CallPhase::Idle) {
            return Err(CallError::Busy);
        }
        self.set_phase(CallPhase::Requesting);
        match self.api.join_call(&offer.call_id).await {
            Ok(info) => {
                let call_type = info.call_type;
                self.enter_active(info, call_type).await;
                Ok(())
            }
            Err(e) => {
                self.set_phase(CallPhase::Idle);
                self.clear_incoming();
                Err(e.into())
            }
        }
    }

    /// Declines the pending incoming call offer, if any.
    pub fn decline_incoming(&self) {
        self.clear_incoming();
    }

    /// Toggles the microphone in the active call.
    ///
    /// # Errors
    ///
    /// Propagates [`MediaError`].
    pub async fn toggle_audio(&self) -> Result<bool, CallError> {
        Ok(self.media.toggle_audio().await?)
    }

    /// Toggles the camera in the active call.
    ///
    /// # Errors
    ///
    /// Propagates [`MediaError`].
    pub async fn toggle_video(&self) -> Result<bool, CallError> {
        Ok(self.media.toggle_video().await?)
    }

    /// The media controller, for rendering local track state.
    pub const fn media(&self) -> &MediaController<D> {
        &self.media
    }

    /// Applies call-relevant server events; everything else is
    /// ignored.
    pub fn handle_event(&self, event: &ServerEvent) {
        if let ServerEvent::CallStarted { call } = event {
            if call.caller == self.session.user_id {
                return;
            }
            if !matches!(*self.phase.lock(), CallPhase::Idle) {
                tracing::debug!(call_id = %call.call_id, "ignoring call offer while busy");
                return;
            }
            *self.incoming.lock() = Some(call.clone());
            self.emit(CallEvent::IncomingCall(call.clone()));
        }
    }

    /// Creates the pending call and enters it. Assumes the op lock is
    /// held and the phase is `Requesting`.
    async fn create_and_enter(self: &Arc<Self>, pending: PendingStart) -> Result<(), CallError> {
        match self
            .api
            .create_call(&pending.conversation, pending.call_type)
            .await
        {
            Ok(info) => {
                let call_type = pending.call_type;
                self.enter_active(info, call_type).await;
                Ok(())
            }
            Err(ApiError::Conflict(existing)) => {
                self.set_phase(CallPhase::Conflict { existing, pending });
                Ok(())
            }
            Err(e) => {
                self.set_phase(CallPhase::Idle);
                Err(e.into())
            }
        }
    }

    /// Acquires media (degrading rather than aborting), flips to
    /// active, and starts the participant poll. Assumes the op lock is
    /// held.
    async fn enter_active(self: &Arc<Self>, info: CallInfo, call_type: CallType) {
        let want_video = call_type == CallType::Video;
        match self.media.acquire(want_video).await {
            Ok(()) => {}
            Err(e) if want_video => {
                tracing::warn!(err = %e, "camera unavailable, degrading to audio-only");
                self.emit(CallEvent::MediaDegraded {
                    video_lost: true,
                    audio_lost: false,
                });
                if let Err(e) = self.media.acquire(false).await {
                    tracing::warn!(err = %e, "microphone unavailable, joining without media");
                    self.emit(CallEvent::MediaDegraded {
                        video_lost: true,
                        audio_lost: true,
                    });
                }
            }
            Err(e) => {
                tracing::warn!(err = %e, "microphone unavailable, joining without media");
                self.emit(CallEvent::MediaDegraded {
                    video_lost: false,
                    audio_lost: true,
                });
            }
        }

        let participants = info.participants.clone();
        self.set_phase(CallPhase::Active(ActiveCall { info, participants }));
        self.clear_incoming();
        self.spawn_poll();
    }

    /// Tears down local call state: poll task, media, phase. Assumes
    /// the op lock is held.
    async fn teardown_local(&self) {
        if let Some(task) = self.poll_task.lock().take() {
            task.abort();
        }
        self.media.release().await;
        self.set_phase(CallPhase::Idle);
    }

    fn spawn_poll(self: &Arc<Self>) {
        let coordinator = Arc::clone(self);
        let handle = tokio::spawn(async move {
            // The interval's immediate first tick usually lands while
            // the spawning operation still holds the op lock and is
            // skipped; that is fine, participants were just seeded from
            // the create/join response.
            let mut ticker = tokio::time::interval(coordinator.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !coordinator.refresh_participants_once().await {
                    break;
                }
            }
        });
        *self.poll_task.lock() = Some(handle);
    }

    /// One poll iteration. Returns `false` when the poll should stop.
    async fn refresh_participants_once(self: &Arc<Self>) -> bool {
        // A mutation in progress owns the state; skip this tick.
        let Ok(_op) = self.op.try_lock() else {
            return true;
        };
        let call_id = {
            let phase = self.phase.lock();
            let CallPhase::Active(active) = &*phase else {
                return false;
            };
            active.info.call_id.clone()
        };

        match self.api.participants(&call_id).await {
            Ok(participants) => {
                let changed = {
                    let mut phase = self.phase.lock();
                    if let CallPhase::Active(active) = &mut *phase {
                        if active.participants == participants {
                            false
                        } else {
                            active.participants.clone_from(&participants);
                            true
                        }
                    } else {
                        return false;
                    }
                };
                if changed {
                    self.emit(CallEvent::ParticipantsUpdated(participants));
                }
                true
            }
            Err(ApiError::Gone) => {
                // Ended remotely. Tear down without touching the poll
                // handle: this task exits by returning false.
                tracing::info!(call_id = %call_id, "call ended remotely");
                self.media.release().await;
                self.set_phase(CallPhase::Idle);
                self.poll_task.lock().take();
                false
            }
            Err(e) => {
                tracing::debug!(err = %e, call_id = %call_id, "participant poll failed");
                true
            }
        }
    }

    fn take_active(&self) -> Option<ActiveCall> {
        let phase = self.phase.lock();
        match &*phase {
            CallPhase::Active(active) => Some(active.clone()),
            _ => None,
        }
    }

    fn set_phase(&self, phase: CallPhase) {
        *self.phase.lock() = phase.clone();
        self.emit(CallEvent::PhaseChanged(phase));
    }

    fn clear_incoming(&self) {
        if self.incoming.lock().take().is_some() {
            self.emit(CallEvent::IncomingCallCleared);
        }
    }

    fn emit(&self, event: CallEvent) {
        if self.events_tx.try_send(event).is_err() {
            tracing::warn!("call event buffer full, event dropped");
        }
    }
}
