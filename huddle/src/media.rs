//! Local media device lifecycle.
//!
//! Devices are acquired once per call and toggled by flipping track
//! enablement, not by re-acquiring hardware. The one exception is
//! turning video on in a call that was answered audio-only: that needs
//! a fresh video acquisition, which is merged into the existing session
//! without touching the audio track.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Kind of a media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    /// Microphone audio.
    Audio,
    /// Camera video.
    Video,
}

/// A live device track.
///
/// Shared as `Arc` between the controller and whatever transmits the
/// track; enablement and liveness are atomic flags so toggles are
/// visible everywhere without locks.
#[derive(Debug)]
pub struct MediaTrack {
    kind: TrackKind,
    enabled: AtomicBool,
    live: AtomicBool,
}

impl MediaTrack {
    /// Creates a live track with the given initial enablement.
    #[must_use]
    pub fn new(kind: TrackKind, enabled: bool) -> Self {
        Self {
            kind,
            enabled: AtomicBool::new(enabled),
            live: AtomicBool::new(true),
        }
    }

    /// Kind of this track.
    #[must_use]
    pub const fn kind(&self) -> TrackKind {
        self.kind
    }

    /// Whether the track is currently transmitting.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Enables or disables transmission. The device stays acquired.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Whether the underlying device is still held.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Relaxed)
    }

    /// Releases the underlying device.
    pub fn stop(&self) {
        self.live.store(false, Ordering::Relaxed);
        self.enabled.store(false, Ordering::Relaxed);
    }
}

/// Errors from media acquisition and control.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MediaError {
    /// The user denied device access.
    #[error("device access denied")]
    Denied,

    /// No matching device is available.
    #[error("no matching device available")]
    Unavailable,

    /// No media session is active.
    #[error("no active media session")]
    NotActive,

    /// The session has no track of the requested kind.
    #[error("no {0:?} track in the active session")]
    MissingTrack(TrackKind),

    /// Platform-specific failure.
    #[error("media error: {0}")]
    Other(String),
}

/// Access to the platform's capture devices.
pub trait MediaDevices: Send + Sync + 'static {
    /// Acquires tracks for the requested device kinds.
    fn acquire(
        &self,
        audio: bool,
        video: bool,
    ) -> impl Future<Output = Result<Vec<Arc<MediaTrack>>, MediaError>> + Send;
}

/// Tracks held for the current call.
#[derive(Debug, Clone, Default)]
pub struct MediaSession {
    /// Microphone track, if acquired.
    pub audio: Option<Arc<MediaTrack>>,
    /// Camera track, if acquired.
    pub video: Option<Arc<MediaTrack>>,
}

/// Owns the device session for the duration of a call.
pub struct MediaController<D: MediaDevices> {
    devices: D,
    session: tokio::sync::Mutex<Option<MediaSession>>,
}

impl<D: MediaDevices> MediaController<D> {
    /// Creates a controller with no active session.
    pub const fn new(devices: D) -> Self {
        Self {
            devices,
            session: tokio::sync::Mutex::const_new(None),
        }
    }

    /// Acquires devices for a call: microphone always, camera when
    /// `want_video`. The microphone starts enabled, the camera muted.
    ///
    /// A no-op when a session already exists, so joining flows cannot
    /// double-acquire.
    ///
    /// # Errors
    ///
    /// Propagates [`MediaError`] from device acquisition; on error no
    /// session is created.
    pub async fn acquire(&self, want_video: bool) -> Result<(), MediaError> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            tracing::debug!("media session already active, skipping acquisition");
            return Ok(());
        }

        let tracks = self.devices.acquire(true, want_video).await?;
        let mut acquired = MediaSession::default();
        for track in tracks {
            match track.kind() {
                TrackKind::Audio => {
                    track.set_enabled(true);
                    acquired.audio = Some(track);
                }
                TrackKind::Video => {
                    // Cameras start muted; the user turns video on explicitly.
                    track.set_enabled(false);
                    acquired.video = Some(track);
                }
            }
        }
        *session = Some(acquired);
        Ok(())
    }

    /// Toggles microphone transmission. Returns the new enabled state.
    ///
    /// # Errors
    ///
    /// [`MediaError::NotActive`] without a session,
    /// [`MediaError::MissingTrack`] if the session has no audio track.
    pub async fn toggle_audio(&self) -> Result<bool, MediaError> {
        let session = self.session.lock().await;
        let session = session.as_ref().ok_or(MediaError::NotActive)?;
        let track = session
            .audio
            .as_ref()
            .ok_or(MediaError::MissingTrack(TrackKind::Audio))?;
        let enabled = !track.is_enabled();
        track.set_enabled(enabled);
        Ok(enabled)
    }

    /// Toggles camera transmission. Returns the new enabled state.
    ///
    /// When the session has no video track yet (the call was entered
    /// audio-only), a video-only acquisition is merged in; the audio
    /// track is untouched.
    ///
    /// # Errors
    ///
    /// [`MediaError::NotActive`] without a session; acquisition errors
    /// when a camera has to be acquired first.
    pub async fn toggle_video(&self) -> Result<bool, MediaError> {
        let mut session = self.session.lock().await;
        let session = session.as_mut().ok_or(MediaError::NotActive)?;

        if let Some(track) = &session.video {
            let enabled = !track.is_enabled();
            track.set_enabled(enabled);
            return Ok(enabled);
        }

        let tracks = self.devices.acquire(false, true).await?;
        let video = tracks
            .into_iter()
            .find(|t| t.kind() == TrackKind::Video)
            .ok_or(MediaError::Unavailable)?;
        video.set_enabled(true);
        session.video = Some(video);
        Ok(true)
    }

    /// Stops all tracks and drops the session. Idempotent.
    pub async fn release(&self) {
        let mut session = self.session.lock().await;
        if let Some(session) = session.take() {
            if let Some(track) = &session.audio {
                track.stop();
            }
            if let Some(track) = &session.video {
                track.stop();
            }
            tracing::debug!("media session released");
        }
    }

    /// Snapshot of the current session for rendering.
    pub async fn session(&self) -> Option<MediaSession> {
        self.session.lock().await.clone()
    }

    #[cfg(test)]
    pub(crate) const fn devices_for_test(&self) -> &D {
        &self.devices
    }
}
