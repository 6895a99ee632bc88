//! Alert player that reports clips through the log.
//!
//! The headless dashboard has no audio device. Each clip is emitted as a
//! structured log line that an operator's log shipper can route to a
//! pager or speaker.

use std::sync::{Mutex, PoisonError};

use lookout_sync::{AlertClip, AlertPlayer};
use tracing::{debug, info};

/// Logs every clip it is asked to play.
#[derive(Debug, Default)]
pub struct LogAlertPlayer {
    current: Mutex<Option<AlertClip>>,
}

impl LogAlertPlayer {
    /// A player with nothing playing.
    pub fn new() -> Self {
        Self::default()
    }

    /// The clip currently "playing", if any.
    pub fn current(&self) -> Option<AlertClip> {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AlertPlayer for LogAlertPlayer {
    fn play(&self, clip: AlertClip) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(clip);
        info!(clip = clip.id(), "ALERT");
    }

    fn stop(&self) {
        if let Some(clip) = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            debug!(clip = clip.id(), "alert stopped");
        }
    }
}
