//! Audible alerts driven by the feed and the state summary.
//!
//! The sync layer does not play audio itself. It decides *which* named
//! clip should play and hands it to an [`AlertPlayer`]. Alerts pass
//! through an [`AlertGate`] that stays closed until the initial
//! snapshots have settled, so the burst of writes while the dashboard
//! fills does not trigger a cascade of announcements.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use lookout_types::{CheckState, Summary};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::feed::FeedEvent;
use crate::store::StoreEvent;

/// A named audio clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertClip {
    /// The live feed connection was lost.
    ConnectionLost,
    /// The live feed connection came back.
    ConnectionRestored,
    /// Every check is up.
    ChecksUp,
    /// Exactly one check is down.
    CheckDown,
    /// More than one check is down.
    ChecksDown,
}

impl AlertClip {
    /// The clip identifier.
    pub const fn id(self) -> &'static str {
        match self {
            Self::ConnectionLost => "connection-lost",
            Self::ConnectionRestored => "connection-restored",
            Self::ChecksUp => "checks-up",
            Self::CheckDown => "check-down",
            Self::ChecksDown => "checks-down",
        }
    }
}

impl core::fmt::Display for AlertClip {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.id())
    }
}

/// Plays named clips.
pub trait AlertPlayer: Send + Sync {
    /// Start playing `clip`.
    fn play(&self, clip: AlertClip);

    /// Stop whatever is playing.
    fn stop(&self);
}

/// Readiness- and mute-aware front of an [`AlertPlayer`].
///
/// At most one clip plays at a time: every accepted clip stops the
/// current one first.
#[derive(Debug)]
pub struct AlertGate<P> {
    player: P,
    open: AtomicBool,
    muted: AtomicBool,
}

impl<P: AlertPlayer> AlertGate<P> {
    /// A closed, unmuted gate.
    pub const fn new(player: P) -> Self {
        Self {
            player,
            open: AtomicBool::new(false),
            muted: AtomicBool::new(false),
        }
    }

    /// Let alerts through. Called once readiness fires.
    pub fn open(&self) {
        if !self.open.swap(true, Ordering::SeqCst) {
            debug!("alert gate opened");
        }
    }

    /// Whether readiness has opened the gate.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Mute or unmute alerts. Muting stops the current clip.
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
        if muted {
            self.player.stop();
        }
    }

    /// Whether alerts are muted.
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    /// Play `clip` if the gate is open and not muted.
    ///
    /// Returns whether the clip was played.
    pub fn play(&self, clip: AlertClip) -> bool {
        if !self.is_open() {
            debug!(%clip, "alert dropped before ready");
            return false;
        }
        if self.is_muted() {
            debug!(%clip, "alert muted");
            return false;
        }
        info!(%clip, "playing alert");
        self.player.stop();
        self.player.play(clip);
        true
    }

    /// The wrapped player.
    pub const fn player(&self) -> &P {
        &self.player
    }
}

/// The clip announcing a summary, if any.
///
/// All checks up wins over any down count, so an empty summary (zero
/// checks, zero up) announces `checks-up`.
pub fn summary_clip(summary: &Summary) -> Option<AlertClip> {
    let down = summary.count(CheckState::Down);
    if summary.checks == summary.count(CheckState::Up) {
        Some(AlertClip::ChecksUp)
    } else if down == 1 {
        Some(AlertClip::CheckDown)
    } else if down > 1 {
        Some(AlertClip::ChecksDown)
    } else {
        None
    }
}

/// The clip announcing a feed lifecycle event, if any.
///
/// "Connection lost" plays once per outage, on the first reconnect
/// attempt; further attempts during the same outage are silent.
pub const fn connection_clip(event: &FeedEvent) -> Option<AlertClip> {
    match event {
        FeedEvent::ConnectionLost { attempt: 1 } => Some(AlertClip::ConnectionLost),
        FeedEvent::ConnectionRestored { .. } => Some(AlertClip::ConnectionRestored),
        _ => None,
    }
}

/// Announces summary changes, skipping repeats of the last announcement.
#[derive(Debug, Default)]
pub struct SummaryAnnouncer {
    last: Mutex<Option<AlertClip>>,
}

impl SummaryAnnouncer {
    /// An announcer that has announced nothing yet.
    pub const fn new() -> Self {
        Self {
            last: Mutex::new(None),
        }
    }

    /// The clip to play for `summary`, or `None` if it matches the
    /// previous announcement.
    pub fn announce(&self, summary: &Summary) -> Option<AlertClip> {
        let clip = summary_clip(summary);
        let mut last = self
            .last
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if *last == clip {
            return None;
        }
        *last = clip;
        clip
    }
}

/// Play connection and summary alerts until both channels close.
///
/// A lagging receiver skips the missed events and keeps going.
pub async fn run_alerts<P: AlertPlayer>(
    gate: Arc<AlertGate<P>>,
    mut feed: broadcast::Receiver<FeedEvent>,
    mut summaries: broadcast::Receiver<StoreEvent<Summary>>,
) {
    let announcer = SummaryAnnouncer::new();
    let mut feed_open = true;
    let mut summaries_open = true;

    while feed_open || summaries_open {
        tokio::select! {
            event = feed.recv(), if feed_open => match event {
                Ok(event) => {
                    if let Some(clip) = connection_clip(&event) {
                        gate.play(clip);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "alert loop lagged behind feed events");
                }
                Err(RecvError::Closed) => feed_open = false,
            },
            event = summaries.recv(), if summaries_open => match event {
                Ok(event) => {
                    if let Some(clip) = event.record().and_then(|s| announcer.announce(s)) {
                        gate.play(clip);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "alert loop lagged behind summary updates");
                }
                Err(RecvError::Closed) => summaries_open = false,
            },
        }
    }
    debug!("alert loop stopped");
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[derive(Debug, Default)]
    struct RecordingPlayer {
        log: Mutex<Vec<String>>,
    }

    impl RecordingPlayer {
        fn log(&self) -> Vec<String> {
            self.log.lock().map(|l| l.clone()).unwrap_or_default()
        }
    }

    impl AlertPlayer for RecordingPlayer {
        fn play(&self, clip: AlertClip) {
            if let Ok(mut log) = self.log.lock() {
                log.push(clip.id().to_owned());
            }
        }

        fn stop(&self) {
            if let Ok(mut log) = self.log.lock() {
                log.push("stop".to_owned());
            }
        }
    }

    fn summary(checks: u64, up: u64, down: u64) -> Summary {
        let mut states = BTreeMap::new();
        states.insert("up".to_owned(), up);
        states.insert("down".to_owned(), down);
        states.insert("unknown".to_owned(), checks.saturating_sub(up).saturating_sub(down));
        Summary {
            id: "summary".to_owned(),
            checks,
            states,
        }
    }

    #[test]
    fn summary_clips() {
        assert_eq!(summary_clip(&summary(3, 3, 0)), Some(AlertClip::ChecksUp));
        assert_eq!(summary_clip(&summary(3, 2, 1)), Some(AlertClip::CheckDown));
        assert_eq!(summary_clip(&summary(5, 1, 3)), Some(AlertClip::ChecksDown));
        assert_eq!(summary_clip(&summary(3, 2, 0)), None);
    }

    #[test]
    fn announcer_skips_repeats() {
        let announcer = SummaryAnnouncer::new();
        assert_eq!(announcer.announce(&summary(3, 3, 0)), Some(AlertClip::ChecksUp));
        assert_eq!(announcer.announce(&summary(3, 3, 0)), None);
        assert_eq!(announcer.announce(&summary(3, 2, 1)), Some(AlertClip::CheckDown));
        assert_eq!(announcer.announce(&summary(3, 2, 0)), None);
        assert_eq!(announcer.announce(&summary(3, 3, 0)), Some(AlertClip::ChecksUp));
    }

    #[test]
    fn connection_lost_once_per_outage() {
        assert_eq!(
            connection_clip(&FeedEvent::ConnectionLost { attempt: 1 }),
            Some(AlertClip::ConnectionLost)
        );
        assert_eq!(connection_clip(&FeedEvent::ConnectionLost { attempt: 2 }), None);
        assert_eq!(
            connection_clip(&FeedEvent::ConnectionRestored { failed_attempts: 4 }),
            Some(AlertClip::ConnectionRestored)
        );
        assert_eq!(connection_clip(&FeedEvent::Opened), None);
    }

    #[test]
    fn gate_drops_until_open_and_when_muted() {
        let gate = AlertGate::new(RecordingPlayer::default());
        assert!(!gate.play(AlertClip::ChecksUp));
        gate.open();
        assert!(gate.play(AlertClip::CheckDown));
        gate.set_muted(true);
        assert!(!gate.play(AlertClip::ChecksDown));
        gate.set_muted(false);
        assert!(gate.play(AlertClip::ChecksUp));
        assert_eq!(
            gate.player().log(),
            vec!["stop", "check-down", "stop", "stop", "checks-up"]
        );
    }

    #[tokio::test]
    async fn alert_loop_plays_feed_and_summary_alerts() {
        let gate = Arc::new(AlertGate::new(RecordingPlayer::default()));
        gate.open();
        let (feed_tx, feed_rx) = broadcast::channel(16);
        let (summary_tx, summary_rx) = broadcast::channel(16);
        let task = tokio::spawn(run_alerts(Arc::clone(&gate), feed_rx, summary_rx));

        let _ = feed_tx.send(FeedEvent::ConnectionLost { attempt: 1 });
        let _ = feed_tx.send(FeedEvent::ConnectionLost { attempt: 2 });
        let _ = feed_tx.send(FeedEvent::ConnectionRestored { failed_attempts: 2 });
        drop(feed_tx);
        let _ = summary_tx.send(StoreEvent::Inserted {
            key: "summary".into(),
            record: Arc::new(summary(2, 1, 1)),
            revision: 1,
        });
        drop(summary_tx);

        let _ = task.await;
        let played: Vec<String> = gate
            .player()
            .log()
            .into_iter()
            .filter(|entry| entry != "stop")
            .collect();
        assert!(played.contains(&"connection-lost".to_owned()));
        assert!(played.contains(&"connection-restored".to_owned()));
        assert!(played.contains(&"check-down".to_owned()));
        assert_eq!(played.len(), 3);
    }
}
