use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

pub const DEFAULT_SUPPRESS_WINDOW: Duration = Duration::from_millis(3_000);

static SHARED: Lazy<Arc<ErrorAnnouncer>> = Lazy::new(|| Arc::new(ErrorAnnouncer::new()));

/// De-duplicates user-visible error messages.
///
/// Overlapping failures (a re-mount, a dropped duplicate fetch that still
/// errors elsewhere) would otherwise produce one toast per failure for what is
/// a single logical problem. Entries are only ever overwritten, never pruned;
/// the set of distinct messages is small and fixed.
#[derive(Debug, Default)]
pub struct ErrorAnnouncer {
    shown: Mutex<HashMap<String, Instant>>,
}

impl ErrorAnnouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide instance shared by every controller.
    pub fn shared() -> Arc<ErrorAnnouncer> {
        Arc::clone(&SHARED)
    }

    pub fn announce(&self, message: &str, suppress_window: Duration) -> bool {
        self.announce_at(message, suppress_window, Instant::now())
    }

    /// Returns `true` when the caller should display `message`.
    pub fn announce_at(&self, message: &str, suppress_window: Duration, now: Instant) -> bool {
        let mut shown = self.shown.lock();
        if let Some(last) = shown.get(message) {
            if now.saturating_duration_since(*last) < suppress_window {
                tracing::debug!(message, "suppressing repeated error message");
                return false;
            }
        }
        shown.insert(message.to_string(), now);
        true
    }

    pub fn tracked_messages(&self) -> usize {
        self.shown.lock().len()
    }
}

/// Convenience wrapper over the shared announcer.
pub fn announce(message: &str, suppress_window: Duration) -> bool {
    SHARED.announce(message, suppress_window)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// A message handed to the presentation layer's toast renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }
}

/// Delivers notices to whoever renders them. A sink without a receiver is
/// valid; sends to a closed channel are logged and dropped.
#[derive(Debug, Clone, Default)]
pub struct NoticeSink {
    sender: Option<Sender<Notice>>,
}

impl NoticeSink {
    pub fn new(sender: Sender<Notice>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    pub fn disconnected() -> Self {
        Self::default()
    }

    pub fn send(&self, notice: Notice) {
        let Some(sender) = &self.sender else {
            tracing::debug!(?notice, "no notice receiver attached");
            return;
        };
        if let Err(err) = sender.send(notice) {
            tracing::warn!(?err, "notice receiver disconnected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_message_is_suppressed_within_window() {
        let announcer = ErrorAnnouncer::new();
        let start = Instant::now();
        let window = Duration::from_millis(3_000);
        assert!(announcer.announce_at("X", window, start));
        assert!(!announcer.announce_at("X", window, start + Duration::from_millis(2_999)));
        assert!(announcer.announce_at("X", window, start + Duration::from_millis(3_000)));
    }

    #[test]
    fn suppressed_call_does_not_extend_the_window() {
        let announcer = ErrorAnnouncer::new();
        let start = Instant::now();
        let window = Duration::from_millis(1_000);
        assert!(announcer.announce_at("X", window, start));
        assert!(!announcer.announce_at("X", window, start + Duration::from_millis(900)));
        assert!(announcer.announce_at("X", window, start + Duration::from_millis(1_100)));
    }

    #[test]
    fn distinct_messages_are_independent() {
        let announcer = ErrorAnnouncer::new();
        let now = Instant::now();
        assert!(announcer.announce_at("X", DEFAULT_SUPPRESS_WINDOW, now));
        assert!(announcer.announce_at("Y", DEFAULT_SUPPRESS_WINDOW, now));
        assert!(!announcer.announce_at("Y", DEFAULT_SUPPRESS_WINDOW, now));
        assert_eq!(announcer.tracked_messages(), 2);
    }

    #[test]
    fn shared_announcer_is_a_singleton() {
        let first = ErrorAnnouncer::shared();
        let second = ErrorAnnouncer::shared();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn concurrent_announcers_surface_a_message_once() {
        let announcer = Arc::new(ErrorAnnouncer::new());
        let now = Instant::now();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let announcer = Arc::clone(&announcer);
                std::thread::spawn(move || {
                    announcer.announce_at("boom", DEFAULT_SUPPRESS_WINDOW, now)
                })
            })
            .collect();
        let surfaced = handles
            .into_iter()
            .map(|handle| handle.join().expect("thread"))
            .filter(|shown| *shown)
            .count();
        assert_eq!(surfaced, 1);
    }

    #[test]
    fn sink_delivers_to_receiver() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let sink = NoticeSink::new(tx);
        sink.send(Notice::error("failed"));
        assert_eq!(rx.try_recv().ok(), Some(Notice::error("failed")));
        drop(rx);
        sink.send(Notice::info("nobody listening"));
        NoticeSink::disconnected().send(Notice::info("dropped"));
    }
}
