use poise::serenity_prelude as serenity;
use serenity::ChannelId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Per-channel typing indicators.
///
/// At most one indicator runs per channel, shared by every holder in that
/// channel. `G` is the guard that keeps it alive; it is dropped when the last
/// holder stops.
pub struct TypingTracker<G = serenity::Typing> {
    active: Mutex<HashMap<ChannelId, Indicator<G>>>,
}

struct Indicator<G> {
    _guard: G,
    holders: usize,
}

impl<G> Default for TypingTracker<G> {
    fn default() -> Self {
        Self {
            active: Mutex::new(HashMap::new()),
        }
    }
}

impl<G> TypingTracker<G> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a holder, starting the indicator if none runs yet. Returns
    /// whether `start` was called. Every call must be paired with [`stop`].
    ///
    /// [`stop`]: TypingTracker::stop
    pub fn start_with(&self, channel_id: ChannelId, start: impl FnOnce() -> G) -> bool {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(indicator) = active.get_mut(&channel_id) {
            indicator.holders += 1;
            return false;
        }
        active.insert(
            channel_id,
            Indicator {
                _guard: start(),
                holders: 1,
            },
        );
        true
    }

    pub fn is_typing(&self, channel_id: ChannelId) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&channel_id)
    }

    /// Releases one holder. Returns whether the indicator ended.
    pub fn stop(&self, channel_id: ChannelId) -> bool {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(indicator) = active.get_mut(&channel_id) else {
            return false;
        };
        indicator.holders -= 1;
        if indicator.holders > 0 {
            return false;
        }
        active.remove(&channel_id);
        true
    }
}

impl TypingTracker<serenity::Typing> {
    pub fn start(&self, http: &Arc<serenity::Http>, channel_id: ChannelId) -> bool {
        let started = self.start_with(channel_id, || serenity::Typing::start(http.clone(), channel_id));
        if started {
            debug!("Typing started in channel {}", channel_id);
        }
        started
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Guard(Arc<AtomicUsize>);

    impl Drop for Guard {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_one_indicator_per_channel() {
        let stopped = Arc::new(AtomicUsize::new(0));
        let tracker = TypingTracker::new();
        let channel = ChannelId::new(1);

        assert!(tracker.start_with(channel, || Guard(stopped.clone())));
        assert!(tracker.is_typing(channel));
        assert!(!tracker.is_typing(ChannelId::new(2)));

        assert!(tracker.stop(channel));
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
        assert!(!tracker.stop(channel));
        assert!(!tracker.is_typing(channel));
    }

    #[test]
    fn test_indicator_lasts_until_last_holder_stops() {
        let stopped = Arc::new(AtomicUsize::new(0));
        let tracker = TypingTracker::new();
        let channel = ChannelId::new(1);

        assert!(tracker.start_with(channel, || Guard(stopped.clone())));
        assert!(!tracker.start_with(channel, || Guard(stopped.clone())));

        // First command finishes; the second still needs the indicator.
        assert!(!tracker.stop(channel));
        assert!(tracker.is_typing(channel));
        assert_eq!(stopped.load(Ordering::SeqCst), 0);

        assert!(tracker.stop(channel));
        assert!(!tracker.is_typing(channel));
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
    }
}
