use super::{MenuTarget, MenuView};
use poise::serenity_prelude as serenity;
use serenity::{ChannelId, EmojiId, MessageId, ReactionType, UserId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// A gateway event a menu session may care about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectorEvent {
    Reaction {
        channel_id: ChannelId,
        message_id: MessageId,
        user_id: UserId,
        emoji: String,
    },
    Message {
        channel_id: ChannelId,
        author_id: UserId,
        content: String,
    },
}

impl CollectorEvent {
    pub fn from_reaction(reaction: &serenity::Reaction) -> Option<Self> {
        Some(CollectorEvent::Reaction {
            channel_id: reaction.channel_id,
            message_id: reaction.message_id,
            user_id: reaction.user_id?,
            emoji: emoji_key(&reaction.emoji),
        })
    }

    pub fn from_message(message: &serenity::Message) -> Option<Self> {
        if message.author.bot {
            return None;
        }
        Some(CollectorEvent::Message {
            channel_id: message.channel_id,
            author_id: message.author.id,
            content: message.content.clone(),
        })
    }

    fn author(&self) -> UserId {
        match self {
            CollectorEvent::Reaction { user_id, .. } => *user_id,
            CollectorEvent::Message { author_id, .. } => *author_id,
        }
    }
}

/// Stable string form of a reaction emoji.
pub fn emoji_key(emoji: &ReactionType) -> String {
    match emoji {
        ReactionType::Unicode(value) => value.clone(),
        ReactionType::Custom { id, name, .. } => {
            format!("{}:{}", name.as_deref().unwrap_or_default(), id)
        }
        other => other.to_string(),
    }
}

/// Inverse of [`emoji_key`]: `name:id` keys are custom emojis.
pub fn reaction_from_key(key: &str) -> ReactionType {
    let custom = key.rsplit_once(':').and_then(|(name, id)| {
        let id = id.parse::<u64>().ok().filter(|id| *id > 0)?;
        Some(ReactionType::Custom {
            animated: false,
            id: EmojiId::new(id),
            name: (!name.is_empty()).then(|| name.to_string()),
        })
    });
    custom.unwrap_or_else(|| ReactionType::Unicode(key.to_string()))
}

struct Listener {
    channel_id: ChannelId,
    user_id: UserId,
    message_id: Option<MessageId>,
    accept_text: bool,
    tx: mpsc::UnboundedSender<CollectorEvent>,
}

impl Listener {
    fn wants(&self, event: &CollectorEvent) -> bool {
        match event {
            CollectorEvent::Reaction { message_id, .. } => self.message_id == Some(*message_id),
            CollectorEvent::Message {
                channel_id,
                author_id,
                ..
            } => self.accept_text && *channel_id == self.channel_id && *author_id == self.user_id,
        }
    }
}

/// Routes gateway events to the menu sessions waiting on them.
#[derive(Default)]
pub struct CollectorHub {
    next_id: AtomicU64,
    self_id: AtomicU64,
    listeners: Mutex<HashMap<u64, Listener>>,
}

impl CollectorHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events authored by this user (the bot) are never routed.
    pub fn set_self_id(&self, user_id: UserId) {
        self.self_id.store(user_id.get(), Ordering::Relaxed);
    }

    pub fn listener_count(&self) -> usize {
        self.lock().len()
    }

    /// Hands the event to every interested listener and returns how many got it.
    pub fn dispatch(&self, event: CollectorEvent) -> usize {
        if event.author().get() == self.self_id.load(Ordering::Relaxed) {
            return 0;
        }
        let mut listeners = self.lock();
        let mut delivered = 0;
        listeners.retain(|_, listener| {
            if !listener.wants(&event) {
                return true;
            }
            match listener.tx.send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => false,
            }
        });
        delivered
    }

    fn register(&self, listener: Listener) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(id, listener);
        id
    }

    fn bind(&self, id: u64, message_id: MessageId) {
        if let Some(listener) = self.lock().get_mut(&id) {
            listener.message_id = Some(message_id);
        }
    }

    fn unregister(&self, id: u64) {
        self.lock().remove(&id);
    }

    #[cfg(test)]
    pub(crate) fn is_bound(&self, message_id: MessageId) -> bool {
        self.lock()
            .values()
            .any(|l| l.message_id == Some(message_id))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Listener>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CollectorOptions {
    /// Idle time allowed between two accepted inputs.
    pub idle: Duration,
    /// Also listen for plain messages from the user in the channel.
    pub accept_text: bool,
}

impl Default for CollectorOptions {
    fn default() -> Self {
        Self {
            idle: Duration::from_secs(30),
            accept_text: true,
        }
    }
}

/// Input accepted from the expected user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Reaction(String),
    Text(String),
}

/// One pending decision bound to one rendered message.
///
/// The listener is registered on construction and removed on drop, so a
/// session can never leak it regardless of how it ends.
pub struct ReactionCollector<'a> {
    hub: &'a CollectorHub,
    target: &'a dyn MenuTarget,
    listener: u64,
    rx: mpsc::UnboundedReceiver<CollectorEvent>,
    channel_id: ChannelId,
    user_id: UserId,
    message_id: Option<MessageId>,
    idle: Duration,
    deadline: Instant,
    finished: bool,
}

impl<'a> ReactionCollector<'a> {
    pub fn new(
        hub: &'a CollectorHub,
        target: &'a dyn MenuTarget,
        channel_id: ChannelId,
        user_id: UserId,
        options: CollectorOptions,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = hub.register(Listener {
            channel_id,
            user_id,
            message_id: None,
            accept_text: options.accept_text,
            tx,
        });
        debug!(
            "Collector {} listening for user {} in channel {}",
            listener, user_id, channel_id
        );
        Self {
            hub,
            target,
            listener,
            rx,
            channel_id,
            user_id,
            message_id: None,
            idle: options.idle,
            deadline: Instant::now() + options.idle,
            finished: false,
        }
    }

    pub fn message_id(&self) -> Option<MessageId> {
        self.message_id
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Sends the view on first call, edits the same message afterwards.
    pub async fn render(&mut self, view: &MenuView) -> anyhow::Result<MessageId> {
        match self.message_id {
            Some(message_id) => {
                self.target.edit(self.channel_id, message_id, view).await?;
                Ok(message_id)
            }
            None => {
                let message_id = self.target.send(self.channel_id, view).await?;
                self.hub.bind(self.listener, message_id);
                self.message_id = Some(message_id);
                Ok(message_id)
            }
        }
    }

    /// Adds the control reactions. Best-effort: typed input still works
    /// without them.
    pub async fn decorate(&self, emojis: &[&str]) {
        let Some(message_id) = self.message_id else {
            return;
        };
        for emoji in emojis {
            if let Err(e) = self.target.react(self.channel_id, message_id, emoji).await {
                warn!("Failed to add menu reaction {}: {}", emoji, e);
                return;
            }
        }
    }

    /// Removes the user's own reaction so the same button can be pressed again.
    pub async fn release(&self, emoji: &str) {
        if let Some(message_id) = self.message_id {
            let _ = self
                .target
                .remove_reaction(self.channel_id, message_id, self.user_id, emoji)
                .await;
        }
    }

    /// Waits for the next input from the expected user.
    ///
    /// Returns `None` once the idle deadline passes, and on every call after.
    pub async fn next(&mut self) -> Option<Input> {
        loop {
            if self.finished {
                return None;
            }
            let event = match tokio::time::timeout_at(self.deadline, self.rx.recv()).await {
                Ok(Some(event)) => event,
                Ok(None) | Err(_) => {
                    debug!("Collector {} timed out", self.listener);
                    self.finished = true;
                    return None;
                }
            };

            match event {
                CollectorEvent::Reaction {
                    message_id,
                    user_id,
                    emoji,
                    ..
                } => {
                    if user_id != self.user_id {
                        let _ = self
                            .target
                            .remove_reaction(self.channel_id, message_id, user_id, &emoji)
                            .await;
                        continue;
                    }
                    self.deadline = Instant::now() + self.idle;
                    return Some(Input::Reaction(emoji));
                }
                CollectorEvent::Message { content, .. } => {
                    self.deadline = Instant::now() + self.idle;
                    return Some(Input::Text(content));
                }
            }
        }
    }

    /// Marks the message as expired.
    pub async fn expire(&mut self, view: &MenuView) {
        self.close_with(Some(view)).await;
    }

    /// Resolves the session, leaving the message content as is.
    pub async fn finish(mut self) {
        self.close_with(None).await;
    }

    async fn close_with(&mut self, view: Option<&MenuView>) {
        self.finished = true;
        self.hub.unregister(self.listener);
        let Some(message_id) = self.message_id else {
            return;
        };
        if let Some(view) = view {
            if let Err(e) = self.target.edit(self.channel_id, message_id, view).await {
                warn!("Failed to update menu message {}: {}", message_id, e);
            }
        }
        let _ = self.target.clear_reactions(self.channel_id, message_id).await;
    }
}

impl Drop for ReactionCollector<'_> {
    fn drop(&mut self) {
        self.hub.unregister(self.listener);
    }
}
