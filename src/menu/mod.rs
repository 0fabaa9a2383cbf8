//! Reaction-driven interactive menus
//!
//! A menu session renders one message, listens for reactions or typed input
//! from the invoking user and resolves once. [`sub_menu::SubMenu`] picks one
//! action, [`multi_select::MultiSelect`] toggles a set of items and
//! [`prompt::Prompter`] covers the one-shot yes/no and free-text questions.

pub mod collector;
pub mod multi_select;
pub mod pager;
pub mod prompt;
pub mod sub_menu;

use crate::locale::Locale;
use async_trait::async_trait;
use poise::serenity_prelude as serenity;
use serenity::{ChannelId, MessageId, UserId};
use std::sync::Arc;
use std::time::Duration;

pub use collector::{CollectorEvent, CollectorHub, CollectorOptions, Input, ReactionCollector};

pub const PREV_EMOJI: &str = "◀️";
pub const NEXT_EMOJI: &str = "▶️";
pub const CANCEL_EMOJI: &str = "🛑";
pub const SUBMIT_EMOJI: &str = "✅";
pub const YES_EMOJI: &str = "✅";
pub const NO_EMOJI: &str = "❌";
pub const CHECK_EMOJI: &str = "☑️";
pub const UNCHECK_EMOJI: &str = "⬜";

pub const MENU_COLOR: u32 = 0x0079BF;
pub const EXPIRED_COLOR: u32 = 0x747F8D;

/// How a menu session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuOutcome<T> {
    Selected(T),
    Cancelled,
    TimedOut,
}

impl<T> MenuOutcome<T> {
    pub fn selected(self) -> Option<T> {
        match self {
            MenuOutcome::Selected(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_selected(&self) -> bool {
        matches!(self, MenuOutcome::Selected(_))
    }
}

/// Platform-neutral content of a rendered menu message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MenuView {
    pub title: Option<String>,
    pub description: String,
    pub footer: Option<String>,
    pub color: u32,
}

impl MenuView {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            title: None,
            description: description.into(),
            footer: None,
            color: MENU_COLOR,
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn footer(mut self, footer: impl Into<String>) -> Self {
        self.footer = Some(footer.into());
        self
    }

    pub fn color(mut self, color: u32) -> Self {
        self.color = color;
        self
    }

    pub fn to_embed(&self) -> serenity::CreateEmbed {
        let mut embed = serenity::CreateEmbed::new()
            .description(&self.description)
            .color(self.color);
        if let Some(title) = &self.title {
            embed = embed.title(title);
        }
        if let Some(footer) = &self.footer {
            embed = embed.footer(serenity::CreateEmbedFooter::new(footer));
        }
        embed
    }
}

/// Localised strings the menus render around their rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuLabels {
    pub page: String,
    pub expired: String,
    pub cancelled: String,
    pub hint: String,
}

impl Default for MenuLabels {
    fn default() -> Self {
        Self {
            page: "Page {page}/{pages}".to_string(),
            expired: "This menu has expired.".to_string(),
            cancelled: "Cancelled.".to_string(),
            hint: "React or type a number to choose.".to_string(),
        }
    }
}

impl MenuLabels {
    pub fn from_locale(locale: &Locale) -> Self {
        Self {
            page: locale.t("menu.page"),
            expired: locale.t("menu.expired"),
            cancelled: locale.t("menu.cancelled"),
            hint: locale.t("menu.hint"),
        }
    }

    pub fn page_footer(&self, page: usize, pages: usize) -> String {
        self.page
            .replace("{page}", &page.to_string())
            .replace("{pages}", &pages.to_string())
    }

    pub fn expired_view(&self) -> MenuView {
        MenuView::new(&self.expired).color(EXPIRED_COLOR)
    }

    pub fn cancelled_view(&self) -> MenuView {
        MenuView::new(&self.cancelled).color(EXPIRED_COLOR)
    }
}

/// Write side of a menu: the only calls a session makes to the platform.
#[async_trait]
pub trait MenuTarget: Send + Sync {
    async fn send(&self, channel_id: ChannelId, view: &MenuView) -> anyhow::Result<MessageId>;
    async fn edit(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        view: &MenuView,
    ) -> anyhow::Result<()>;
    async fn react(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        emoji: &str,
    ) -> anyhow::Result<()>;
    async fn remove_reaction(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        user_id: UserId,
        emoji: &str,
    ) -> anyhow::Result<()>;
    async fn clear_reactions(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> anyhow::Result<()>;
}

/// [`MenuTarget`] backed by the Discord REST client.
pub struct SerenityTarget {
    http: Arc<serenity::Http>,
}

impl SerenityTarget {
    pub fn new(http: Arc<serenity::Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl MenuTarget for SerenityTarget {
    async fn send(&self, channel_id: ChannelId, view: &MenuView) -> anyhow::Result<MessageId> {
        let message = channel_id
            .send_message(&self.http, serenity::CreateMessage::new().embed(view.to_embed()))
            .await?;
        Ok(message.id)
    }

    async fn edit(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        view: &MenuView,
    ) -> anyhow::Result<()> {
        channel_id
            .edit_message(
                &self.http,
                message_id,
                serenity::EditMessage::new().embed(view.to_embed()),
            )
            .await?;
        Ok(())
    }

    async fn react(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        emoji: &str,
    ) -> anyhow::Result<()> {
        self.http
            .create_reaction(
                channel_id,
                message_id,
                &collector::reaction_from_key(emoji),
            )
            .await?;
        Ok(())
    }

    async fn remove_reaction(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        user_id: UserId,
        emoji: &str,
    ) -> anyhow::Result<()> {
        self.http
            .delete_reaction(
                channel_id,
                message_id,
                user_id,
                &collector::reaction_from_key(emoji),
            )
            .await?;
        Ok(())
    }

    async fn clear_reactions(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> anyhow::Result<()> {
        self.http
            .delete_message_reactions(channel_id, message_id)
            .await?;
        Ok(())
    }
}

/// Everything a menu session needs from its surroundings.
#[derive(Clone, Copy)]
pub struct MenuEnv<'a> {
    pub hub: &'a CollectorHub,
    pub target: &'a dyn MenuTarget,
    pub labels: &'a MenuLabels,
    pub timeout: Duration,
}

impl<'a> MenuEnv<'a> {
    pub fn new(
        hub: &'a CollectorHub,
        target: &'a dyn MenuTarget,
        labels: &'a MenuLabels,
        timeout: Duration,
    ) -> Self {
        Self {
            hub,
            target,
            labels,
            timeout,
        }
    }

    pub(crate) fn collector(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
    ) -> ReactionCollector<'a> {
        ReactionCollector::new(
            self.hub,
            self.target,
            channel_id,
            user_id,
            CollectorOptions {
                idle: self.timeout,
                accept_text: true,
            },
        )
    }
}
