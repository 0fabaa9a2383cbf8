pub mod commands;
pub mod config;
pub mod db;
pub mod discord_text;
pub mod filters;
pub mod locale;
pub mod menu;
pub mod trello;
pub mod typing;
pub mod webhooks;
pub mod webserver;

use std::sync::Arc;

/// Custom data passed to all commands
pub struct Data {
    pub config: config::Config,
    pub db: db::Database,
    /// Routes reactions and messages to open menus
    pub hub: Arc<menu::CollectorHub>,
    pub locales: Arc<locale::Locales>,
    pub trello: Arc<dyn trello::BoardApiFactory>,
    pub typing: typing::TypingTracker,
}

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
