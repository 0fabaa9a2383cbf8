pub mod addwebhook;
pub mod editcard;
pub mod editwebhook;
pub mod label;
pub mod switch;

use crate::db::UserRecord;
use crate::locale::Locale;
use crate::menu::sub_menu::{ActionFuture, MenuAction};
use crate::menu::{MenuEnv, MenuLabels, SerenityTarget};
use crate::trello::{BoardApi, RemoteError};
use crate::{Context, Data, Error};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub fn all() -> Vec<poise::Command<Data, Error>> {
    vec![
        switch::switch(),
        label::label(),
        editcard::editcard(),
        addwebhook::addwebhook(),
        editwebhook::editwebhook(),
    ]
}

/// Per-invocation state shared by the commands: the caller's record, their
/// strings and what menus need to render.
pub(crate) struct Session {
    pub user: UserRecord,
    pub locale: Arc<Locale>,
    labels: MenuLabels,
    target: SerenityTarget,
    timeout: Duration,
}

impl Session {
    pub async fn load(ctx: Context<'_>) -> Result<Self, Error> {
        let data = ctx.data();
        let user_id = ctx.author().id.to_string();
        let lookup = user_id.clone();
        let user = data
            .db
            .run_blocking(move |db| db.get_user(&lookup))
            .await?
            .unwrap_or(UserRecord {
                user_id,
                ..Default::default()
            });
        let locale = data.locales.get(user.locale.as_deref());
        Ok(Self {
            labels: MenuLabels::from_locale(&locale),
            target: SerenityTarget::new(ctx.serenity_context().http.clone()),
            timeout: data.config.menu_timeout,
            user,
            locale,
        })
    }

    pub fn menu<'a>(&'a self, ctx: Context<'a>) -> MenuEnv<'a> {
        MenuEnv::new(&ctx.data().hub, &self.target, &self.labels, self.timeout)
    }

    pub fn t(&self, key: &str) -> String {
        self.locale.t(key)
    }

    pub fn t_with(&self, key: &str, vars: &[(&str, &str)]) -> String {
        self.locale.t_with(key, vars)
    }

    pub async fn say(&self, ctx: Context<'_>, text: String) -> Result<(), Error> {
        ctx.say(text).await?;
        Ok(())
    }

    /// Client acting with the caller's token, or a "not connected" reply.
    pub async fn require_auth(&self, ctx: Context<'_>) -> Result<Option<Arc<dyn BoardApi>>, Error> {
        match &self.user.trello_token {
            Some(token) if self.user.is_authed() => Ok(Some(ctx.data().trello.with_token(token))),
            _ => {
                self.say(ctx, self.t("common.no_auth")).await?;
                Ok(None)
            }
        }
    }

    pub async fn require_board(&self, ctx: Context<'_>) -> Result<Option<String>, Error> {
        match &self.user.current_board {
            Some(board) => Ok(Some(board.clone())),
            None => {
                self.say(ctx, self.t("common.no_board")).await?;
                Ok(None)
            }
        }
    }

    /// Replies with the message for a failed Trello call. A rejected token
    /// is forgotten.
    pub async fn report(&self, ctx: Context<'_>, err: &RemoteError) -> Result<(), Error> {
        warn!("Trello call for {} failed: {}", self.user.user_id, err);
        if *err == RemoteError::Unauthorized {
            self.forget_auth(ctx).await?;
        }
        let status = match err {
            RemoteError::Status(status) => status.to_string(),
            _ => "-".to_string(),
        };
        self.say(ctx, self.t_with(err.locale_key(), &[("status", &status)]))
            .await
    }

    pub async fn forget_auth(&self, ctx: Context<'_>) -> Result<(), Error> {
        let user_id = self.user.user_id.clone();
        ctx.data()
            .db
            .run_blocking(move |db| db.remove_auth(&user_id))
            .await?;
        info!("Removed Trello credentials of {}", self.user.user_id);
        Ok(())
    }

    /// The selected board vanished; clear it and say so.
    pub async fn board_gone(&self, ctx: Context<'_>) -> Result<(), Error> {
        let user_id = self.user.user_id.clone();
        ctx.data()
            .db
            .run_blocking(move |db| db.set_current_board(&user_id, None))
            .await?;
        self.say(ctx, self.t("boards.gone")).await
    }
}

/// Shows the typing indicator in the invoking channel while `work` runs.
pub(crate) async fn typing<F: Future>(ctx: Context<'_>, work: F) -> F::Output {
    let data = ctx.data();
    let channel_id = ctx.channel_id();
    data.typing.start(&ctx.serenity_context().http, channel_id);
    let output = work.await;
    data.typing.stop(channel_id);
    output
}

/// A menu row that resolves to `value` when picked, ignoring the menu context.
pub(crate) fn choice<C, T: Send + 'static>(
    names: &[&str],
    title: impl Into<String>,
    value: T,
) -> MenuAction<'static, C, T> {
    MenuAction::new(names, title, move |_: C| {
        Box::pin(async move { Ok(value) }) as ActionFuture<'static, T>
    })
}

