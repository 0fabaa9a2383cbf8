use super::{choice, typing, Session};
use crate::db::WebhookRecord;
use crate::discord_text::display_name;
use crate::filters::WebhookFilters;
use crate::menu::prompt::Prompter;
use crate::menu::sub_menu::{SubMenu, SubMenuOptions};
use crate::menu::{MenuOutcome, MenuView};
use crate::trello::{decode, Board, RemoteError};
use crate::webhooks::dispatch::WEBHOOK_USERNAME;
use crate::webhooks::lifecycle::{callback_url, ensure_remote_webhook, parse_webhook_link};
use crate::{Context, Error};
use poise::serenity_prelude as serenity;
use tracing::{info, warn};

/// Subscriptions a single server may hold.
pub const GUILD_WEBHOOK_LIMIT: usize = 5;

/// Where events for a subscription get posted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DiscordWebhook {
    pub id: String,
    pub token: String,
}

impl DiscordWebhook {
    pub(crate) fn from_serenity(webhook: &serenity::Webhook) -> Option<Self> {
        let url = webhook.url().ok()?;
        let (id, token) = parse_webhook_link(&url)?;
        Some(Self {
            id: id.to_string(),
            token,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Setup {
    New,
    Existing,
    Link,
}

/// Asks how to obtain the channel webhook: create one, reuse one of this
/// channel, or take a pasted link. Used by `addwebhook` and by repairs.
pub(crate) async fn setup_discord_webhook(
    ctx: Context<'_>,
    session: &Session,
    name: &str,
) -> Result<Option<DiscordWebhook>, Error> {
    let actions = vec![
        choice(&["new", "add", "addwebhook"], session.t("webhook_setup.new"), Setup::New),
        choice(
            &["exist", "existing", "existingwebhook"],
            session.t("webhook_setup.existing"),
            Setup::Existing,
        ),
        choice(&["link", "linkwebhook"], session.t("webhook_setup.link"), Setup::Link),
    ];
    let menu = SubMenu::new(
        session.menu(ctx),
        SubMenuOptions::new(session.t("webhook_setup.header")),
    );
    let outcome = menu
        .start(ctx.channel_id(), ctx.author().id, None, (), actions)
        .await?;
    let MenuOutcome::Selected(setup) = outcome else {
        return Ok(None);
    };

    match setup {
        Setup::New => {
            let created = ctx
                .channel_id()
                .create_webhook(ctx.http(), serenity::CreateWebhook::new(name))
                .await?;
            info!("Created Discord webhook {} in {}", created.id, ctx.channel_id());
            Ok(DiscordWebhook::from_serenity(&created))
        }
        Setup::Existing => pick_existing(ctx, session).await,
        Setup::Link => from_link(ctx, session).await,
    }
}

async fn pick_existing(
    ctx: Context<'_>,
    session: &Session,
) -> Result<Option<DiscordWebhook>, Error> {
    let usable: Vec<(String, DiscordWebhook)> = ctx
        .channel_id()
        .webhooks(ctx.http())
        .await?
        .iter()
        .filter_map(|webhook| {
            let name = webhook.name.clone().unwrap_or_else(|| webhook.id.to_string());
            DiscordWebhook::from_serenity(webhook).map(|handle| (name, handle))
        })
        .collect();
    if usable.is_empty() {
        session.say(ctx, session.t("webhook_setup.none_existing")).await?;
        return Ok(None);
    }

    let actions = usable
        .iter()
        .enumerate()
        .map(|(i, (name, handle))| choice(&[handle.id.as_str()], display_name(name, 50), i))
        .collect();
    let menu = SubMenu::new(
        session.menu(ctx),
        SubMenuOptions::new(session.t("webhook_setup.choose_existing")),
    );
    let outcome = menu
        .start(ctx.channel_id(), ctx.author().id, None, (), actions)
        .await?;
    Ok(outcome
        .selected()
        .and_then(|i| usable.get(i))
        .map(|(_, handle)| handle.clone()))
}

async fn from_link(ctx: Context<'_>, session: &Session) -> Result<Option<DiscordWebhook>, Error> {
    let view = MenuView::new(session.t("webhook_setup.link_prompt"));
    let outcome = Prompter::new(session.menu(ctx))
        .get_input(ctx.channel_id(), ctx.author().id, view)
        .await?;
    let Some(link) = outcome.selected() else {
        return Ok(None);
    };
    let Some((id, token)) = parse_webhook_link(&link) else {
        session.say(ctx, session.t("webhook_setup.invalid_link")).await?;
        return Ok(None);
    };

    // The webhook has to exist and belong to this server.
    let verified = ctx
        .http()
        .get_webhook_with_token(serenity::WebhookId::new(id), &token)
        .await;
    match verified {
        Ok(webhook) if webhook.guild_id.is_some() && webhook.guild_id == ctx.guild_id() => {
            Ok(Some(DiscordWebhook {
                id: id.to_string(),
                token,
            }))
        }
        Ok(_) => {
            session.say(ctx, session.t("webhook_setup.invalid_link")).await?;
            Ok(None)
        }
        Err(e) => {
            warn!("Linked webhook {} could not be fetched: {}", id, e);
            session.say(ctx, session.t("webhook_setup.invalid_link")).await?;
            Ok(None)
        }
    }
}

/// Relay events of the current board into this channel
#[poise::command(
    prefix_command,
    aliases("awh"),
    guild_only,
    required_permissions = "MANAGE_WEBHOOKS"
)]
pub async fn addwebhook(ctx: Context<'_>) -> Result<(), Error> {
    let session = Session::load(ctx).await?;
    let Some(guild_id) = ctx.guild_id() else {
        return session.say(ctx, session.t("common.not_in_guild")).await;
    };
    let Some(api) = session.require_auth(ctx).await? else {
        return Ok(());
    };
    let Some(board_id) = session.require_board(ctx).await? else {
        return Ok(());
    };
    let member_id = session.user.trello_id.clone().unwrap_or_default();
    let data = ctx.data();

    let guild = guild_id.to_string();
    let existing = data
        .db
        .run_blocking(move |db| db.list_guild_webhooks(&guild))
        .await?;
    if existing.len() >= GUILD_WEBHOOK_LIMIT {
        return session.say(ctx, session.t("webhook_cmd.limit")).await;
    }

    let board: Board = match typing(ctx, api.get_slim_board(&board_id)).await.and_then(decode) {
        Ok(board) => board,
        Err(RemoteError::NotFound) => return session.board_gone(ctx).await,
        Err(e) => return session.report(ctx, &e).await,
    };

    let Some(discord) = setup_discord_webhook(ctx, &session, WEBHOOK_USERNAME).await? else {
        return Ok(());
    };

    let callback = callback_url(&data.config.webserver_base, &member_id);
    let trello_webhook_id =
        match typing(ctx, ensure_remote_webhook(api.as_ref(), &board.id, &callback)).await {
            Ok(id) => id,
            Err(e) => return session.report(ctx, &e).await,
        };

    let record = WebhookRecord {
        id: 0,
        guild_id: guild_id.to_string(),
        channel_id: ctx.channel_id().to_string(),
        webhook_id: discord.id,
        webhook_token: discord.token,
        model_id: board.id.clone(),
        member_id,
        trello_webhook_id,
        filters: WebhookFilters::all(),
        lists: Vec::new(),
        cards: Vec::new(),
        whitelist: false,
        active: true,
        locale: None,
    };
    let id = data
        .db
        .run_blocking(move |db| db.insert_webhook(&record))
        .await?;
    info!("Webhook {} created for board {} in guild {}", id, board.id, guild_id);

    let name = display_name(&board.name, 50);
    session
        .say(ctx, session.t_with("webhook_cmd.created", &[("board", &name)]))
        .await
}
