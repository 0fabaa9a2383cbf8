use poise::serenity_prelude as serenity;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use taco::locale::Locales;
use taco::menu::{CollectorEvent, CollectorHub};
use taco::trello::TrelloClients;
use taco::typing::TypingTracker;
use taco::webhooks::dispatch::{DiscordWebhookSink, WebhookDispatcher};
use taco::{commands, config::Config, db::Database, webserver, Data, Error};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

async fn on_error(error: poise::FrameworkError<'_, Data, Error>) {
    match error {
        poise::FrameworkError::Command { error, ctx, .. } => {
            error!("Command {} failed: {}", ctx.command().qualified_name, error);
            let locale = ctx.data().locales.get(None);
            if let Err(e) = ctx.say(locale.t("common.error")).await {
                warn!("Could not report command failure: {}", e);
            }
        }
        poise::FrameworkError::GuildOnly { ctx, .. } => {
            let locale = ctx.data().locales.get(None);
            let _ = ctx.say(locale.t("common.not_in_guild")).await;
        }
        poise::FrameworkError::MissingUserPermissions { ctx, .. } => {
            let locale = ctx.data().locales.get(None);
            let _ = ctx.say(locale.t("common.no_permission")).await;
        }
        other => {
            if let Err(e) = poise::builtins::on_error(other).await {
                error!("Error while handling error: {}", e);
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    debug!("Loaded {:?}", config);
    let discord_token = config.discord_token.clone();
    let prefix = config.prefix.clone();
    let owners = config
        .owner_id
        .map(|id| HashSet::from([serenity::UserId::new(id)]))
        .unwrap_or_default();

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: commands::all(),
            prefix_options: poise::PrefixFrameworkOptions {
                prefix: Some(prefix),
                mention_as_prefix: true,
                case_insensitive_commands: true,
                ..Default::default()
            },
            owners,
            on_error: |error| Box::pin(on_error(error)),
            event_handler: |_ctx, event, _framework, data| {
                Box::pin(async move {
                    let routed = match event {
                        serenity::FullEvent::ReactionAdd { add_reaction } => {
                            CollectorEvent::from_reaction(add_reaction)
                        }
                        serenity::FullEvent::Message { new_message } => {
                            CollectorEvent::from_message(new_message)
                        }
                        _ => None,
                    };
                    if let Some(event) = routed {
                        data.hub.dispatch(event);
                    }
                    Ok(())
                })
            },
            ..Default::default()
        })
        .setup(|ctx, ready, _framework| {
            Box::pin(async move {
                info!("Logged in as {}", ready.user.name);

                let db = Database::new(&config)?;
                db.execute_init()?;
                let locales = Arc::new(Locales::load(
                    config.locale_dir.as_deref().map(Path::new),
                    &config.default_locale,
                )?);

                let hub = Arc::new(CollectorHub::new());
                hub.set_self_id(ready.user.id);

                let dispatcher = Arc::new(WebhookDispatcher::new(
                    db.clone(),
                    locales.clone(),
                    Arc::new(DiscordWebhookSink::new(ctx.http.clone())),
                ));
                let port = config.webserver_port;
                tokio::spawn(async move {
                    if let Err(e) = webserver::serve(port, dispatcher).await {
                        error!("Webhook server stopped: {}", e);
                    }
                });

                let trello = Arc::new(TrelloClients::new(
                    reqwest::Client::new(),
                    config.trello_key.clone(),
                ));

                Ok(Data {
                    config,
                    db,
                    hub,
                    locales,
                    trello,
                    typing: TypingTracker::new(),
                })
            })
        })
        .build();

    let intents = serenity::GatewayIntents::non_privileged()
        | serenity::GatewayIntents::MESSAGE_CONTENT
        | serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::GUILD_MESSAGE_REACTIONS
        | serenity::GatewayIntents::DIRECT_MESSAGE_REACTIONS;

    let mut client = serenity::ClientBuilder::new(&discord_token, intents)
        .framework(framework)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create client: {}", e))?;

    info!("Starting bot...");
    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
    }

    Ok(())
}
