use super::addwebhook::{setup_discord_webhook, DiscordWebhook};
use super::{choice, typing, Session};
use crate::db::{Database, WebhookRecord};
use crate::discord_text::{display_name, split_args};
use crate::filters::{WebhookFilters, FILTER_GROUPS};
use crate::menu::multi_select::{sync_group, MultiSelect, MultiSelectOptions, SelectItem};
use crate::menu::prompt::Prompter;
use crate::locale::Locale;
use crate::menu::sub_menu::{ActionFuture, MenuAction, SubMenu, SubMenuOptions};
use crate::menu::{MenuOutcome, MenuView};
use crate::trello::{decode, Board, BoardApi, List, RemoteError};
use crate::webhooks::dispatch::WEBHOOK_USERNAME;
use crate::webhooks::lifecycle::{delete_subscription, repair_remote_webhook};
use crate::{Context, Error};
use tracing::info;

/// Edits that need more interaction after the menu closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WebhookEdit {
    Filters,
    Locale,
    Repair,
    Delete,
    Lists,
    Cards,
}

/// Handed to the row the user picks.
struct EditTarget {
    db: Database,
    record: WebhookRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Applied by the row itself; reply with this key.
    Done(&'static str),
    Follow(WebhookEdit),
}

/// Edit one of this server's webhooks
///
/// Usage: `editwebhook <id> [action] [value]`
#[poise::command(
    prefix_command,
    aliases("ewebhook", "ewh"),
    guild_only,
    required_permissions = "MANAGE_WEBHOOKS"
)]
pub async fn editwebhook(ctx: Context<'_>, #[rest] args: Option<String>) -> Result<(), Error> {
    let session = Session::load(ctx).await?;
    let Some(guild_id) = ctx.guild_id() else {
        return session.say(ctx, session.t("common.not_in_guild")).await;
    };
    let Some(api) = session.require_auth(ctx).await? else {
        return Ok(());
    };
    let args = split_args(args.as_deref().unwrap_or_default());

    let Some(id) = args
        .first()
        .and_then(|a| a.parse::<i64>().ok())
        .filter(|id| *id >= 1)
    else {
        return session.say(ctx, session.t("webhook_cmd.invalid")).await;
    };
    let guild = guild_id.to_string();
    let record = ctx
        .data()
        .db
        .run_blocking(move |db| db.get_webhook(&guild, id))
        .await?;
    let Some(record) = record else {
        return session.say(ctx, session.t("webhook_cmd.not_found")).await;
    };

    let language = match &record.locale {
        Some(code) => code.clone(),
        None => format!("*{}*", session.t("webhook_cmd.locale_unset_label")),
    };
    let header = format!(
        "**{}:** {}\n\n{}",
        session.t("webhook_cmd.locale_label"),
        language,
        session.t_with(
            "webhook_cmd.menu",
            &[("id", &record.id.to_string()), ("board", &record.model_id)]
        )
    );
    let menu = SubMenu::new(session.menu(ctx), SubMenuOptions::new(header));
    let target = EditTarget {
        db: ctx.data().db.clone(),
        record: record.clone(),
    };
    let outcome = menu
        .start(
            ctx.channel_id(),
            ctx.author().id,
            args.get(1).map(String::as_str),
            target,
            webhook_actions(&session.locale, &record),
        )
        .await?;
    let MenuOutcome::Selected(step) = outcome else {
        return Ok(());
    };
    info!("{} editing webhook {}: {:?}", session.user.user_id, record.id, step);

    match step {
        Step::Done(key) => session.say(ctx, session.t(key)).await,
        Step::Follow(WebhookEdit::Filters) => edit_filters(ctx, &session, &record).await,
        Step::Follow(WebhookEdit::Locale) => {
            change_locale(ctx, &session, &record, args.get(2)).await
        }
        Step::Follow(WebhookEdit::Repair) => repair(ctx, &session, api.as_ref(), &record).await,
        Step::Follow(WebhookEdit::Delete) => delete(ctx, &session, &record).await,
        Step::Follow(WebhookEdit::Lists) => {
            edit_lists(ctx, &session, api.as_ref(), &record).await
        }
        Step::Follow(WebhookEdit::Cards) => {
            edit_cards(ctx, &session, api.as_ref(), &record).await
        }
    }
}

fn webhook_actions(
    locale: &Locale,
    record: &WebhookRecord,
) -> Vec<MenuAction<'static, EditTarget, Step>> {
    vec![
        toggle_active(locale.t(if record.active {
            "webhook_cmd.deactivate"
        } else {
            "webhook_cmd.activate"
        })),
        follow(
            &["editfilters", "filter", "filters"],
            locale.t("webhook_cmd.edit_filters"),
            WebhookEdit::Filters,
        ),
        follow(
            &["locale", "setlocale", "lang"],
            locale.t("webhook_cmd.set_locale"),
            WebhookEdit::Locale,
        ),
        follow(&["repair", "fix"], locale.t("webhook_cmd.repair"), WebhookEdit::Repair),
        follow(&["delete", "remove"], locale.t("webhook_cmd.delete"), WebhookEdit::Delete),
        toggle_whitelist(locale.t(if record.whitelist {
            "webhook_cmd.use_blacklist"
        } else {
            "webhook_cmd.use_whitelist"
        })),
        follow(
            &["editlists", "lists", "list"],
            format!("{} ({})", locale.t("webhook_cmd.edit_lists"), record.lists.len()),
            WebhookEdit::Lists,
        ),
        follow(
            &["editcards", "cards", "card"],
            format!("{} ({})", locale.t("webhook_cmd.edit_cards"), record.cards.len()),
            WebhookEdit::Cards,
        ),
    ]
}

fn follow(names: &[&str], title: String, edit: WebhookEdit) -> MenuAction<'static, EditTarget, Step> {
    choice(names, title, Step::Follow(edit))
}

fn toggle_active(title: String) -> MenuAction<'static, EditTarget, Step> {
    let names = ["activate", "deactivate", "enable", "disable"];
    MenuAction::new(&names, title, |target: EditTarget| {
        Box::pin(async move {
            let (id, active) = (target.record.id, !target.record.active);
            target
                .db
                .run_blocking(move |db| db.set_webhook_active(id, active))
                .await?;
            Ok(Step::Done(if active {
                "webhook_cmd.activated"
            } else {
                "webhook_cmd.deactivated"
            }))
        }) as ActionFuture<'static, Step>
    })
}

/// The reply names the list mode now in force.
fn toggle_whitelist(title: String) -> MenuAction<'static, EditTarget, Step> {
    let names = ["whitelist", "wlist", "blacklist", "blist"];
    MenuAction::new(&names, title, |target: EditTarget| {
        Box::pin(async move {
            let (id, whitelist) = (target.record.id, !target.record.whitelist);
            target
                .db
                .run_blocking(move |db| db.set_webhook_whitelist(id, whitelist))
                .await?;
            Ok(Step::Done(if whitelist {
                "webhook_cmd.whitelist_on"
            } else {
                "webhook_cmd.blacklist_on"
            }))
        }) as ActionFuture<'static, Step>
    })
}

/// Checklist rows for the filter editor: one header per group followed by
/// its flags.
fn filter_items(session: &Session, filters: &WebhookFilters) -> Result<Vec<SelectItem>, Error> {
    let mut items = Vec::new();
    for (group, flags) in FILTER_GROUPS {
        let label = format!(
            "`━━` **{}**",
            session.t(&format!("webhook_filter_group.{}", group))
        );
        items.push(SelectItem::group_header(*group, label, filters.has_all(*flags)?));
        for flag in flags.iter() {
            let label = session.t(&format!("webhook_filters.{}", flag));
            items.push(SelectItem::new(*flag, label, filters.has_named(flag)?).in_group(*group));
        }
    }
    Ok(items)
}

/// Flags of the checked non-header rows.
fn selected_filters(items: &[SelectItem]) -> Result<WebhookFilters, Error> {
    let names = items
        .iter()
        .filter(|item| !item.header && item.value)
        .map(|item| item.id.as_str());
    Ok(WebhookFilters::from_names(names)?)
}

async fn edit_filters(
    ctx: Context<'_>,
    session: &Session,
    record: &WebhookRecord,
) -> Result<(), Error> {
    let items = filter_items(session, &record.filters)?;
    let mut selector = MultiSelect::new(
        session.menu(ctx),
        MultiSelectOptions::default().header(session.t("webhook_cmd.filters_header")),
        items,
    );
    selector.on_update(sync_group);
    let outcome = selector.start(ctx.channel_id(), ctx.author().id).await?;
    let Some(items) = outcome.selected() else {
        return Ok(());
    };

    let filters = selected_filters(&items)?;
    let count = filters.flags().len();
    let id = record.id;
    ctx.data()
        .db
        .run_blocking(move |db| db.set_webhook_filters(id, &filters))
        .await?;
    session
        .say(
            ctx,
            session.t_with("webhook_cmd.filters_saved", &[("count", &count.to_string())]),
        )
        .await
}

async fn change_locale(
    ctx: Context<'_>,
    session: &Session,
    record: &WebhookRecord,
    given: Option<&String>,
) -> Result<(), Error> {
    let locales = &ctx.data().locales;
    let code = match given {
        Some(code) => code.clone(),
        None => {
            let view = MenuView::new(session.t_with(
                "webhook_cmd.locale_prompt",
                &[("locales", &locales.codes().join(", "))],
            ));
            let outcome = Prompter::new(session.menu(ctx))
                .get_input(ctx.channel_id(), ctx.author().id, view)
                .await?;
            match outcome.selected() {
                Some(code) => code,
                None => return Ok(()),
            }
        }
    };
    let code = code.trim().to_lowercase();

    let locale = match code.as_str() {
        "unset" | "none" | "default" => None,
        known if locales.contains(known) => Some(code.clone()),
        _ => {
            return session
                .say(ctx, session.t_with("webhook_cmd.locale_unknown", &[("locale", &code)]))
                .await
        }
    };
    let id = record.id;
    let stored = locale.clone();
    ctx.data()
        .db
        .run_blocking(move |db| db.set_webhook_locale(id, stored.as_deref()))
        .await?;
    match locale {
        Some(code) => {
            session
                .say(ctx, session.t_with("webhook_cmd.locale_set", &[("locale", &code)]))
                .await
        }
        None => session.say(ctx, session.t("webhook_cmd.locale_unset")).await,
    }
}

/// Restores both ends of a subscription: the channel webhook (found again,
/// or set up anew) and the Trello webhook.
async fn repair(
    ctx: Context<'_>,
    session: &Session,
    api: &dyn BoardApi,
    record: &WebhookRecord,
) -> Result<(), Error> {
    let data = ctx.data();
    let Some(guild_id) = ctx.guild_id() else {
        return session.say(ctx, session.t("common.not_in_guild")).await;
    };

    let current = guild_id
        .webhooks(ctx.http())
        .await?
        .into_iter()
        .find(|w| w.id.to_string() == record.webhook_id);
    let discord = match current {
        Some(webhook) => DiscordWebhook::from_serenity(&webhook).unwrap_or(DiscordWebhook {
            id: record.webhook_id.clone(),
            token: record.webhook_token.clone(),
        }),
        None => match setup_discord_webhook(ctx, session, WEBHOOK_USERNAME).await? {
            Some(webhook) => webhook,
            None => return Ok(()),
        },
    };

    let acting_member = session.user.trello_id.clone().unwrap_or_default();
    let repaired = typing(
        ctx,
        repair_remote_webhook(
            &data.db,
            data.trello.as_ref(),
            api,
            &acting_member,
            record,
            &data.config.webserver_base,
        ),
    )
    .await;
    let binding = match repaired {
        Ok(binding) => binding,
        Err(e) => return session.report(ctx, &e).await,
    };

    let id = record.id;
    data.db
        .run_blocking(move |db| {
            db.set_webhook_delivery(
                id,
                &discord.id,
                &discord.token,
                &binding.trello_webhook_id,
                &binding.member_id,
            )
        })
        .await?;
    info!("Webhook {} repaired", record.id);
    session.say(ctx, session.t("webhook_cmd.repaired")).await
}

async fn delete(ctx: Context<'_>, session: &Session, record: &WebhookRecord) -> Result<(), Error> {
    let view = MenuView::new(session.t_with(
        "webhook_cmd.delete_confirm",
        &[("id", &record.id.to_string())],
    ));
    let outcome = Prompter::new(session.menu(ctx))
        .confirm(ctx.channel_id(), ctx.author().id, view)
        .await?;
    if outcome != MenuOutcome::Selected(true) {
        return Ok(());
    }
    let data = ctx.data();
    delete_subscription(&data.db, data.trello.as_ref(), record).await?;
    session.say(ctx, session.t("webhook_cmd.deleted")).await
}

/// Board contents are out of reach for the caller.
async fn no_access(ctx: Context<'_>, session: &Session, err: RemoteError) -> Result<(), Error> {
    match err {
        RemoteError::NotFound | RemoteError::Unauthorized => {
            session.say(ctx, session.t("webhook_cmd.no_access")).await
        }
        other => session.report(ctx, &other).await,
    }
}

async fn edit_lists(
    ctx: Context<'_>,
    session: &Session,
    api: &dyn BoardApi,
    record: &WebhookRecord,
) -> Result<(), Error> {
    let lists: Vec<List> = match typing(ctx, api.get_lists(&record.model_id))
        .await
        .and_then(decode)
    {
        Ok(lists) => lists,
        Err(e) => return no_access(ctx, session, e).await,
    };

    let items = lists
        .iter()
        .map(|list| {
            let label = format!(
                "{}{} ({})",
                if list.subscribed { "🔔 " } else { "" },
                display_name(&list.name, 25),
                session.t_with(
                    "webhook_cmd.card_count",
                    &[("count", &list.cards.len().to_string())]
                )
            );
            SelectItem::new(list.id.as_str(), label, record.lists.contains(&list.id))
        })
        .collect();
    let selector = MultiSelect::new(
        session.menu(ctx),
        MultiSelectOptions::default().header(session.t("webhook_cmd.lists_header")),
        items,
    );
    let outcome = selector.start(ctx.channel_id(), ctx.author().id).await?;
    let Some(items) = outcome.selected() else {
        return Ok(());
    };

    let chosen = checked_ids(&items);
    let count = chosen.len().to_string();
    let id = record.id;
    ctx.data()
        .db
        .run_blocking(move |db| db.set_webhook_lists(id, &chosen))
        .await?;
    session
        .say(ctx, session.t_with("webhook_cmd.lists_saved", &[("count", &count)]))
        .await
}

async fn edit_cards(
    ctx: Context<'_>,
    session: &Session,
    api: &dyn BoardApi,
    record: &WebhookRecord,
) -> Result<(), Error> {
    let board: Board = match typing(ctx, api.get_slim_board(&record.model_id))
        .await
        .and_then(decode)
    {
        Ok(board) => board,
        Err(e) => return no_access(ctx, session, e).await,
    };

    let items = board
        .cards
        .iter()
        .map(|card| {
            let mut label = format!(
                "{}{}{}",
                if card.closed { "🗃️ " } else { "" },
                if card.subscribed { "🔔 " } else { "" },
                display_name(&card.name, 50)
            );
            if let Some(list) = board.lists.iter().find(|l| l.id == card.id_list) {
                label.push_str(&format!(
                    " ({})",
                    session.t_with("webhook_cmd.in_list", &[("list", &display_name(&list.name, 25))])
                ));
            }
            SelectItem::new(card.id.as_str(), label, record.cards.contains(&card.id))
        })
        .collect();
    let selector = MultiSelect::new(
        session.menu(ctx),
        MultiSelectOptions::default().header(session.t("webhook_cmd.cards_header")),
        items,
    );
    let outcome = selector.start(ctx.channel_id(), ctx.author().id).await?;
    let Some(items) = outcome.selected() else {
        return Ok(());
    };

    let chosen = checked_ids(&items);
    let count = chosen.len().to_string();
    let id = record.id;
    ctx.data()
        .db
        .run_blocking(move |db| db.set_webhook_cards(id, &chosen))
        .await?;
    session
        .say(ctx, session.t_with("webhook_cmd.cards_saved", &[("count", &count)]))
        .await
}

fn checked_ids(items: &[SelectItem]) -> Vec<String> {
    items
        .iter()
        .filter(|item| item.value)
        .map(|item| item.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{in_memory, sample_webhook};
    use crate::locale::Locales;
    use crate::menu::testing::{self, RecordingTarget, CHANNEL, USER};
    use crate::menu::{CollectorHub, MenuLabels};
    use poise::serenity_prelude::{ChannelId, UserId};

    async fn pick(db: &Database, record: &WebhookRecord, input: &str) -> MenuOutcome<Step> {
        let hub = CollectorHub::new();
        let target = RecordingTarget::new();
        let labels = MenuLabels::default();
        let locale = Locales::embedded().unwrap().get(None);
        let menu = SubMenu::new(
            testing::env(&hub, &target, &labels, 1000),
            SubMenuOptions::new("webhook"),
        );
        let edit = EditTarget {
            db: db.clone(),
            record: record.clone(),
        };
        menu.start(
            ChannelId::new(CHANNEL),
            UserId::new(USER),
            Some(input),
            edit,
            webhook_actions(&locale, record),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_toggle_rows_persist_through_context() {
        let db = in_memory();
        let id = db.insert_webhook(&sample_webhook("g1", "b1", "tw1")).unwrap();
        let record = db.get_webhook("g1", id).unwrap().unwrap();

        let outcome = pick(&db, &record, "disable").await;
        assert_eq!(outcome, MenuOutcome::Selected(Step::Done("webhook_cmd.deactivated")));
        let stored = db.get_webhook("g1", id).unwrap().unwrap();
        assert!(!stored.active);

        let outcome = pick(&db, &stored, "whitelist").await;
        assert_eq!(outcome, MenuOutcome::Selected(Step::Done("webhook_cmd.whitelist_on")));
        assert!(db.get_webhook("g1", id).unwrap().unwrap().whitelist);
    }

    #[tokio::test]
    async fn test_interactive_rows_leave_record_alone() {
        let db = in_memory();
        let id = db.insert_webhook(&sample_webhook("g1", "b1", "tw1")).unwrap();
        let record = db.get_webhook("g1", id).unwrap().unwrap();

        let outcome = pick(&db, &record, "filters").await;
        assert_eq!(outcome, MenuOutcome::Selected(Step::Follow(WebhookEdit::Filters)));
        assert_eq!(db.get_webhook("g1", id).unwrap().unwrap(), record);
    }

    #[test]
    fn test_selected_filters_ignore_headers() {
        let mut items = vec![
            SelectItem::group_header("label", "Labels", false),
            SelectItem::new("CREATE_LABEL", "Created", false).in_group("label"),
            SelectItem::new("DELETE_LABEL", "Deleted", false).in_group("label"),
        ];
        items[0].value = true;
        sync_group(&mut items, 0);

        let filters = selected_filters(&items).unwrap();
        assert_eq!(
            filters,
            WebhookFilters::from_names(["CREATE_LABEL", "DELETE_LABEL"]).unwrap()
        );
    }

    #[test]
    fn test_checked_ids() {
        let items = vec![
            SelectItem::new("l1", "Todo", true),
            SelectItem::new("l2", "Doing", false),
            SelectItem::new("l3", "Done", true),
        ];
        assert_eq!(checked_ids(&items), vec!["l1", "l3"]);
    }
}
