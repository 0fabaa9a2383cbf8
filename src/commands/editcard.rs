use super::{choice, typing, Session};
use crate::discord_text::{display_name, split_args};
use crate::menu::prompt::Prompter;
use crate::menu::sub_menu::{MenuAction, SubMenu, SubMenuOptions};
use crate::menu::{MenuOutcome, MenuView};
use crate::trello::{decode, find_card, handle_response, Board, Card, RemoteError};
use crate::{Context, Error};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CardEdit {
    Rename,
    ToggleArchived,
    Describe,
    RemoveDue,
    ToggleDueComplete,
    RemoveDescription,
}

/// Edit a card on the current board
///
/// Usage: `editcard <card> [action] [text]`
#[poise::command(prefix_command, aliases("ecard", "ec"))]
pub async fn editcard(ctx: Context<'_>, #[rest] args: Option<String>) -> Result<(), Error> {
    let session = Session::load(ctx).await?;
    let Some(api) = session.require_auth(ctx).await? else {
        return Ok(());
    };
    let Some(board_id) = session.require_board(ctx).await? else {
        return Ok(());
    };
    let args = split_args(args.as_deref().unwrap_or_default());

    let board: Board = match typing(ctx, api.get_slim_board(&board_id)).await.and_then(decode) {
        Ok(board) => board,
        Err(RemoteError::NotFound) => return session.board_gone(ctx).await,
        Err(e) => return session.report(ctx, &e).await,
    };

    let query = args.first().map(String::as_str).unwrap_or_default();
    let Some(found) = find_card(query, &board.cards) else {
        let board_name = display_name(&board.name, 50);
        return session
            .say(ctx, session.t_with("cards.not_found", &[("board", &board_name)]))
            .await;
    };

    let card: Card = match typing(ctx, api.get_card(&found.id)).await.and_then(decode) {
        Ok(card) => card,
        Err(e) => return session.report(ctx, &e).await,
    };
    let card_name = display_name(&card.name, 50);

    let mut header = format!("**{}** (`{}`)\n", card_name, card.short_link);
    if let Some(due) = card.due.as_deref().and_then(format_due) {
        let mark = if card.due_complete { " ✅" } else { "" };
        header.push_str(&format!("**{}:** {}{}\n", session.t("cards.due"), due, mark));
    }
    header.push('\n');
    header.push_str(&session.t_with("cards.choose", &[("card", &card_name)]));
    let menu = SubMenu::new(session.menu(ctx), SubMenuOptions::new(header));
    let outcome = menu
        .start(
            ctx.channel_id(),
            ctx.author().id,
            args.get(1).map(String::as_str),
            (),
            card_actions(&session, &card),
        )
        .await?;
    let MenuOutcome::Selected(edit) = outcome else {
        return Ok(());
    };

    let given = (args.len() > 2).then(|| args[2..].join(" "));
    let (changes, reply) = match edit {
        CardEdit::Rename => {
            let Some(name) = text_input(ctx, &session, given, "cards.rename_prompt", &card_name).await? else {
                return Ok(());
            };
            let reply = session.t_with("cards.renamed", &[("name", &display_name(&name, 50))]);
            (json!({ "name": name }), reply)
        }
        CardEdit::ToggleArchived => {
            let key = if card.closed { "cards.unarchived" } else { "cards.archived" };
            (json!({ "closed": !card.closed }), session.t_with(key, &[("card", &card_name)]))
        }
        CardEdit::Describe => {
            let Some(desc) = text_input(ctx, &session, given, "cards.description_prompt", &card_name).await? else {
                return Ok(());
            };
            let reply = session.t_with("cards.description_set", &[("card", &card_name)]);
            (json!({ "desc": desc }), reply)
        }
        CardEdit::RemoveDescription => (
            json!({ "desc": "" }),
            session.t_with("cards.description_removed", &[("card", &card_name)]),
        ),
        CardEdit::RemoveDue => (
            json!({ "due": Value::Null }),
            session.t_with("cards.due_removed", &[("card", &card_name)]),
        ),
        CardEdit::ToggleDueComplete => (
            json!({ "dueComplete": !card.due_complete }),
            session.t_with("cards.due_toggled", &[("card", &card_name)]),
        ),
    };

    if let Err(e) = typing(ctx, api.update_card(&card.id, changes))
        .await
        .and_then(handle_response)
    {
        return session.report(ctx, &e).await;
    }
    info!("{} applied {:?} to card {}", session.user.user_id, edit, card.id);
    session.say(ctx, reply).await
}

/// Rows offered for `card`. Due and description rows only appear when the
/// card has them.
fn card_actions(session: &Session, card: &Card) -> Vec<MenuAction<'static, (), CardEdit>> {
    let mut actions = vec![
        choice(&["name", "rename"], session.t("cards.rename"), CardEdit::Rename),
        choice(
            &["archive", "unarchive", "open", "close"],
            session.t(if card.closed { "cards.unarchive" } else { "cards.archive" }),
            CardEdit::ToggleArchived,
        ),
        choice(&["desc", "description"], session.t("cards.description"), CardEdit::Describe),
    ];
    if card.due.is_some() {
        actions.push(choice(
            &["removedue", "rdue"],
            session.t("cards.remove_due"),
            CardEdit::RemoveDue,
        ));
        actions.push(choice(
            &["duecomplete", "duedone"],
            session.t(if card.due_complete {
                "cards.uncomplete_due"
            } else {
                "cards.complete_due"
            }),
            CardEdit::ToggleDueComplete,
        ));
    }
    if !card.desc.is_empty() {
        actions.push(choice(
            &["removedesc", "removedescription", "rdesc"],
            session.t("cards.remove_description"),
            CardEdit::RemoveDescription,
        ));
    }
    actions
}

/// Trello due dates are RFC 3339; shown in UTC.
fn format_due(due: &str) -> Option<String> {
    let parsed = DateTime::parse_from_rfc3339(due).ok()?;
    Some(parsed.with_timezone(&Utc).format("%Y-%m-%d %H:%M UTC").to_string())
}

/// Text given on the command line, otherwise asked for.
async fn text_input(
    ctx: Context<'_>,
    session: &Session,
    given: Option<String>,
    prompt_key: &str,
    card_name: &str,
) -> Result<Option<String>, Error> {
    if let Some(given) = given {
        return Ok(Some(given));
    }
    let view = MenuView::new(session.t_with(prompt_key, &[("card", card_name)]));
    let outcome = Prompter::new(session.menu(ctx))
        .get_input(ctx.channel_id(), ctx.author().id, view)
        .await?;
    Ok(outcome.selected().filter(|text| !text.trim().is_empty()))
}
