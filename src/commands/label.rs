use super::{choice, typing, Session};
use crate::discord_text::{cutoff_text, display_name, escape_markdown};
use crate::menu::sub_menu::{SubMenu, SubMenuOptions};
use crate::menu::MenuOutcome;
use crate::trello::{decode, find_label, label_color, Label, RemoteError};
use crate::{Context, Error};
use poise::serenity_prelude as serenity;

/// Show a label of the current board
#[poise::command(prefix_command, aliases("viewlabel", "vlb"))]
pub async fn label(ctx: Context<'_>, #[rest] query: Option<String>) -> Result<(), Error> {
    let session = Session::load(ctx).await?;
    let Some(api) = session.require_auth(ctx).await? else {
        return Ok(());
    };
    let Some(board_id) = session.require_board(ctx).await? else {
        return Ok(());
    };

    let labels: Vec<Label> = match typing(ctx, api.get_labels(&board_id)).await.and_then(decode) {
        Ok(labels) => labels,
        Err(RemoteError::NotFound) => return session.board_gone(ctx).await,
        Err(e) => return session.report(ctx, &e).await,
    };

    let query = query.unwrap_or_default();
    let label = if query.trim().is_empty() && !labels.is_empty() {
        match choose_label(ctx, &session, &labels).await? {
            Some(label) => label,
            None => return Ok(()),
        }
    } else {
        match find_label(&query, &labels) {
            Some(label) => label,
            None => {
                return session.say(ctx, session.t("labels.not_found")).await
            }
        }
    };

    let embed = label_embed(&session, label);
    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

fn label_title(session: &Session, label: &Label) -> String {
    if label.name.is_empty() {
        session.t("labels.unnamed")
    } else {
        cutoff_text(&escape_markdown(&label.name), 256)
    }
}

fn label_embed(session: &Session, label: &Label) -> serenity::CreateEmbed {
    let mut description = format!("**{}:** `{}`\n", session.t("labels.id"), label.id);
    if let Some(color) = &label.color {
        description.push_str(&format!(
            "**{}:** {}\n",
            session.t("labels.color"),
            session.t(&format!("label_colors.{}", color))
        ));
    }
    serenity::CreateEmbed::new()
        .title(label_title(session, label))
        .description(description)
        .color(label_color(label.color.as_deref()))
}

async fn choose_label<'l>(
    ctx: Context<'_>,
    session: &Session,
    labels: &'l [Label],
) -> Result<Option<&'l Label>, Error> {
    let actions = labels
        .iter()
        .enumerate()
        .map(|(i, label)| {
            let title = if label.name.is_empty() {
                session.t("labels.unnamed")
            } else {
                display_name(&label.name, 50)
            };
            choice(&[label.id.as_str()], title, i)
        })
        .collect();
    let menu = SubMenu::new(
        session.menu(ctx),
        SubMenuOptions::new(session.t("labels.choose")),
    );
    let outcome = menu
        .start(ctx.channel_id(), ctx.author().id, None, (), actions)
        .await?;
    Ok(match outcome {
        MenuOutcome::Selected(i) => labels.get(i),
        MenuOutcome::Cancelled | MenuOutcome::TimedOut => None,
    })
}
