use super::{choice, typing, Session};
use crate::db::{Database, UserRecord};
use crate::discord_text::display_name;
use crate::menu::sub_menu::{SubMenu, SubMenuOptions};
use crate::menu::MenuOutcome;
use crate::trello::{decode, find_board, Board, BoardApi, Member, RemoteError};
use crate::{Context, Error};
use thiserror::Error;
use tracing::info;

/// Where a board switch ended.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Selection {
    /// No query; the caller picks one of these open boards.
    Choose(Vec<Board>),
    Switched(Board),
    Already(Board),
    NotFound,
}

impl Selection {
    pub fn reply_key(&self) -> &'static str {
        match self {
            Selection::Choose(_) => "boards.choose",
            Selection::Switched(_) => "boards.switched",
            Selection::Already(_) => "boards.already",
            Selection::NotFound => "boards.not_found",
        }
    }
}

#[derive(Debug, Error)]
pub(crate) enum SwitchError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Resolves `query` against the member's boards and stores the match as the
/// user's current board. A miss changes nothing.
pub(crate) async fn select_board(
    db: &Database,
    api: &dyn BoardApi,
    user: &UserRecord,
    query: &str,
) -> Result<Selection, SwitchError> {
    let member_id = user.trello_id.clone().unwrap_or_default();
    let member: Member = decode(api.get_member(&member_id).await?)?;

    let query = query.trim();
    if query.is_empty() {
        let open: Vec<Board> = member.boards.into_iter().filter(|b| !b.closed).collect();
        if open.is_empty() {
            return Ok(Selection::NotFound);
        }
        return Ok(Selection::Choose(open));
    }
    match find_board(query, &member.boards) {
        Some(board) => Ok(commit_board(db, user, board.clone()).await?),
        None => Ok(Selection::NotFound),
    }
}

/// Makes `board` the user's current board unless it already is.
pub(crate) async fn commit_board(
    db: &Database,
    user: &UserRecord,
    board: Board,
) -> anyhow::Result<Selection> {
    if user.current_board.as_deref() == Some(board.id.as_str()) {
        return Ok(Selection::Already(board));
    }
    let user_id = user.user_id.clone();
    let board_id = board.id.clone();
    db.run_blocking(move |db| db.set_current_board(&user_id, Some(&board_id)))
        .await?;
    info!("{} switched to board {}", user.user_id, board.id);
    Ok(Selection::Switched(board))
}

/// Select the board the other commands work on
#[poise::command(prefix_command, aliases("switchboard", "select", "selectboard"))]
pub async fn switch(ctx: Context<'_>, #[rest] query: Option<String>) -> Result<(), Error> {
    let session = Session::load(ctx).await?;
    let Some(api) = session.require_auth(ctx).await? else {
        return Ok(());
    };
    let db = &ctx.data().db;
    let query = query.unwrap_or_default();

    let selection = match typing(ctx, select_board(db, api.as_ref(), &session.user, &query)).await {
        Ok(selection) => selection,
        Err(SwitchError::Remote(RemoteError::NotFound)) => {
            session.forget_auth(ctx).await?;
            return session
                .say(ctx, session.t("trello_response.unauthorized"))
                .await;
        }
        Err(SwitchError::Remote(e)) => return session.report(ctx, &e).await,
        Err(SwitchError::Store(e)) => return Err(e.into()),
    };

    let selection = match selection {
        Selection::Choose(boards) => match choose_board(ctx, &session, boards).await? {
            Some(board) => commit_board(db, &session.user, board).await?,
            // The menu already shows why it closed.
            None => return Ok(()),
        },
        other => other,
    };

    let reply = match &selection {
        Selection::Switched(board) | Selection::Already(board) => {
            let name = display_name(&board.name, 50);
            session.t_with(selection.reply_key(), &[("board", &name)])
        }
        _ => session.t(selection.reply_key()),
    };
    session.say(ctx, reply).await
}

/// Paged pick over the member's open boards. `None` when nothing was chosen.
async fn choose_board(
    ctx: Context<'_>,
    session: &Session,
    open: Vec<Board>,
) -> Result<Option<Board>, Error> {
    let actions = open
        .iter()
        .enumerate()
        .map(|(i, board)| {
            choice(
                &[board.short_link.as_str(), board.id.as_str()],
                format!("{} (`{}`)", display_name(&board.name, 50), board.short_link),
                i,
            )
        })
        .collect();
    let menu = SubMenu::new(
        session.menu(ctx),
        SubMenuOptions::new(session.t("boards.choose")),
    );
    let outcome = menu
        .start(ctx.channel_id(), ctx.author().id, None, (), actions)
        .await?;
    Ok(match outcome {
        MenuOutcome::Selected(i) => open.into_iter().nth(i),
        MenuOutcome::Cancelled | MenuOutcome::TimedOut => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::in_memory;
    use crate::trello::testing::MockBoardApi;
    use crate::trello::RemoteResponse;
    use serde_json::json;

    fn member_api() -> MockBoardApi {
        let api = MockBoardApi::new();
        api.respond(
            "get_member",
            RemoteResponse::ok(json!({
                "id": "t1",
                "boards": [
                    {"id": "b1", "name": "Roadmap", "shortLink": "aaa111"},
                    {"id": "b2", "name": "Bugs", "shortLink": "bbb222"},
                    {"id": "b3", "name": "Old", "shortLink": "ccc333", "closed": true}
                ]
            })),
        );
        api
    }

    fn authed_user(db: &Database) -> UserRecord {
        db.set_user_auth("u1", "t1", "tok").unwrap();
        db.set_current_board("u1", Some("b1")).unwrap();
        db.get_user("u1").unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_no_match_keeps_current_board() {
        let db = in_memory();
        let api = member_api();
        let user = authed_user(&db);

        let selection = select_board(&db, &api, &user, "nothing like it").await.unwrap();
        assert_eq!(selection, Selection::NotFound);
        assert_eq!(selection.reply_key(), "boards.not_found");

        let stored = db.get_user("u1").unwrap().unwrap();
        assert_eq!(stored.current_board.as_deref(), Some("b1"));
        assert_eq!(api.calls(), vec!["get_member:t1"]);
    }

    #[tokio::test]
    async fn test_match_switches_board() {
        let db = in_memory();
        let api = member_api();
        let user = authed_user(&db);

        let selection = select_board(&db, &api, &user, "bbb222").await.unwrap();
        assert!(matches!(&selection, Selection::Switched(board) if board.id == "b2"));
        let stored = db.get_user("u1").unwrap().unwrap();
        assert_eq!(stored.current_board.as_deref(), Some("b2"));

        let again = select_board(&db, &api, &user, "roadmap").await.unwrap();
        assert_eq!(again.reply_key(), "boards.already");
    }

    #[tokio::test]
    async fn test_empty_query_offers_open_boards() {
        let db = in_memory();
        let api = member_api();
        let user = authed_user(&db);

        let Selection::Choose(open) = select_board(&db, &api, &user, "  ").await.unwrap() else {
            panic!("expected a board menu");
        };
        let ids: Vec<&str> = open.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["b1", "b2"]);
        assert_eq!(db.get_user("u1").unwrap().unwrap().current_board.as_deref(), Some("b1"));
    }

    #[tokio::test]
    async fn test_missing_member_is_remote_error() {
        let db = in_memory();
        let api = MockBoardApi::new();
        api.respond("get_member", RemoteResponse::from_text(404, "model not found"));
        let user = authed_user(&db);

        let result = select_board(&db, &api, &user, "Roadmap").await;
        assert!(matches!(result, Err(SwitchError::Remote(RemoteError::NotFound))));
    }
}
