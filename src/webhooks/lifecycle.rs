//! Creating, repairing and removing subscriptions
//!
//! Several subscriptions may share one Trello webhook (same member, same
//! board, same callback). The remote webhook lives as long as at least one
//! record references it.

use crate::db::{Database, WebhookRecord};
use crate::trello::{
    decode, handle_response, BoardApi, BoardApiFactory, RemoteError, TrelloWebhook,
    DUPLICATE_WEBHOOK,
};
use reqwest::Url;
use serde_json::json;
use tracing::{info, warn};

/// Callback URL Trello posts to for events seen by `member_id`.
pub fn callback_url(base: &str, member_id: &str) -> String {
    if base.ends_with('/') {
        format!("{}{}", base, member_id)
    } else {
        format!("{}/{}", base, member_id)
    }
}

/// Splits a Discord webhook URL into id and token. Angle brackets from
/// suppressed embeds and a trailing slash are tolerated.
pub fn parse_webhook_link(link: &str) -> Option<(u64, String)> {
    let link = link.trim().trim_start_matches('<').trim_end_matches('>');
    let mut url = Url::parse(link).ok()?;
    let path = url.path().trim_end_matches('/').to_string();
    url.set_path(&path);
    let (id, token) = serenity::utils::parse_webhook(&url)?;
    Some((id.get(), token.to_string()))
}

/// Deletes a subscription and, if it was the last one on its Trello
/// webhook, the Trello webhook too.
///
/// Returns whether the remote webhook was deleted.
pub async fn delete_subscription(
    db: &Database,
    apis: &dyn BoardApiFactory,
    record: &WebhookRecord,
) -> anyhow::Result<bool> {
    let id = record.id;
    let remote_id = record.trello_webhook_id.clone();
    let member_id = record.member_id.clone();
    let (remaining, owner) = db
        .run_blocking(move |db| {
            db.delete_webhook(id)?;
            let remaining = db.count_by_trello_webhook(&remote_id)?;
            let owner = if remaining == 0 {
                db.get_user_by_trello_id(&member_id)?
            } else {
                None
            };
            Ok((remaining, owner))
        })
        .await?;
    info!("Deleted webhook {} ({} siblings left)", record.id, remaining);

    if remaining > 0 {
        return Ok(false);
    }
    let Some(token) = owner.and_then(|o| o.trello_token) else {
        warn!(
            "No stored token for member {}, leaving Trello webhook {}",
            record.member_id, record.trello_webhook_id
        );
        return Ok(false);
    };
    let api = apis.with_token(&token);
    match api
        .delete_webhook(&record.trello_webhook_id)
        .await
        .and_then(handle_response)
    {
        Ok(_) => Ok(true),
        Err(e) => {
            warn!(
                "Failed to delete Trello webhook {}: {}",
                record.trello_webhook_id, e
            );
            Ok(false)
        }
    }
}

fn find_existing<'a>(
    hooks: &'a [TrelloWebhook],
    board_id: &str,
    callback: &str,
) -> Option<&'a TrelloWebhook> {
    hooks
        .iter()
        .find(|h| h.id_model == board_id && h.callback_url == callback)
}

/// Registers a Trello webhook for `board_id` and returns its id.
///
/// A duplicate registration resolves to the existing webhook.
pub async fn ensure_remote_webhook(
    api: &dyn BoardApi,
    board_id: &str,
    callback: &str,
) -> Result<String, RemoteError> {
    let response = api.add_webhook(board_id, callback).await?;
    let duplicate = response.status == 400
        && response.body.as_str().map(str::trim) == Some(DUPLICATE_WEBHOOK);
    if !duplicate {
        let created: TrelloWebhook = decode(response)?;
        info!("Registered Trello webhook {} for board {}", created.id, board_id);
        return Ok(created.id);
    }

    let hooks: Vec<TrelloWebhook> = decode(api.get_webhooks().await?)?;
    find_existing(&hooks, board_id, callback)
        .map(|h| h.id.clone())
        .ok_or(RemoteError::NotFound)
}

/// Where a repaired subscription's events come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteBinding {
    pub trello_webhook_id: String,
    pub member_id: String,
}

async fn register_as(
    acting: &dyn BoardApi,
    acting_member_id: &str,
    board_id: &str,
    callback_base: &str,
) -> Result<RemoteBinding, RemoteError> {
    let callback = callback_url(callback_base, acting_member_id);
    let id = ensure_remote_webhook(acting, board_id, &callback).await?;
    Ok(RemoteBinding {
        trello_webhook_id: id,
        member_id: acting_member_id.to_string(),
    })
}

/// Makes sure `record` has a live Trello webhook.
///
/// Reuses (and reactivates) the webhook owned by the subscribing member when it
/// still exists, otherwise registers a new one as the acting member.
pub async fn repair_remote_webhook(
    db: &Database,
    apis: &dyn BoardApiFactory,
    acting: &dyn BoardApi,
    acting_member_id: &str,
    record: &WebhookRecord,
    callback_base: &str,
) -> Result<RemoteBinding, RemoteError> {
    let member_id = record.member_id.clone();
    let owner = db
        .run_blocking(move |db| db.get_user_by_trello_id(&member_id))
        .await
        .map_err(|e| RemoteError::Transport(e.to_string()))?;
    let Some(token) = owner.and_then(|o| o.trello_token) else {
        return register_as(acting, acting_member_id, &record.model_id, callback_base).await;
    };

    let owner_api = apis.with_token(&token);
    let response = owner_api.get_webhooks().await?;
    if response.status == 401 {
        return register_as(acting, acting_member_id, &record.model_id, callback_base).await;
    }
    let hooks: Vec<TrelloWebhook> = decode(response)?;
    let callback = callback_url(callback_base, &record.member_id);
    let Some(existing) = find_existing(&hooks, &record.model_id, &callback) else {
        return register_as(acting, acting_member_id, &record.model_id, callback_base).await;
    };
    if !existing.active {
        handle_response(
            owner_api
                .update_webhook(&existing.id, json!({ "active": true }))
                .await?,
        )?;
        info!("Reactivated Trello webhook {}", existing.id);
    }
    Ok(RemoteBinding {
        trello_webhook_id: existing.id.clone(),
        member_id: record.member_id.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{in_memory, sample_webhook};
    use crate::trello::testing::{MockBoardApi, MockFactory};
    use crate::trello::RemoteResponse;
    use std::sync::Arc;

    #[test]
    fn test_callback_url() {
        assert_eq!(callback_url("http://x/", "m1"), "http://x/m1");
        assert_eq!(callback_url("http://x", "m1"), "http://x/m1");
    }

    const HOOK_ID: u64 = 1234567890123456789;

    fn hook_token() -> String {
        "Ab1_-".repeat(13)
    }

    #[test]
    fn test_parse_webhook_link() {
        let token = hook_token();
        let expected = Some((HOOK_ID, token.clone()));
        assert_eq!(
            parse_webhook_link(&format!("https://discord.com/api/webhooks/{}/{}", HOOK_ID, token)),
            expected
        );
        assert_eq!(
            parse_webhook_link(&format!(
                "<https://canary.discordapp.com/api/webhooks/{}/{}/>",
                HOOK_ID, token
            )),
            expected
        );
        assert_eq!(
            parse_webhook_link(&format!("https://example.com/api/webhooks/{}/{}", HOOK_ID, token)),
            None
        );
        assert_eq!(
            parse_webhook_link(&format!("https://discord.com/api/webhooks/x/{}", token)),
            None
        );
        assert_eq!(
            parse_webhook_link(&format!("https://discord.com/api/webhooks/{}", HOOK_ID)),
            None
        );
        assert_eq!(parse_webhook_link("not a link"), None);
    }

    #[test]
    fn test_parse_webhook_link_ignores_query_and_host_case() {
        let token = hook_token();
        assert_eq!(
            parse_webhook_link(&format!(
                "https://discord.com/api/webhooks/{}/{}?wait=true",
                HOOK_ID, token
            )),
            Some((HOOK_ID, token.clone()))
        );
        assert_eq!(
            parse_webhook_link(&format!("https://Discord.COM/api/webhooks/{}/{}", HOOK_ID, token)),
            Some((HOOK_ID, token))
        );
    }

    fn setup() -> (Database, Arc<MockBoardApi>, MockFactory) {
        let db = in_memory();
        db.set_user_auth("u1", "m1", "owner-token").unwrap();
        let api = Arc::new(MockBoardApi::new());
        let factory = MockFactory::new(api.clone());
        (db, api, factory)
    }

    #[tokio::test]
    async fn test_remote_deleted_only_with_last_sibling() {
        let (db, api, factory) = setup();
        let mut first = sample_webhook("g1", "b1", "tw1");
        first.id = db.insert_webhook(&first).unwrap();
        let mut second = sample_webhook("g2", "b1", "tw1");
        second.id = db.insert_webhook(&second).unwrap();

        assert!(!delete_subscription(&db, &factory, &first).await.unwrap());
        assert!(api.calls().is_empty());

        assert!(delete_subscription(&db, &factory, &second).await.unwrap());
        assert_eq!(api.calls(), vec!["delete_webhook:tw1"]);
        assert_eq!(*factory.tokens.lock().unwrap(), vec!["owner-token"]);
        assert_eq!(db.count_by_trello_webhook("tw1").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_owner_keeps_remote() {
        let (db, api, factory) = setup();
        let mut record = sample_webhook("g1", "b1", "tw1");
        record.member_id = "gone".into();
        record.id = db.insert_webhook(&record).unwrap();

        assert!(!delete_subscription(&db, &factory, &record).await.unwrap());
        assert!(api.calls().is_empty());
        assert!(db.get_webhook("g1", record.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_registration_resolves_existing() {
        let api = MockBoardApi::new();
        api.respond(
            "add_webhook",
            RemoteResponse::from_text(400, DUPLICATE_WEBHOOK),
        );
        api.respond(
            "get_webhooks",
            RemoteResponse::ok(serde_json::json!([
                { "id": "other", "idModel": "b2", "callbackURL": "http://x/m1" },
                { "id": "tw7", "idModel": "b1", "callbackURL": "http://x/m1" }
            ])),
        );
        assert_eq!(
            ensure_remote_webhook(&api, "b1", "http://x/m1").await,
            Ok("tw7".to_string())
        );

        let fresh = MockBoardApi::new();
        fresh.respond(
            "add_webhook",
            RemoteResponse::ok(serde_json::json!({
                "id": "tw8", "idModel": "b1", "callbackURL": "http://x/m1"
            })),
        );
        assert_eq!(
            ensure_remote_webhook(&fresh, "b1", "http://x/m1").await,
            Ok("tw8".to_string())
        );
        assert_eq!(fresh.calls(), vec!["add_webhook:b1"]);
    }

    #[tokio::test]
    async fn test_repair_reactivates_owned_webhook() {
        let (db, api, factory) = setup();
        let record = sample_webhook("g1", "b1", "tw1");
        api.respond(
            "get_webhooks",
            RemoteResponse::ok(serde_json::json!([
                { "id": "tw1", "idModel": "b1", "callbackURL": "http://x/m1", "active": false }
            ])),
        );
        let acting = MockBoardApi::new();

        let binding = repair_remote_webhook(&db, &factory, &acting, "m2", &record, "http://x/")
            .await
            .unwrap();
        assert_eq!(
            binding,
            RemoteBinding {
                trello_webhook_id: "tw1".into(),
                member_id: "m1".into()
            }
        );
        assert!(api.calls().contains(&"update_webhook:tw1".to_string()));
        assert!(acting.calls().is_empty());
    }

    #[tokio::test]
    async fn test_repair_recreates_as_acting_member() {
        let (db, api, factory) = setup();
        let record = sample_webhook("g1", "b1", "tw1");
        api.respond("get_webhooks", RemoteResponse::new(401, serde_json::Value::Null));
        let acting = MockBoardApi::new();
        acting.respond(
            "add_webhook",
            RemoteResponse::ok(serde_json::json!({
                "id": "tw9", "idModel": "b1", "callbackURL": "http://x/m2"
            })),
        );

        let binding = repair_remote_webhook(&db, &factory, &acting, "m2", &record, "http://x/")
            .await
            .unwrap();
        assert_eq!(binding.trello_webhook_id, "tw9");
        assert_eq!(binding.member_id, "m2");
    }
}
