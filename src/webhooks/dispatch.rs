use super::events::{ActionPayload, BoardEvent, Notification};
use crate::db::{Database, WebhookRecord};
use crate::locale::Locales;
use async_trait::async_trait;
use poise::serenity_prelude as serenity;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

pub const WEBHOOK_USERNAME: &str = "Taco";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("webhook {subscription} has an invalid delivery handle")]
    InvalidHandle { subscription: i64 },
    #[error("delivery for webhook {subscription} failed: {reason}")]
    Failed { subscription: i64, reason: String },
}

impl DeliveryError {
    pub fn subscription(&self) -> i64 {
        match self {
            DeliveryError::InvalidHandle { subscription }
            | DeliveryError::Failed { subscription, .. } => *subscription,
        }
    }
}

/// Sends one rendered notification through a subscription's delivery handle.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn deliver(
        &self,
        record: &WebhookRecord,
        notification: &Notification,
    ) -> Result<(), DeliveryError>;
}

/// Executes Discord channel webhooks.
pub struct DiscordWebhookSink {
    http: Arc<serenity::Http>,
}

impl DiscordWebhookSink {
    pub fn new(http: Arc<serenity::Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl DeliverySink for DiscordWebhookSink {
    async fn deliver(
        &self,
        record: &WebhookRecord,
        notification: &Notification,
    ) -> Result<(), DeliveryError> {
        let webhook_id: u64 = record
            .webhook_id
            .parse()
            .map_err(|_| DeliveryError::InvalidHandle {
                subscription: record.id,
            })?;

        let mut embed = serenity::CreateEmbed::new()
            .title(&notification.title)
            .description(&notification.description)
            .color(notification.color)
            .timestamp(serenity::Timestamp::now());
        if let Some(author) = &notification.author {
            embed = embed.author(serenity::CreateEmbedAuthor::new(author));
        }
        let body = serenity::ExecuteWebhook::new()
            .username(WEBHOOK_USERNAME)
            .embed(embed);

        self.http
            .execute_webhook(
                serenity::WebhookId::new(webhook_id),
                None,
                &record.webhook_token,
                false,
                Vec::new(),
                &body,
            )
            .await
            .map_err(|e| DeliveryError::Failed {
                subscription: record.id,
                reason: e.to_string(),
            })?;
        Ok(())
    }
}

/// Why a subscription did not get an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    OtherBoard,
    Filtered,
    ListOrCard,
    Inactive,
}

/// The allow/deny gate on lists and cards.
///
/// Only applies when the event carries an id the subscription has a
/// non-empty set for.
fn passes_list_card_gate(record: &WebhookRecord, event: &BoardEvent) -> bool {
    let list_hit = event
        .list_id
        .as_ref()
        .filter(|_| !record.lists.is_empty())
        .map(|id| record.lists.contains(id));
    let card_hit = event
        .card_id
        .as_ref()
        .filter(|_| !record.cards.is_empty())
        .map(|id| record.cards.contains(id));
    if list_hit.is_none() && card_hit.is_none() {
        return true;
    }
    let matched = list_hit.unwrap_or(false) || card_hit.unwrap_or(false);
    matched == record.whitelist
}

/// Decides whether `record` should receive `event`.
pub fn accepts(record: &WebhookRecord, event: &BoardEvent) -> Result<(), Rejection> {
    if record.model_id != event.board_id {
        return Err(Rejection::OtherBoard);
    }
    if !record.filters.has(event.flag) {
        return Err(Rejection::Filtered);
    }
    if !passes_list_card_gate(record, event) {
        return Err(Rejection::ListOrCard);
    }
    if !record.active {
        return Err(Rejection::Inactive);
    }
    Ok(())
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: Vec<i64>,
    pub skipped: usize,
    pub failed: Vec<DeliveryError>,
}

/// Renders and delivers `event` to every accepting subscription.
///
/// A failed delivery is logged and reported; the remaining subscriptions
/// are still served.
pub async fn dispatch(
    records: &[WebhookRecord],
    event: &BoardEvent,
    locales: &Locales,
    sink: &dyn DeliverySink,
) -> DispatchReport {
    let mut report = DispatchReport::default();
    let mut rendered: HashMap<Option<String>, Notification> = HashMap::new();

    for record in records {
        if let Err(reason) = accepts(record, event) {
            debug!("Webhook {} skipped {}: {:?}", record.id, event.flag, reason);
            report.skipped += 1;
            continue;
        }
        let notification = rendered
            .entry(record.locale.clone())
            .or_insert_with(|| event.render(&locales.get(record.locale.as_deref())));

        match sink.deliver(record, notification).await {
            Ok(()) => report.delivered.push(record.id),
            Err(e) => {
                error!(
                    "Failed to deliver {} to webhook {} in guild {}: {}",
                    event.flag, record.id, record.guild_id, e
                );
                report.failed.push(e);
            }
        }
    }
    report
}

/// Entry point for callback bodies.
pub struct WebhookDispatcher {
    db: Database,
    locales: Arc<Locales>,
    sink: Arc<dyn DeliverySink>,
}

impl WebhookDispatcher {
    pub fn new(db: Database, locales: Arc<Locales>, sink: Arc<dyn DeliverySink>) -> Self {
        Self { db, locales, sink }
    }

    pub async fn handle(
        &self,
        member_id: &str,
        payload: &ActionPayload,
    ) -> anyhow::Result<DispatchReport> {
        let Some(event) = BoardEvent::parse(payload) else {
            return Ok(DispatchReport::default());
        };
        let member = member_id.to_string();
        let board = event.board_id.clone();
        let records = self
            .db
            .run_blocking(move |db| db.webhooks_for_event(&member, &board))
            .await?;
        let report = dispatch(&records, &event, &self.locales, self.sink.as_ref()).await;
        if !report.delivered.is_empty() || !report.failed.is_empty() {
            info!(
                "Relayed {} on board {}: {} delivered, {} failed",
                event.flag,
                event.board_id,
                report.delivered.len(),
                report.failed.len()
            );
        }
        Ok(report)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingSink;
    use super::*;
    use crate::db::{in_memory, sample_webhook};
    use crate::filters::{Flag, WebhookFilters};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn event(card: &str) -> BoardEvent {
        BoardEvent {
            flag: Flag::parse("CREATE_CARD").unwrap(),
            action_id: "a1".into(),
            board_id: "B".into(),
            list_id: Some("l1".into()),
            card_id: Some(card.into()),
            vars: BTreeMap::new(),
        }
    }

    fn record(id: i64) -> WebhookRecord {
        let mut record = sample_webhook("g1", "B", "tw1");
        record.id = id;
        record.filters = WebhookFilters::from_names(["CREATE_CARD"]).unwrap();
        record
    }

    #[test]
    fn test_whitelisted_card_only() {
        let mut sub = record(1);
        sub.whitelist = true;
        sub.cards = vec!["c1".into()];
        assert_eq!(accepts(&sub, &event("c1")), Ok(()));
        assert_eq!(accepts(&sub, &event("c2")), Err(Rejection::ListOrCard));
    }

    #[test]
    fn test_blacklist_inverts_gate() {
        let mut sub = record(1);
        sub.lists = vec!["l1".into()];
        assert_eq!(accepts(&sub, &event("c1")), Err(Rejection::ListOrCard));
        sub.lists = vec!["l9".into()];
        assert_eq!(accepts(&sub, &event("c1")), Ok(()));
    }

    #[test]
    fn test_gate_needs_a_relevant_id() {
        let mut sub = record(1);
        sub.whitelist = true;
        sub.cards = vec!["c1".into()];
        let mut board_event = event("c1");
        board_event.card_id = None;
        board_event.list_id = None;
        assert_eq!(accepts(&sub, &board_event), Ok(()));
    }

    #[test]
    fn test_filter_board_and_active_checks() {
        let mut sub = record(1);
        sub.filters = WebhookFilters::from_names(["DELETE_CARD"]).unwrap();
        assert_eq!(accepts(&sub, &event("c1")), Err(Rejection::Filtered));

        let mut sub = record(1);
        sub.model_id = "other".into();
        assert_eq!(accepts(&sub, &event("c1")), Err(Rejection::OtherBoard));

        let mut sub = record(1);
        sub.active = false;
        assert_eq!(accepts(&sub, &event("c1")), Err(Rejection::Inactive));
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_siblings() {
        let locales = Locales::embedded().unwrap();
        let sink = RecordingSink {
            failing: [2].into_iter().collect(),
            ..Default::default()
        };
        let mut inactive = record(4);
        inactive.active = false;
        let records = vec![record(1), record(2), record(3), inactive];

        let report = dispatch(&records, &event("c1"), &locales, &sink).await;
        assert_eq!(report.delivered, vec![1, 3]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].subscription(), 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(sink.delivered.lock().unwrap()[0].1.title, "Card created");
    }

    #[tokio::test]
    async fn test_handler_loads_subscriptions_by_member_and_board() {
        let db = in_memory();
        let mut hit = sample_webhook("g1", "b1", "tw1");
        hit.whitelist = true;
        hit.cards = vec!["c1".into()];
        db.insert_webhook(&hit).unwrap();
        let mut miss = hit.clone();
        miss.cards = vec!["c2".into()];
        db.insert_webhook(&miss).unwrap();
        db.insert_webhook(&sample_webhook("g1", "b2", "tw2")).unwrap();

        let sink = Arc::new(RecordingSink::default());
        let dispatcher = WebhookDispatcher::new(
            db,
            Arc::new(Locales::embedded().unwrap()),
            sink.clone(),
        );
        let payload: ActionPayload = serde_json::from_value(json!({
            "model": { "id": "b1" },
            "action": {
                "type": "createCard",
                "data": {
                    "board": { "id": "b1", "name": "Roadmap" },
                    "card": { "id": "c1", "name": "Card" }
                }
            }
        }))
        .unwrap();

        let report = dispatcher.handle("m1", &payload).await.unwrap();
        assert_eq!(report.delivered.len(), 1);
        assert_eq!(report.skipped, 1);

        let ignored: ActionPayload = serde_json::from_value(json!({
            "model": { "id": "b1" },
            "action": { "type": "enablePlugin", "data": {} }
        }))
        .unwrap();
        assert_eq!(
            dispatcher.handle("m1", &ignored).await.unwrap(),
            DispatchReport::default()
        );
    }
}
