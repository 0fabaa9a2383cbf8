//! Trello REST access
//!
//! Commands talk to Trello through [`BoardApi`] so tests can swap in a
//! recording double. Every call yields a raw [`RemoteResponse`];
//! [`handle_response`] turns it into a body or a [`RemoteError`] exactly once.

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

pub const API_BASE: &str = "https://api.trello.com/1/";

/// Body Trello sends back when the same callback is registered twice.
pub const DUPLICATE_WEBHOOK: &str = "A webhook with that callback, model, and token already exists";

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteResponse {
    pub status: u16,
    pub body: Value,
}

impl RemoteResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn ok(body: Value) -> Self {
        Self::new(200, body)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Text bodies are kept as JSON strings.
    pub fn from_text(status: u16, text: &str) -> Self {
        let body = serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()));
        Self { status, body }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("resource not found on Trello")]
    NotFound,
    #[error("Trello rejected the credentials")]
    Unauthorized,
    #[error("rate limited by Trello")]
    RateLimited,
    #[error("Trello responded with status {0}")]
    Status(u16),
    #[error("request to Trello failed: {0}")]
    Transport(String),
    #[error("unexpected Trello payload: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Locale key of the message shown to users.
    pub fn locale_key(&self) -> &'static str {
        match self {
            RemoteError::NotFound => "trello_response.not_found",
            RemoteError::Unauthorized => "trello_response.unauthorized",
            RemoteError::RateLimited => "trello_response.rate_limited",
            _ => "trello_response.error",
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        RemoteError::Transport(e.to_string())
    }
}

/// Classifies a response. Success yields the body.
pub fn handle_response(response: RemoteResponse) -> Result<Value, RemoteError> {
    match response.status {
        200..=299 => Ok(response.body),
        401 => Err(RemoteError::Unauthorized),
        404 => Err(RemoteError::NotFound),
        429 => Err(RemoteError::RateLimited),
        status => Err(RemoteError::Status(status)),
    }
}

/// [`handle_response`] followed by deserialisation.
pub fn decode<T: DeserializeOwned>(response: RemoteResponse) -> Result<T, RemoteError> {
    let body = handle_response(response)?;
    serde_json::from_value(body).map_err(|e| RemoteError::Decode(e.to_string()))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Board {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub short_link: String,
    #[serde(default)]
    pub closed: bool,
    #[serde(default)]
    pub lists: Vec<List>,
    #[serde(default)]
    pub cards: Vec<Card>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct List {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub closed: bool,
    #[serde(default)]
    pub subscribed: bool,
    #[serde(default)]
    pub cards: Vec<Card>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub short_link: String,
    #[serde(default)]
    pub id_list: String,
    #[serde(default)]
    pub closed: bool,
    #[serde(default)]
    pub subscribed: bool,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub due: Option<String>,
    #[serde(default)]
    pub due_complete: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub boards: Vec<Board>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrelloWebhook {
    pub id: String,
    pub id_model: String,
    #[serde(rename = "callbackURL")]
    pub callback_url: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

/// Embed colour for a Trello label colour name.
pub fn label_color(color: Option<&str>) -> u32 {
    match color {
        Some("green") => 0x61BD4F,
        Some("yellow") => 0xF2D600,
        Some("red") => 0xEB5A46,
        Some("orange") => 0xFF9F1A,
        Some("lime") => 0x51E898,
        Some("purple") => 0xC377E0,
        Some("blue") => 0x0079BF,
        Some("sky") => 0x00C2E0,
        Some("pink") => 0xC9558F,
        Some("black") => 0x344563,
        _ => 0,
    }
}

/// Calls the bot makes against Trello on behalf of one member token.
#[async_trait]
pub trait BoardApi: Send + Sync {
    async fn get_member(&self, member_id: &str) -> Result<RemoteResponse, RemoteError>;
    async fn get_slim_board(&self, board_id: &str) -> Result<RemoteResponse, RemoteError>;
    async fn get_labels(&self, board_id: &str) -> Result<RemoteResponse, RemoteError>;
    async fn get_card(&self, card_id: &str) -> Result<RemoteResponse, RemoteError>;
    async fn update_card(&self, card_id: &str, changes: Value) -> Result<RemoteResponse, RemoteError>;
    async fn get_lists(&self, board_id: &str) -> Result<RemoteResponse, RemoteError>;
    async fn get_webhooks(&self) -> Result<RemoteResponse, RemoteError>;
    async fn add_webhook(
        &self,
        board_id: &str,
        callback_url: &str,
    ) -> Result<RemoteResponse, RemoteError>;
    async fn delete_webhook(&self, webhook_id: &str) -> Result<RemoteResponse, RemoteError>;
    async fn update_webhook(
        &self,
        webhook_id: &str,
        changes: Value,
    ) -> Result<RemoteResponse, RemoteError>;
}

/// Builds a [`BoardApi`] acting with a given member token.
pub trait BoardApiFactory: Send + Sync {
    fn with_token(&self, token: &str) -> Arc<dyn BoardApi>;
}

/// Shared HTTP client and application key.
#[derive(Clone)]
pub struct TrelloClients {
    http: reqwest::Client,
    key: String,
    base: String,
}

impl TrelloClients {
    pub fn new(http: reqwest::Client, key: impl Into<String>) -> Self {
        Self {
            http,
            key: key.into(),
            base: API_BASE.to_string(),
        }
    }

    pub fn client(&self, token: &str) -> TrelloClient {
        TrelloClient {
            http: self.http.clone(),
            key: self.key.clone(),
            token: token.to_string(),
            base: self.base.clone(),
        }
    }
}

impl BoardApiFactory for TrelloClients {
    fn with_token(&self, token: &str) -> Arc<dyn BoardApi> {
        Arc::new(self.client(token))
    }
}

pub struct TrelloClient {
    http: reqwest::Client,
    key: String,
    token: String,
    base: String,
}

impl TrelloClient {
    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<RemoteResponse, RemoteError> {
        let url = format!("{}{}", self.base, path);
        debug!("Trello {} {}", method, path);
        let mut request = self
            .http
            .request(method, &url)
            .query(&[("key", self.key.as_str()), ("token", self.token.as_str())])
            .query(query);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        Ok(RemoteResponse::from_text(status, &text))
    }
}

#[async_trait]
impl BoardApi for TrelloClient {
    async fn get_member(&self, member_id: &str) -> Result<RemoteResponse, RemoteError> {
        self.request(
            Method::GET,
            &format!("members/{}", member_id),
            &[
                ("boards", "open"),
                ("board_fields", "name,shortLink,closed"),
            ],
            None,
        )
        .await
    }

    async fn get_slim_board(&self, board_id: &str) -> Result<RemoteResponse, RemoteError> {
        self.request(
            Method::GET,
            &format!("boards/{}", board_id),
            &[
                ("fields", "name,shortLink,closed"),
                ("cards", "all"),
                ("card_fields", "name,shortLink,idList,closed,subscribed"),
                ("lists", "all"),
                ("list_fields", "name,closed,subscribed"),
            ],
            None,
        )
        .await
    }

    async fn get_labels(&self, board_id: &str) -> Result<RemoteResponse, RemoteError> {
        self.request(
            Method::GET,
            &format!("boards/{}/labels", board_id),
            &[("fields", "name,color")],
            None,
        )
        .await
    }

    async fn get_card(&self, card_id: &str) -> Result<RemoteResponse, RemoteError> {
        self.request(Method::GET, &format!("cards/{}", card_id), &[], None)
            .await
    }

    async fn update_card(&self, card_id: &str, changes: Value) -> Result<RemoteResponse, RemoteError> {
        self.request(Method::PUT, &format!("cards/{}", card_id), &[], Some(changes))
            .await
    }

    async fn get_lists(&self, board_id: &str) -> Result<RemoteResponse, RemoteError> {
        self.request(
            Method::GET,
            &format!("boards/{}/lists", board_id),
            &[("cards", "open"), ("card_fields", "name")],
            None,
        )
        .await
    }

    async fn get_webhooks(&self) -> Result<RemoteResponse, RemoteError> {
        self.request(
            Method::GET,
            &format!("tokens/{}/webhooks", self.token),
            &[],
            None,
        )
        .await
    }

    async fn add_webhook(
        &self,
        board_id: &str,
        callback_url: &str,
    ) -> Result<RemoteResponse, RemoteError> {
        self.request(
            Method::POST,
            "webhooks",
            &[],
            Some(json!({ "idModel": board_id, "callbackURL": callback_url })),
        )
        .await
    }

    async fn delete_webhook(&self, webhook_id: &str) -> Result<RemoteResponse, RemoteError> {
        self.request(Method::DELETE, &format!("webhooks/{}", webhook_id), &[], None)
            .await
    }

    async fn update_webhook(
        &self,
        webhook_id: &str,
        changes: Value,
    ) -> Result<RemoteResponse, RemoteError> {
        self.request(
            Method::PUT,
            &format!("webhooks/{}", webhook_id),
            &[],
            Some(changes),
        )
        .await
    }
}

/// Picks one item by id, short link, exact name or unique name prefix.
///
/// Names compare case-insensitively. An ambiguous prefix resolves to nothing.
fn resolve<'a, T>(
    query: &str,
    items: &'a [T],
    id: impl Fn(&T) -> &str,
    short_link: impl Fn(&T) -> &str,
    name: impl Fn(&T) -> &str,
) -> Option<&'a T> {
    let query = query.trim();
    if query.is_empty() {
        return None;
    }
    if let Some(item) = items
        .iter()
        .find(|&i| id(i) == query || (!short_link(i).is_empty() && short_link(i) == query))
    {
        return Some(item);
    }
    let lowered = query.to_lowercase();
    if let Some(item) = items.iter().find(|&i| name(i).to_lowercase() == lowered) {
        return Some(item);
    }
    let mut prefixed = items
        .iter()
        .filter(|&i| name(i).to_lowercase().starts_with(&lowered));
    match (prefixed.next(), prefixed.next()) {
        (Some(item), None) => Some(item),
        _ => None,
    }
}

pub fn find_board<'a>(query: &str, boards: &'a [Board]) -> Option<&'a Board> {
    resolve(
        query,
        boards,
        |b| b.id.as_str(),
        |b| b.short_link.as_str(),
        |b| b.name.as_str(),
    )
}

pub fn find_card<'a>(query: &str, cards: &'a [Card]) -> Option<&'a Card> {
    resolve(
        query,
        cards,
        |c| c.id.as_str(),
        |c| c.short_link.as_str(),
        |c| c.name.as_str(),
    )
}

pub fn find_label<'a>(query: &str, labels: &'a [Label]) -> Option<&'a Label> {
    resolve(query, labels, |l| l.id.as_str(), |_| "", |l| l.name.as_str())
}
