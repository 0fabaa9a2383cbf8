//! Trello action payloads
//!
//! A callback body is reduced to a [`BoardEvent`]: the matching filter flag,
//! the ids the allow/deny gate looks at and the template variables. Rendering
//! is a fixed lookup from flag to locale template and colour.

use crate::discord_text::display_name;
use crate::filters::Flag;
use crate::locale::Locale;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// Longest name interpolated into a template.
pub const VARIABLE_LIMIT: usize = 50;

pub const CREATE_COLOR: u32 = 0x61BD4F;
pub const DELETE_COLOR: u32 = 0xEB5A46;
pub const UPDATE_COLOR: u32 = 0xFF9F1A;
pub const OTHER_COLOR: u32 = 0x0079BF;

/// Body Trello posts to a webhook callback.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionPayload {
    pub action: Action,
    pub model: Model,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub member_creator: Option<MemberCreator>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberCreator {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Model {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// A parsed event ready for filtering and rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardEvent {
    pub flag: Flag,
    pub action_id: String,
    pub board_id: String,
    pub list_id: Option<String>,
    pub card_id: Option<String>,
    pub vars: BTreeMap<&'static str, String>,
}

/// Rendered notification, independent of the delivery channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub description: String,
    pub color: u32,
    pub author: Option<String>,
}

/// `createCard` -> `CREATE_CARD`.
pub fn screaming_snake(camel: &str) -> String {
    let mut out = String::with_capacity(camel.len() + 8);
    for (i, c) in camel.chars().enumerate() {
        if c.is_ascii_uppercase() && i > 0 {
            out.push('_');
        }
        out.push(c.to_ascii_uppercase());
    }
    out
}

fn field_name(key: &str) -> String {
    match key {
        "idList" => "LIST".to_string(),
        "dueComplete" => "DUE".to_string(),
        other => screaming_snake(other),
    }
}

/// Maps an action type to its filter flag.
///
/// Generic `update*` actions pick the flag from the first changed field.
pub fn flag_for_action(kind: &str, data: &Map<String, Value>) -> Option<Flag> {
    let direct = screaming_snake(kind);
    if let Ok(flag) = Flag::parse(&direct) {
        return Some(flag);
    }
    let model = kind.strip_prefix("update")?;
    let field = data.get("old")?.as_object()?.keys().next()?;
    let name = format!("UPDATE_{}_{}", screaming_snake(model), field_name(field));
    Flag::parse(&name).ok()
}

fn nested<'a>(data: &'a Map<String, Value>, object: &str, key: &str) -> Option<&'a str> {
    data.get(object)?.get(key)?.as_str()
}

impl BoardEvent {
    /// Parses a callback body. Unknown action types yield `None`.
    pub fn parse(payload: &ActionPayload) -> Option<Self> {
        let action = &payload.action;
        let data = &action.data;
        let Some(flag) = flag_for_action(&action.kind, data) else {
            debug!("Ignoring unmapped Trello action {}", action.kind);
            return None;
        };

        let list_id = nested(data, "list", "id")
            .or_else(|| nested(data, "listAfter", "id"))
            .or_else(|| nested(data, "card", "idList"))
            .map(str::to_string);
        let card_id = nested(data, "card", "id").map(str::to_string);

        let mut vars = BTreeMap::new();
        let mut put = |name: &'static str, value: Option<&str>| {
            if let Some(value) = value {
                vars.insert(name, display_name(value, VARIABLE_LIMIT));
            }
        };
        let member = action
            .member_creator
            .as_ref()
            .map(|m| if m.full_name.is_empty() { m.username.as_str() } else { m.full_name.as_str() });
        put("member", member);
        put(
            "board",
            nested(data, "board", "name").or(Some(payload.model.name.as_str())),
        );
        put(
            "list",
            nested(data, "list", "name").or_else(|| nested(data, "listAfter", "name")),
        );
        put("card", nested(data, "card", "name"));
        put("label", nested(data, "label", "name"));
        put("checklist", nested(data, "checklist", "name"));
        put("check_item", nested(data, "checkItem", "name"));
        put("custom_field", nested(data, "customField", "name"));
        put("old_name", nested(data, "old", "name"));
        put("list_before", nested(data, "listBefore", "name"));
        put("list_after", nested(data, "listAfter", "name"));
        put("text", data.get("text").and_then(Value::as_str));

        Some(BoardEvent {
            flag,
            action_id: action.id.clone(),
            board_id: nested(data, "board", "id")
                .unwrap_or(payload.model.id.as_str())
                .to_string(),
            list_id,
            card_id,
            vars,
        })
    }

    pub fn render(&self, locale: &Locale) -> Notification {
        let key = format!("webhooks.{}", self.flag.name().to_lowercase());
        let mut vars: Vec<(&str, &str)> = self.vars.iter().map(|(k, v)| (*k, v.as_str())).collect();
        // Templates may mention a variable the action lacks.
        let unknown = locale.t("common.none");
        for name in TEMPLATE_VARIABLES {
            if !self.vars.contains_key(name) {
                vars.push((name, unknown.as_str()));
            }
        }
        Notification {
            title: locale.t(&format!("webhook_filters.{}", self.flag.name())),
            description: locale.t_with(&key, &vars),
            color: color_for(self.flag),
            author: self.vars.get("member").cloned(),
        }
    }
}

const TEMPLATE_VARIABLES: [&str; 12] = [
    "member",
    "board",
    "list",
    "card",
    "label",
    "checklist",
    "check_item",
    "custom_field",
    "old_name",
    "list_before",
    "list_after",
    "text",
];

pub fn color_for(flag: Flag) -> u32 {
    let name = flag.name();
    let verb = name.split('_').next().unwrap_or_default();
    match verb {
        "CREATE" | "ADD" | "COPY" | "CONVERT" => CREATE_COLOR,
        "DELETE" | "REMOVE" => DELETE_COLOR,
        "UPDATE" => UPDATE_COLOR,
        _ => OTHER_COLOR,
    }
}
