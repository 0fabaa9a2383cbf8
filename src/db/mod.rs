use crate::config::Config;
use crate::filters::WebhookFilters;
use anyhow::{anyhow, Context as _};
use rusqlite::{Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

/// A Discord user and the Trello account they linked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserRecord {
    pub user_id: String,
    pub trello_id: Option<String>,
    pub trello_token: Option<String>,
    pub current_board: Option<String>,
    pub locale: Option<String>,
}

impl UserRecord {
    pub fn is_authed(&self) -> bool {
        self.trello_id.is_some() && self.trello_token.is_some()
    }
}

/// One board subscription relayed into one Discord channel webhook.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebhookRecord {
    pub id: i64,
    pub guild_id: String,
    pub channel_id: String,
    pub webhook_id: String,
    pub webhook_token: String,
    /// Board the subscription watches.
    pub model_id: String,
    /// Trello member whose token owns the remote webhook.
    pub member_id: String,
    pub trello_webhook_id: String,
    pub filters: WebhookFilters,
    pub lists: Vec<String>,
    pub cards: Vec<String>,
    pub whitelist: bool,
    pub active: bool,
    pub locale: Option<String>,
}

const WEBHOOK_COLUMNS: &str = "id, guild_id, channel_id, webhook_id, webhook_token, model_id, \
     member_id, trello_webhook_id, filters, lists, cards, whitelist, active, locale";

fn webhook_from_row(row: &Row<'_>) -> rusqlite::Result<WebhookRecord> {
    let filters: String = row.get(8)?;
    let lists: String = row.get(9)?;
    let cards: String = row.get(10)?;
    Ok(WebhookRecord {
        id: row.get(0)?,
        guild_id: row.get(1)?,
        channel_id: row.get(2)?,
        webhook_id: row.get(3)?,
        webhook_token: row.get(4)?,
        model_id: row.get(5)?,
        member_id: row.get(6)?,
        trello_webhook_id: row.get(7)?,
        filters: filters.parse().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e))
        })?,
        lists: serde_json::from_str(&lists).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(9, rusqlite::types::Type::Text, Box::new(e))
        })?,
        cards: serde_json::from_str(&cards).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(10, rusqlite::types::Type::Text, Box::new(e))
        })?,
        whitelist: row.get(11)?,
        active: row.get(12)?,
        locale: row.get(13)?,
    })
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        user_id: row.get(0)?,
        trello_id: row.get(1)?,
        trello_token: row.get(2)?,
        current_board: row.get(3)?,
        locale: row.get(4)?,
    })
}

impl Database {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        Self::open(&config.database_url)
    }

    pub fn open(path: &str) -> anyhow::Result<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() && path != ":memory:" {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("cannot create {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn execute_init(&self) -> anyhow::Result<()> {
        info!("Database: Initializing schema...");
        let sql = "
            CREATE TABLE IF NOT EXISTS users (
                user_id TEXT PRIMARY KEY,
                trello_id TEXT,
                trello_token TEXT,
                current_board TEXT,
                locale TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_users_trello ON users (trello_id);

            CREATE TABLE IF NOT EXISTS webhooks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                guild_id TEXT NOT NULL,
                channel_id TEXT NOT NULL,
                webhook_id TEXT NOT NULL,
                webhook_token TEXT NOT NULL,
                model_id TEXT NOT NULL,
                member_id TEXT NOT NULL,
                trello_webhook_id TEXT NOT NULL,
                filters TEXT NOT NULL DEFAULT '0',
                lists TEXT NOT NULL DEFAULT '[]',
                cards TEXT NOT NULL DEFAULT '[]',
                whitelist BOOLEAN NOT NULL DEFAULT FALSE,
                active BOOLEAN NOT NULL DEFAULT TRUE,
                locale TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_webhooks_guild ON webhooks (guild_id);
            CREATE INDEX IF NOT EXISTS idx_webhooks_model ON webhooks (member_id, model_id);
            CREATE INDEX IF NOT EXISTS idx_webhooks_remote ON webhooks (trello_webhook_id);
        ";
        let conn = self.lock()?;
        conn.execute_batch(sql)?;
        debug!("Database: Schema initialized successfully");
        Ok(())
    }

    /// Runs a synchronous query on the blocking pool.
    pub async fn run_blocking<F, T>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || f(&db)).await?
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection lock poisoned"))
    }

    // --- Users ---

    pub fn get_user(&self, user_id: &str) -> anyhow::Result<Option<UserRecord>> {
        let conn = self.lock()?;
        let user = conn
            .query_row(
                "SELECT user_id, trello_id, trello_token, current_board, locale
                 FROM users WHERE user_id = ?1",
                [user_id],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    /// Any user whose linked Trello account is `trello_id`.
    pub fn get_user_by_trello_id(&self, trello_id: &str) -> anyhow::Result<Option<UserRecord>> {
        let conn = self.lock()?;
        let user = conn
            .query_row(
                "SELECT user_id, trello_id, trello_token, current_board, locale
                 FROM users WHERE trello_id = ?1 AND trello_token IS NOT NULL LIMIT 1",
                [trello_id],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn set_user_auth(&self, user_id: &str, trello_id: &str, token: &str) -> anyhow::Result<()> {
        debug!("Database: Linking user {} to Trello member {}", user_id, trello_id);
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO users (user_id, trello_id, trello_token) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET trello_id = ?2, trello_token = ?3",
            (user_id, trello_id, token),
        )?;
        Ok(())
    }

    /// Forgets the Trello credentials and the selected board.
    pub fn remove_auth(&self, user_id: &str) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE users SET trello_id = NULL, trello_token = NULL, current_board = NULL
             WHERE user_id = ?1",
            [user_id],
        )?;
        Ok(())
    }

    pub fn set_current_board(&self, user_id: &str, board_id: Option<&str>) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE users SET current_board = ?2 WHERE user_id = ?1",
            (user_id, board_id),
        )?;
        Ok(())
    }

    pub fn set_user_locale(&self, user_id: &str, locale: Option<&str>) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO users (user_id, locale) VALUES (?1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET locale = ?2",
            (user_id, locale),
        )?;
        Ok(())
    }

    // --- Webhooks ---

    /// Stores a new subscription and returns its id.
    pub fn insert_webhook(&self, record: &WebhookRecord) -> anyhow::Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO webhooks (guild_id, channel_id, webhook_id, webhook_token, model_id,
                member_id, trello_webhook_id, filters, lists, cards, whitelist, active, locale)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            rusqlite::params![
                record.guild_id,
                record.channel_id,
                record.webhook_id,
                record.webhook_token,
                record.model_id,
                record.member_id,
                record.trello_webhook_id,
                record.filters.serialize(),
                serde_json::to_string(&record.lists)?,
                serde_json::to_string(&record.cards)?,
                record.whitelist,
                record.active,
                record.locale,
            ],
        )?;
        let id = conn.last_insert_rowid();
        info!(
            "Database: Created webhook {} for board {} in guild {}",
            id, record.model_id, record.guild_id
        );
        Ok(id)
    }

    pub fn get_webhook(&self, guild_id: &str, id: i64) -> anyhow::Result<Option<WebhookRecord>> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                &format!(
                    "SELECT {} FROM webhooks WHERE guild_id = ?1 AND id = ?2",
                    WEBHOOK_COLUMNS
                ),
                (guild_id, id),
                webhook_from_row,
            )
            .optional()?;
        Ok(record)
    }

    pub fn list_guild_webhooks(&self, guild_id: &str) -> anyhow::Result<Vec<WebhookRecord>> {
        self.query_webhooks("guild_id = ?1 ORDER BY id", &[guild_id])
    }

    /// Subscriptions fed by one member's callback for one board.
    pub fn webhooks_for_event(
        &self,
        member_id: &str,
        model_id: &str,
    ) -> anyhow::Result<Vec<WebhookRecord>> {
        self.query_webhooks(
            "member_id = ?1 AND model_id = ?2 ORDER BY id",
            &[member_id, model_id],
        )
    }

    pub fn count_by_trello_webhook(&self, trello_webhook_id: &str) -> anyhow::Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM webhooks WHERE trello_webhook_id = ?1",
            [trello_webhook_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn delete_webhook(&self, id: i64) -> anyhow::Result<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM webhooks WHERE id = ?1", [id])?;
        Ok(deleted > 0)
    }

    pub fn set_webhook_active(&self, id: i64, active: bool) -> anyhow::Result<()> {
        self.update_webhook_column(id, "active", active)
    }

    pub fn set_webhook_whitelist(&self, id: i64, whitelist: bool) -> anyhow::Result<()> {
        self.update_webhook_column(id, "whitelist", whitelist)
    }

    pub fn set_webhook_filters(&self, id: i64, filters: &WebhookFilters) -> anyhow::Result<()> {
        self.update_webhook_column(id, "filters", filters.serialize())
    }

    pub fn set_webhook_lists(&self, id: i64, lists: &[String]) -> anyhow::Result<()> {
        self.update_webhook_column(id, "lists", serde_json::to_string(lists)?)
    }

    pub fn set_webhook_cards(&self, id: i64, cards: &[String]) -> anyhow::Result<()> {
        self.update_webhook_column(id, "cards", serde_json::to_string(cards)?)
    }

    pub fn set_webhook_locale(&self, id: i64, locale: Option<&str>) -> anyhow::Result<()> {
        self.update_webhook_column(id, "locale", locale)
    }

    /// Points a subscription at new Discord and Trello webhooks.
    pub fn set_webhook_delivery(
        &self,
        id: i64,
        webhook_id: &str,
        webhook_token: &str,
        trello_webhook_id: &str,
        member_id: &str,
    ) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE webhooks SET webhook_id = ?2, webhook_token = ?3, trello_webhook_id = ?4,
                member_id = ?5, active = TRUE
             WHERE id = ?1",
            (id, webhook_id, webhook_token, trello_webhook_id, member_id),
        )?;
        Ok(())
    }

    fn update_webhook_column<V: rusqlite::ToSql>(
        &self,
        id: i64,
        column: &'static str,
        value: V,
    ) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute(
            &format!("UPDATE webhooks SET {} = ?2 WHERE id = ?1", column),
            rusqlite::params![id, value],
        )?;
        Ok(())
    }

    fn query_webhooks(&self, clause: &str, params: &[&str]) -> anyhow::Result<Vec<WebhookRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM webhooks WHERE {}",
            WEBHOOK_COLUMNS, clause
        ))?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), webhook_from_row)?;

        let mut results = Vec::new();
        for row in rows {
            match row {
                Ok(record) => results.push(record),
                // One undecodable row must not hide the others.
                Err(e @ rusqlite::Error::FromSqlConversionFailure(..)) => {
                    warn!("Database: Skipping unreadable webhook row: {}", e);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
pub(crate) fn in_memory() -> Database {
    let db = Database::open(":memory:").unwrap();
    db.execute_init().unwrap();
    db
}

#[cfg(test)]
pub(crate) fn sample_webhook(guild_id: &str, model_id: &str, trello_webhook_id: &str) -> WebhookRecord {
    WebhookRecord {
        id: 0,
        guild_id: guild_id.to_string(),
        channel_id: "c1".to_string(),
        webhook_id: "900".to_string(),
        webhook_token: "secret".to_string(),
        model_id: model_id.to_string(),
        member_id: "m1".to_string(),
        trello_webhook_id: trello_webhook_id.to_string(),
        filters: WebhookFilters::all(),
        lists: Vec::new(),
        cards: Vec::new(),
        whitelist: false,
        active: true,
        locale: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config() -> Config {
        Config {
            discord_token: "test".to_string(),
            trello_key: "key".to_string(),
            database_url: ":memory:".to_string(),
            prefix: "T!".to_string(),
            webserver_port: 0,
            webserver_base: "http://localhost/".to_string(),
            menu_timeout: Duration::from_secs(30),
            default_locale: "en".to_string(),
            locale_dir: None,
            owner_id: None,
        }
    }

    #[test]
    fn test_user_auth_lifecycle() {
        let db = Database::new(&test_config()).unwrap();
        db.execute_init().unwrap();

        assert_eq!(db.get_user("u1").unwrap(), None);
        db.set_user_auth("u1", "t1", "tok").unwrap();
        db.set_current_board("u1", Some("b1")).unwrap();

        let user = db.get_user("u1").unwrap().unwrap();
        assert!(user.is_authed());
        assert_eq!(user.current_board.as_deref(), Some("b1"));
        assert_eq!(db.get_user_by_trello_id("t1").unwrap().unwrap().user_id, "u1");

        db.remove_auth("u1").unwrap();
        let user = db.get_user("u1").unwrap().unwrap();
        assert!(!user.is_authed());
        assert_eq!(user.current_board, None);
        assert_eq!(db.get_user_by_trello_id("t1").unwrap(), None);
    }

    #[test]
    fn test_webhook_round_trip() {
        let db = in_memory();
        let mut record = sample_webhook("g1", "b1", "tw1");
        record.filters = WebhookFilters::from_names(["CREATE_CARD", "UPDATE_CUSTOM_FIELD_NAME"]).unwrap();
        record.cards = vec!["c1".to_string()];
        record.whitelist = true;

        let id = db.insert_webhook(&record).unwrap();
        let stored = db.get_webhook("g1", id).unwrap().unwrap();
        record.id = id;
        assert_eq!(stored, record);
        // Scoped to the guild.
        assert_eq!(db.get_webhook("g2", id).unwrap(), None);
    }

    #[test]
    fn test_webhook_updates() {
        let db = in_memory();
        let id = db.insert_webhook(&sample_webhook("g1", "b1", "tw1")).unwrap();

        db.set_webhook_active(id, false).unwrap();
        db.set_webhook_whitelist(id, true).unwrap();
        db.set_webhook_lists(id, &["l1".to_string(), "l2".to_string()]).unwrap();
        db.set_webhook_filters(id, &WebhookFilters::empty()).unwrap();
        db.set_webhook_locale(id, Some("fr")).unwrap();

        let stored = db.get_webhook("g1", id).unwrap().unwrap();
        assert!(!stored.active);
        assert!(stored.whitelist);
        assert_eq!(stored.lists, vec!["l1", "l2"]);
        assert!(stored.filters.is_empty());
        assert_eq!(stored.locale.as_deref(), Some("fr"));

        db.set_webhook_delivery(id, "901", "new", "tw2", "m2").unwrap();
        let stored = db.get_webhook("g1", id).unwrap().unwrap();
        assert!(stored.active);
        assert_eq!(stored.trello_webhook_id, "tw2");
        assert_eq!(stored.member_id, "m2");
    }

    #[test]
    fn test_queries_by_event_and_remote_id() {
        let db = in_memory();
        let a = db.insert_webhook(&sample_webhook("g1", "b1", "tw1")).unwrap();
        db.insert_webhook(&sample_webhook("g2", "b1", "tw1")).unwrap();
        db.insert_webhook(&sample_webhook("g1", "b2", "tw2")).unwrap();

        assert_eq!(db.webhooks_for_event("m1", "b1").unwrap().len(), 2);
        assert_eq!(db.webhooks_for_event("m9", "b1").unwrap().len(), 0);
        assert_eq!(db.list_guild_webhooks("g1").unwrap().len(), 2);
        assert_eq!(db.count_by_trello_webhook("tw1").unwrap(), 2);

        assert!(db.delete_webhook(a).unwrap());
        assert!(!db.delete_webhook(a).unwrap());
        assert_eq!(db.count_by_trello_webhook("tw1").unwrap(), 1);
    }

    #[test]
    fn test_corrupt_row_does_not_hide_siblings() {
        let db = in_memory();
        let good = db.insert_webhook(&sample_webhook("g1", "b1", "tw1")).unwrap();
        let bad_filters = db.insert_webhook(&sample_webhook("g1", "b1", "tw1")).unwrap();
        let bad_lists = db.insert_webhook(&sample_webhook("g1", "b1", "tw1")).unwrap();
        {
            let conn = db.lock().unwrap();
            conn.execute("UPDATE webhooks SET filters = 'garbage' WHERE id = ?1", [bad_filters])
                .unwrap();
            conn.execute("UPDATE webhooks SET lists = '{' WHERE id = ?1", [bad_lists])
                .unwrap();
        }

        let found = db.webhooks_for_event("m1", "b1").unwrap();
        assert_eq!(found.iter().map(|w| w.id).collect::<Vec<_>>(), vec![good]);
        assert_eq!(db.list_guild_webhooks("g1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_run_blocking() {
        let db = in_memory();
        db.run_blocking(|db| db.set_user_auth("u1", "t1", "tok"))
            .await
            .unwrap();
        let user = db
            .run_blocking(|db| db.get_user("u1"))
            .await
            .unwrap();
        assert!(user.is_some());
    }
}
