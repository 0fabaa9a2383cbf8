use dotenvy::dotenv;
use std::env;
use std::time::Duration;

#[derive(Clone)]
pub struct Config {
    pub discord_token: String,
    pub trello_key: String,
    pub database_url: String,
    pub prefix: String,
    pub webserver_port: u16,
    /// Public URL Trello posts callbacks to; the member id is appended.
    pub webserver_base: String,
    pub menu_timeout: Duration,
    pub default_locale: String,
    /// Directory of `<code>.toml` overrides layered over the built-in locale.
    pub locale_dir: Option<String>,
    pub owner_id: Option<u64>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();
        Self::build()
    }

    fn build() -> anyhow::Result<Self> {
        let webserver_port = env::var("WEBSERVER_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| anyhow::anyhow!("WEBSERVER_PORT must be a valid port"))?;

        Ok(Config {
            discord_token: env::var("DISCORD_TOKEN")
                .map_err(|_| anyhow::anyhow!("DISCORD_TOKEN must be set"))?,
            trello_key: env::var("TRELLO_KEY")
                .map_err(|_| anyhow::anyhow!("TRELLO_KEY must be set"))?,
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "data/taco.db".to_string()),
            prefix: env::var("PREFIX").unwrap_or_else(|_| "T!".to_string()),
            webserver_port,
            webserver_base: env::var("WEBSERVER_BASE")
                .unwrap_or_else(|_| format!("http://localhost:{}/", webserver_port)),
            menu_timeout: match env::var("MENU_TIMEOUT") {
                Ok(raw) => humantime::parse_duration(&raw)
                    .map_err(|e| anyhow::anyhow!("MENU_TIMEOUT is not a duration: {}", e))?,
                Err(_) => Duration::from_secs(30),
            },
            default_locale: env::var("DEFAULT_LOCALE").unwrap_or_else(|_| "en".to_string()),
            locale_dir: env::var("LOCALE_DIR").ok(),
            owner_id: env::var("OWNER_ID").ok().and_then(|id| id.parse().ok()),
        })
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("discord_token", &"[REDACTED]")
            .field("trello_key", &"[REDACTED]")
            .field("database_url", &self.database_url)
            .field("prefix", &self.prefix)
            .field("webserver_port", &self.webserver_port)
            .field("webserver_base", &self.webserver_base)
            .field("menu_timeout", &humantime::format_duration(self.menu_timeout))
            .field("default_locale", &self.default_locale)
            .field("locale_dir", &self.locale_dir)
            .field("owner_id", &self.owner_id)
            .finish()
    }
}
