//! String tables
//!
//! English ships inside the binary. Extra `<code>.toml` files in
//! `LOCALE_DIR` are layered on top of it, so a partial table falls back to
//! English for whatever it leaves out.

use anyhow::{Context as _, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub const DEFAULT_LOCALE: &str = "en";

const EMBEDDED_EN: &str = include_str!("../locales/en.toml");

/// One language's flattened `section.key` strings.
#[derive(Debug, Clone, Default)]
pub struct Locale {
    code: String,
    strings: HashMap<String, String>,
}

impl Locale {
    pub fn parse(code: &str, source: &str) -> Result<Self> {
        let table: toml::Table = toml::from_str(source)
            .with_context(|| format!("invalid locale table `{}`", code))?;
        let mut strings = HashMap::new();
        flatten("", &table, &mut strings);
        Ok(Self {
            code: code.to_string(),
            strings,
        })
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    /// Looks up a string. A missing key renders as the key itself.
    pub fn t(&self, key: &str) -> String {
        self.get(key).unwrap_or(key).to_string()
    }

    /// Looks up a string and fills `{name}` placeholders.
    pub fn t_with(&self, key: &str, vars: &[(&str, &str)]) -> String {
        interpolate(self.get(key).unwrap_or(key), vars)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.strings.get(key).map(String::as_str)
    }

    pub fn has(&self, key: &str) -> bool {
        self.strings.contains_key(key)
    }

    fn layered_on(mut self, base: &Locale) -> Self {
        for (key, value) in &base.strings {
            self.strings
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        self
    }
}

fn flatten(prefix: &str, table: &toml::Table, out: &mut HashMap<String, String>) {
    for (key, value) in table {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            toml::Value::Table(inner) => flatten(&path, inner, out),
            toml::Value::String(s) => {
                out.insert(path, s.clone());
            }
            other => {
                out.insert(path, other.to_string());
            }
        }
    }
}

/// Replaces each `{name}` with its value in one pass, so values are never
/// scanned for placeholders. Unknown placeholders are left alone.
pub fn interpolate(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let value = after.find('}').and_then(|close| {
            let name = &after[..close];
            vars.iter()
                .find(|(var, _)| *var == name)
                .map(|(_, value)| (*value, close))
        });
        match value {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Every loaded locale, keyed by code.
#[derive(Debug, Clone)]
pub struct Locales {
    default: String,
    tables: HashMap<String, Arc<Locale>>,
}

impl Locales {
    /// English only.
    pub fn embedded() -> Result<Self> {
        let en = Locale::parse(DEFAULT_LOCALE, EMBEDDED_EN)?;
        let mut tables = HashMap::new();
        tables.insert(DEFAULT_LOCALE.to_string(), Arc::new(en));
        Ok(Self {
            default: DEFAULT_LOCALE.to_string(),
            tables,
        })
    }

    /// English plus every `*.toml` in `dir`.
    pub fn load(dir: Option<&Path>, default: &str) -> Result<Self> {
        let mut locales = Self::embedded()?;
        if let Some(dir) = dir {
            let entries = std::fs::read_dir(dir)
                .with_context(|| format!("cannot read locale dir {}", dir.display()))?;
            for entry in entries {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                    continue;
                }
                let Some(code) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let source = std::fs::read_to_string(&path)
                    .with_context(|| format!("cannot read {}", path.display()))?;
                locales.insert(Locale::parse(code, &source)?);
                info!("Loaded locale {} from {}", code, path.display());
            }
        }
        if locales.tables.contains_key(default) {
            locales.default = default.to_string();
        } else {
            warn!(
                "Default locale {} is not loaded, using {}",
                default, DEFAULT_LOCALE
            );
        }
        Ok(locales)
    }

    pub fn insert(&mut self, locale: Locale) {
        let merged = match self.tables.get(DEFAULT_LOCALE) {
            Some(base) if locale.code != DEFAULT_LOCALE => locale.layered_on(base),
            _ => locale,
        };
        self.tables.insert(merged.code.clone(), Arc::new(merged));
    }

    /// The requested locale, or the default one for unknown or missing codes.
    pub fn get(&self, code: Option<&str>) -> Arc<Locale> {
        code.and_then(|c| self.tables.get(c))
            .or_else(|| self.tables.get(&self.default))
            .cloned()
            .unwrap_or_default()
    }

    pub fn contains(&self, code: &str) -> bool {
        self.tables.contains_key(code)
    }

    pub fn codes(&self) -> Vec<&str> {
        let mut codes: Vec<&str> = self.tables.keys().map(String::as_str).collect();
        codes.sort_unstable();
        codes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::{FILTER_GROUPS, FLAG_NAMES};

    #[test]
    fn test_every_flag_has_strings() {
        let locales = Locales::embedded().unwrap();
        let en = locales.get(None);
        for flag in FLAG_NAMES {
            assert!(en.has(&format!("webhook_filters.{}", flag)), "{}", flag);
            assert!(
                en.has(&format!("webhooks.{}", flag.to_lowercase())),
                "{}",
                flag
            );
        }
        for (group, _) in FILTER_GROUPS {
            assert!(en.has(&format!("webhook_filter_group.{}", group)), "{}", group);
        }
    }

    #[test]
    fn test_interpolation_and_missing_keys() {
        let en = Locales::embedded().unwrap().get(Some("en"));
        assert_eq!(
            en.t_with("boards.switched", &[("board", "Roadmap")]),
            "Switched to the board **Roadmap**."
        );
        assert_eq!(en.t("nope.missing"), "nope.missing");
        assert_eq!(interpolate("{a} and {b}", &[("a", "1")]), "1 and {b}");
        assert_eq!(
            interpolate("{card} on {board}", &[("card", "fix {board}"), ("board", "Bugs")]),
            "fix {board} on Bugs"
        );
        assert_eq!(interpolate("{{a}} {", &[("a", "1")]), "{1} {");
    }

    #[test]
    fn test_partial_locale_falls_back_to_english() {
        let mut locales = Locales::embedded().unwrap();
        locales.insert(Locale::parse("fr", "[menu]\ncancelled = \"Annulé.\"\n").unwrap());

        let fr = locales.get(Some("fr"));
        assert_eq!(fr.t("menu.cancelled"), "Annulé.");
        assert_eq!(fr.t("menu.expired"), "This menu has expired.");
        // Unknown codes resolve to the default.
        assert_eq!(locales.get(Some("xx")).code(), "en");
        assert_eq!(locales.codes(), vec!["en", "fr"]);
    }

    #[test]
    fn test_invalid_table_is_an_error() {
        assert!(Locale::parse("bad", "not = [valid").is_err());
    }
}
