use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::ui::PopupStyle;

/// Option names a host may override. Anything else is dropped on merge.
pub const CONFIG_KEYS: [&str; 9] = [
    "projectId",
    "update",
    "updateUrl",
    "logo",
    "log",
    "logString",
    "forceUpdate",
    "mainColor",
    "custom",
];

const DEFAULT_MAIN_COLOR: &str = "FF5B78";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[allow(clippy::struct_excessive_bools)]
pub struct Config {
    pub project_id: String,
    #[serde(rename = "update")]
    pub update_enabled: bool,
    pub update_url: String,
    /// Icon shown in update popups.
    pub logo: String,
    #[serde(rename = "log")]
    pub verbose_logging: bool,
    /// Render logged payloads as single-line JSON instead of pretty JSON.
    pub log_string: bool,
    /// Pass `force` to the installer.
    #[serde(rename = "forceUpdate")]
    pub force_install: bool,
    pub main_color: String,
    /// Host renders its own update UI; the client only stashes payloads.
    #[serde(rename = "custom")]
    pub custom_ui: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            update_enabled: true,
            update_url: String::new(),
            logo: String::new(),
            verbose_logging: false,
            log_string: true,
            force_install: false,
            main_color: DEFAULT_MAIN_COLOR.to_string(),
            custom_ui: false,
        }
    }
}

impl Config {
    #[must_use]
    pub fn popup_style(&self) -> PopupStyle {
        PopupStyle {
            main_color: self.main_color.clone(),
            logo: (!self.logo.is_empty()).then(|| self.logo.clone()),
        }
    }

    pub(crate) fn render_payload(&self, value: &Value) -> String {
        let rendered = if self.log_string {
            serde_json::to_string(value)
        } else {
            serde_json::to_string_pretty(value)
        };
        rendered.unwrap_or_else(|_| value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unknown option `{0}`")]
    UnknownOption(String),
    #[error("option `{key}` expects {expected}")]
    InvalidType { key: String, expected: &'static str },
    #[error("option `mainColor` must be a 6-digit hex colour, got `{0}`")]
    InvalidColor(String),
}

/// Effective configuration plus the subset of options that overrode it.
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    config: Config,
    overrides: Map<String, Value>,
}

impl ConfigStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_options(options: &Map<String, Value>) -> Self {
        let mut store = Self::new();
        store.merge(options);
        store
    }

    /// Overlay allow-listed options onto the current configuration.
    ///
    /// Unknown keys are dropped. Allow-listed keys with an unusable value are
    /// skipped with a warning and are not recorded as overrides.
    pub fn merge(&mut self, options: &Map<String, Value>) {
        for (key, value) in options {
            match apply_option(&mut self.config, key, value) {
                Ok(()) => {
                    self.overrides.insert(key.clone(), value.clone());
                }
                Err(ConfigError::UnknownOption(_)) => debug!("Ignoring unknown option `{key}`"),
                Err(error) => warn!("Skipping option: {error}"),
            }
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn overrides(&self) -> &Map<String, Value> {
        &self.overrides
    }
}

/// Apply one option. Every arm here must have a matching [`CONFIG_KEYS`] entry.
fn apply_option(config: &mut Config, key: &str, value: &Value) -> Result<(), ConfigError> {
    match key {
        "projectId" => config.project_id = expect_string(key, value)?,
        "update" => config.update_enabled = expect_bool(key, value)?,
        "updateUrl" => config.update_url = expect_string(key, value)?,
        "logo" => config.logo = expect_string(key, value)?,
        "log" => config.verbose_logging = expect_bool(key, value)?,
        "logString" => config.log_string = expect_bool(key, value)?,
        "forceUpdate" => config.force_install = expect_bool(key, value)?,
        "mainColor" => config.main_color = parse_color(&expect_string(key, value)?)?,
        "custom" => config.custom_ui = expect_bool(key, value)?,
        _ => return Err(ConfigError::UnknownOption(key.to_string())),
    }
    Ok(())
}

fn expect_string(key: &str, value: &Value) -> Result<String, ConfigError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ConfigError::InvalidType {
            key: key.to_string(),
            expected: "a string",
        })
}

fn expect_bool(key: &str, value: &Value) -> Result<bool, ConfigError> {
    value.as_bool().ok_or_else(|| ConfigError::InvalidType {
        key: key.to_string(),
        expected: "a boolean",
    })
}

fn parse_color(raw: &str) -> Result<String, ConfigError> {
    let hex = raw.trim().trim_start_matches('#');
    if hex.len() == 6 && hex.chars().all(|ch| ch.is_ascii_hexdigit()) {
        Ok(hex.to_ascii_uppercase())
    } else {
        Err(ConfigError::InvalidColor(raw.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Map, Value, json};

    use super::{CONFIG_KEYS, Config, ConfigError, ConfigStore, apply_option};

    fn options(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("test options must be an object"),
        }
    }

    #[test]
    fn every_allow_listed_key_is_applicable() {
        for key in CONFIG_KEYS {
            let mut config = Config::default();
            let result = apply_option(&mut config, key, &Value::Null);
            assert!(
                !matches!(result, Err(ConfigError::UnknownOption(_))),
                "{key} has no handler"
            );
        }
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();

        assert!(config.update_enabled);
        assert!(!config.force_install);
        assert!(!config.custom_ui);
        assert!(!config.verbose_logging);
        assert!(config.log_string);
        assert_eq!(config.main_color, "FF5B78");
        assert!(config.project_id.is_empty());
        assert!(config.update_url.is_empty());
    }

    #[test]
    fn unknown_keys_leave_defaults_untouched() {
        let store = ConfigStore::with_options(&options(json!({ "notAnOption": 1 })));

        assert_eq!(store.config(), &Config::default());
        assert!(store.overrides().is_empty());
    }

    #[test]
    fn merge_overrides_allow_listed_keys_and_records_them() {
        let mut store = ConfigStore::new();
        store.merge(&options(json!({
            "projectId": "abc",
            "updateUrl": "https://api.example.com",
            "update": false,
            "forceUpdate": true,
            "custom": true,
            "extra": "dropped"
        })));

        let config = store.config();
        assert_eq!(config.project_id, "abc");
        assert_eq!(config.update_url, "https://api.example.com");
        assert!(!config.update_enabled);
        assert!(config.force_install);
        assert!(config.custom_ui);
        assert_eq!(store.overrides().len(), 5);
        assert!(!store.overrides().contains_key("extra"));
    }

    #[test]
    fn later_merges_win() {
        let mut store = ConfigStore::with_options(&options(json!({ "projectId": "one" })));
        store.merge(&options(json!({ "projectId": "two" })));

        assert_eq!(store.config().project_id, "two");
        assert_eq!(store.overrides()["projectId"], "two");
    }

    #[test]
    fn wrongly_typed_values_are_skipped() {
        let store = ConfigStore::with_options(&options(json!({
            "update": "yes",
            "projectId": 42,
            "mainColor": "not-a-colour"
        })));

        assert_eq!(store.config(), &Config::default());
        assert!(store.overrides().is_empty());
    }

    #[test]
    fn main_color_is_normalised_into_popup_style() {
        let store = ConfigStore::with_options(&options(json!({
            "mainColor": "#722ed1",
            "logo": "/static/logo.png"
        })));

        let style = store.config().popup_style();
        assert_eq!(style.main_color, "722ED1");
        assert_eq!(style.logo.as_deref(), Some("/static/logo.png"));
        assert_eq!(Config::default().popup_style().logo, None);
    }

    #[test]
    fn render_payload_respects_log_string() {
        let value = json!({ "a": 1 });
        let mut config = Config::default();
        assert_eq!(config.render_payload(&value), r#"{"a":1}"#);

        config.log_string = false;
        assert!(config.render_payload(&value).contains('\n'));
    }
}
