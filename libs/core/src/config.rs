use std::{env, fmt, str::FromStr};

use serde_json::json;
use url::Url;

use crate::error::ConfigError;

pub const GLOBAL_WIDGET_HOST: &str = "app.chatlink.io";
pub const RU_WIDGET_HOST: &str = "app.chatlink.ru";
const WIDGET_PATH: &str = "/widget/sdk.html";
const DEFAULT_LANGUAGE: &str = "en";

/// Data-residency region selecting the widget host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Region {
    #[default]
    Eu,
    Us,
    Au,
    Br,
    Ph,
    Ru,
}

impl Region {
    pub fn as_str(self) -> &'static str {
        match self {
            Region::Eu => "eu",
            Region::Us => "us",
            Region::Au => "au",
            Region::Br => "br",
            Region::Ph => "ph",
            Region::Ru => "ru",
        }
    }

    pub fn widget_host(self) -> &'static str {
        match self {
            Region::Ru => RU_WIDGET_HOST,
            _ => GLOBAL_WIDGET_HOST,
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Region {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "eu" => Ok(Region::Eu),
            "us" => Ok(Region::Us),
            "au" => Ok(Region::Au),
            "br" => Ok(Region::Br),
            "ph" => Ok(Region::Ph),
            "ru" => Ok(Region::Ru),
            other => Err(ConfigError::UnsupportedRegion(other.to_string())),
        }
    }
}

/// Widget configuration. Frozen once a session starts.
///
/// ```
/// use chatlink_core::{ChatConfig, Region};
///
/// let config = ChatConfig::new("app-1").with_region(Region::Ru).with_language("de");
/// let url = config.widget_url("TEAM42").unwrap();
/// assert_eq!(url.host_str(), Some("app.chatlink.ru"));
/// assert!(url.query().unwrap().contains("appId=app-1"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    pub app_id: String,
    pub region: Region,
    pub persist_session: bool,
    pub language: Option<String>,
    pub device_token: Option<String>,
    pub bundle_id: Option<String>,
    /// Replaces the region host, e.g. for staging deployments.
    pub widget_host: Option<String>,
}

impl ChatConfig {
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            region: Region::default(),
            persist_session: true,
            language: None,
            device_token: None,
            bundle_id: None,
            widget_host: None,
        }
    }

    pub fn with_region(mut self, region: Region) -> Self {
        self.region = region;
        self
    }

    pub fn with_persist_session(mut self, persist: bool) -> Self {
        self.persist_session = persist;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_device_token(mut self, token: impl Into<String>) -> Self {
        self.device_token = Some(token.into());
        self
    }

    pub fn with_bundle_id(mut self, bundle_id: impl Into<String>) -> Self {
        self.bundle_id = Some(bundle_id.into());
        self
    }

    pub fn with_widget_host(mut self, host: impl Into<String>) -> Self {
        self.widget_host = Some(host.into());
        self
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from `CHATLINK_*` keys resolved through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let app_id = non_empty("CHATLINK_APP_ID").ok_or(ConfigError::MissingAppId)?;
        let mut config = Self::new(app_id);
        if let Some(region) = non_empty("CHATLINK_REGION") {
            config.region = region.parse()?;
        }
        if let Some(persist) = non_empty("CHATLINK_PERSIST_SESSION") {
            config.persist_session = !matches!(
                persist.to_ascii_lowercase().as_str(),
                "0" | "false" | "no" | "off"
            );
        }
        config.language = non_empty("CHATLINK_LANGUAGE");
        config.bundle_id = non_empty("CHATLINK_BUNDLE_ID");
        config.widget_host = non_empty("CHATLINK_WIDGET_HOST");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app_id.trim().is_empty() {
            return Err(ConfigError::MissingAppId);
        }
        Ok(())
    }

    pub fn host(&self) -> &str {
        self.widget_host
            .as_deref()
            .unwrap_or_else(|| self.region.widget_host())
    }

    pub fn effective_language(&self) -> String {
        self.language.clone().unwrap_or_else(default_language)
    }

    /// URL of the widget page for this configuration and the resolved team id.
    pub fn widget_url(&self, team_id: &str) -> Result<Url, ConfigError> {
        self.validate()?;
        let mut url = Url::parse(&format!("https://{}{WIDGET_PATH}", self.host()))
            .map_err(|err| ConfigError::Url(err.to_string()))?;

        let persist = if self.persist_session { "true" } else { "false" };
        let session = json!({ "persist": persist });
        let app = json!({
            "teamId": team_id,
            "bundleId": self.bundle_id.as_deref().unwrap_or_default(),
        });

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("appId", &self.app_id);
            query.append_pair("language", &self.effective_language());
            query.append_pair("close", "0");
            if let Some(token) = self.device_token.as_deref() {
                query.append_pair("deviceToken", token);
            }
            query.append_pair("session", &session.to_string());
            query.append_pair("app", &app.to_string());
        }
        Ok(url)
    }
}

/// Language prefix of the process locale (`LANG`), falling back to English.
pub fn default_language() -> String {
    env::var("LANG")
        .ok()
        .and_then(|lang| language_from_locale(&lang))
        .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string())
}

fn language_from_locale(locale: &str) -> Option<String> {
    let prefix = locale
        .split(['_', '.', '-', '@'])
        .next()
        .map(str::trim)
        .filter(|prefix| prefix.len() >= 2 && prefix.chars().all(|c| c.is_ascii_alphabetic()))?;
    if prefix.eq_ignore_ascii_case("c") || prefix.eq_ignore_ascii_case("posix") {
        return None;
    }
    Some(prefix.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn query_map(url: &Url) -> HashMap<String, String> {
        url.query_pairs()
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect()
    }

    #[test]
    fn regions_map_to_hosts() {
        for code in ["eu", "us", "au", "br", "ph"] {
            let region: Region = code.parse().unwrap();
            assert_eq!(region.widget_host(), GLOBAL_WIDGET_HOST);
        }
        assert_eq!("RU".parse::<Region>().unwrap().widget_host(), RU_WIDGET_HOST);
        assert_eq!(
            "mars".parse::<Region>(),
            Err(ConfigError::UnsupportedRegion("mars".into()))
        );
    }

    #[test]
    fn widget_url_carries_expected_query() {
        let config = ChatConfig::new("app-1")
            .with_language("fr")
            .with_device_token("tok")
            .with_bundle_id("com.example.app")
            .with_persist_session(false);
        let url = config.widget_url("TEAM42").unwrap();
        assert_eq!(url.scheme(), "https");
        assert_eq!(url.path(), "/widget/sdk.html");

        let query = query_map(&url);
        assert_eq!(query["appId"], "app-1");
        assert_eq!(query["language"], "fr");
        assert_eq!(query["close"], "0");
        assert_eq!(query["deviceToken"], "tok");
        let session: serde_json::Value = serde_json::from_str(&query["session"]).unwrap();
        assert_eq!(session, json!({"persist": "false"}));
        let app: serde_json::Value = serde_json::from_str(&query["app"]).unwrap();
        assert_eq!(
            app,
            json!({"teamId": "TEAM42", "bundleId": "com.example.app"})
        );
    }

    #[test]
    fn widget_url_omits_missing_device_token() {
        let url = ChatConfig::new("app-1")
            .with_language("en")
            .widget_url("")
            .unwrap();
        assert!(!query_map(&url).contains_key("deviceToken"));
    }

    #[test]
    fn widget_host_override_wins() {
        let url = ChatConfig::new("app-1")
            .with_region(Region::Ru)
            .with_widget_host("widget.staging.test")
            .widget_url("")
            .unwrap();
        assert_eq!(url.host_str(), Some("widget.staging.test"));
    }

    #[test]
    fn empty_app_id_is_rejected() {
        assert_eq!(
            ChatConfig::new("  ").widget_url("team"),
            Err(ConfigError::MissingAppId)
        );
    }

    #[test]
    fn from_lookup_reads_keys() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("CHATLINK_APP_ID", "app-9"),
            ("CHATLINK_REGION", "us"),
            ("CHATLINK_PERSIST_SESSION", "false"),
            ("CHATLINK_LANGUAGE", "es"),
        ]);
        let config = ChatConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(config.app_id, "app-9");
        assert_eq!(config.region, Region::Us);
        assert!(!config.persist_session);
        assert_eq!(config.language.as_deref(), Some("es"));
        assert!(config.bundle_id.is_none());
    }

    #[test]
    fn from_lookup_requires_app_id() {
        assert_eq!(
            ChatConfig::from_lookup(|_| None),
            Err(ConfigError::MissingAppId)
        );
    }

    #[test]
    fn locale_prefix_extraction() {
        assert_eq!(language_from_locale("de_DE.UTF-8").as_deref(), Some("de"));
        assert_eq!(language_from_locale("pt-BR").as_deref(), Some("pt"));
        assert_eq!(language_from_locale("C.UTF-8"), None);
        assert_eq!(language_from_locale("POSIX"), None);
    }
}
