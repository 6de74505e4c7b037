use std::{env, str::FromStr, time::Duration};

use thiserror::Error;

const DEFAULT_STOP_FALLBACK: Duration = Duration::from_secs(5);
const DEFAULT_INACTIVITY: Duration = Duration::from_secs(10 * 60);
const DEFAULT_PRESENT_RETRIES: u32 = 5;
const DEFAULT_PRESENT_RETRY_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid value {value:?} for {key}")]
pub struct SettingsError {
    pub key: &'static str,
    pub value: String,
}

/// How `dismiss()` and `remove()` treat the presentation mode they were not
/// written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HideMode {
    /// `dismiss()` while embedded removes, `remove()` while presented dismisses.
    #[default]
    CrossMode,
    /// A hide call that does not match the current mode is logged and ignored.
    Strict,
}

impl FromStr for HideMode {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cross" | "cross_mode" | "crossmode" => Ok(HideMode::CrossMode),
            "strict" => Ok(HideMode::Strict),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BehaviorFlags {
    /// `present`/`embed` on a configured but stopped session starts it.
    pub auto_start_on_present: bool,
    /// `stopSession` forgets the visitor profile and its hash.
    pub clear_visitor_on_stop: bool,
    pub hide_mode: HideMode,
}

impl Default for BehaviorFlags {
    fn default() -> Self {
        Self {
            auto_start_on_present: false,
            clear_visitor_on_stop: true,
            hide_mode: HideMode::CrossMode,
        }
    }
}

/// Timers and behavior switches of a session controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub stop_fallback: Duration,
    pub inactivity_timeout: Duration,
    pub present_retries: u32,
    pub present_retry_interval: Duration,
    pub request_timeout: Duration,
    pub load_timeout: Duration,
    pub flags: BehaviorFlags,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            stop_fallback: DEFAULT_STOP_FALLBACK,
            inactivity_timeout: DEFAULT_INACTIVITY,
            present_retries: DEFAULT_PRESENT_RETRIES,
            present_retry_interval: DEFAULT_PRESENT_RETRY_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            load_timeout: DEFAULT_LOAD_TIMEOUT,
            flags: BehaviorFlags::default(),
        }
    }
}

impl SessionSettings {
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads `CHATLINK_*` overrides through `lookup`; absent keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &'static str| -> Option<(&'static str, String)> {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .map(|value| (key, value))
        };

        let mut settings = Self::default();
        if let Some(entry) = read("CHATLINK_STOP_FALLBACK_MS") {
            settings.stop_fallback = Duration::from_millis(parse_number(entry)?);
        }
        if let Some(entry) = read("CHATLINK_INACTIVITY_SECS") {
            settings.inactivity_timeout = Duration::from_secs(parse_number(entry)?);
        }
        if let Some(entry) = read("CHATLINK_PRESENT_RETRIES") {
            settings.present_retries = parse_number(entry)?;
        }
        if let Some(entry) = read("CHATLINK_PRESENT_RETRY_MS") {
            settings.present_retry_interval = Duration::from_millis(parse_number(entry)?);
        }
        if let Some(entry) = read("CHATLINK_REQUEST_TIMEOUT_MS") {
            settings.request_timeout = Duration::from_millis(parse_number(entry)?);
        }
        if let Some(entry) = read("CHATLINK_LOAD_TIMEOUT_MS") {
            settings.load_timeout = Duration::from_millis(parse_number(entry)?);
        }
        if let Some(entry) = read("CHATLINK_AUTO_START") {
            settings.flags.auto_start_on_present = parse_flag(entry)?;
        }
        if let Some(entry) = read("CHATLINK_CLEAR_VISITOR_ON_STOP") {
            settings.flags.clear_visitor_on_stop = parse_flag(entry)?;
        }
        if let Some((key, value)) = read("CHATLINK_HIDE_MODE") {
            settings.flags.hide_mode = value
                .parse()
                .map_err(|_| SettingsError { key, value })?;
        }
        Ok(settings)
    }
}

fn parse_number<T: FromStr>((key, value): (&'static str, String)) -> Result<T, SettingsError> {
    value.parse().map_err(|_| SettingsError { key, value })
}

fn parse_flag((key, value): (&'static str, String)) -> Result<bool, SettingsError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(SettingsError { key, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings_from(vars: &[(&str, &str)]) -> Result<SessionSettings, SettingsError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SessionSettings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_match_widget_timings() {
        let settings = settings_from(&[]).unwrap();
        assert_eq!(settings.stop_fallback, Duration::from_secs(5));
        assert_eq!(settings.inactivity_timeout, Duration::from_secs(600));
        assert_eq!(settings.present_retries, 5);
        assert_eq!(settings.present_retry_interval, Duration::from_millis(100));
        assert!(!settings.flags.auto_start_on_present);
        assert!(settings.flags.clear_visitor_on_stop);
        assert_eq!(settings.flags.hide_mode, HideMode::CrossMode);
    }

    #[test]
    fn overrides_are_applied() {
        let settings = settings_from(&[
            ("CHATLINK_STOP_FALLBACK_MS", "250"),
            ("CHATLINK_INACTIVITY_SECS", "30"),
            ("CHATLINK_AUTO_START", "yes"),
            ("CHATLINK_CLEAR_VISITOR_ON_STOP", "off"),
            ("CHATLINK_HIDE_MODE", "strict"),
        ])
        .unwrap();
        assert_eq!(settings.stop_fallback, Duration::from_millis(250));
        assert_eq!(settings.inactivity_timeout, Duration::from_secs(30));
        assert!(settings.flags.auto_start_on_present);
        assert!(!settings.flags.clear_visitor_on_stop);
        assert_eq!(settings.flags.hide_mode, HideMode::Strict);
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = settings_from(&[("CHATLINK_PRESENT_RETRIES", "many")]).unwrap_err();
        assert_eq!(err.key, "CHATLINK_PRESENT_RETRIES");
        assert!(settings_from(&[("CHATLINK_HIDE_MODE", "sideways")]).is_err());
        assert!(settings_from(&[("CHATLINK_AUTO_START", "maybe")]).is_err());
    }
}
