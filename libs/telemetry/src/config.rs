use std::env;

pub const DEFAULT_FILTER: &str = "info";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    pub json_logs: bool,
    /// Directive used when `RUST_LOG` is unset or invalid.
    pub default_filter: String,
}

impl TelemetryConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads `LOG_FORMAT` and `CHATLINK_LOG` through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let json_logs = lookup("LOG_FORMAT")
            .map(|v| !matches!(v.to_lowercase().as_str(), "text" | "pretty" | "plain"))
            .unwrap_or(true);
        let default_filter = lookup("CHATLINK_LOG")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_FILTER.to_string());

        Self {
            json_logs,
            default_filter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> TelemetryConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        TelemetryConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_without_environment() {
        let cfg = config(&[]);
        assert!(cfg.json_logs);
        assert_eq!(cfg.default_filter, DEFAULT_FILTER);
        assert!(!config(&[("LOG_FORMAT", "Pretty")]).json_logs);
    }

    #[test]
    fn log_filter_comes_from_chatlink_log() {
        let cfg = config(&[
            ("LOG_FORMAT", "JSON"),
            ("CHATLINK_LOG", "chatlink_session=debug"),
        ]);
        assert!(cfg.json_logs);
        assert_eq!(cfg.default_filter, "chatlink_session=debug");
        assert_eq!(config(&[("CHATLINK_LOG", "  ")]).default_filter, DEFAULT_FILTER);
    }
}
