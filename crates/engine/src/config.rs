//! Engine configuration

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Idle nudge tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct NudgeConfig {
    /// Message kind tag that makes a batch nudge-eligible
    pub trigger: String,
    /// Wait after the triggering batch renders before capturing the scroll
    /// baseline, so programmatic scroll-into-view does not count as activity.
    pub settle_delay_ms: u64,
    /// Idle time after the baseline before a nudge fires
    pub idle_timeout_ms: u64,
    /// Scroll movement beyond this cancels a pending nudge
    pub scroll_threshold_px: f64,
    /// Hard cap on fired nudges per session
    pub max_per_session: u32,
}

impl Default for NudgeConfig {
    fn default() -> Self {
        NudgeConfig {
            trigger: "product_cards".to_string(),
            settle_delay_ms: 500,
            idle_timeout_ms: 10_000,
            scroll_threshold_px: 40.0,
            max_per_session: 2,
        }
    }
}

impl NudgeConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

/// Top-level engine configuration.
///
/// Loaded from a TOML file or built directly by the host; every field has a
/// default so partial files work.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct EngineConfig {
    /// Merchant the conversation belongs to. Empty means the host failed to
    /// resolve it; sends are refused until it is set.
    pub shop_domain: String,
    /// Base URL of the chat API
    pub api_base: String,
    /// WebSocket endpoint of the realtime channel
    pub socket_url: String,
    /// Language tag for locally generated copy
    pub lang: String,
    /// Page the widget is mounted on, forwarded as chat metadata
    pub page_url: Option<String>,
    /// Where session files live; defaults to `~/.yuume`
    pub data_dir: Option<PathBuf>,
    /// Inactivity window after which a stored session is discarded
    pub session_timeout_secs: u64,
    /// How often the engine re-checks the inactivity window while running
    pub expiry_poll_secs: u64,
    pub nudge: NudgeConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            shop_domain: String::new(),
            api_base: "https://api.yuume.app".to_string(),
            socket_url: "wss://realtime.yuume.app/socket".to_string(),
            lang: "it".to_string(),
            page_url: None,
            data_dir: None,
            session_timeout_secs: 30 * 60,
            expiry_poll_secs: 60,
            nudge: NudgeConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".yuume")
        })
    }

    pub fn session_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session_timeout_secs as i64)
    }

    pub fn expiry_poll(&self) -> Duration {
        Duration::from_secs(self.expiry_poll_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_widget_behavior() {
        let config = EngineConfig::default();
        assert_eq!(config.session_timeout_secs, 1800);
        assert_eq!(config.expiry_poll_secs, 60);
        assert_eq!(config.nudge.settle_delay_ms, 500);
        assert_eq!(config.nudge.idle_timeout_ms, 10_000);
        assert_eq!(config.nudge.scroll_threshold_px, 40.0);
        assert_eq!(config.nudge.max_per_session, 2);
        assert_eq!(config.nudge.trigger, "product_cards");
    }

    #[test]
    fn partial_toml_fills_missing_fields_with_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            shop_domain = "shop.example.com"

            [nudge]
            max_per_session = 1
            "#,
        )
        .expect("parse partial config");

        assert_eq!(config.shop_domain, "shop.example.com");
        assert_eq!(config.api_base, "https://api.yuume.app");
        assert_eq!(config.nudge.max_per_session, 1);
        assert_eq!(config.nudge.idle_timeout_ms, 10_000);
    }
}
