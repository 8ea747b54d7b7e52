use std::fs;

use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub command_log_path: String,
    pub position_rate_hz: u16,
    pub scan_plane_rate_hz: u16,
    pub tracked_tip_rate_hz: u16,
    pub registration_timeout_secs: u64,
    pub zframe_config_dir: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            command_log_path: "commandLogs.txt".into(),
            position_rate_hz: 5,
            scan_plane_rate_hz: 2,
            tracked_tip_rate_hz: 5,
            registration_timeout_secs: 120,
            zframe_config_dir: "config/zframe".into(),
        }
    }
}

/// Defaults, overlaid by `console.toml` when present, overlaid by `APP__*`
/// environment variables.
pub fn load_settings() -> Settings {
    let mut settings = match fs::read_to_string("console.toml") {
        Ok(raw) => parse_settings(&raw),
        Err(_) => Settings::default(),
    };
    apply_env(&mut settings);
    settings
}

fn parse_settings(raw: &str) -> Settings {
    match toml::from_str(raw) {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!("console.toml ignored: {err}");
            Settings::default()
        }
    }
}

fn apply_env(settings: &mut Settings) {
    if let Ok(v) = std::env::var("APP__COMMAND_LOG_PATH") {
        settings.command_log_path = v;
    }
    if let Ok(v) = std::env::var("APP__POSITION_RATE_HZ") {
        if let Ok(v) = v.parse() {
            settings.position_rate_hz = v;
        }
    }
    if let Ok(v) = std::env::var("APP__SCAN_PLANE_RATE_HZ") {
        if let Ok(v) = v.parse() {
            settings.scan_plane_rate_hz = v;
        }
    }
    if let Ok(v) = std::env::var("APP__TRACKED_TIP_RATE_HZ") {
        if let Ok(v) = v.parse() {
            settings.tracked_tip_rate_hz = v;
        }
    }
    if let Ok(v) = std::env::var("APP__REGISTRATION_TIMEOUT_SECS") {
        if let Ok(v) = v.parse() {
            settings.registration_timeout_secs = v;
        }
    }
    if let Ok(v) = std::env::var("APP__ZFRAME_CONFIG_DIR") {
        settings.zframe_config_dir = v;
    }
}
