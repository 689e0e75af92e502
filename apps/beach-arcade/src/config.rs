use std::time::Duration;

use serde::Deserialize;

use crate::simulation::DevicePreference;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default)]
    pub local_only: Option<String>,
    #[serde(default)]
    pub turn_secret_key: Option<String>,
    #[serde(default)]
    pub turn_host: Option<String>,
    #[serde(default = "default_turn_port")]
    pub turn_port: u16,
    #[serde(default = "default_turn_credential_ttl")]
    pub turn_credential_ttl_secs: u64,
    #[serde(default = "default_target_fps")]
    pub target_fps: u32,
    #[serde(default = "default_liveness_threshold")]
    pub liveness_threshold_ms: u64,
    #[serde(default = "default_sweep_interval")]
    pub liveness_sweep_interval_ms: u64,
    #[serde(default = "default_close_timeout")]
    pub close_timeout_ms: u64,
    #[serde(default)]
    pub compute_device: Option<String>,
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Option<String>,
    #[serde(default)]
    pub ice_port_start: Option<u16>,
    #[serde(default)]
    pub ice_port_end: Option<u16>,
    #[serde(default)]
    pub ice_public_ip: Option<String>,
    #[serde(default)]
    pub catalog_path: Option<String>,
    #[serde(default)]
    pub static_dir: Option<String>,
    #[serde(default)]
    pub log_dir: Option<String>,
    #[serde(default = "default_log_filter")]
    pub rust_log: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            bind_addr: default_bind_addr(),
            local_only: None,
            turn_secret_key: None,
            turn_host: None,
            turn_port: default_turn_port(),
            turn_credential_ttl_secs: default_turn_credential_ttl(),
            target_fps: default_target_fps(),
            liveness_threshold_ms: default_liveness_threshold(),
            liveness_sweep_interval_ms: default_sweep_interval(),
            close_timeout_ms: default_close_timeout(),
            compute_device: None,
            cors_origins: default_cors_origins(),
            ice_port_start: None,
            ice_port_end: None,
            ice_public_ip: None,
            catalog_path: None,
            static_dir: None,
            log_dir: None,
            rust_log: default_log_filter(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        config::Config::builder()
            .add_source(config::Environment::default().separator("__"))
            .build()
            .and_then(|c| c.try_deserialize())
            .map(AppConfig::normalize)
            .unwrap_or_else(|_| AppConfig::default().normalize())
    }

    fn normalize(mut self) -> Self {
        self.local_only = Self::normalize_opt(self.local_only.take());
        self.turn_secret_key = Self::normalize_opt(self.turn_secret_key.take());
        self.turn_host = Self::normalize_opt(self.turn_host.take());
        self.compute_device = Self::normalize_opt(self.compute_device.take());
        self.cors_origins = Self::normalize_opt(self.cors_origins.take());
        self.ice_public_ip = Self::normalize_opt(self.ice_public_ip.take());
        self.catalog_path = Self::normalize_opt(self.catalog_path.take());
        self.static_dir = Self::normalize_opt(self.static_dir.take());
        self.log_dir = Self::normalize_opt(self.log_dir.take());
        if self.target_fps == 0 {
            self.target_fps = default_target_fps();
        }
        self
    }

    fn normalize_opt(value: Option<String>) -> Option<String> {
        value.and_then(|s| {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
    }

    /// `LOCAL_ONLY` is on for any non-empty value other than `0`.
    pub fn is_local_only(&self) -> bool {
        matches!(self.local_only.as_deref(), Some(v) if v != "0")
    }

    pub fn liveness_threshold(&self) -> Duration {
        Duration::from_millis(self.liveness_threshold_ms)
    }

    pub fn liveness_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_sweep_interval_ms.max(1))
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    pub fn device_preference(&self) -> DevicePreference {
        DevicePreference::parse(self.compute_device.as_deref())
    }

    pub fn ice_port_range(&self) -> Option<(u16, u16)> {
        match (self.ice_port_start, self.ice_port_end) {
            (Some(start), Some(end)) if start <= end => Some((start, end)),
            _ => None,
        }
    }

    pub fn cors_origin_list(&self) -> Vec<String> {
        self.cors_origins
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_turn_port() -> u16 {
    3478
}

fn default_turn_credential_ttl() -> u64 {
    86_400
}

fn default_target_fps() -> u32 {
    30
}

fn default_liveness_threshold() -> u64 {
    5_000
}

fn default_sweep_interval() -> u64 {
    30_000
}

fn default_close_timeout() -> u64 {
    3_000
}

fn default_cors_origins() -> Option<String> {
    Some("http://localhost:4321,http://localhost".to_string())
}

fn default_log_filter() -> String {
    "info,beach_arcade=debug".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_only_follows_env_semantics() {
        let mut cfg = AppConfig::default();
        assert!(!cfg.is_local_only());
        cfg.local_only = Some("0".into());
        assert!(!cfg.is_local_only());
        cfg.local_only = Some("yes".into());
        assert!(cfg.is_local_only());
        cfg.local_only = Some("   ".into());
        assert!(!cfg.normalize().is_local_only());
    }

    #[test]
    fn defaults_match_session_timings() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.target_fps, 30);
        assert_eq!(cfg.liveness_threshold(), Duration::from_secs(5));
        assert_eq!(cfg.liveness_sweep_interval(), Duration::from_secs(30));
        assert_eq!(cfg.close_timeout(), Duration::from_secs(3));
        assert_eq!(
            cfg.cors_origin_list(),
            vec!["http://localhost:4321", "http://localhost"]
        );
    }

    #[test]
    fn ice_range_requires_both_bounds_in_order() {
        let mut cfg = AppConfig::default();
        cfg.ice_port_start = Some(50_000);
        assert_eq!(cfg.ice_port_range(), None);
        cfg.ice_port_end = Some(50_100);
        assert_eq!(cfg.ice_port_range(), Some((50_000, 50_100)));
        cfg.ice_port_end = Some(40_000);
        assert_eq!(cfg.ice_port_range(), None);
    }
}
