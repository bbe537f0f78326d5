use serde::{Deserialize, Serialize};
use std::{env, fmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Local,
    Dev,
    Test,
    Staging,
    Prod,
}

impl Environment {
    pub fn from_env(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "dev" | "development" => Self::Dev,
            "test" | "testing" => Self::Test,
            "staging" => Self::Staging,
            "prod" | "production" => Self::Prod,
            _ => Self::Local,
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Self::Local => "local",
            Self::Dev => "dev",
            Self::Test => "test",
            Self::Staging => "staging",
            Self::Prod => "prod",
        };
        write!(f, "{}", value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub service_name: String,
    pub environment: Environment,
    pub metrics_addr: Option<String>,
    pub log_level: String,
    /// Where the worker looks for `replay.json` when no file is named.
    pub data_dir: String,
}

impl ServiceConfig {
    pub fn from_env(default_service_name: &str) -> Self {
        Self {
            service_name: env_var("DISPATCH_SERVICE_NAME", default_service_name.to_string()),
            environment: Environment::from_env(&env_var("DISPATCH_ENV", "local".to_string())),
            metrics_addr: env::var("DISPATCH_METRICS_ADDR").ok(),
            log_level: env_var("DISPATCH_LOG_LEVEL", "info".to_string()),
            data_dir: env_var("DISPATCH_DATA_DIR", "/var/lib/dispatch".to_string()),
        }
    }
}

/// What playback does after the last timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayEndMode {
    Loop,
    StopAtEnd,
}

impl ReplayEndMode {
    pub fn from_env(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "stop" | "stop_at_end" | "stop-at-end" | "once" => Self::StopAtEnd,
            _ => Self::Loop,
        }
    }
}

impl Default for ReplayEndMode {
    fn default() -> Self {
        Self::Loop
    }
}

/// Average travel speed per unit category, in km/h.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedTable {
    pub police_kmh: f64,
    pub fire_kmh: f64,
    pub ems_kmh: f64,
    pub special_kmh: f64,
}

impl SpeedTable {
    pub fn uniform(kmh: f64) -> Self {
        Self {
            police_kmh: kmh,
            fire_kmh: kmh,
            ems_kmh: kmh,
            special_kmh: kmh,
        }
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            police_kmh: env_var_positive("DISPATCH_SPEED_POLICE_KMH", defaults.police_kmh),
            fire_kmh: env_var_positive("DISPATCH_SPEED_FIRE_KMH", defaults.fire_kmh),
            ems_kmh: env_var_positive("DISPATCH_SPEED_EMS_KMH", defaults.ems_kmh),
            special_kmh: env_var_positive("DISPATCH_SPEED_SPECIAL_KMH", defaults.special_kmh),
        }
    }
}

impl Default for SpeedTable {
    fn default() -> Self {
        Self {
            police_kmh: 50.0,
            fire_kmh: 40.0,
            ems_kmh: 40.0,
            special_kmh: 35.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub speeds: SpeedTable,
    /// Radius around a drop point within which an incident is captured.
    pub capture_radius_km: f64,
    pub replay_tick_ms: u64,
    pub replay_end: ReplayEndMode,
    /// Agency snapshots older than this are reported as stale.
    pub agency_max_age_ms: u64,
    /// Live samples kept per unit; older ones are dropped first.
    pub trail_retention: usize,
    /// Activity log entries kept on the local board.
    pub event_log_capacity: usize,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            speeds: SpeedTable::from_env(),
            capture_radius_km: env_var_positive(
                "DISPATCH_CAPTURE_RADIUS_KM",
                defaults.capture_radius_km,
            ),
            replay_tick_ms: env_var_u64("DISPATCH_REPLAY_TICK_MS", defaults.replay_tick_ms).max(1),
            replay_end: env::var("DISPATCH_REPLAY_END")
                .map(|value| ReplayEndMode::from_env(&value))
                .unwrap_or(defaults.replay_end),
            agency_max_age_ms: env_var_u64(
                "DISPATCH_AGENCY_MAX_AGE_MS",
                defaults.agency_max_age_ms,
            ),
            trail_retention: env_var_count("DISPATCH_TRAIL_RETENTION", defaults.trail_retention),
            event_log_capacity: env_var_count(
                "DISPATCH_EVENT_LOG_CAPACITY",
                defaults.event_log_capacity,
            ),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            speeds: SpeedTable::default(),
            capture_radius_km: 0.5,
            replay_tick_ms: 16,
            replay_end: ReplayEndMode::Loop,
            agency_max_age_ms: 60_000,
            trail_retention: 10_000,
            event_log_capacity: 50_000,
        }
    }
}

fn env_var(key: &str, default: String) -> String {
    env::var(key).unwrap_or(default)
}

fn env_var_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_var_count(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .filter(|count| *count > 0)
        .unwrap_or(default)
}

fn env_var_f64(key: &str, default: f64) -> Option<f64> {
    match env::var(key) {
        Ok(value) => value.trim().parse::<f64>().ok().filter(|parsed| parsed.is_finite()),
        Err(_) => Some(default),
    }
}

fn env_var_positive(key: &str, default: f64) -> f64 {
    env_var_f64(key, default)
        .filter(|value| *value > 0.0)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_mode_parsing() {
        assert_eq!(ReplayEndMode::from_env("stop"), ReplayEndMode::StopAtEnd);
        assert_eq!(ReplayEndMode::from_env("STOP_AT_END"), ReplayEndMode::StopAtEnd);
        assert_eq!(ReplayEndMode::from_env("loop"), ReplayEndMode::Loop);
        assert_eq!(ReplayEndMode::from_env("garbage"), ReplayEndMode::Loop);
    }

    #[test]
    fn environment_parsing() {
        assert_eq!(Environment::from_env("Production"), Environment::Prod);
        assert_eq!(Environment::from_env("unknown"), Environment::Local);
        assert_eq!(Environment::Staging.to_string(), "staging");
    }

    #[test]
    fn default_speeds_differ_by_category() {
        let speeds = SpeedTable::default();
        assert!(speeds.police_kmh > speeds.fire_kmh);
        assert_eq!(SpeedTable::uniform(50.0).ems_kmh, 50.0);
    }

    #[test]
    fn engine_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.capture_radius_km, 0.5);
        assert_eq!(config.replay_end, ReplayEndMode::Loop);
        assert!(config.trail_retention > 0);
        assert!(config.event_log_capacity > 0);
    }

    #[test]
    fn retention_limits_come_from_env() {
        // SAFETY: only this test touches these variables.
        unsafe {
            env::set_var("DISPATCH_TRAIL_RETENTION", "25");
            env::set_var("DISPATCH_EVENT_LOG_CAPACITY", "0");
        }
        let config = EngineConfig::from_env();
        assert_eq!(config.trail_retention, 25);
        assert_eq!(
            config.event_log_capacity,
            EngineConfig::default().event_log_capacity
        );
        unsafe {
            env::remove_var("DISPATCH_TRAIL_RETENTION");
            env::remove_var("DISPATCH_EVENT_LOG_CAPACITY");
        }
    }
}
