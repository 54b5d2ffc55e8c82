use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveTime;

use crate::limits::{MAX_CACHE_TTL_MINUTES, MAX_SLOT_MINUTES};
use crate::model::{parse_time_of_day, Space};

/// Fallback operating hours and slot length for spaces that do not override them.
///
/// Built once at startup and handed to the engine by reference; read-only afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpaceDefaults {
    pub operating_start: NaiveTime,
    pub operating_end: NaiveTime,
    pub slot_minutes: u32,
}

impl Default for SpaceDefaults {
    fn default() -> Self {
        Self {
            operating_start: hm(9, 0),
            operating_end: hm(22, 0),
            slot_minutes: 60,
        }
    }
}

impl SpaceDefaults {
    pub fn operating_start_for(&self, space: &Space) -> NaiveTime {
        space.operating_start.unwrap_or(self.operating_start)
    }

    pub fn operating_end_for(&self, space: &Space) -> NaiveTime {
        space.operating_end.unwrap_or(self.operating_end)
    }

    pub fn slot_minutes_for(&self, space: &Space) -> u32 {
        space.slot_minutes.unwrap_or(self.slot_minutes)
    }

    /// All three effective values at once.
    pub fn resolve(&self, space: &Space) -> Schedule {
        Schedule {
            opens: self.operating_start_for(space),
            closes: self.operating_end_for(space),
            slot_minutes: self.slot_minutes_for(space),
        }
    }
}

/// Effective hours and slot grid of one space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub opens: NaiveTime,
    pub closes: NaiveTime,
    pub slot_minutes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalyticsSettings {
    /// Width of one report bucket, independent of any space's reservation slot.
    pub slot_minutes: u32,
    pub max_range_days: i64,
    pub cache_ttl: Duration,
    pub cache_max_entries: u64,
}

impl Default for AnalyticsSettings {
    fn default() -> Self {
        Self {
            slot_minutes: 60,
            max_range_days: 31,
            cache_ttl: Duration::from_secs(10 * 60),
            cache_max_entries: 1000,
        }
    }
}

/// Everything the engine needs to know about its environment.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub space_defaults: SpaceDefaults,
    pub analytics: AnalyticsSettings,
}

/// Process configuration, read from `DINESPACE_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub seed_file: Option<PathBuf>,
    pub settings: Settings,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ConfigError {
    pub var: &'static str,
    pub reason: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid {}: {}", self.var, self.reason)
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup so tests need not touch the process env.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let defaults = SpaceDefaults::default();
        let space_defaults = SpaceDefaults {
            operating_start: parse_or(&get, "DINESPACE_DEFAULT_OPEN", defaults.operating_start, parse_time)?,
            operating_end: parse_or(&get, "DINESPACE_DEFAULT_CLOSE", defaults.operating_end, parse_time)?,
            slot_minutes: parse_or(&get, "DINESPACE_DEFAULT_SLOT_MINUTES", defaults.slot_minutes, parse_slot)?,
        };
        if space_defaults.operating_start >= space_defaults.operating_end {
            return Err(ConfigError {
                var: "DINESPACE_DEFAULT_CLOSE",
                reason: format!(
                    "closing time {} must be after opening time {}",
                    space_defaults.operating_end, space_defaults.operating_start
                ),
            });
        }

        let analytics_defaults = AnalyticsSettings::default();
        let analytics = AnalyticsSettings {
            slot_minutes: parse_or(&get, "DINESPACE_ANALYTICS_SLOT_MINUTES", analytics_defaults.slot_minutes, parse_slot)?,
            max_range_days: parse_or(&get, "DINESPACE_ANALYTICS_MAX_RANGE_DAYS", analytics_defaults.max_range_days, parse_num)?,
            cache_ttl: parse_or(&get, "DINESPACE_REPORT_CACHE_TTL_MINUTES", analytics_defaults.cache_ttl, parse_ttl)?,
            cache_max_entries: parse_or(&get, "DINESPACE_REPORT_CACHE_MAX_ENTRIES", analytics_defaults.cache_max_entries, parse_num)?,
        };

        Ok(Self {
            bind: get("DINESPACE_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&get, "DINESPACE_PORT", 5433, parse_num)?,
            data_dir: PathBuf::from(get("DINESPACE_DATA_DIR").unwrap_or_else(|| "./data".into())),
            max_connections: parse_or(&get, "DINESPACE_MAX_CONNECTIONS", 256, parse_num)?,
            compact_threshold: parse_or(&get, "DINESPACE_COMPACT_THRESHOLD", 1000, parse_num)?,
            metrics_port: get("DINESPACE_METRICS_PORT")
                .map(|v| parse_num(&v).map_err(|reason| ConfigError { var: "DINESPACE_METRICS_PORT", reason }))
                .transpose()?,
            tls_cert: get("DINESPACE_TLS_CERT"),
            tls_key: get("DINESPACE_TLS_KEY"),
            seed_file: get("DINESPACE_SEED_FILE").map(PathBuf::from),
            settings: Settings { space_defaults, analytics },
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("dinespace.wal")
    }
}

fn parse_or<G, T, P>(get: &G, var: &'static str, default: T, parse: P) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    P: Fn(&str) -> Result<T, String>,
{
    match get(var) {
        Some(raw) => parse(raw.trim()).map_err(|reason| ConfigError { var, reason }),
        None => Ok(default),
    }
}

fn parse_num<T: FromStr>(raw: &str) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e| format!("{raw:?}: {e}"))
}

/// Whole minutes, capped at one year.
fn parse_ttl(raw: &str) -> Result<Duration, String> {
    let minutes: u64 = parse_num(raw)?;
    if minutes > MAX_CACHE_TTL_MINUTES {
        return Err(format!("{minutes} exceeds {MAX_CACHE_TTL_MINUTES} minutes"));
    }
    minutes
        .checked_mul(60)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("{minutes} minutes overflows"))
}

fn parse_time(raw: &str) -> Result<NaiveTime, String> {
    parse_time_of_day(raw).ok_or_else(|| format!("{raw:?} is not a HH:MM time"))
}

fn parse_slot(raw: &str) -> Result<u32, String> {
    let minutes: u32 = parse_num(raw)?;
    if minutes == 0 || minutes > MAX_SLOT_MINUTES {
        return Err(format!("slot length must be between 1 and {MAX_SLOT_MINUTES} minutes, got {minutes}"));
    }
    Ok(minutes)
}

pub(crate) fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}
