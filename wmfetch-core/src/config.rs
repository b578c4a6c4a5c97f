//! Configuration of the watermark fetcher of one vertex.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use crate::Error;
use crate::Result;

const ENV_VERTEX: &str = "WM_FETCH_VERTEX";
const ENV_OT_BUCKET: &str = "WM_FETCH_OT_BUCKET";
const ENV_HB_BUCKET: &str = "WM_FETCH_HB_BUCKET";
const ENV_TIMELINE_CAPACITY: &str = "WM_FETCH_TIMELINE_CAPACITY";
const ENV_REFRESH_INTERVAL_SECS: &str = "WM_FETCH_REFRESH_INTERVAL_SECS";
const ENV_INACTIVE_AFTER_SECS: &str = "WM_FETCH_INACTIVE_AFTER_SECS";
const ENV_DELETE_AFTER_SECS: &str = "WM_FETCH_DELETE_AFTER_SECS";

const DEFAULT_VERTEX: &str = "default";
const DEFAULT_OT_BUCKET: &str = "default_OT";
const DEFAULT_HB_BUCKET: &str = "default_PROCESSORS";
const DEFAULT_TIMELINE_CAPACITY: usize = 10;
const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 5;
const DEFAULT_INACTIVE_AFTER_SECS: u64 = 5;
const DEFAULT_DELETE_AFTER_SECS: u64 = 50;

/// Watermark movements of the upstream processors are captured via two Key/Value buckets, the
/// offset timeline (OT) bucket and the heartbeat bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchConfig {
    /// Name of the consuming vertex.
    pub vertex: String,
    /// Offset Timeline (OT) bucket.
    pub ot_bucket: String,
    /// Heartbeat bucket for processor heartbeats.
    pub hb_bucket: String,
    /// Number of (watermark, offset) entries retained per processor.
    pub timeline_capacity: usize,
    /// How often the processor statuses are re-evaluated.
    pub refresh_interval: Duration,
    /// A processor without heartbeat for longer than this is inactive.
    pub inactive_after: Duration,
    /// A processor without heartbeat for longer than this is deleted.
    pub delete_after: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfig {
            vertex: DEFAULT_VERTEX.to_string(),
            ot_bucket: DEFAULT_OT_BUCKET.to_string(),
            hb_bucket: DEFAULT_HB_BUCKET.to_string(),
            timeline_capacity: DEFAULT_TIMELINE_CAPACITY,
            refresh_interval: Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS),
            inactive_after: Duration::from_secs(DEFAULT_INACTIVE_AFTER_SECS),
            delete_after: Duration::from_secs(DEFAULT_DELETE_AFTER_SECS),
        }
    }
}

impl FetchConfig {
    /// Loads the config from the given environment variables, falling back to the defaults for
    /// the ones which are not set.
    pub fn load(env_vars: &HashMap<String, String>) -> Result<Self> {
        let mut config = FetchConfig::default();

        if let Some(vertex) = env_vars.get(ENV_VERTEX) {
            config.vertex = vertex.clone();
        }
        if let Some(ot_bucket) = env_vars.get(ENV_OT_BUCKET) {
            config.ot_bucket = ot_bucket.clone();
        }
        if let Some(hb_bucket) = env_vars.get(ENV_HB_BUCKET) {
            config.hb_bucket = hb_bucket.clone();
        }
        if let Some(capacity) = parse_env(env_vars, ENV_TIMELINE_CAPACITY)? {
            config.timeline_capacity = capacity;
        }
        if let Some(secs) = parse_env(env_vars, ENV_REFRESH_INTERVAL_SECS)? {
            config.refresh_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env(env_vars, ENV_INACTIVE_AFTER_SECS)? {
            config.inactive_after = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env(env_vars, ENV_DELETE_AFTER_SECS)? {
            config.delete_after = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeline_capacity == 0 {
            return Err(Error::Config(
                "timeline capacity must be greater than 0".to_string(),
            ));
        }
        if self.refresh_interval.is_zero() {
            return Err(Error::Config(
                "refresh interval must be greater than 0".to_string(),
            ));
        }
        if self.delete_after < self.inactive_after {
            return Err(Error::Config(format!(
                "delete_after ({:?}) must not be smaller than inactive_after ({:?})",
                self.delete_after, self.inactive_after
            )));
        }
        Ok(())
    }
}

fn parse_env<T: FromStr>(env_vars: &HashMap<String, String>, key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    env_vars
        .get(key)
        .map(|value| {
            value
                .parse::<T>()
                .map_err(|e| Error::Config(format!("Failed to parse {key}={value}: {e}")))
        })
        .transpose()
}
