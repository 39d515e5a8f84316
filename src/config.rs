//! Runtime configuration from environment variables.

use tracing::warn;

const DEFAULT_SKY_FEED_URL: &str =
    "http://www.unihedron.com/projects/darksky/database/index.php?csv=true";
const DEFAULT_CLOUD_FEED_URL: &str =
    "https://api.met.no/weatherapi/locationforecast/2.0/compact";
const DEFAULT_USER_AGENT: &str = "skyglow_fuser/0.1 (ops@skyglow.example)";

// Dublin city centre; the monitored site the cloud forecast is pulled for.
const DEFAULT_SITE_LATITUDE: f64 = 53.3498;
const DEFAULT_SITE_LONGITUDE: f64 = -6.2603;

const DEFAULT_RUN_INTERVAL_SECS: u64 = 3600;

/// Pipeline configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct SkyglowConfig {
    pub sky_feed_url: String,
    pub cloud_feed_url: String,
    pub site_latitude: f64,
    pub site_longitude: f64,
    /// Contact-identifying user agent, required by the weather provider.
    pub met_no_user_agent: String,
    /// Seconds between pipeline ticks in `run` mode.
    pub run_interval_secs: u64,
}

impl SkyglowConfig {
    /// Builds the config from environment variables, falling back to the
    /// defaults above. Unparseable numeric values are logged and replaced by
    /// their defaults rather than aborting startup.
    pub fn from_env() -> Self {
        Self {
            sky_feed_url: var_or("SKY_FEED_URL", DEFAULT_SKY_FEED_URL),
            cloud_feed_url: var_or("CLOUD_FEED_URL", DEFAULT_CLOUD_FEED_URL),
            site_latitude: parsed_var_or("SITE_LATITUDE", DEFAULT_SITE_LATITUDE),
            site_longitude: parsed_var_or("SITE_LONGITUDE", DEFAULT_SITE_LONGITUDE),
            met_no_user_agent: var_or("MET_NO_USER_AGENT", DEFAULT_USER_AGENT),
            run_interval_secs: parsed_var_or("RUN_INTERVAL_SECS", DEFAULT_RUN_INTERVAL_SECS),
        }
    }
}

impl Default for SkyglowConfig {
    fn default() -> Self {
        Self {
            sky_feed_url: DEFAULT_SKY_FEED_URL.to_string(),
            cloud_feed_url: DEFAULT_CLOUD_FEED_URL.to_string(),
            site_latitude: DEFAULT_SITE_LATITUDE,
            site_longitude: DEFAULT_SITE_LONGITUDE,
            met_no_user_agent: DEFAULT_USER_AGENT.to_string(),
            run_interval_secs: DEFAULT_RUN_INTERVAL_SECS,
        }
    }
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parsed_var_or<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(name, value = %raw, "Unparseable config value, using default");
            default
        }),
        Err(_) => default,
    }
}
