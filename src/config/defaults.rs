/// Configuration default values
///
/// This module contains all the default values for configuration options,
/// making them easily changeable in one central location.
// Device connection defaults
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_USERNAME: &str = "admin";
// Note: host is the ONLY truly mandatory field with no default

// Polling defaults
pub const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 10;
pub const MIN_POLL_INTERVAL_SECONDS: u64 = 1;
pub const DEFAULT_SYSTEM_INTERVAL_SECS: u64 = 900;
pub const DEFAULT_ENABLED_METRICS: &[&str] = &[
    "voltage",
    "activePower",
    "activeEnergyImported",
    "activeEnergyExported",
];

// Read-only web surface defaults
pub const DEFAULT_WEB_ENABLED: bool = true;
pub const DEFAULT_WEB_HOST: &str = "127.0.0.1";
pub const DEFAULT_WEB_PORT: u16 = 8099;

// Environment overrides
pub const ENV_PREFIX: &str = "ENERGYME_";
pub const DEFAULT_CONFIG_FILE: &str = "energyme.toml";
