//! Application configuration management.
//!
//! This module handles loading configuration from environment variables.
//! It uses the `envy` crate to automatically deserialize environment variables into a type-safe struct.
//! The raw [`Config`] is then compiled into an [`AccessPolicy`], the immutable
//! value the access control layer consults on every request.

use regex::Regex;
use serde::Deserialize;

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (required): PostgreSQL connection string
/// - `JWT_SECRET` (required): HMAC secret used to verify bearer tokens
/// - `SERVER_PORT` (optional): HTTP server port, defaults to 3000
/// - `JWT_ALGORITHM` (optional): defaults to `HS256`
/// - `EXCEPT_PATH_LIST` (optional): comma-separated paths that skip validation and auditing
/// - `EXCEPT_PATH_REGEX` (optional): pattern for paths that skip validation but are audited
/// - `DEBUG` (optional): service APIs accept a bare access key instead of a signed query
/// - `TIMESTAMP_WINDOW_SECS` (optional): replay window, defaults to 10
/// - `TIMEZONE_HOUR_DIFF` (optional): hour offset applied to server time, defaults to 9
/// - `AUDIT_ALL_REQUESTS` (optional): audit every validated request, defaults to true
/// - `ALLOWED_SITES` (optional): comma-separated CORS origins; empty allows any
/// - `TRUSTED_HOSTS` (optional): comma-separated `Host` values (`*.domain` wildcards); empty allows any
/// - `DB_MAX_CONNECTIONS` (optional): pool size, defaults to 5
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    pub jwt_secret: String,

    #[serde(default = "default_port")]
    pub server_port: u16,

    #[serde(default = "default_jwt_algorithm")]
    pub jwt_algorithm: String,

    #[serde(default = "default_except_path_list")]
    pub except_path_list: Vec<String>,

    #[serde(default = "default_except_path_regex")]
    pub except_path_regex: String,

    #[serde(default)]
    pub debug: bool,

    #[serde(default = "default_timestamp_window")]
    pub timestamp_window_secs: i64,

    #[serde(default = "default_hour_diff")]
    pub timezone_hour_diff: i64,

    #[serde(default = "default_true")]
    pub audit_all_requests: bool,

    #[serde(default)]
    pub allowed_sites: Vec<String>,

    #[serde(default)]
    pub trusted_hosts: Vec<String>,

    #[serde(default = "default_max_connections")]
    pub db_max_connections: u32,
}

/// Default port if SERVER_PORT environment variable is not set.
fn default_port() -> u16 {
    3000
}

fn default_jwt_algorithm() -> String {
    "HS256".to_string()
}

fn default_except_path_list() -> Vec<String> {
    vec!["/".into(), "/health".into(), "/favicon.ico".into()]
}

fn default_except_path_regex() -> String {
    r"^(/docs|/redoc|/api/auth)|^.*\.(js|css|map|png|jpe?g|gif|svg|ico|woff2?|ttf|wasm)$".to_string()
}

fn default_timestamp_window() -> i64 {
    10
}

fn default_hour_diff() -> i64 {
    9
}

fn default_true() -> bool {
    true
}

fn default_max_connections() -> u32 {
    5
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// This method first attempts to load a `.env` file (which is optional),
    /// then reads environment variables and deserializes them into a Config struct.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Required environment variables are missing (e.g., DATABASE_URL)
    /// - Environment variable values cannot be parsed into expected types
    pub fn from_env() -> Result<Self, envy::Error> {
        // Try to load .env file if it exists (does nothing if not found)
        dotenvy::dotenv().ok();

        envy::from_env::<Config>()
    }

    /// Compile the path rules into the policy used by the access control layer.
    ///
    /// # Errors
    ///
    /// Returns an error if the exempt pattern does not compile, the hour
    /// offset is not a valid UTC offset, or the replay window is not positive.
    pub fn access_policy(&self) -> Result<AccessPolicy, ConfigError> {
        if !(-23..=23).contains(&self.timezone_hour_diff) {
            return Err(ConfigError::TimezoneHourDiff(self.timezone_hour_diff));
        }
        if self.timestamp_window_secs <= 0 {
            return Err(ConfigError::TimestampWindow(self.timestamp_window_secs));
        }

        Ok(AccessPolicy {
            except_paths: self.except_path_list.clone(),
            except_pattern: Regex::new(&self.except_path_regex)?,
            debug: self.debug,
            timestamp_window_secs: self.timestamp_window_secs,
            timezone_hour_diff: self.timezone_hour_diff,
            audit_all_requests: self.audit_all_requests,
        })
    }
}

/// Configuration values rejected at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid EXCEPT_PATH_REGEX: {0}")]
    ExceptPattern(#[from] regex::Error),

    #[error("TIMEZONE_HOUR_DIFF must be between -23 and 23, got {0}")]
    TimezoneHourDiff(i64),

    #[error("TIMESTAMP_WINDOW_SECS must be positive, got {0}")]
    TimestampWindow(i64),
}

/// Read-only rules shared by every request.
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    /// Literal paths that are neither validated nor audited.
    pub except_paths: Vec<String>,
    /// Paths matching this pattern from their first character are not
    /// validated, but their responses are audited.
    pub except_pattern: Regex,
    pub debug: bool,
    pub timestamp_window_secs: i64,
    pub timezone_hour_diff: i64,
    pub audit_all_requests: bool,
}

impl AccessPolicy {
    /// Whether the exempt pattern matches `path` starting at its first character.
    ///
    /// A match further into the path does not count, so `/docs` exempts
    /// `/docs/index` but not `/api/users/docs`.
    pub fn matches_except_pattern(&self, path: &str) -> bool {
        self.except_pattern
            .find(path)
            .is_some_and(|m| m.start() == 0)
    }
}

#[cfg(test)]
impl Default for AccessPolicy {
    fn default() -> Self {
        Self {
            except_paths: default_except_path_list(),
            except_pattern: Regex::new(&default_except_path_regex())
                .expect("default exempt pattern is valid"),
            debug: false,
            timestamp_window_secs: default_timestamp_window(),
            timezone_hour_diff: default_hour_diff(),
            audit_all_requests: true,
        }
    }
}
