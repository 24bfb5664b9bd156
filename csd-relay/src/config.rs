//! csd-relay configuration
//!
//! Loaded from `csd-relay.toml`. Every field has a built-in default so the
//! service starts with no file at all; command-line flags override the file.

use csd_common::config::{load_toml_or_default, resolve_root_folder, LoggingConfig};
use csd_common::Result;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default config file name
pub const CONFIG_FILE_NAME: &str = "csd-relay.toml";

/// Default database file name inside the root folder
pub const DATABASE_FILE_NAME: &str = "submissions.db";

/// Default mapping file name inside the root folder
pub const MAPPING_FILE_NAME: &str = "field_mapping.json";

/// Top-level relay configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Folder holding the database and mapping file
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// Overrides `<root_folder>/submissions.db`
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Overrides `<root_folder>/field_mapping.json`
    #[serde(default)]
    pub mapping_file: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub portal: PortalConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub webhook: WebhookConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            root_folder: None,
            database_path: None,
            mapping_file: None,
            logging: LoggingConfig::default(),
            portal: PortalConfig::default(),
            retry: RetryConfig::default(),
            webhook: WebhookConfig::default(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5780
}

/// Command-line values that take precedence over the file
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub port: Option<u16>,
    pub root_folder: Option<PathBuf>,
    pub database_path: Option<PathBuf>,
    pub mapping_file: Option<PathBuf>,
}

/// Filesystem locations after applying overrides
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    pub root_folder: PathBuf,
    pub database_path: PathBuf,
    pub mapping_file: PathBuf,
}

impl RelayConfig {
    /// Load from an explicit path or the default location, then apply overrides
    ///
    /// Also returns the file the configuration came from, if any.
    pub fn load(
        explicit: Option<&Path>,
        overrides: &ConfigOverrides,
    ) -> Result<(Self, ResolvedPaths, Option<PathBuf>)> {
        let (mut config, source): (RelayConfig, _) = load_toml_or_default(explicit, CONFIG_FILE_NAME)?;
        let paths = config.apply_overrides(overrides);
        Ok((config, paths, source))
    }

    /// Apply command-line overrides and resolve file locations
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) -> ResolvedPaths {
        if let Some(port) = overrides.port {
            self.port = port;
        }

        let root_folder = resolve_root_folder(
            overrides.root_folder.as_deref(),
            self.root_folder.as_deref(),
        );

        let database_path = overrides
            .database_path
            .clone()
            .or_else(|| self.database_path.clone())
            .unwrap_or_else(|| root_folder.join(DATABASE_FILE_NAME));

        let mapping_file = overrides
            .mapping_file
            .clone()
            .or_else(|| self.mapping_file.clone())
            .unwrap_or_else(|| root_folder.join(MAPPING_FILE_NAME));

        ResolvedPaths {
            root_folder,
            database_path,
            mapping_file,
        }
    }
}

/// What to do with a 2xx response that matches no marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnrecognizedResponse {
    /// Treat as a transient failure and retry later
    #[default]
    Retry,
    /// Treat as success with confirmation code `VERIFY_MANUALLY`
    AcceptUnverified,
}

/// Response markers used to classify the portal's reply
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PortalMarkers {
    /// Case-insensitive text whose presence means the submission was accepted
    #[serde(default = "default_success_texts")]
    pub success_texts: Vec<String>,

    /// CSS selectors for elements that carry a rejection message
    #[serde(default = "default_rejection_selectors")]
    pub rejection_selectors: Vec<String>,

    /// CSS selector for the element holding the confirmation code
    #[serde(default)]
    pub confirmation_selector: Option<String>,

    #[serde(default)]
    pub unrecognized_response: UnrecognizedResponse,
}

impl Default for PortalMarkers {
    fn default() -> Self {
        Self {
            success_texts: default_success_texts(),
            rejection_selectors: default_rejection_selectors(),
            confirmation_selector: None,
            unrecognized_response: UnrecognizedResponse::default(),
        }
    }
}

fn default_success_texts() -> Vec<String> {
    vec!["thank you".to_string(), "success".to_string()]
}

fn default_rejection_selectors() -> Vec<String> {
    vec![
        ".error".to_string(),
        ".alert".to_string(),
        ".validation-summary".to_string(),
    ]
}

/// CSD portal connection settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PortalConfig {
    /// Page that serves (GET) and receives (POST) the project form
    #[serde(default = "default_portal_url")]
    pub url: String,

    /// Timeout for each HTTP phase, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Hidden ASP.NET state inputs copied from the fetched page
    #[serde(default = "default_state_fields")]
    pub state_fields: Vec<String>,

    /// State inputs whose absence means the page is not the form
    #[serde(default = "default_required_state_fields")]
    pub required_state_fields: Vec<String>,

    /// Fields posted with every submission, e.g. the submit button
    #[serde(default)]
    pub static_fields: BTreeMap<String, String>,

    /// Post a mapped key under the control's `name` when it matches a control `id`
    #[serde(default = "default_true")]
    pub resolve_control_names: bool,

    #[serde(default)]
    pub markers: PortalMarkers,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            url: default_portal_url(),
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
            state_fields: default_state_fields(),
            required_state_fields: default_required_state_fields(),
            static_fields: BTreeMap::new(),
            resolve_control_names: true,
            markers: PortalMarkers::default(),
        }
    }
}

fn default_portal_url() -> String {
    "https://www.csdportal.com/isDesignCenter/?loc=2378".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("csd-relay/{}", env!("CARGO_PKG_VERSION"))
}

fn default_state_fields() -> Vec<String> {
    [
        "__VIEWSTATE",
        "__VIEWSTATEGENERATOR",
        "__EVENTVALIDATION",
        "__EVENTTARGET",
        "__EVENTARGUMENT",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_required_state_fields() -> Vec<String> {
    vec!["__VIEWSTATE".to_string()]
}

fn default_true() -> bool {
    true
}

/// Scheduled retry settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Attempts after which a transient failure is left for manual retry
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay between retry passes while the portal is healthy, in seconds
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Upper bound for the backed-off delay, in seconds
    #[serde(default = "default_max_interval_secs")]
    pub max_interval_secs: u64,

    /// Delay growth factor after a pass that leaves failures
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: default_max_attempts(),
            interval_secs: default_interval_secs(),
            max_interval_secs: default_max_interval_secs(),
            multiplier: default_multiplier(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_interval_secs() -> u64 {
    300
}

fn default_max_interval_secs() -> u64 {
    3600
}

fn default_multiplier() -> f64 {
    2.0
}

/// Webhook intake settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct WebhookConfig {
    /// Shared secret for `X-JotForm-Signature`; unset disables verification
    #[serde(default)]
    pub secret: Option<String>,

    /// Reject deliveries without a signature header (only with a secret)
    #[serde(default)]
    pub require_signature: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let config: RelayConfig = toml::from_str("").unwrap();

        assert_eq!(config.port, 5780);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.portal.timeout_secs, 30);
        assert_eq!(config.portal.required_state_fields, vec!["__VIEWSTATE"]);
        assert_eq!(config.portal.state_fields.len(), 5);
        assert!(config.portal.resolve_control_names);
        assert_eq!(config.portal.markers.unrecognized_response, UnrecognizedResponse::Retry);
        assert_eq!(config.retry, RetryConfig::default());
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.webhook.secret.is_none());
    }

    #[test]
    fn test_sections_parse() {
        let config: RelayConfig = toml::from_str(
            r##"
port = 6000
root_folder = "/srv/csd"

[portal]
url = "http://127.0.0.1:9000/form.aspx"
timeout_secs = 5

[portal.static_fields]
"ctl00$cphBody$btnSubmit" = "Submit"

[portal.markers]
success_texts = ["project created"]
confirmation_selector = "#lblConfirmation"
unrecognized_response = "accept_unverified"

[retry]
max_attempts = 5
interval_secs = 60

[webhook]
secret = "s3cret"
require_signature = true
"##,
        )
        .unwrap();

        assert_eq!(config.port, 6000);
        assert_eq!(config.portal.url, "http://127.0.0.1:9000/form.aspx");
        assert_eq!(config.portal.static_fields["ctl00$cphBody$btnSubmit"], "Submit");
        assert_eq!(config.portal.markers.success_texts, vec!["project created"]);
        assert_eq!(
            config.portal.markers.unrecognized_response,
            UnrecognizedResponse::AcceptUnverified
        );
        // Unset marker lists keep their defaults
        assert_eq!(config.portal.markers.rejection_selectors.len(), 3);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.max_interval_secs, 3600);
        assert!(config.webhook.require_signature);
    }

    #[test]
    fn test_overrides_and_derived_paths() {
        let mut config: RelayConfig = toml::from_str(
            r#"
root_folder = "/srv/csd"
mapping_file = "/etc/csd/mapping.json"
"#,
        )
        .unwrap();

        let paths = config.apply_overrides(&ConfigOverrides {
            port: Some(7000),
            root_folder: Some(PathBuf::from("/data/relay")),
            ..Default::default()
        });

        assert_eq!(config.port, 7000);
        assert_eq!(paths.root_folder, PathBuf::from("/data/relay"));
        assert_eq!(paths.database_path, PathBuf::from("/data/relay/submissions.db"));
        assert_eq!(paths.mapping_file, PathBuf::from("/etc/csd/mapping.json"));
    }
}
