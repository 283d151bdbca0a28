use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::{env, fs, path::Path};
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub webserver: Webserver,
    #[serde(default)]
    pub watcher: Watcher,
    #[serde(default)]
    pub scan_requests: ScanRequests,
    #[serde(default = "default_app_label")]
    pub app_label: String,
    #[serde(default = "default_internal_image_patterns")]
    pub internal_image_patterns: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Webserver {
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Watcher {
    pub enabled: bool,
    /// Namespace to watch; all namespaces when unset
    pub namespace: Option<String>,
    pub workers: usize,
    /// Cron expression (with seconds) for periodic resync, empty to disable
    pub resync_schedule: String,
}

impl Default for Watcher {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: None,
            workers: 4,
            resync_schedule: "0 */10 * * * *".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanRequests {
    /// Namespace holding ScanRequest and ImageRecord objects; the client's default when unset
    pub namespace: Option<String>,
}

fn default_app_label() -> String {
    "app".to_string()
}

fn default_internal_image_patterns() -> Vec<String> {
    vec![
        "registry.redhat".to_string(),
        "quay.io/openshift-release-dev".to_string(),
    ]
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    info!("Loading config from file {}", path.as_ref().display());
    let yaml_str = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

    let expanded = expand_env_vars(&yaml_str)?;

    let config = serde_yaml_ng::from_str(&expanded)
        .context("Failed to parse YAML config after environment variable expansion")?;

    Ok(config)
}

/// Replaces `${VAR}` placeholders with environment variables values.
/// Returns an error naming every variable that is not set.
fn expand_env_vars(input: &str) -> Result<String> {
    let re =
        Regex::new(r"\$\{([^}]+)}").context("Invalid regex pattern for env var substitution")?;

    let mut missing = Vec::new();
    let result = re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        env::var(var_name).unwrap_or_else(|_| {
            missing.push(var_name.to_string());
            String::new()
        })
    });

    if !missing.is_empty() {
        anyhow::bail!("Missing environment variable: {}", missing.join(", "));
    }

    Ok(result.into_owned())
}
