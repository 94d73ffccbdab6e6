use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use common::SchedulingDomain;
use libextract::ExtractorConfig;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// ip:port the HTTP API listens on.
    pub addr: String,
    pub db_url: String,
    /// Only objects labeled with this operator are processed.
    pub operator: String,
    #[serde(default = "default_domains")]
    pub scheduling_domains: Vec<SchedulingDomain>,
    pub etcd: EtcdConfig,
    #[serde(default)]
    pub remote_clusters: Vec<RemoteClusterConfig>,
    #[serde(default)]
    pub extractors: Vec<ExtractorConfig>,
    /// Unconditional feature extraction interval, seconds.
    #[serde(default = "default_extract_interval")]
    pub extract_interval_secs: u64,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub endpoints: EndpointsConfig,
    /// Credentials handed to the out-of-scope sync collaborators.
    #[serde(default)]
    pub keystone_secret_ref: Option<String>,
    #[serde(default)]
    pub sso_secret_ref: Option<String>,
}

fn default_domains() -> Vec<SchedulingDomain> {
    vec![SchedulingDomain::Nova]
}

fn default_extract_interval() -> u64 {
    300
}

fn default_cleanup_interval() -> u64 {
    600
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EtcdConfig {
    pub endpoints: Vec<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ca_cert_file: Option<PathBuf>,
}

/// A remote cluster owning a subset of object kinds. Credentials are the
/// home cluster's; only the endpoints and CA differ.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteClusterConfig {
    pub endpoints: Vec<String>,
    pub ca_cert_file: Option<PathBuf>,
    pub kinds: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringConfig {
    /// Extra label pairs injected into all exported metrics.
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointsConfig {
    /// Outbound URL used by the (out-of-scope) reservation reconciler.
    #[serde(default)]
    pub nova_external_scheduler: Option<String>,
}

pub fn load_config(path: &str) -> Result<Config> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read config from {path}"))?;
    let cfg: Config = serde_yaml::from_str(&content).context("Failed to parse YAML config")?;
    Ok(cfg)
}
