use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;
use trainhub_core::config::{load_config, load_config_from, ConfigOverrides};

pub const SERVICE_NAME: &str = "coordinator-service";

#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorConfig {
    pub service_name: String,
    pub log_level: String,
    pub port: u16,
    /// Separate listener for `/live`, `/ready`, `/status`, `/metrics`; 0 disables it.
    pub health_port: u16,
    pub datasets_dir: PathBuf,
    pub models_dir: PathBuf,
    pub public_dir: PathBuf,
    pub max_upload_bytes: usize,
}

type Builder = config::ConfigBuilder<config::builder::DefaultState>;

fn defaults(b: Builder) -> Result<Builder, config::ConfigError> {
    b.set_default("port", 5000)?
        .set_default("health_port", 9091)?
        .set_default("datasets_dir", "datasets")?
        .set_default("models_dir", "/tmp/models")?
        .set_default("public_dir", "public")?
        .set_default("max_upload_bytes", 536_870_912i64)
}

/// The bare `PORT` variable takes precedence over every other source.
fn overrides(port: Option<String>) -> ConfigOverrides {
    vec![("port", port)]
}

impl CoordinatorConfig {
    pub fn load() -> Result<Self> {
        load_config(SERVICE_NAME, defaults, overrides(std::env::var("PORT").ok()))
    }

    pub fn from_env_map(env: config::Map<String, String>, port: Option<String>) -> Result<Self> {
        load_config_from(SERVICE_NAME, defaults, overrides(port), None, env)
    }
}
