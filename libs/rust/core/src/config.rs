//! Layered configuration: defaults, optional file, `TRAINHUB_*` environment, then overrides.

use anyhow::Result;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, Map};
use serde::de::DeserializeOwned;

pub const ENV_PREFIX: &str = "TRAINHUB";
pub const CONFIG_FILE_ENV: &str = "TRAINHUB_CONFIG_FILE";

/// Values applied above every other source, e.g. a legacy `PORT` variable.
pub type ConfigOverrides = Vec<(&'static str, Option<String>)>;

/// Loads `T` from the process environment.
///
/// `defaults` registers service-specific defaults on top of the shared
/// `service_name` and `log_level` keys.
pub fn load_config<T, F>(service: &str, defaults: F, overrides: ConfigOverrides) -> Result<T>
where
    T: DeserializeOwned,
    F: FnOnce(ConfigBuilder<DefaultState>) -> Result<ConfigBuilder<DefaultState>, ConfigError>,
{
    let file = std::env::var(CONFIG_FILE_ENV).ok();
    build_config(service, defaults, overrides, file, None)
}

pub(crate) fn build_config<T, F>(
    service: &str,
    defaults: F,
    overrides: ConfigOverrides,
    file: Option<String>,
    env: Option<Map<String, String>>,
) -> Result<T>
where
    T: DeserializeOwned,
    F: FnOnce(ConfigBuilder<DefaultState>) -> Result<ConfigBuilder<DefaultState>, ConfigError>,
{
    let mut builder = Config::builder()
        .set_default("service_name", service)?
        .set_default("log_level", "info")?;
    builder = defaults(builder)?;
    if let Some(file) = file {
        builder = builder.add_source(config::File::with_name(&file).required(false));
    }
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .source(env),
    );
    for (key, value) in overrides {
        builder = builder.set_override_option(key, value)?;
    }
    let cfg = builder.build()?;
    Ok(cfg.try_deserialize()?)
}

/// Same as [`load_config`] but with an explicit environment map, for callers that
/// must not observe the real process environment.
pub fn load_config_from<T, F>(
    service: &str,
    defaults: F,
    overrides: ConfigOverrides,
    file: Option<String>,
    env: Map<String, String>,
) -> Result<T>
where
    T: DeserializeOwned,
    F: FnOnce(ConfigBuilder<DefaultState>) -> Result<ConfigBuilder<DefaultState>, ConfigError>,
{
    build_config(service, defaults, overrides, file, Some(env))
}
