use crate::config::schema::{OutputFormat, ScraperConfig};
use crate::error::{Error, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use std::path::Path;
use validator::Validate;

pub const ENV_PREFIX: &str = "SCRAPER";

/// Values given on the command line; these win over file and environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub base_url: Option<String>,
    pub max_pages: Option<u32>,
    pub parallelism: Option<usize>,
    pub delay_ms: Option<u64>,
    pub random_delay_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_backoff_ms: Option<u64>,
    pub retry_backoff_max_ms: Option<u64>,
    pub respect_robots_txt: Option<bool>,
    pub output_file: Option<String>,
    pub output_format: Option<OutputFormat>,
}

/// Serialization used when printing the effective configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Yaml,
    Json,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Layers defaults, an optional file (JSON/YAML/TOML by extension),
    /// `SCRAPER_*` environment variables and `overrides`, then validates.
    pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<ScraperConfig> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "{}: configuration file not found",
                    path.display()
                )));
            }
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true));
        builder = Self::apply_overrides(builder, overrides)?;

        let config: ScraperConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn render(config: &ScraperConfig, format: ConfigFormat) -> Result<String> {
        let text = match format {
            ConfigFormat::Toml => toml::to_string_pretty(config)?,
            ConfigFormat::Yaml => serde_yaml::to_string(config)?,
            ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        };
        Ok(text)
    }

    fn apply_overrides(
        builder: ConfigBuilder<DefaultState>,
        overrides: &Overrides,
    ) -> Result<ConfigBuilder<DefaultState>> {
        let as_int = |value: Option<u64>| value.map(|v| v as i64);

        let builder = builder
            .set_override_option("base_url", overrides.base_url.clone())?
            .set_override_option("max_pages", as_int(overrides.max_pages.map(u64::from)))?
            .set_override_option(
                "parallelism",
                as_int(overrides.parallelism.map(|v| v as u64)),
            )?
            .set_override_option("delay_ms", as_int(overrides.delay_ms))?
            .set_override_option("random_delay_ms", as_int(overrides.random_delay_ms))?
            .set_override_option(
                "max_retries",
                as_int(overrides.max_retries.map(u64::from)),
            )?
            .set_override_option("retry_backoff_ms", as_int(overrides.retry_backoff_ms))?
            .set_override_option(
                "retry_backoff_max_ms",
                as_int(overrides.retry_backoff_max_ms),
            )?
            .set_override_option("respect_robots_txt", overrides.respect_robots_txt)?
            .set_override_option("output_file", overrides.output_file.clone())?
            .set_override_option(
                "output_format",
                overrides.output_format.map(|f| f.to_string()),
            )?;
        Ok(builder)
    }
}
