//! Configuration loader with environment variable expansion

use super::{AppConfig, ConfigError};
use lazy_static::lazy_static;
use regex_lite::Regex;
use std::path::Path;

/// Prefix of environment variables overriding file values, e.g.
/// `ZC_STORAGE__DRIVER=oss`
pub const ENV_PREFIX: &str = "ZC";

lazy_static! {
    static ref PLACEHOLDER: Regex =
        Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]+))?\}").expect("placeholder pattern");
}

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a YAML file, then apply `ZC_*` overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<AppConfig, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Parse configuration from YAML text, then apply `ZC_*` overrides
    pub fn from_yaml_str(content: &str) -> Result<AppConfig, ConfigError> {
        let expanded = Self::expand_env_vars(content);

        let settings = ::config::Config::builder()
            .add_source(::config::File::from_str(
                &expanded,
                ::config::FileFormat::Yaml,
            ))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;

        tracing::debug!(driver = %config.storage.driver, "Configuration loaded");
        Ok(config)
    }

    /// Expand `${VAR}` and `${VAR:-default}` placeholders.
    ///
    /// A placeholder whose variable is unset and has no default is kept as is.
    fn expand_env_vars(content: &str) -> String {
        let mut last_match = 0;
        let mut result = String::with_capacity(content.len());

        for cap in PLACEHOLDER.captures_iter(content) {
            let Some(full_match) = cap.get(0) else {
                continue;
            };
            let var_name = &cap[1];

            result.push_str(&content[last_match..full_match.start()]);

            let value = match std::env::var(var_name) {
                Ok(val) => val,
                Err(_) => match cap.get(2) {
                    Some(default) => default.as_str().to_string(),
                    None => full_match.as_str().to_string(),
                },
            };
            result.push_str(&value);

            last_match = full_match.end();
        }

        result.push_str(&content[last_match..]);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_expand_env_vars() {
        std::env::set_var("LOADER_TEST_VAR", "test_value");
        let expanded = ConfigLoader::expand_env_vars("key: ${LOADER_TEST_VAR}");
        assert_eq!(expanded, "key: test_value");
        std::env::remove_var("LOADER_TEST_VAR");
    }

    #[test]
    #[serial]
    fn test_expand_env_vars_default_and_missing() {
        std::env::remove_var("LOADER_MISSING_VAR");
        let expanded =
            ConfigLoader::expand_env_vars("a: ${LOADER_MISSING_VAR:-fallback}\nb: ${LOADER_MISSING_VAR}");
        assert_eq!(expanded, "a: fallback\nb: ${LOADER_MISSING_VAR}");
    }

    #[test]
    #[serial]
    fn test_from_yaml_str_defaults() {
        let config = ConfigLoader::from_yaml_str("storage:\n  driver: local\n").unwrap();
        assert_eq!(config.storage.local.directory, "storage");
        assert!(config.jwt.is_none());
        assert_eq!(config.captcha.expiration_secs, 300);
    }

    #[test]
    #[serial]
    fn test_environment_override() {
        std::env::set_var("ZC_STORAGE__LOCAL__DIRECTORY", "/srv/uploads");
        let config = ConfigLoader::from_yaml_str("storage:\n  driver: local\n").unwrap();
        std::env::remove_var("ZC_STORAGE__LOCAL__DIRECTORY");

        assert_eq!(config.storage.local.directory, "/srv/uploads");
    }

    #[test]
    #[serial]
    fn test_invalid_driver_fails_validation() {
        let result = ConfigLoader::from_yaml_str("storage:\n  driver: ftp\n");
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }
}
