//! Layered executor configuration
//!
//! Precedence, lowest first: built-in defaults, the config file, `{prefix}*`
//! environment variables, command-line flags.

use anyhow::{Context, Result};
use retrier::config::ConfigOverrides;
use retrier::ExecutorConfig;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Read an executor configuration file
///
/// `.json` files are parsed as JSON; anything else as YAML.
pub fn load_file(path: &Path) -> Result<ExecutorConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;

    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let config: ExecutorConfig = if is_json {
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON in {}", path.display()))?
    } else {
        serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid YAML in {}", path.display()))?
    };
    Ok(config.normalized())
}

/// Resolve the effective configuration from every source
pub fn resolve(
    file: Option<&Path>,
    env_prefix: &str,
    flags: ConfigOverrides,
) -> Result<ExecutorConfig> {
    let base = match file {
        Some(path) => {
            debug!(path = %path.display(), "Loading executor config file");
            load_file(path)?
        }
        None => ExecutorConfig::default(),
    };

    let env = ConfigOverrides::from_env(env_prefix)
        .with_context(|| format!("Invalid {}* environment variable", env_prefix))?;

    Ok(base.merge(env).merge(flags))
}

#[cfg(test)]
mod tests {
    use super::*;
    use retrier::{DelayConfig, StrategyKind};
    use std::time::Duration;

    #[test]
    fn test_flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("executor.yaml");
        fs::write(
            &path,
            "strategy: queued\nparallelism: 6\ndelay:\n  kind: constant\n  delay_ms: 25\n",
        )
        .unwrap();

        let flags = ConfigOverrides {
            parallelism: Some(2),
            ..Default::default()
        };
        let config = resolve(Some(path.as_path()), "RETRIER_SETTINGS_TEST_UNSET_", flags).unwrap();

        assert_eq!(config.strategy, StrategyKind::Queued);
        assert_eq!(config.parallelism, 2);
        assert_eq!(
            config.delay,
            DelayConfig::Constant {
                delay: Duration::from_millis(25)
            }
        );
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = load_file(Path::new("/nonexistent/retrier.yaml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
