//! `httpload init` command implementation.

use anyhow::{Context, Result};
use std::path::Path;

/// Execute the `init` command.
///
/// Writes a starter scenario to `path`. Refuses to overwrite an existing
/// file unless `force` is set.
pub fn execute_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {}\n\
             Use `--force` to overwrite.",
            path.display()
        );
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, generate_default_template())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    eprintln!("Created {}", path.display());
    eprintln!("Edit base_url and the [[request]] blocks to match your service.");

    Ok(())
}

/// Starter scenario: three VUs for 25s against `/data` and `/health`.
fn generate_default_template() -> String {
    r#"# httpload scenario
#
# Run with: httpload run --config loadtest.toml

[settings]
# "constant-vus" runs `vus` users for `duration`.
# "staged" ramps through the [[stage]] blocks below instead.
executor = "constant-vus"
vus = 3
duration_secs = 25
timeout_ms = 10000
base_url = "http://localhost:8000"

# Pause between iterations: uniform random in [2s, 10s).
[sleep]
mode = "uniform-random"
range_secs = [2.0, 10.0]

# Uncomment (and set executor = "staged") to ramp up, hold, and ramp down.
# [[stage]]
# duration_secs = 10
# target = 5
#
# [[stage]]
# duration_secs = 30
# target = 5
#
# [[stage]]
# duration_secs = 10
# target = 0

[[request]]
name = "data"
url = "/data"
check = [
  { name = "status is 200", type = "status", equals = 200 },
  { name = "response time < 500ms", type = "duration_below", ms = 500 },
  { name = "has message", type = "json_field", field = "message" },
  { name = "has data array", type = "json_array", field = "data" },
]

[[request]]
name = "health"
url = "/health"
check = [
  { name = "status is 200", type = "status", equals = 200 },
]
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpload::loadtest::config::LoadTestConfig;
    use httpload::loadtest::profile::LoadProfile;
    use std::time::Duration;

    #[test]
    fn test_default_template_is_valid() {
        let config = LoadTestConfig::from_toml(&generate_default_template()).unwrap();
        assert_eq!(
            config.load_profile(),
            LoadProfile::Constant {
                vus: 3,
                duration: Duration::from_secs(25)
            }
        );
        assert_eq!(config.request.len(), 2);
        assert_eq!(config.request[0].check.len(), 4);
        assert_eq!(config.request[1].check.len(), 1);
    }

    #[test]
    fn test_init_writes_file_and_respects_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("loadtest.toml");

        execute_init(&path, false).unwrap();
        assert!(LoadTestConfig::load(&path).is_ok());

        std::fs::write(&path, "# edited").unwrap();
        let err = execute_init(&path, false).unwrap_err();
        assert!(err.to_string().contains("--force"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# edited");

        execute_init(&path, true).unwrap();
        assert!(LoadTestConfig::load(&path).is_ok());
    }
}
