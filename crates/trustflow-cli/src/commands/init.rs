//! Init command - initializes Trustflow configuration in a project

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::fs;
use std::path::Path;
use trustflow_core::config::CONFIG_FILENAME;

use super::Outcome;

const DEFAULT_CONFIG: &str = r#"# Trustflow configuration file

[analysis]
# Directory of the interpreter's JavaScript-modeled builtin packages
# builtins_dir = "/opt/interpreter/builtins"

# Truncate domains at the first '.' and collapse local sub-domains
consolidate = false

# Collapse local sub-domains into a single local domain
aggregate_locals = false

[diff]
# Policy used by `trustflow diff` (broad, new-local, single-local)
policy = "single-local"

[cross_package]
# Dependencies left out of the cross-package flow graph
excluded = ["util"]

# Utility libraries that are never treated as flow targets
always_exclude = ["jquery", "underscore", "lodash"]
"#;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Force overwrite existing configuration
    #[arg(short, long)]
    pub force: bool,
}

impl InitArgs {
    pub fn run(&self) -> Result<Outcome> {
        self.init_in(Path::new("."))?;
        Ok(Outcome::Clean)
    }

    fn init_in(&self, dir: &Path) -> Result<()> {
        let config_path = dir.join(CONFIG_FILENAME);

        if config_path.exists() && !self.force {
            anyhow::bail!(
                "Config file '{}' already exists. Use --force to overwrite.",
                CONFIG_FILENAME
            );
        }

        fs::write(&config_path, DEFAULT_CONFIG)?;
        println!(
            "{} Created {} configuration file",
            "✓".green().bold(),
            CONFIG_FILENAME.cyan()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use trustflow_core::config::{Config, load_config_with_warnings};

    #[test]
    fn init_creates_config_file() {
        let dir = tempdir().unwrap();

        let result = InitArgs { force: false }.init_in(dir.path());

        assert!(result.is_ok());
        assert!(dir.path().join(CONFIG_FILENAME).exists());
    }

    #[test]
    fn init_fails_if_config_exists_without_force() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILENAME), "existing").unwrap();

        let result = InitArgs { force: false }.init_in(dir.path());

        assert!(result.is_err());
        let content = fs::read_to_string(dir.path().join(CONFIG_FILENAME)).unwrap();
        assert_eq!(content, "existing");
    }

    #[test]
    fn init_with_force_overwrites_existing() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILENAME), "existing").unwrap();

        let result = InitArgs { force: true }.init_in(dir.path());

        assert!(result.is_ok());
        let content = fs::read_to_string(dir.path().join(CONFIG_FILENAME)).unwrap();
        assert!(content.contains("[analysis]"));
    }

    #[test]
    fn default_config_is_valid_toml() {
        let config: Result<toml::Table, _> = DEFAULT_CONFIG.parse();
        assert!(config.is_ok());
    }

    #[test]
    fn default_config_matches_builtin_defaults() {
        let dir = tempdir().unwrap();
        InitArgs { force: false }.init_in(dir.path()).unwrap();

        let result = load_config_with_warnings(&dir.path().join(CONFIG_FILENAME)).unwrap();

        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
        assert_eq!(result.config, Config::default());
    }
}
