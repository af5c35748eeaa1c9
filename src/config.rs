//! Configuration management for runhub.
//!
//! This module defines the structure of the `runhub.toml` configuration file
//! and turns it into the list of process specifications the supervisor runs.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::process::ProcessSpec;

/// Default configuration file, looked up in the current directory.
pub const DEFAULT_CONFIG_PATH: &str = "runhub.toml";

/// Top-level configuration structure corresponding to `runhub.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Whether a failing command ends the session.
    #[serde(default)]
    pub exit_on_completion: bool,
    /// File that receives diagnostic logs.
    pub log_file: Option<PathBuf>,
    /// Commands to supervise, in display-independent declaration order.
    #[serde(rename = "command", default)]
    pub commands: Vec<CommandConfig>,
}

/// Configuration for a single command.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandConfig {
    /// Display name; must be unique.
    pub name: String,
    /// Shell command line.
    pub command: String,
    /// Working directory for the command.
    pub dir: Option<String>,
    /// Whether a successful exit of this command ends the session.
    #[serde(default, alias = "exit_important")]
    pub critical: bool,
}

impl Config {
    /// Validates the command list and converts it into process specs.
    pub fn process_specs(&self) -> Result<Vec<ProcessSpec>> {
        if self.commands.is_empty() {
            bail!("no commands defined (add at least one [[command]] entry)");
        }
        let mut seen = HashSet::new();
        let mut specs = Vec::with_capacity(self.commands.len());
        for command in &self.commands {
            let name = command.name.trim();
            if name.is_empty() {
                bail!("command names must not be empty");
            }
            if command.command.trim().is_empty() {
                bail!("empty command for {}", name);
            }
            if !seen.insert(name.to_string()) {
                bail!("duplicate command name: {}", name);
            }
            specs.push(ProcessSpec {
                name: name.to_string(),
                command: command.command.clone(),
                cwd: command.dir.clone().filter(|dir| !dir.is_empty()),
                critical: command.critical,
            });
        }
        Ok(specs)
    }
}

/// Loads and parses the configuration from a file path.
pub fn load_config(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: Config = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(config)
}
