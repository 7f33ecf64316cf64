// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration loading.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use tokio::fs;

use super::types::FleetConfig;
use super::utils::expand_tilde;
use crate::ssh::SshOptions;

impl FleetConfig {
    /// Load configuration from a file. A missing file yields defaults.
    pub async fn load(path: &Path) -> Result<Self> {
        let expanded_path = expand_tilde(path);

        if !expanded_path.exists() {
            tracing::debug!(
                "Config file not found at {:?}, using defaults",
                expanded_path
            );
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&expanded_path)
            .await
            .with_context(|| format!("Failed to read configuration file at {}", expanded_path.display()))?;

        let config: FleetConfig = serde_yaml::from_str(&content).with_context(|| {
            format!(
                "Failed to parse YAML configuration file at {}",
                expanded_path.display()
            )
        })?;

        Ok(config)
    }

    /// `$XDG_CONFIG_HOME/bfleet/config.yaml` or the platform equivalent.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "bfleet").map(|dirs| dirs.config_dir().join("config.yaml"))
    }

    /// Load the explicit path if given, else the default location.
    pub async fn load_with_priority(cli_config_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = cli_config_path {
            tracing::debug!("Using explicitly specified config file: {:?}", path);
            return Self::load(path).await;
        }
        match Self::default_path() {
            Some(path) => Self::load(&path).await,
            None => {
                tracing::debug!("No configuration directory, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// SSH options from the configured defaults.
    pub fn ssh_options(&self) -> SshOptions {
        let mut options = SshOptions::default();
        let defaults = &self.defaults;
        if let Some(port) = defaults.port {
            options.port = port;
        }
        if let Some(identity) = &defaults.identity_file {
            options.identity_file = Some(expand_tilde(Path::new(identity)));
        }
        if let Some(use_agent) = defaults.use_agent {
            options.use_agent = use_agent;
        }
        if let Some(strict) = defaults.strict_host_key_checking {
            options.strict_host_key_checking = strict;
        }
        options
    }
}
