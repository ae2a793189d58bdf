use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

use crate::settings;

/// Engine tunables. User preferences live in the settings store instead.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Configuration {
    /// How often the clock is re-read while running.
    #[serde(default = "Configuration::default_tick_interval", with = "humantime_serde")]
    pub tick_interval: Duration,
    /// Number of countdown steps shown between images when autoplaying.
    #[serde(default = "Configuration::default_intermission_steps")]
    pub intermission_steps: u8,
    /// Length of one countdown step.
    #[serde(
        default = "Configuration::default_intermission_step",
        with = "humantime_serde"
    )]
    pub intermission_step: Duration,
    /// Allowed image extensions, without the dot. Matched case-insensitively.
    #[serde(default = "Configuration::default_image_extensions")]
    pub image_extensions: Vec<String>,
    /// Seed for the random image selector (useful for tests).
    #[serde(default)]
    pub selection_seed: Option<u64>,
    /// Overrides the per-user settings file location.
    #[serde(default)]
    pub settings_path: Option<PathBuf>,
    /// Capacity of the controller command channel.
    #[serde(default = "Configuration::default_command_buffer")]
    pub command_buffer: usize,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            tick_interval: Self::default_tick_interval(),
            intermission_steps: Self::default_intermission_steps(),
            intermission_step: Self::default_intermission_step(),
            image_extensions: Self::default_image_extensions(),
            selection_seed: None,
            settings_path: None,
            command_buffer: Self::default_command_buffer(),
        }
    }
}

impl Configuration {
    const fn default_tick_interval() -> Duration {
        Duration::from_millis(200)
    }

    const fn default_intermission_steps() -> u8 {
        3
    }

    const fn default_intermission_step() -> Duration {
        Duration::from_secs(1)
    }

    fn default_image_extensions() -> Vec<String> {
        ["jpg", "jpeg", "png", "gif"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    const fn default_command_buffer() -> usize {
        32
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let cfg: Self = serde_yaml::from_reader(file)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(cfg)
    }

    pub fn validated(mut self) -> Result<Self> {
        ensure!(
            !self.tick_interval.is_zero() && self.tick_interval <= Duration::from_secs(1),
            "tick-interval must be greater than zero and at most 1s"
        );
        ensure!(
            self.intermission_steps >= 1,
            "intermission-steps must be at least 1"
        );
        ensure!(self.command_buffer > 0, "command-buffer must be positive");

        self.image_extensions = self
            .image_extensions
            .iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        ensure!(
            !self.image_extensions.is_empty(),
            "image-extensions must name at least one extension"
        );
        Ok(self)
    }

    /// The configured settings path or the per-user default.
    pub fn settings_file(&self) -> Result<PathBuf> {
        match &self.settings_path {
            Some(path) => Ok(path.clone()),
            None => settings::default_settings_path().context("locating settings file"),
        }
    }
}
