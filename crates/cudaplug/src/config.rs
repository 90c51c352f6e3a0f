//! Plugin configuration as handed over by the host engine.
//!
//! The host passes string key/value pairs ([`PluginConfig::from_properties`]); deployments can
//! also provide a JSON file or `CUDAPLUG_*` environment variables.

use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::context::{CreationContext, Device};
use crate::env;
use crate::error::{PluginError, PluginResult};

pub const DEVICE_ID_KEY: &str = "DEVICE_ID";
pub const OPERATION_BENCHMARK_KEY: &str = "CUDA_OPERATION_BENCHMARK";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    /// Ordinal of the device operations are created for.
    pub device_id: u32,
    /// Lets operations trade creation time and workbuffer memory for faster kernels.
    pub operation_benchmark: bool,
}

impl PluginConfig {
    /// Parses host configuration keys. Unknown keys and malformed values are rejected.
    pub fn from_properties<'a, I>(properties: I) -> PluginResult<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut config = Self::default();
        for (key, value) in properties {
            config.set(key, value)?;
        }
        Ok(config)
    }

    pub fn set(&mut self, key: &str, value: &str) -> PluginResult<()> {
        match key {
            DEVICE_ID_KEY => {
                self.device_id = value.trim().parse().map_err(|_| {
                    PluginError::config(format!("{DEVICE_ID_KEY} must be a device ordinal, got `{value}`"))
                })?;
            }
            OPERATION_BENCHMARK_KEY => {
                self.operation_benchmark = parse_yes_no(OPERATION_BENCHMARK_KEY, value)?;
            }
            other => {
                return Err(PluginError::config(format!(
                    "unsupported configuration key `{other}`"
                )));
            }
        }
        Ok(())
    }

    /// Renders the configuration back into host key/value form.
    pub fn properties(&self) -> Vec<(&'static str, String)> {
        vec![
            (DEVICE_ID_KEY, self.device_id.to_string()),
            (
                OPERATION_BENCHMARK_KEY,
                if self.operation_benchmark { "YES" } else { "NO" }.to_string(),
            ),
        ]
    }

    pub fn from_json_str(json: &str) -> PluginResult<Self> {
        serde_json::from_str(json)
            .map_err(|err| PluginError::config(format!("malformed configuration json: {err}")))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("failed to read plugin config {}", path.display()))?;
        Self::from_json_str(&json)
            .with_context(|| format!("failed to parse plugin config {}", path.display()))
    }

    /// Defaults overridden by `CUDAPLUG_DEVICE_ID` and `CUDAPLUG_OPERATION_BENCHMARK`.
    ///
    /// A device id that does not parse is ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(raw) = env::device_id() {
            match raw.parse() {
                Ok(device_id) => config.device_id = device_id,
                Err(_) => log::warn!("ignoring CUDAPLUG_DEVICE_ID=`{raw}`: not a device ordinal"),
            }
        }
        if let Some(enabled) = env::operation_benchmark() {
            config.operation_benchmark = enabled;
        }
        config
    }

    pub fn device(&self) -> Device {
        Device::new(self.device_id)
    }

    pub fn creation_context(&self) -> CreationContext {
        CreationContext::new(self.device(), self.operation_benchmark)
    }
}

fn parse_yes_no(key: &str, value: &str) -> PluginResult<bool> {
    match value.trim().to_ascii_uppercase().as_str() {
        "YES" => Ok(true),
        "NO" => Ok(false),
        _ => Err(PluginError::config(format!(
            "{key} expects YES or NO, got `{value}`"
        ))),
    }
}
