use anyhow::{Context, Result};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::types::LocalArea;

/// Configuration for vlanctl
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CtlConfig {
    /// Path to the iproute2 `ip` binary
    pub ip_cmd: String,
    /// Path to the iproute2 `bridge` binary
    pub bridge_cmd: String,
    /// Directory holding the per-domain local area records
    pub state_dir: PathBuf,
    /// Deadline for one whole domain operation
    pub timeout_secs: u64,
}

impl Default for CtlConfig {
    fn default() -> Self {
        Self {
            ip_cmd: "/sbin/ip".to_string(),
            bridge_cmd: "/sbin/bridge".to_string(),
            state_dir: PathBuf::from("/var/lib/vlan-domain"),
            timeout_secs: 30,
        }
    }
}

impl CtlConfig {
    /// Load configuration from a JSON file, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let bytes = fs::read(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }
}

/// Declarative description of one VLAN domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlanConf {
    /// Domain name; device names derive from it
    pub name: String,
    /// Uplink device to attach to the bridge
    pub uplink: String,
    /// Local areas to enable once the uplink is attached
    #[serde(default, rename = "localAreas")]
    pub local_areas: Vec<LocalArea>,
}

impl VlanConf {
    /// Parse and validate a domain description
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let conf: VlanConf =
            serde_json::from_slice(bytes).context("Failed to parse VLAN configuration")?;
        conf.validate()?;
        Ok(conf)
    }

    pub fn new(name: &str, uplink: &str, local_areas: Vec<LocalArea>) -> Self {
        Self {
            name: name.to_string(),
            uplink: uplink.to_string(),
            local_areas,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            anyhow::bail!("VLAN name is required");
        }

        if self.uplink.is_empty() {
            anyhow::bail!("Uplink interface name is required");
        }

        for la in &self.local_areas {
            validate_vid(la.vid)?;
        }

        let duplicates = self
            .local_areas
            .iter()
            .map(|la| la.vid)
            .duplicates()
            .collect::<Vec<_>>();
        if !duplicates.is_empty() {
            anyhow::bail!(
                "Duplicate VLAN IDs in local areas: {}",
                duplicates.iter().join(", ")
            );
        }

        Ok(())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write VLAN configuration to {}", path.display()))?;
        Ok(())
    }
}

/// Reject tags outside the usable 802.1Q range
pub fn validate_vid(vid: u16) -> Result<()> {
    if !(1..=4094).contains(&vid) {
        anyhow::bail!("Invalid VLAN ID {} (must be between 1 and 4094)", vid);
    }
    Ok(())
}
