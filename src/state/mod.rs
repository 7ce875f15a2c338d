//! Record of the local areas registered per VLAN domain.
//!
//! Discovery rebuilds a domain's bridge and uplink from the kernel but not its
//! local areas. Callers that manage membership across restarts keep it here
//! and hand it back to [`crate::vlan::Vlan::adopt_local_areas`].

use anyhow::{Context, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::iface::Netlink;
use crate::types::LocalArea;
use crate::vlan::Vlan;

/// One JSON file per domain under a state directory
#[derive(Debug, Clone)]
pub struct Store {
    dir: PathBuf,
}

impl Store {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }

    /// Local areas recorded for `name`; empty if there is no record
    pub fn load(&self, name: &str) -> Result<Vec<LocalArea>> {
        let path = self.path(name);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };

        serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse local area record {}", path.display()))
    }

    pub fn save(&self, name: &str, local_areas: &[LocalArea]) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create directory: {}", self.dir.display()))?;

        let path = self.path(name);
        let json = serde_json::to_string_pretty(local_areas)?;

        // Write then rename so a crash never leaves a truncated record
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to move record into {}", path.display()))?;
        Ok(())
    }

    /// Adopt the areas already recorded for `vlan` and record the merged list.
    ///
    /// Areas added after the domain was provisioned stay recorded when it is
    /// provisioned again from the same config.
    pub fn save_merged<N: Netlink>(&self, vlan: &mut Vlan<N>) -> Result<()> {
        vlan.adopt_local_areas(self.load(vlan.name())?);
        self.save(vlan.name(), vlan.list_local_area())
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        let path = self.path(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }
}
