use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::Vlan;
use crate::error::VlanResult;
use crate::iface::Netlink;

/// Shared handle to one domain. Holding the lock makes the holder the domain's
/// single writer.
pub type SharedVlan<N> = Arc<Mutex<Vlan<N>>>;

/// Domains managed by this process, keyed by name.
///
/// Operations on different domains proceed independently; operations on one
/// domain are serialised by its mutex.
pub struct Registry<N: Netlink + Clone> {
    netlink: N,
    domains: Mutex<HashMap<String, SharedVlan<N>>>,
}

impl<N: Netlink + Clone> Registry<N> {
    pub fn new(netlink: N) -> Self {
        Self {
            netlink,
            domains: Mutex::new(HashMap::new()),
        }
    }

    fn domains(&self) -> MutexGuard<'_, HashMap<String, SharedVlan<N>>> {
        // A panicking holder cannot leave the map half-updated
        self.domains.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a constructed domain, replacing any previous entry of the same
    /// name.
    pub fn insert(&self, vlan: Vlan<N>) -> SharedVlan<N> {
        let name = vlan.name().to_string();
        let shared = Arc::new(Mutex::new(vlan));
        self.domains().insert(name, Arc::clone(&shared));
        shared
    }

    pub fn get(&self, name: &str) -> Option<SharedVlan<N>> {
        self.domains().get(name).cloned()
    }

    /// Return the registered domain, or discover it from the kernel and
    /// register it. Nothing is registered when discovery fails.
    ///
    /// The map is not locked while discovering. If another caller registers
    /// the same name meanwhile, its entry wins and this discovery is dropped.
    pub fn get_or_discover(&self, name: &str) -> VlanResult<SharedVlan<N>> {
        if let Some(shared) = self.get(name) {
            return Ok(shared);
        }

        let vlan = Vlan::get(name, self.netlink.clone())?;
        let mut domains = self.domains();
        let shared = domains
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(vlan)));
        Ok(Arc::clone(shared))
    }

    pub fn remove(&self, name: &str) -> Option<SharedVlan<N>> {
        self.domains().remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.domains().keys().cloned().collect();
        names.sort();
        names
    }

    /// Run `f` while holding the domain's lock.
    ///
    /// Returns `None` if no domain of that name is registered.
    pub fn with_domain<T>(&self, name: &str, f: impl FnOnce(&mut Vlan<N>) -> T) -> Option<T> {
        let shared = self.get(name)?;
        let mut vlan = shared.lock().unwrap_or_else(|e| e.into_inner());
        Some(f(&mut *vlan))
    }
}
