//! VLAN domain controller.
//!
//! A domain owns one bridge, at most one uplink attached to it, and the local
//! areas (VLAN tag plus optional subnet) enabled on that uplink. Every
//! multi-step operation stops at the first failing step and leaves completed
//! steps in place; each primitive is idempotent, so rerunning the whole
//! operation is the recovery path.

pub mod registry;

pub use registry::Registry;

use tracing::{debug, info};

use crate::error::{VlanError, VlanResult};
use crate::iface::{generate_name, Netlink, BOND_SUFFIX, BRIDGE_SUFFIX};
use crate::types::{Bridge, Link, LocalArea};

/// One VLAN domain: a bridge, its uplink and the local areas on it.
///
/// Not synchronised. Share it through [`Registry`] when more than one caller
/// may operate on the same domain.
#[derive(Debug)]
pub struct Vlan<N: Netlink> {
    name: String,
    bridge: Bridge,
    uplink: Option<Link>,
    local_areas: Vec<LocalArea>,
    /// Areas supplied at construction that setup has not applied yet
    pending: Vec<LocalArea>,
    netlink: N,
}

impl<N: Netlink> Vlan<N> {
    /// Build a domain in memory. The bridge may not exist in the kernel yet and
    /// no uplink is attached; `local_areas` are applied by [`Vlan::setup`].
    pub fn new(name: &str, local_areas: Vec<LocalArea>, netlink: N) -> Self {
        Self {
            name: name.to_string(),
            bridge: Bridge::new(generate_name(name, BRIDGE_SUFFIX)),
            uplink: None,
            local_areas: Vec::new(),
            pending: local_areas,
            netlink,
        }
    }

    /// Resume management of an already provisioned domain.
    ///
    /// The bridge is read back from the kernel and the uplink is resolved by
    /// its conventional name. Local areas are not rebuilt from the kernel's
    /// VLAN filters; callers that track them use [`Vlan::adopt_local_areas`].
    pub fn get(name: &str, netlink: N) -> VlanResult<Self> {
        let mut vlan = Self::new(name, Vec::new(), netlink);

        vlan.netlink
            .fetch_bridge(&mut vlan.bridge)
            .map_err(|source| VlanError::Discover {
                name: name.to_string(),
                source,
            })?;

        let uplink = vlan
            .netlink
            .link_by_name(&generate_name(name, BOND_SUFFIX))
            .map_err(|source| VlanError::Discover {
                name: name.to_string(),
                source,
            })?;
        vlan.uplink = Some(uplink);

        debug!(vlan = %name, bridge = %vlan.bridge.name, "Discovered VLAN network");
        Ok(vlan)
    }

    /// Create the bridge, attach `uplink` to it and apply the local areas
    /// supplied at construction.
    ///
    /// If applying an area fails, the areas before it stay applied and the rest
    /// stay pending; calling `setup` again resumes from the failed area.
    pub fn setup(&mut self, uplink: Link) -> VlanResult<()> {
        self.netlink
            .ensure_bridge(&self.bridge)
            .map_err(|source| VlanError::EnsureBridge {
                bridge: self.bridge.name.clone(),
                source,
            })?;

        self.netlink
            .set_master(&uplink, &self.bridge)
            .map_err(|source| VlanError::SetMaster {
                link: uplink.name.clone(),
                bridge: self.bridge.name.clone(),
                source,
            })?;
        info!(bridge = %self.bridge.name, uplink = %uplink.name, "Attached uplink");
        self.uplink = Some(uplink);

        while !self.pending.is_empty() {
            let la = self.pending[0].clone();
            let vid = la.vid;
            self.add_local_area(la)
                .map_err(|source| VlanError::ReplayLocalArea {
                    vid,
                    source: Box::new(source),
                })?;
            self.pending.remove(0);
        }

        Ok(())
    }

    /// Detach the uplink and delete the uplink and bridge devices.
    ///
    /// The domain must have an uplink, from [`Vlan::setup`] or [`Vlan::get`].
    pub fn teardown(&mut self) -> VlanResult<()> {
        info!(vlan = %self.name, "start to tear down VLAN network");
        let uplink = self.attached_uplink()?;

        // VLAN filter entries go away with the bridge port
        self.netlink
            .set_no_master(uplink)
            .map_err(|source| VlanError::SetNoMaster {
                link: uplink.name.clone(),
                source,
            })?;

        self.netlink
            .remove_link(&uplink.name)
            .map_err(|source| VlanError::RemoveUplink {
                link: uplink.name.clone(),
                source,
            })?;

        self.netlink
            .remove_link(&self.bridge.name)
            .map_err(|source| VlanError::RemoveBridge {
                bridge: self.bridge.name.clone(),
                source,
            })?;

        info!(vlan = %self.name, "tear down VLAN network successfully");
        Ok(())
    }

    /// Enable a VLAN tag on the uplink and, if the area has a subnet, route it
    /// via the local gateway.
    ///
    /// Adding a tag that is already registered succeeds without touching the
    /// kernel, even if the subnets differ.
    pub fn add_local_area(&mut self, la: LocalArea) -> VlanResult<()> {
        let uplink = self.attached_uplink()?;
        if self.find_vid(la.vid).is_some() {
            debug!(vid = la.vid, "Local area already present");
            return Ok(());
        }

        self.netlink
            .add_bridge_vlan(uplink, la.vid)
            .map_err(|source| VlanError::AddBridgeVlan {
                vid: la.vid,
                source,
            })?;

        if let Some(cidr) = &la.cidr {
            self.netlink
                .ensure_route_via_gateway(cidr)
                .map_err(|source| VlanError::EnsureRoute {
                    cidr: cidr.to_string(),
                    source,
                })?;
        }

        info!(bridge = %self.bridge.name, local_area = %la, "Added local area");
        self.local_areas.push(la);
        Ok(())
    }

    /// Disable a VLAN tag and drop the route of its subnet.
    ///
    /// Only `la.vid` is matched; the subnet recorded when the area was added
    /// decides whether a route is deleted. Unknown tags are a no-op.
    pub fn remove_local_area(&mut self, la: &LocalArea) -> VlanResult<()> {
        let uplink = self.attached_uplink()?;
        let Some(index) = self.find_vid(la.vid) else {
            debug!(vid = la.vid, "Local area not present");
            return Ok(());
        };

        self.netlink
            .del_bridge_vlan(uplink, la.vid)
            .map_err(|source| VlanError::DelBridgeVlan {
                vid: la.vid,
                source,
            })?;

        if let Some(cidr) = &self.local_areas[index].cidr {
            self.netlink
                .delete_route_via_gateway(cidr)
                .map_err(|source| VlanError::DeleteRoute {
                    cidr: cidr.to_string(),
                    source,
                })?;
        }

        let removed = self.local_areas.remove(index);
        info!(bridge = %self.bridge.name, local_area = %removed, "Removed local area");
        Ok(())
    }

    /// Register areas that are already applied in the kernel, as recorded by
    /// the caller, without calling any primitive. Tags already registered are
    /// skipped.
    pub fn adopt_local_areas(&mut self, local_areas: impl IntoIterator<Item = LocalArea>) {
        for la in local_areas {
            if self.find_vid(la.vid).is_none() {
                self.local_areas.push(la);
            }
        }
    }

    /// Areas applied to the uplink, in the order they were added.
    ///
    /// Areas passed to [`Vlan::new`] are listed only once [`Vlan::setup`] has
    /// applied them; until then they are in [`Vlan::pending_local_areas`].
    pub fn list_local_area(&self) -> &[LocalArea] {
        &self.local_areas
    }

    /// Construction-time areas setup has yet to apply
    pub fn pending_local_areas(&self) -> &[LocalArea] {
        &self.pending
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    pub fn uplink(&self) -> Option<&Link> {
        self.uplink.as_ref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &'static str {
        "vlanconfig"
    }

    fn attached_uplink(&self) -> VlanResult<&Link> {
        self.uplink.as_ref().ok_or_else(|| VlanError::NoUplink {
            bridge: self.bridge.name.clone(),
        })
    }

    fn find_vid(&self, vid: u16) -> Option<usize> {
        self.local_areas.iter().position(|la| la.vid == vid)
    }
}
