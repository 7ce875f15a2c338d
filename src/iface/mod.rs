//! Link and route primitives the VLAN domain controller is built on.
//!
//! [`Netlink`] is the seam between the controller and the kernel. The
//! production implementation, [`IpCommand`], drives the iproute2 `ip` and
//! `bridge` tools. Every operation is idempotent or a no-op when the target is
//! already in the requested state, so callers may retry a failed sequence from
//! the start.

mod ip;

pub use ip::IpCommand;

use ipnetwork::IpNetwork;
use std::sync::Arc;

use crate::error::NetError;
use crate::types::{Bridge, Link};

/// Suffix of the bridge device owned by a VLAN domain
pub const BRIDGE_SUFFIX: &str = "-br";

/// Suffix of the bonded uplink attached to a VLAN domain's bridge
pub const BOND_SUFFIX: &str = "-bo";

/// Derive a device name from a domain name.
///
/// Linux limits interface names to `IFNAMSIZ - 1` bytes, so the prefix is cut
/// short when the result would not fit. The suffix is always kept intact.
pub fn generate_name(prefix: &str, suffix: &str) -> String {
    let max_prefix_len = (libc::IFNAMSIZ - 1).saturating_sub(suffix.len());

    let mut end = prefix.len().min(max_prefix_len);
    while !prefix.is_char_boundary(end) {
        end -= 1;
    }

    format!("{}{}", &prefix[..end], suffix)
}

/// Kernel operations required to manage a VLAN domain
pub trait Netlink {
    /// Create the bridge if absent, with VLAN filtering enabled, and bring it up
    fn ensure_bridge(&self, bridge: &Bridge) -> Result<(), NetError>;

    /// Load the current attributes of an existing bridge
    fn fetch_bridge(&self, bridge: &mut Bridge) -> Result<(), NetError>;

    /// Resolve a link by name
    fn link_by_name(&self, name: &str) -> Result<Link, NetError>;

    /// Enslave a link to a bridge
    fn set_master(&self, link: &Link, bridge: &Bridge) -> Result<(), NetError>;

    /// Release a link from its bridge. The kernel drops the link's VLAN filter
    /// entries along with the port.
    fn set_no_master(&self, link: &Link) -> Result<(), NetError>;

    /// Delete a device. Absent devices are not an error.
    fn remove_link(&self, name: &str) -> Result<(), NetError>;

    /// Add an 802.1Q filter entry for `vid` on a bridge port
    fn add_bridge_vlan(&self, link: &Link, vid: u16) -> Result<(), NetError>;

    /// Remove the 802.1Q filter entry for `vid`. Absent entries are not an error.
    fn del_bridge_vlan(&self, link: &Link, vid: u16) -> Result<(), NetError>;

    /// Route `cidr` via the gateway of the default route
    fn ensure_route_via_gateway(&self, cidr: &IpNetwork) -> Result<(), NetError>;

    /// Remove the route for `cidr` via the default gateway. Absent routes are
    /// not an error.
    fn delete_route_via_gateway(&self, cidr: &IpNetwork) -> Result<(), NetError>;
}

macro_rules! forward_netlink {
    ($($ty:ty),*) => {$(
        impl<T: Netlink + ?Sized> Netlink for $ty {
            fn ensure_bridge(&self, bridge: &Bridge) -> Result<(), NetError> {
                (**self).ensure_bridge(bridge)
            }

            fn fetch_bridge(&self, bridge: &mut Bridge) -> Result<(), NetError> {
                (**self).fetch_bridge(bridge)
            }

            fn link_by_name(&self, name: &str) -> Result<Link, NetError> {
                (**self).link_by_name(name)
            }

            fn set_master(&self, link: &Link, bridge: &Bridge) -> Result<(), NetError> {
                (**self).set_master(link, bridge)
            }

            fn set_no_master(&self, link: &Link) -> Result<(), NetError> {
                (**self).set_no_master(link)
            }

            fn remove_link(&self, name: &str) -> Result<(), NetError> {
                (**self).remove_link(name)
            }

            fn add_bridge_vlan(&self, link: &Link, vid: u16) -> Result<(), NetError> {
                (**self).add_bridge_vlan(link, vid)
            }

            fn del_bridge_vlan(&self, link: &Link, vid: u16) -> Result<(), NetError> {
                (**self).del_bridge_vlan(link, vid)
            }

            fn ensure_route_via_gateway(&self, cidr: &IpNetwork) -> Result<(), NetError> {
                (**self).ensure_route_via_gateway(cidr)
            }

            fn delete_route_via_gateway(&self, cidr: &IpNetwork) -> Result<(), NetError> {
                (**self).delete_route_via_gateway(cidr)
            }
        }
    )*};
}

forward_netlink!(Arc<T>, &T);
