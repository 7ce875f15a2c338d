//! Node-local VLAN domain manager
//!
//! A VLAN domain is a Linux bridge with VLAN filtering, one uplink attached to
//! it, and a set of local areas:
//! - each local area enables an 802.1Q tag on the uplink
//! - a local area with a subnet also routes that subnet via the local gateway
//! - discovery resumes management of a domain provisioned earlier

pub mod config;
pub mod error;
pub mod iface;
pub mod state;
pub mod types;
pub mod vlan;

// Re-export commonly used items
pub use config::{CtlConfig, VlanConf};
pub use error::{NetError, VlanError, VlanResult};
pub use iface::{generate_name, IpCommand, Netlink, BOND_SUFFIX, BRIDGE_SUFFIX};
pub use types::{Bridge, Link, LinkAttrs, LocalArea};
pub use vlan::{Registry, Vlan};
