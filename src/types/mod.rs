use ipnetwork::IpNetwork;
use serde::{de, Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// A VLAN tag enabled on the uplink, with an optional subnet routed via the
/// local gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalArea {
    /// 802.1Q tag
    pub vid: u16,
    /// Subnet routed via the local gateway while the area exists
    #[serde(
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub cidr: Option<IpNetwork>,
}

impl LocalArea {
    pub fn new(vid: u16, cidr: Option<IpNetwork>) -> Self {
        Self { vid, cidr }
    }

    /// VLAN membership without a routing side effect
    pub fn vlan_only(vid: u16) -> Self {
        Self { vid, cidr: None }
    }
}

impl fmt::Display for LocalArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cidr {
            Some(cidr) => write!(f, "{}={}", self.vid, cidr),
            None => write!(f, "{}", self.vid),
        }
    }
}

/// Parses `VID` or `VID=CIDR`.
impl FromStr for LocalArea {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (vid, cidr) = match s.split_once('=') {
            Some((vid, cidr)) => (vid, Some(cidr.trim())),
            None => (s, None),
        };

        let vid = vid
            .trim()
            .parse::<u16>()
            .map_err(|e| format!("invalid VLAN ID '{}': {}", vid, e))?;

        let cidr = match cidr {
            None | Some("") => None,
            Some(cidr) => Some(
                cidr.parse::<IpNetwork>()
                    .map_err(|e| format!("invalid CIDR '{}': {}", cidr, e))?,
            ),
        };

        Ok(Self { vid, cidr })
    }
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<IpNetwork>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(cidr) => cidr.parse().map(Some).map_err(de::Error::custom),
    }
}

/// Attributes of a kernel link, as reported by `ip -j -d link show`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkAttrs {
    /// Interface index
    pub index: u32,
    /// MTU
    pub mtu: Option<u32>,
    /// Hardware address
    pub address: Option<String>,
    /// Operational state (UP, DOWN, UNKNOWN, ...)
    pub oper_state: Option<String>,
    /// Link kind from linkinfo; `None` for a physical NIC
    pub kind: Option<String>,
    /// Name of the bridge or bond this link is enslaved to
    pub master: Option<String>,
    /// Bridge VLAN filtering, only reported for bridges
    pub vlan_filtering: Option<bool>,
}

/// Bridge device handle. The device itself may not exist yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bridge {
    pub name: String,
    /// Filled in by `Netlink::fetch_bridge`
    pub attrs: Option<LinkAttrs>,
}

impl Bridge {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: None,
        }
    }
}

/// Existing kernel link, resolved by name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Link {
    pub name: String,
    pub attrs: LinkAttrs,
}

impl Link {
    pub fn new(name: impl Into<String>, attrs: LinkAttrs) -> Self {
        Self {
            name: name.into(),
            attrs,
        }
    }

    /// Handle carrying only a name, for links whose attributes are not needed
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(name, LinkAttrs::default())
    }
}
