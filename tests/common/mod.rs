// File: tests/common/mod.rs
#![allow(dead_code)]

use ipnetwork::IpNetwork;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use vlan_domain::{Bridge, Link, LinkAttrs, NetError, Netlink};

/// One primitive call, as seen by the fake kernel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    EnsureBridge(String),
    FetchBridge(String),
    LinkByName(String),
    SetMaster { link: String, bridge: String },
    SetNoMaster(String),
    RemoveLink(String),
    AddBridgeVlan { link: String, vid: u16 },
    DelBridgeVlan { link: String, vid: u16 },
    EnsureRoute(String),
    DeleteRoute(String),
}

type FailWhen = Box<dyn Fn(&Call) -> bool + Send + Sync>;

#[derive(Default)]
struct KernelState {
    links: BTreeSet<String>,
    vlans: BTreeSet<(String, u16)>,
    routes: BTreeSet<String>,
}

/// Netlink fake that records every call and keeps a tiny model of the
/// kernel's links, VLAN filters and routes.
#[derive(Default)]
pub struct FakeNetlink {
    calls: Mutex<Vec<Call>>,
    kernel: Mutex<KernelState>,
    fail_when: Mutex<Vec<FailWhen>>,
    held: Mutex<HashMap<String, (Sender<()>, Receiver<()>)>>,
}

impl fmt::Debug for FakeNetlink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeNetlink")
            .field("calls", &self.calls())
            .finish()
    }
}

impl FakeNetlink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fake kernel that already has these devices
    pub fn with_links(names: &[&str]) -> Arc<Self> {
        let fake = Self::default();
        {
            let mut kernel = fake.kernel.lock().unwrap();
            for name in names {
                kernel.links.insert(name.to_string());
            }
        }
        Arc::new(fake)
    }

    /// Make every call matching `predicate` fail with a command error
    pub fn fail_when(&self, predicate: impl Fn(&Call) -> bool + Send + Sync + 'static) {
        self.fail_when.lock().unwrap().push(Box::new(predicate));
    }

    /// Park the next `fetch_bridge` of `bridge` until released. Returns a
    /// receiver signalled once the call is parked and a sender releasing it.
    pub fn hold_fetch(&self, bridge: &str) -> (Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        self.held
            .lock()
            .unwrap()
            .insert(bridge.to_string(), (entered_tx, release_rx));
        (entered_rx, release_tx)
    }

    pub fn clear_failures(&self) {
        self.fail_when.lock().unwrap().clear();
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|call| predicate(call)).count()
    }

    pub fn has_link(&self, name: &str) -> bool {
        self.kernel.lock().unwrap().links.contains(name)
    }

    pub fn vlans(&self) -> Vec<(String, u16)> {
        self.kernel.lock().unwrap().vlans.iter().cloned().collect()
    }

    pub fn routes(&self) -> Vec<String> {
        self.kernel.lock().unwrap().routes.iter().cloned().collect()
    }

    fn record(&self, call: Call) -> Result<(), NetError> {
        self.calls.lock().unwrap().push(call.clone());

        let failing = self.fail_when.lock().unwrap().iter().any(|p| p(&call));
        if failing {
            return Err(NetError::Command {
                command: format!("{:?}", call),
                exit_code: 2,
                output: "RTNETLINK answers: Operation not permitted".to_string(),
            });
        }
        Ok(())
    }
}

impl Netlink for FakeNetlink {
    fn ensure_bridge(&self, bridge: &Bridge) -> Result<(), NetError> {
        self.record(Call::EnsureBridge(bridge.name.clone()))?;
        self.kernel.lock().unwrap().links.insert(bridge.name.clone());
        Ok(())
    }

    fn fetch_bridge(&self, bridge: &mut Bridge) -> Result<(), NetError> {
        let held = self.held.lock().unwrap().remove(&bridge.name);
        if let Some((entered, release)) = held {
            let _ = entered.send(());
            let _ = release.recv();
        }
        self.record(Call::FetchBridge(bridge.name.clone()))?;
        if !self.has_link(&bridge.name) {
            return Err(NetError::not_found(bridge.name.clone()));
        }
        bridge.attrs = Some(LinkAttrs {
            index: 7,
            kind: Some("bridge".to_string()),
            vlan_filtering: Some(true),
            ..LinkAttrs::default()
        });
        Ok(())
    }

    fn link_by_name(&self, name: &str) -> Result<Link, NetError> {
        self.record(Call::LinkByName(name.to_string()))?;
        if !self.has_link(name) {
            return Err(NetError::not_found(name));
        }
        Ok(Link::named(name))
    }

    fn set_master(&self, link: &Link, bridge: &Bridge) -> Result<(), NetError> {
        self.record(Call::SetMaster {
            link: link.name.clone(),
            bridge: bridge.name.clone(),
        })
    }

    fn set_no_master(&self, link: &Link) -> Result<(), NetError> {
        self.record(Call::SetNoMaster(link.name.clone()))?;
        // Leaving the bridge drops the port's VLAN filters
        self.kernel
            .lock()
            .unwrap()
            .vlans
            .retain(|(port, _)| port != &link.name);
        Ok(())
    }

    fn remove_link(&self, name: &str) -> Result<(), NetError> {
        self.record(Call::RemoveLink(name.to_string()))?;
        self.kernel.lock().unwrap().links.remove(name);
        Ok(())
    }

    fn add_bridge_vlan(&self, link: &Link, vid: u16) -> Result<(), NetError> {
        self.record(Call::AddBridgeVlan {
            link: link.name.clone(),
            vid,
        })?;
        self.kernel
            .lock()
            .unwrap()
            .vlans
            .insert((link.name.clone(), vid));
        Ok(())
    }

    fn del_bridge_vlan(&self, link: &Link, vid: u16) -> Result<(), NetError> {
        self.record(Call::DelBridgeVlan {
            link: link.name.clone(),
            vid,
        })?;
        self.kernel
            .lock()
            .unwrap()
            .vlans
            .remove(&(link.name.clone(), vid));
        Ok(())
    }

    fn ensure_route_via_gateway(&self, cidr: &IpNetwork) -> Result<(), NetError> {
        self.record(Call::EnsureRoute(cidr.to_string()))?;
        self.kernel.lock().unwrap().routes.insert(cidr.to_string());
        Ok(())
    }

    fn delete_route_via_gateway(&self, cidr: &IpNetwork) -> Result<(), NetError> {
        self.record(Call::DeleteRoute(cidr.to_string()))?;
        self.kernel.lock().unwrap().routes.remove(&cidr.to_string());
        Ok(())
    }
}

pub fn cidr(s: &str) -> Option<IpNetwork> {
    Some(s.parse().expect("valid CIDR"))
}

pub fn vids(local_areas: &[vlan_domain::LocalArea]) -> Vec<u16> {
    local_areas.iter().map(|la| la.vid).collect()
}
