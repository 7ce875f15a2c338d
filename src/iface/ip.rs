use ipnetwork::IpNetwork;
use serde::Deserialize;
use std::process::Command;
use tracing::{debug, info, warn};

use super::Netlink;
use crate::config::CtlConfig;
use crate::error::NetError;
use crate::types::{Bridge, Link, LinkAttrs};

/// [`Netlink`] backed by the iproute2 `ip` and `bridge` binaries.
#[derive(Debug, Clone)]
pub struct IpCommand {
    ip_cmd: String,
    bridge_cmd: String,
}

impl Default for IpCommand {
    fn default() -> Self {
        Self::new("/sbin/ip", "/sbin/bridge")
    }
}

/// Output of one helper invocation
#[derive(Debug)]
struct ExecOutput {
    exit_code: i32,
    stdout: String,
    stderr: String,
}

impl ExecOutput {
    fn success(&self) -> bool {
        self.exit_code == 0
    }

    fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Gateway and device of a default route
#[derive(Debug, Clone, PartialEq, Eq)]
struct DefaultRoute {
    gateway: String,
    dev: Option<String>,
}

#[derive(Deserialize)]
struct IpLink {
    ifindex: u32,
    ifname: String,
    mtu: Option<u32>,
    address: Option<String>,
    operstate: Option<String>,
    master: Option<String>,
    linkinfo: Option<IpLinkInfo>,
}

#[derive(Deserialize)]
struct IpLinkInfo {
    info_kind: Option<String>,
    info_data: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct IpRoute {
    gateway: Option<String>,
    dev: Option<String>,
}

impl IpCommand {
    pub fn new(ip_cmd: impl Into<String>, bridge_cmd: impl Into<String>) -> Self {
        Self {
            ip_cmd: ip_cmd.into(),
            bridge_cmd: bridge_cmd.into(),
        }
    }

    pub fn from_config(config: &CtlConfig) -> Self {
        Self::new(config.ip_cmd.clone(), config.bridge_cmd.clone())
    }

    fn exec(&self, program: &str, args: &[&str]) -> Result<ExecOutput, NetError> {
        let command = format_command(program, args);
        debug!(command = %command, "Executing command");

        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|source| NetError::Exec {
                command: command.clone(),
                source,
            })?;

        let result = ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        };

        if !result.success() {
            warn!(
                command = %command,
                exit_code = result.exit_code,
                stderr = %result.stderr,
                "Command failed"
            );
        }

        Ok(result)
    }

    /// Run a command and fail on a non-zero exit.
    fn exec_ok(&self, program: &str, args: &[&str]) -> Result<String, NetError> {
        let result = self.exec(program, args)?;
        if result.success() {
            Ok(result.stdout)
        } else {
            Err(NetError::Command {
                command: format_command(program, args),
                exit_code: result.exit_code,
                output: result.combined_output(),
            })
        }
    }

    /// Run a command whose target may already be gone.
    fn exec_absent_ok(&self, program: &str, args: &[&str]) -> Result<(), NetError> {
        let result = self.exec(program, args)?;
        if result.success() || is_absent(&result.stderr) {
            Ok(())
        } else {
            Err(NetError::Command {
                command: format_command(program, args),
                exit_code: result.exit_code,
                output: result.combined_output(),
            })
        }
    }

    fn show_link(&self, name: &str) -> Result<LinkAttrs, NetError> {
        let args = ["-j", "-d", "link", "show", "dev", name];
        let result = self.exec(&self.ip_cmd, &args)?;
        if !result.success() {
            if is_absent(&result.stderr) {
                return Err(NetError::not_found(name));
            }
            return Err(NetError::Command {
                command: format_command(&self.ip_cmd, &args),
                exit_code: result.exit_code,
                output: result.combined_output(),
            });
        }

        parse_link(&format_command(&self.ip_cmd, &args), &result.stdout, name)
    }

    fn default_route(&self, cidr: &IpNetwork) -> Result<DefaultRoute, NetError> {
        let family = if cidr.is_ipv6() { "-6" } else { "-4" };
        let args = [family, "-j", "route", "show", "default"];
        let stdout = self.exec_ok(&self.ip_cmd, &args)?;
        parse_default_route(&format_command(&self.ip_cmd, &args), &stdout)
    }
}

impl Netlink for IpCommand {
    fn ensure_bridge(&self, bridge: &Bridge) -> Result<(), NetError> {
        let name = bridge.name.as_str();

        match self.show_link(name) {
            Ok(attrs) => {
                let kind = attrs.kind.unwrap_or_default();
                if kind != "bridge" {
                    return Err(NetError::NotBridge {
                        name: name.to_string(),
                        kind,
                    });
                }
                if attrs.vlan_filtering != Some(true) {
                    self.exec_ok(
                        &self.ip_cmd,
                        &["link", "set", "dev", name, "type", "bridge", "vlan_filtering", "1"],
                    )?;
                }
            }
            Err(e) if e.is_not_found() => {
                info!(bridge = %name, "Creating bridge");
                let args = ["link", "add", "name", name, "type", "bridge", "vlan_filtering", "1"];
                let result = self.exec(&self.ip_cmd, &args)?;
                if !result.success() && !result.stderr.contains("File exists") {
                    return Err(NetError::Command {
                        command: format_command(&self.ip_cmd, &args),
                        exit_code: result.exit_code,
                        output: result.combined_output(),
                    });
                }
            }
            Err(e) => return Err(e),
        }

        self.exec_ok(&self.ip_cmd, &["link", "set", "dev", name, "up"])?;
        Ok(())
    }

    fn fetch_bridge(&self, bridge: &mut Bridge) -> Result<(), NetError> {
        let attrs = self.show_link(&bridge.name)?;
        if attrs.kind.as_deref() != Some("bridge") {
            return Err(NetError::NotBridge {
                name: bridge.name.clone(),
                kind: attrs.kind.unwrap_or_default(),
            });
        }
        bridge.attrs = Some(attrs);
        Ok(())
    }

    fn link_by_name(&self, name: &str) -> Result<Link, NetError> {
        let attrs = self.show_link(name)?;
        Ok(Link::new(name, attrs))
    }

    fn set_master(&self, link: &Link, bridge: &Bridge) -> Result<(), NetError> {
        self.exec_ok(
            &self.ip_cmd,
            &["link", "set", "dev", &link.name, "master", &bridge.name],
        )?;
        self.exec_ok(&self.ip_cmd, &["link", "set", "dev", &link.name, "up"])?;
        Ok(())
    }

    fn set_no_master(&self, link: &Link) -> Result<(), NetError> {
        self.exec_ok(&self.ip_cmd, &["link", "set", "dev", &link.name, "nomaster"])?;
        Ok(())
    }

    fn remove_link(&self, name: &str) -> Result<(), NetError> {
        self.exec_absent_ok(&self.ip_cmd, &["link", "delete", "dev", name])
    }

    fn add_bridge_vlan(&self, link: &Link, vid: u16) -> Result<(), NetError> {
        let vid = vid.to_string();
        self.exec_ok(
            &self.bridge_cmd,
            &["vlan", "add", "vid", &vid, "dev", &link.name],
        )?;
        Ok(())
    }

    fn del_bridge_vlan(&self, link: &Link, vid: u16) -> Result<(), NetError> {
        let vid = vid.to_string();
        self.exec_absent_ok(
            &self.bridge_cmd,
            &["vlan", "del", "vid", &vid, "dev", &link.name],
        )
    }

    fn ensure_route_via_gateway(&self, cidr: &IpNetwork) -> Result<(), NetError> {
        let route = self.default_route(cidr)?;
        let family = if cidr.is_ipv6() { "-6" } else { "-4" };
        let dst = cidr.to_string();

        let mut args: Vec<&str> = vec![
            family,
            "route",
            "replace",
            dst.as_str(),
            "via",
            route.gateway.as_str(),
        ];
        if let Some(dev) = route.dev.as_deref() {
            args.extend(["dev", dev]);
        }

        self.exec_ok(&self.ip_cmd, &args)?;
        Ok(())
    }

    // Matched by destination only: the gateway may have changed or gone since
    // the route was installed.
    fn delete_route_via_gateway(&self, cidr: &IpNetwork) -> Result<(), NetError> {
        let family = if cidr.is_ipv6() { "-6" } else { "-4" };
        let dst = cidr.to_string();

        self.exec_absent_ok(&self.ip_cmd, &[family, "route", "del", &dst])
    }
}

fn format_command(program: &str, args: &[&str]) -> String {
    let mut command = program.to_string();
    for arg in args {
        command.push(' ');
        command.push_str(arg);
    }
    command
}

/// iproute2 reports a missing device, route or VLAN entry in one of these ways.
fn is_absent(stderr: &str) -> bool {
    const MARKERS: [&str; 5] = [
        "does not exist",
        "Cannot find device",
        "No such device",
        "No such process",
        "No such file or directory",
    ];
    MARKERS.iter().any(|marker| stderr.contains(marker))
}

fn parse_link(command: &str, stdout: &str, name: &str) -> Result<LinkAttrs, NetError> {
    let links: Vec<IpLink> = serde_json::from_str(stdout).map_err(|source| NetError::Parse {
        command: command.to_string(),
        source,
    })?;

    let link = links
        .into_iter()
        .find(|link| link.ifname == name)
        .ok_or_else(|| NetError::not_found(name))?;

    let (kind, info_data) = match link.linkinfo {
        Some(info) => (info.info_kind, info.info_data),
        None => (None, None),
    };

    let vlan_filtering = match kind.as_deref() {
        Some("bridge") => info_data
            .as_ref()
            .and_then(|data| data.get("vlan_filtering"))
            .and_then(|v| v.as_u64())
            .map(|v| v == 1),
        _ => None,
    };

    Ok(LinkAttrs {
        index: link.ifindex,
        mtu: link.mtu,
        address: link.address,
        oper_state: link.operstate,
        kind,
        master: link.master,
        vlan_filtering,
    })
}

fn parse_default_route(command: &str, stdout: &str) -> Result<DefaultRoute, NetError> {
    // `ip -j` prints nothing at all when the table has no match
    if stdout.trim().is_empty() {
        return Err(NetError::NoDefaultRoute);
    }

    let routes: Vec<IpRoute> = serde_json::from_str(stdout).map_err(|source| NetError::Parse {
        command: command.to_string(),
        source,
    })?;

    routes
        .into_iter()
        .find_map(|route| {
            route.gateway.map(|gateway| DefaultRoute {
                gateway,
                dev: route.dev,
            })
        })
        .ok_or(NetError::NoDefaultRoute)
}
