//! Error types for the link primitives and the VLAN domain controller.

use std::io;
use thiserror::Error;

/// Result type alias for VLAN domain operations.
pub type VlanResult<T> = Result<T, VlanError>;

/// Errors raised by the link and route primitives.
#[derive(Debug, Error)]
pub enum NetError {
    /// The helper binary could not be spawned.
    #[error("failed to execute '{command}': {source}")]
    Exec {
        command: String,
        #[source]
        source: io::Error,
    },

    /// The helper binary exited non-zero.
    #[error("'{command}' failed (exit code {exit_code}): {output}")]
    Command {
        command: String,
        exit_code: i32,
        output: String,
    },

    /// No device with this name exists.
    #[error("link {name} not found")]
    NotFound { name: String },

    /// A device holds the bridge name but is some other kind of link.
    #[error("link {name} exists but is of kind {kind}, not bridge")]
    NotBridge { name: String, kind: String },

    /// There is no default route to borrow a gateway from.
    #[error("no default route with a gateway")]
    NoDefaultRoute,

    /// The JSON output of a helper binary did not parse.
    #[error("failed to parse output of '{command}': {source}")]
    Parse {
        command: String,
        #[source]
        source: serde_json::Error,
    },
}

impl NetError {
    /// Creates a not found error.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Returns true if the error means the device is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, NetError::NotFound { .. })
    }
}

/// Errors raised by [`crate::vlan::Vlan`].
#[derive(Debug, Error)]
pub enum VlanError {
    /// The operation needs an attached uplink and there is none.
    #[error("bridge {bridge} hasn't attached an uplink")]
    NoUplink { bridge: String },

    #[error("discover vlan {name} failed, error: {source}")]
    Discover {
        name: String,
        #[source]
        source: NetError,
    },

    #[error("ensure bridge {bridge} failed, error: {source}")]
    EnsureBridge {
        bridge: String,
        #[source]
        source: NetError,
    },

    #[error("set {link} master {bridge} failed, error: {source}")]
    SetMaster {
        link: String,
        bridge: String,
        #[source]
        source: NetError,
    },

    #[error("add local area {vid} failed, error: {source}")]
    ReplayLocalArea {
        vid: u16,
        #[source]
        source: Box<VlanError>,
    },

    #[error("set {link} no master failed, error: {source}")]
    SetNoMaster {
        link: String,
        #[source]
        source: NetError,
    },

    #[error("delete uplink {link} failed, error: {source}")]
    RemoveUplink {
        link: String,
        #[source]
        source: NetError,
    },

    #[error("delete bridge {bridge} failed, error: {source}")]
    RemoveBridge {
        bridge: String,
        #[source]
        source: NetError,
    },

    #[error("add bridge vlan {vid} failed, error: {source}")]
    AddBridgeVlan {
        vid: u16,
        #[source]
        source: NetError,
    },

    #[error("remove bridge vlan {vid} failed, error: {source}")]
    DelBridgeVlan {
        vid: u16,
        #[source]
        source: NetError,
    },

    #[error("ensure {cidr} to route via gateway failed, error: {source}")]
    EnsureRoute {
        cidr: String,
        #[source]
        source: NetError,
    },

    #[error("delete route with dst {cidr} via gateway failed, error: {source}")]
    DeleteRoute {
        cidr: String,
        #[source]
        source: NetError,
    },
}

impl VlanError {
    /// Returns true if the caller violated a precondition.
    ///
    /// Usage errors are reported before any primitive is called, so retrying
    /// them without changing the domain's state cannot succeed.
    pub fn is_usage_error(&self) -> bool {
        match self {
            VlanError::NoUplink { .. } => true,
            VlanError::ReplayLocalArea { source, .. } => source.is_usage_error(),
            _ => false,
        }
    }

    /// Returns true if a device the operation needed is absent.
    pub fn is_not_found(&self) -> bool {
        match self {
            VlanError::Discover { source, .. } => source.is_not_found(),
            VlanError::ReplayLocalArea { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}
