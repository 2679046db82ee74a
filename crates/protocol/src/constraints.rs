//! Execution constraints and the device conditions they are checked against.

use serde::{Deserialize, Serialize};

/// Network condition a transfer needs before it may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkRequirement {
    #[default]
    NotRequired,
    Connected,
    Unmetered,
}

/// Conditions that must hold before a transfer handler is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Constraints {
    #[serde(default)]
    pub network: NetworkRequirement,
    #[serde(default)]
    pub requires_charging: bool,
    #[serde(default)]
    pub requires_storage_not_low: bool,
}

impl Constraints {
    /// Requires any network connection and nothing else.
    pub fn connected() -> Self {
        Self {
            network: NetworkRequirement::Connected,
            ..Self::default()
        }
    }

    /// Returns `true` if `device` satisfies every constraint.
    pub fn satisfied_by(&self, device: &DeviceState) -> bool {
        let network_ok = match self.network {
            NetworkRequirement::NotRequired => true,
            NetworkRequirement::Connected => device.network != NetworkState::Offline,
            NetworkRequirement::Unmetered => device.network == NetworkState::Unmetered,
        };
        network_ok
            && (!self.requires_charging || device.charging)
            && (!self.requires_storage_not_low || !device.storage_low)
    }
}

/// Current network availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkState {
    #[default]
    Offline,
    Metered,
    Unmetered,
}

/// Snapshot of the device conditions relevant to scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceState {
    pub network: NetworkState,
    pub charging: bool,
    pub storage_low: bool,
}

impl DeviceState {
    /// A device on an unmetered network, charging, with free storage.
    pub fn unconstrained() -> Self {
        Self {
            network: NetworkState::Unmetered,
            charging: true,
            storage_low: false,
        }
    }

    /// A device with no network connection.
    pub fn offline() -> Self {
        Self {
            network: NetworkState::Offline,
            ..Self::unconstrained()
        }
    }
}
