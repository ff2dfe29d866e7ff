//! Device identification.

use serde::{Deserialize, Serialize};

/// Stable opaque identifier of a gateway, as known to the controller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Supplies the device identifier for each bootstrap attempt.
///
/// The identifier is generated and persisted by the provider; the engine
/// only reads it.
pub trait DeviceIdentityProvider: Send + Sync {
    fn device_id(&self) -> DeviceId;
}

impl DeviceIdentityProvider for DeviceId {
    fn device_id(&self) -> DeviceId {
        self.clone()
    }
}
