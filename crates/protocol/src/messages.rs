//! Requests accepted by the transfer client.
//!
//! Fields the client must validate are optional so that a request built
//! from untrusted input can be rejected with a precise reason.

use serde::{Deserialize, Serialize};

use crate::constraints::Constraints;
use crate::types::LocalLocator;

/// Request to upload local content to `container_name/object_name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    pub container_name: String,
    pub object_name: String,
    /// Name under which the transfer backend was registered with the client.
    pub backend_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locator: Option<LocalLocator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Constraints>,
}

/// Request to download `container_name/object_name` into local content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    pub container_name: String,
    pub object_name: String,
    pub backend_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locator: Option<LocalLocator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Constraints>,
}
