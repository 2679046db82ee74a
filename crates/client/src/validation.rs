use blobferry_protocol::{Constraints, DownloadRequest, LocalLocator, UploadRequest};

use crate::ClientError;

/// Fields of a request that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Validated {
    pub container_name: String,
    pub object_name: String,
    pub backend_id: String,
    pub locator: LocalLocator,
    pub constraints: Constraints,
}

pub(crate) fn validate_upload(req: &UploadRequest) -> Result<Validated, ClientError> {
    validate(
        &req.container_name,
        &req.object_name,
        &req.backend_id,
        req.locator.as_ref(),
        req.constraints.as_ref(),
    )
}

pub(crate) fn validate_download(req: &DownloadRequest) -> Result<Validated, ClientError> {
    validate(
        &req.container_name,
        &req.object_name,
        &req.backend_id,
        req.locator.as_ref(),
        req.constraints.as_ref(),
    )
}

fn validate(
    container_name: &str,
    object_name: &str,
    backend_id: &str,
    locator: Option<&LocalLocator>,
    constraints: Option<&Constraints>,
) -> Result<Validated, ClientError> {
    if container_name.trim().is_empty() {
        return Err(ClientError::InvalidRequest("container name is empty".into()));
    }
    if object_name.trim().is_empty() {
        return Err(ClientError::InvalidRequest("object name is empty".into()));
    }
    if backend_id.trim().is_empty() {
        return Err(ClientError::InvalidRequest("backend id is empty".into()));
    }
    let locator = locator
        .ok_or_else(|| ClientError::InvalidRequest("content locator is missing".into()))?;
    if locator.location.is_empty() {
        return Err(ClientError::InvalidRequest("content locator is empty".into()));
    }
    let constraints =
        constraints.ok_or_else(|| ClientError::InvalidRequest("constraints are missing".into()))?;

    Ok(Validated {
        container_name: container_name.to_string(),
        object_name: object_name.to_string(),
        backend_id: backend_id.to_string(),
        locator: locator.clone(),
        constraints: constraints.clone(),
    })
}
