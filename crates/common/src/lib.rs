pub mod error;
pub mod request;

pub use error::{Error, Result};
pub use request::{
    validate_description, validate_requestor, Analysis, ArtifactKind, CloudProvider, Complexity,
    DeployedResource, Environment, InfrastructureRequest, Priority, RequestOptions, RequestSource,
    RequestStatus, StatusUpdate, MAX_DESCRIPTION_CHARS, MIN_DESCRIPTION_CHARS,
};
