//! Domain models for gitdeploy.
//!
//! - `ReleaseName` / `DeployLayout`: release directories on a host
//! - `DeployedRevisionMap`: which revision is live where
//! - `DeployError`: engine error taxonomy

pub mod error;
pub mod release;
pub mod revisions;

pub use error::{DeployError, Result};
pub use release::{DeployLayout, ReleaseName, CURRENT_LINK, RELEASE_NAME_FORMAT, REVISION_MARKER};
pub use revisions::DeployedRevisionMap;
