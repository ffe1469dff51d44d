//! Shared data model for rbvault: image identifiers, snapshot names,
//! retention profiles, transfer jobs, verification records and the
//! typed error kinds every other crate in the workspace propagates.

mod error;
mod image;
mod job;
mod profile;
mod snapshot;
mod verification;

pub use error::RbvaultError;
pub use image::ImageId;
pub use job::TransferJob;
pub use profile::{Frequency, Profile, ProfileTable};
pub use snapshot::SnapshotName;
pub use verification::VerificationRecord;
