#![forbid(unsafe_code)]

pub mod checksum;
pub mod ids;
pub mod protocol;
pub mod validation;

pub use ids::{ConflictId, FileId, IdError};
