mod responses;
mod types;

pub use responses::*;
pub use types::*;
