mod eviction;
mod registry;

pub use eviction::*;
pub use registry::*;
