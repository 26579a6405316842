pub mod analyst;
pub mod provider;
pub mod snapshot;

pub use analyst::*;
pub use provider::*;
pub use snapshot::*;
