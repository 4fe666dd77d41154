pub mod factory;
pub mod scheduler;
pub mod store;
pub mod transport;

pub use factory::{PlatformFactory, PlatformServices};
pub use scheduler::*;
pub use store::*;
pub use transport::*;
