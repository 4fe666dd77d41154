pub mod repository;
pub mod scheduler;
pub mod transport;

pub use repository::*;
pub use scheduler::*;
pub use transport::*;
