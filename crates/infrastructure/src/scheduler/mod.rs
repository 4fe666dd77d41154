pub mod cloud;
pub mod local;

pub use cloud::CloudSchedulerClient;
pub use local::LocalJobScheduler;
