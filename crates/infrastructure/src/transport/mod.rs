pub mod invoker;
pub mod resolver;
pub mod token;

pub use invoker::HttpAgentInvoker;
pub use resolver::{CloudRunServiceResolver, StaticServiceResolver};
pub use token::{MetadataServerTokenProvider, StaticTokenProvider};
