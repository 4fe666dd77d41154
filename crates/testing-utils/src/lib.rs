//! # Measurement Testing Utils
//!
//! 工作区共享的测试工具：各外部协作接口的内存 mock 实现，以及测试数据构建器。
//!
//! ```toml
//! [dev-dependencies]
//! measurement-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod mocks;

pub use builders::*;
pub use mocks::*;
