//! 任务生命周期与分发
//!
//! - [`task_id`]: 任务ID生成
//! - [`dispatch`]: 向各区域扇出分发并汇总结果
//! - [`controller`]: 任务状态机（创建、取消、状态、结果）

pub mod controller;
pub mod dispatch;
pub mod task_id;

pub use controller::*;
pub use dispatch::*;
pub use task_id::*;
