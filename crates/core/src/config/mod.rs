//! 配置管理
//!
//! 加载顺序：结构体默认值 → TOML配置文件 → 环境变量（前缀 `MEASUREMENT_`，层级分隔符 `__`）。
//!
//! ```rust,no_run
//! use measurement_core::config::AppConfig;
//!
//! let config = AppConfig::load(Some("config/measurement.toml")).unwrap();
//! println!("执行端区域: {}", config.agent.region);
//! ```

pub mod models;

pub use models::*;

#[cfg(test)]
mod config_test;
