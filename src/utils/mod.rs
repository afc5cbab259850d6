//! 工具函数模块
//!
//! 提供各类通用工具函数，目前包括输入验证

pub mod validation;

pub use validation::*;
