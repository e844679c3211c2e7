//! 共享库
//!
//! 包含仓储通知组件共用的配置、错误处理、退避策略与可观测性等基础设施代码。

pub mod config;
pub mod error;
pub mod observability;
pub mod retry;
