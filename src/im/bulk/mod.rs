//! 批量发送模块
//!
//! 实现批量发送任务的进度轮询跟踪

pub mod api;
pub mod listener;
pub mod models;
pub mod service;
pub mod types;

// 重新导出主要类型和函数
pub use api::{BulkSendApi, JobStatusQuery};
pub use listener::{BulkSendListener, EmptyBulkSendListener};
pub use models::{BulkJobScope, BulkSendTrackerConfig};
pub use service::BulkSendProgressTracker;
pub use types::{JobProgress, JobStatus};
