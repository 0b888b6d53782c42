pub mod bulk;
pub mod client;
pub mod conversation;
pub mod subscription;
pub mod types;

// 重新导出会话调和相关类型和函数
pub use conversation::{ConversationListener, ConversationReconciler, ReconcilerConfig};

// 重新导出批量发送进度跟踪相关类型
pub use bulk::{BulkSendProgressTracker, BulkSendTrackerConfig, JobProgress, JobStatus};
