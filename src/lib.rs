pub mod im;

// 重新导出常用类型和函数，方便外部使用
pub use im::{
    client::{ClientConfig, ShopChatClient},
    conversation::{ConversationListener, ConversationReconciler, ReconcilerConfig},
    bulk::{BulkSendProgressTracker, BulkSendTrackerConfig, JobProgress, JobStatus},
    subscription::{EventDispatcher, MessageEventHandler},
    types::{ConversationSummary, MessageEvent},
};
