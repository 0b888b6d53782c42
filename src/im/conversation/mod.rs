//! 会话模块
//!
//! 实现会话列表的实时调和：事件去重、排序、未读记账与本地镜像

pub mod api;
pub mod dao;
pub mod listener;
pub mod models;
pub mod service;
pub mod types;

// 重新导出主要类型和函数
pub use api::ConversationApi;
pub use dao::UnreadStateDao;
pub use listener::{ConversationListener, EmptyConversationListener};
pub use models::ReconcilerConfig;
pub use service::ConversationReconciler;
pub use types::ConversationListResp;
