//! 会话调和器配置与本地模型

/// 会话调和器配置
pub struct ReconcilerConfig {
    /// 工作区 ID（多租户隔离，同时作为本地存储键的命名空间）
    pub workspace_id: String,
    /// API 基础 URL
    pub api_base_url: String,
    /// Token
    pub token: String,
    /// 数据库路径（SQLite），可以是：
    /// - 相对路径：如 "shopchat.db" 会转换为 "sqlite://shopchat.db"
    /// - 绝对路径：如 "/path/to/db.db" 会转换为 "sqlite:///path/to/db.db"
    /// - 完整URL：如 "sqlite://shopchat.db?mode=rwc" 直接使用
    pub db_path: String,
}
