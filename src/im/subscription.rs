//! 实时事件订阅分发
//!
//! 实时传输层（WebSocket 连接管理、重连）由宿主负责，这里只接收宿主
//! 转交的原始 JSON 事件：边界校验、按名注册/注销监听器、串行分发。

use crate::im::types::MessageEvent;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 消息事件处理器
#[async_trait]
pub trait MessageEventHandler: Send + Sync {
    /// 处理一条已通过边界校验的消息事件
    async fn on_message_event(&self, event: MessageEvent);
}

/// 事件分发器
///
/// 注册/注销以名字为键且幂等：同名重复注册会替换而不是叠加，
/// 注销不存在的名字是空操作。宿主作用域重建时可安全地反复订阅。
pub struct EventDispatcher {
    handlers: Mutex<Vec<(String, Arc<dyn MessageEventHandler>)>>,
}

impl EventDispatcher {
    /// 创建新的事件分发器
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
        }
    }

    /// 注册监听器（同名替换，幂等）
    pub fn add_listener(&self, name: &str, handler: Arc<dyn MessageEventHandler>) {
        let mut handlers = self.handlers.lock().unwrap();
        if let Some(slot) = handlers.iter_mut().find(|(n, _)| n == name) {
            debug!("[Dispatch] 监听器已存在，替换: {}", name);
            slot.1 = handler;
        } else {
            info!("[Dispatch] 注册监听器: {}", name);
            handlers.push((name.to_string(), handler));
        }
    }

    /// 注销监听器（不存在时空操作，幂等）
    pub fn remove_listener(&self, name: &str) {
        let mut handlers = self.handlers.lock().unwrap();
        let before = handlers.len();
        handlers.retain(|(n, _)| n != name);
        if handlers.len() < before {
            info!("[Dispatch] 注销监听器: {}", name);
        }
    }

    /// 当前注册的监听器数量
    pub fn listener_count(&self) -> usize {
        self.handlers.lock().unwrap().len()
    }

    /// 分发一条原始 JSON 事件
    ///
    /// 边界校验失败的事件在这里被丢弃（warn 日志），不会触达任何监听器。
    /// 监听器按注册顺序串行调用，保证事件到达顺序即处理顺序。
    pub async fn dispatch_raw(&self, value: &Value) {
        let Some(event) = MessageEvent::from_value(value) else {
            return;
        };

        let handlers: Vec<Arc<dyn MessageEventHandler>> = {
            let guard = self.handlers.lock().unwrap();
            guard.iter().map(|(_, h)| h.clone()).collect()
        };

        debug!(
            "[Dispatch] 分发消息事件: conversationID={}, 监听器数: {}",
            event.conversation_id,
            handlers.len()
        );
        for handler in handlers {
            handler.on_message_event(event.clone()).await;
        }
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// 启动事件泵：持续从接收端读取原始事件并交给分发器
///
/// 返回的 `JoinHandle` 由持有方负责在作用域结束时 `abort()`，
/// 否则泵任务会一直存活（悬挂的监听器是要防的头号资源泄漏）。
pub fn spawn_event_pump(
    mut rx: mpsc::Receiver<Value>,
    dispatcher: Arc<EventDispatcher>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("[Dispatch] 事件泵启动");
        while let Some(value) = rx.recv().await {
            dispatcher.dispatch_raw(&value).await;
        }
        info!("[Dispatch] 订阅通道关闭，事件泵退出");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        count: AtomicUsize,
    }

    #[async_trait]
    impl MessageEventHandler for CountingHandler {
        async fn on_message_event(&self, _event: MessageEvent) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn raw_event(conv: &str) -> Value {
        serde_json::json!({
            "conversationID": conv,
            "content": "hi",
            "createdAt": 1700000000000i64,
        })
    }

    #[tokio::test]
    async fn add_listener_is_idempotent() {
        let dispatcher = EventDispatcher::new();
        let handler = Arc::new(CountingHandler {
            count: AtomicUsize::new(0),
        });

        dispatcher.add_listener("reconciler", handler.clone());
        dispatcher.add_listener("reconciler", handler.clone());
        assert_eq!(dispatcher.listener_count(), 1);

        // 同名替换后事件只投递一次
        dispatcher.dispatch_raw(&raw_event("c1")).await;
        assert_eq!(handler.count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn remove_listener_is_idempotent() {
        let dispatcher = EventDispatcher::new();
        let handler = Arc::new(CountingHandler {
            count: AtomicUsize::new(0),
        });

        dispatcher.add_listener("reconciler", handler.clone());
        dispatcher.remove_listener("reconciler");
        dispatcher.remove_listener("reconciler");
        assert_eq!(dispatcher.listener_count(), 0);

        dispatcher.dispatch_raw(&raw_event("c1")).await;
        assert_eq!(handler.count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn malformed_events_never_reach_handlers() {
        let dispatcher = EventDispatcher::new();
        let handler = Arc::new(CountingHandler {
            count: AtomicUsize::new(0),
        });
        dispatcher.add_listener("reconciler", handler.clone());

        dispatcher
            .dispatch_raw(&serde_json::json!({"content": "no conversation id"}))
            .await;
        dispatcher.dispatch_raw(&serde_json::json!("not an object")).await;
        assert_eq!(handler.count.load(Ordering::SeqCst), 0);

        dispatcher.dispatch_raw(&raw_event("c1")).await;
        assert_eq!(handler.count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn event_pump_drains_channel_and_stops_on_abort() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let handler = Arc::new(CountingHandler {
            count: AtomicUsize::new(0),
        });
        dispatcher.add_listener("reconciler", handler.clone());

        let (tx, rx) = mpsc::channel(16);
        let pump = spawn_event_pump(rx, dispatcher.clone());

        tx.send(raw_event("c1")).await.unwrap();
        tx.send(raw_event("c2")).await.unwrap();
        // 等待泵消化
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(handler.count.load(Ordering::SeqCst), 2);

        // 作用域结束：abort 后泵不再处理事件
        pump.abort();
        let _ = pump.await;
        let _ = tx.send(raw_event("c3")).await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(handler.count.load(Ordering::SeqCst), 2);
    }
}
