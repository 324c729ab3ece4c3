use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Status lines from pipeline workers to a single consumer.
///
/// Cloning is cheap; every worker gets its own handle and the consumer owns
/// the output sink, so no two workers ever write to it concurrently.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: UnboundedSender<String>,
}

impl ProgressSink {
    pub fn channel() -> (Self, UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// A sink whose lines go nowhere.
    pub fn discard() -> Self {
        Self::channel().0
    }

    pub fn emit(&self, line: impl Into<String>) {
        // 消费者已退出时静默丢弃
        let _ = self.tx.send(line.into());
    }
}
