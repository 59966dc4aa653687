use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// One-shot user-facing notices (toasts). Implementations must not block.
pub trait Notifier: Send + Sync {
    fn notify(&self, level: NoticeLevel, message: &str);
}

/// Forwards notices to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, level: NoticeLevel, message: &str) {
        match level {
            NoticeLevel::Info | NoticeLevel::Success => info!(target: "notice", "{message}"),
            NoticeLevel::Warning => warn!(target: "notice", "{message}"),
            NoticeLevel::Error => error!(target: "notice", "{message}"),
        }
    }
}
