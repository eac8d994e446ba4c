use std::sync::Mutex;

/// The user-facing side effects of a send that are not conversation state.
pub trait Notifier: Send + Sync {
    /// Transient, non-fatal failure notice.
    fn error(&self, title: &str, description: &str);

    /// Asks the host to show its settings surface.
    fn open_settings(&self);
}

/// Writes notices to the log. Used by the CLI.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn error(&self, title: &str, description: &str) {
        tracing::error!(title, description, "chat error");
    }

    fn open_settings(&self) {
        tracing::info!("settings required, run `deeprag settings`");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Error { title: String, description: String },
    OpenSettings,
}

/// Records every notice in order.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<Notice> {
        match self.notices.lock() {
            Ok(notices) => notices.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn push(&self, notice: Notice) {
        match self.notices.lock() {
            Ok(mut notices) => notices.push(notice),
            Err(poisoned) => poisoned.into_inner().push(notice),
        }
    }
}

impl Notifier for RecordingNotifier {
    fn error(&self, title: &str, description: &str) {
        self.push(Notice::Error {
            title: title.to_string(),
            description: description.to_string(),
        });
    }

    fn open_settings(&self) {
        self.push(Notice::OpenSettings);
    }
}
