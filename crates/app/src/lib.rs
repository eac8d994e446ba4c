pub mod notify;
pub mod session;
pub mod settings;

pub use notify::{Notice, Notifier, RecordingNotifier, TracingNotifier};
pub use session::{
    ChatSession, SendOptions, SendOutcome, SendPhase, SessionError, SessionResult,
};
pub use settings::{ChatMode, ChatSettings, ResearchSettings, SettingsError, SettingsStore};
