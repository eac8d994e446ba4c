use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use deeprag_backend::ResearchLimits;
use figment::{
    Figment,
    providers::{Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const SETTINGS_DIRECTORY_NAME: &str = "deeprag";
pub const SETTINGS_FILE_NAME: &str = "chat_settings.json";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    /// Direct chat with one knowledge-base assistant.
    Ask,
    /// Multi-agent deep research.
    #[default]
    Agent,
}

impl ChatMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatMode::Ask => "ask",
            ChatMode::Agent => "agent",
        }
    }
}

impl fmt::Display for ChatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChatMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ask" => Ok(ChatMode::Ask),
            "agent" => Ok(ChatMode::Agent),
            other => Err(format!("unknown chat mode '{other}', expected ask or agent")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchSettings {
    #[serde(default = "default_max_plan_iterations")]
    pub max_plan_iterations: u32,
    #[serde(default = "default_max_step_num")]
    pub max_step_num: u32,
    #[serde(default = "default_max_search_results")]
    pub max_search_results: u32,
    #[serde(default = "default_auto_accepted_plan")]
    pub auto_accepted_plan: bool,
}

impl Default for ResearchSettings {
    fn default() -> Self {
        let limits = ResearchLimits::default();
        Self {
            max_plan_iterations: limits.max_plan_iterations,
            max_step_num: limits.max_step_num,
            max_search_results: limits.max_search_results,
            auto_accepted_plan: limits.auto_accepted_plan,
        }
    }
}

impl ResearchSettings {
    pub fn limits(&self) -> ResearchLimits {
        ResearchLimits {
            max_plan_iterations: self.max_plan_iterations.max(1),
            max_step_num: self.max_step_num.max(1),
            max_search_results: self.max_search_results.max(1),
            auto_accepted_plan: self.auto_accepted_plan,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSettings {
    #[serde(default)]
    pub mode: ChatMode,
    /// Assistant used in ask mode.
    #[serde(default)]
    pub chatbot_id: Option<String>,
    #[serde(default)]
    pub research: ResearchSettings,
}

impl ChatSettings {
    pub fn with_mode(mut self, mode: ChatMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_chatbot_id(mut self, chatbot_id: impl Into<String>) -> Self {
        self.chatbot_id = Some(chatbot_id.into());
        self
    }

    pub fn normalized(mut self) -> Self {
        self.chatbot_id = self
            .chatbot_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());
        self
    }

    /// Switching either of these starts a new conversation.
    pub fn changes_conversation(&self, next: &ChatSettings) -> bool {
        self.mode != next.mode || self.chatbot_id != next.chatbot_id
    }
}

/// Persisted chat settings, read once and written on every change.
pub struct SettingsStore {
    settings: Arc<ArcSwap<ChatSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".deeprag"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from_disk(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<ChatSettings> {
        self.settings.load_full()
    }

    pub fn update(&self, settings: ChatSettings) -> Result<Arc<ChatSettings>, SettingsError> {
        let settings = Arc::new(settings.normalized());
        self.persist(&settings)?;
        self.settings.store(settings.clone());
        Ok(settings)
    }

    fn load_from_disk(path: &Path) -> ChatSettings {
        if !path.exists() {
            tracing::info!(path = ?path, "settings file not found, using defaults");
            return ChatSettings::default();
        }

        let figment =
            Figment::from(Serialized::defaults(ChatSettings::default())).merge(Json::file(path));

        match figment.extract::<ChatSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(path = ?path, %error, "failed to parse settings, using defaults");
                ChatSettings::default()
            }
        }
    }

    fn persist(&self, settings: &ChatSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeSettingsSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!(path = ?self.config_path, "saved chat settings");
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeSettings {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

fn default_max_plan_iterations() -> u32 {
    ResearchLimits::default().max_plan_iterations
}

fn default_max_step_num() -> u32 {
    ResearchLimits::default().max_step_num
}

fn default_max_search_results() -> u32 {
    ResearchLimits::default().max_search_results
}

fn default_auto_accepted_plan() -> bool {
    ResearchLimits::default().auto_accepted_plan
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("chat_settings.json"));

        let settings = store.settings();
        assert_eq!(settings.mode, ChatMode::Agent);
        assert_eq!(settings.chatbot_id, None);
        assert_eq!(settings.research.limits(), ResearchLimits::default());
    }

    #[test]
    fn updates_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("chat_settings.json");
        let store = SettingsStore::new(path.clone());

        store
            .update(
                ChatSettings::default()
                    .with_mode(ChatMode::Ask)
                    .with_chatbot_id("  A  "),
            )
            .unwrap();

        assert_eq!(store.settings().chatbot_id.as_deref(), Some("A"));
        assert!(!path.with_extension("json.tmp").exists());

        let reloaded = SettingsStore::new(path);
        assert_eq!(reloaded.settings().mode, ChatMode::Ask);
        assert_eq!(reloaded.settings().chatbot_id.as_deref(), Some("A"));
    }

    #[test]
    fn partial_files_merge_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat_settings.json");
        std::fs::write(&path, r#"{"mode":"ask","chatbot_id":"kb-1"}"#).unwrap();

        let settings = SettingsStore::new(path).settings();
        assert_eq!(settings.mode, ChatMode::Ask);
        assert_eq!(settings.chatbot_id.as_deref(), Some("kb-1"));
        assert_eq!(settings.research, ResearchSettings::default());
    }

    #[test]
    fn unparseable_files_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat_settings.json");
        std::fs::write(&path, "{not json").unwrap();

        assert_eq!(*SettingsStore::new(path).settings(), ChatSettings::default());
    }

    #[test]
    fn mode_parsing() {
        assert_eq!("Ask".parse::<ChatMode>(), Ok(ChatMode::Ask));
        assert_eq!("agent".parse::<ChatMode>(), Ok(ChatMode::Agent));
        assert!("chat".parse::<ChatMode>().is_err());
    }
}
