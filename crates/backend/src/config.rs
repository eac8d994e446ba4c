use figment::{
    Figment,
    providers::{Env, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use crate::error::{BackendResult, ConfigSnafu};

pub const ENV_PREFIX: &str = "DEEPRAG_";
pub const DEFAULT_API_BASE_URL: &str = "http://10.0.1.4:8088";
pub const DEFAULT_AGENT_API_BASE_URL: &str = "http://10.0.169.144:8000";

/// Endpoints and credentials for the two chat backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the knowledge-base service that hosts assistants.
    pub api_base_url: String,
    /// Base URL of the multi-agent research service.
    pub agent_api_base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            agent_api_base_url: DEFAULT_AGENT_API_BASE_URL.to_string(),
            api_key: None,
        }
    }
}

impl BackendConfig {
    /// Compiled defaults overlaid with `DEEPRAG_*` environment variables.
    pub fn load() -> BackendResult<Self> {
        Self::figment()
            .extract::<Self>()
            .map(Self::normalized)
            .context(ConfigSnafu {
                stage: "load-backend-config",
            })
    }

    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Self::default())).merge(Env::prefixed(ENV_PREFIX))
    }

    pub fn assistant_completions_url(&self, assistant_id: &str) -> String {
        format!(
            "{}/api/v1/chats_openai/{}/chat/completions",
            self.api_base_url, assistant_id
        )
    }

    pub fn agent_stream_url(&self) -> String {
        format!("{}/api/chat/stream", self.agent_api_base_url)
    }

    fn normalized(mut self) -> Self {
        self.api_base_url = self.api_base_url.trim().trim_end_matches('/').to_string();
        self.agent_api_base_url = self
            .agent_api_base_url
            .trim()
            .trim_end_matches('/')
            .to_string();
        self.api_key = self
            .api_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());
        self
    }
}

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::*;

    #[test]
    fn defaults_apply_without_environment() {
        Jail::expect_with(|_jail| {
            let config = BackendConfig::load().expect("load config");
            assert_eq!(config, BackendConfig::default());
            Ok(())
        });
    }

    #[test]
    fn environment_overrides_defaults() {
        Jail::expect_with(|jail| {
            jail.set_env("DEEPRAG_API_BASE_URL", "https://kb.example.com/");
            jail.set_env("DEEPRAG_AGENT_API_BASE_URL", "https://agents.example.com");
            jail.set_env("DEEPRAG_API_KEY", "secret");

            let config = BackendConfig::load().expect("load config");
            assert_eq!(config.api_base_url, "https://kb.example.com");
            assert_eq!(config.agent_api_base_url, "https://agents.example.com");
            assert_eq!(config.api_key.as_deref(), Some("secret"));
            Ok(())
        });
    }

    #[test]
    fn endpoint_urls() {
        let config = BackendConfig::default();
        assert_eq!(
            config.assistant_completions_url("A"),
            "http://10.0.1.4:8088/api/v1/chats_openai/A/chat/completions"
        );
        assert_eq!(
            config.agent_stream_url(),
            "http://10.0.169.144:8000/api/chat/stream"
        );
    }
}
