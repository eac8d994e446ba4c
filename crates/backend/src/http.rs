use std::sync::Arc;

use futures::TryStreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use serde::Serialize;
use snafu::ResultExt;

use crate::config::BackendConfig;
use crate::credentials::{CredentialSource, StaticCredentials};
use crate::error::{BackendError, BackendResult, RequestSnafu, StatusSnafu};
use crate::request::{AgentChatRequest, AssistantChatRequest};
use crate::{BoxFuture, ByteStream, ChatBackend};

/// `reqwest` implementation of both chat backends.
#[derive(Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    config: BackendConfig,
    credentials: Arc<dyn CredentialSource>,
}

impl HttpBackend {
    pub fn new(config: BackendConfig, credentials: Arc<dyn CredentialSource>) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            credentials,
        }
    }

    /// Uses the key from the configuration itself.
    pub fn from_config(config: BackendConfig) -> Self {
        let credentials = Arc::new(StaticCredentials::new(config.api_key.clone()));
        Self::new(config, credentials)
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    async fn open_stream<B>(
        &self,
        stage: &'static str,
        url: String,
        body: &B,
        no_cache: bool,
    ) -> BackendResult<ByteStream>
    where
        B: Serialize + ?Sized,
    {
        let api_key = self.credentials.require_api_key(stage)?;

        tracing::debug!(url = %url, stage, "opening chat stream");
        let mut request = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .header(ACCEPT, "text/event-stream")
            .json(body);
        if no_cache {
            request = request.header(CACHE_CONTROL, "no-cache");
        }

        let response = request.send().await.context(RequestSnafu { stage })?;
        let status = response.status();
        if !status.is_success() {
            let body = rejection_body(&url, response.text().await);
            tracing::warn!(url = %url, status = status.as_u16(), "chat stream rejected");
            return StatusSnafu {
                stage,
                status: status.as_u16(),
                body,
            }
            .fail();
        }

        let stream = response
            .bytes_stream()
            .map_err(move |source| BackendError::Stream { stage, source });
        Ok(Box::pin(stream))
    }
}

/// The rejected response's text, or empty when it could not be read.
fn rejection_body<E: std::fmt::Display>(url: &str, body: Result<String, E>) -> String {
    match body {
        Ok(body) => body,
        Err(error) => {
            tracing::warn!(url = %url, %error, "failed to read rejected response body");
            String::new()
        }
    }
}

impl ChatBackend for HttpBackend {
    fn stream_agent_chat<'a>(
        &'a self,
        request: AgentChatRequest,
    ) -> BoxFuture<'a, BackendResult<ByteStream>> {
        Box::pin(async move {
            let url = self.config.agent_stream_url();
            self.open_stream("stream-agent-chat", url, &request, true)
                .await
        })
    }

    fn stream_assistant_chat<'a>(
        &'a self,
        request: AssistantChatRequest,
    ) -> BoxFuture<'a, BackendResult<ByteStream>> {
        Box::pin(async move {
            let url = self
                .config
                .assistant_completions_url(&request.assistant_id);
            self.open_stream("stream-assistant-chat", url, &request, false)
                .await
        })
    }
}
