pub mod config;
pub mod credentials;
pub mod error;
pub mod http;
pub mod request;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;

pub use config::BackendConfig;
pub use credentials::{CredentialSource, SharedCredentials, StaticCredentials};
pub use error::{BackendError, BackendResult};
pub use http::HttpBackend;
pub use request::{AgentChatRequest, AssistantChatRequest, ChatTurn, ResearchLimits};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Raw response body. Dropping it aborts the request.
pub type ByteStream = Pin<Box<dyn Stream<Item = BackendResult<Bytes>> + Send>>;

/// Opens the streamed chat requests. Both resolve once the response headers
/// arrived with a success status.
pub trait ChatBackend: Send + Sync {
    fn stream_agent_chat<'a>(
        &'a self,
        request: AgentChatRequest,
    ) -> BoxFuture<'a, BackendResult<ByteStream>>;

    fn stream_assistant_chat<'a>(
        &'a self,
        request: AssistantChatRequest,
    ) -> BoxFuture<'a, BackendResult<ByteStream>>;
}
