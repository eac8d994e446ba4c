use std::sync::{Arc, RwLock};

use crate::error::{BackendResult, MissingApiKeySnafu};

/// Supplies the bearer token attached to every stream request.
pub trait CredentialSource: Send + Sync {
    fn api_key(&self) -> Option<String>;

    fn require_api_key(&self, stage: &'static str) -> BackendResult<String> {
        match self.api_key().filter(|key| !key.trim().is_empty()) {
            Some(key) => Ok(key),
            None => MissingApiKeySnafu { stage }.fail(),
        }
    }
}

/// A key fixed at construction, or none.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    api_key: Option<String>,
}

impl StaticCredentials {
    pub fn new(api_key: Option<String>) -> Self {
        Self { api_key }
    }
}

impl CredentialSource for StaticCredentials {
    fn api_key(&self) -> Option<String> {
        self.api_key.clone()
    }
}

/// A key that can be replaced at runtime, e.g. after a fresh login.
#[derive(Debug, Clone, Default)]
pub struct SharedCredentials {
    api_key: Arc<RwLock<Option<String>>>,
}

impl SharedCredentials {
    pub fn set_api_key(&self, api_key: Option<String>) {
        match self.api_key.write() {
            Ok(mut guard) => *guard = api_key,
            Err(poisoned) => *poisoned.into_inner() = api_key,
        }
    }
}

impl CredentialSource for SharedCredentials {
    fn api_key(&self) -> Option<String> {
        match self.api_key.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;

    #[test]
    fn blank_keys_count_as_missing() {
        let credentials = StaticCredentials::new(Some("  ".to_string()));
        assert!(matches!(
            credentials.require_api_key("test"),
            Err(BackendError::MissingApiKey { stage: "test" })
        ));
    }

    #[test]
    fn shared_credentials_can_be_replaced() {
        let credentials = SharedCredentials::default();
        assert!(credentials.require_api_key("test").is_err());

        let handle = credentials.clone();
        handle.set_api_key(Some("k1".to_string()));
        assert_eq!(credentials.require_api_key("test").unwrap(), "k1");
    }
}
