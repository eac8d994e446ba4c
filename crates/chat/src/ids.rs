use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Backend-assigned ids are opaque strings, so every wrapper stays a thin `String` newtype.
macro_rules! define_chat_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            /// Mints a locally unique, time-ordered id.
            pub fn generate() -> Self {
                Self(Uuid::now_v7().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

define_chat_id!(MessageId);
define_chat_id!(ThreadId);
define_chat_id!(ToolCallId);

/// A research session is keyed by the id of the message that opened it.
pub type ResearchId = MessageId;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique_and_non_empty() {
        let first = MessageId::generate();
        let second = MessageId::generate();

        assert!(!first.is_empty());
        assert_ne!(first, second);
    }

    #[test]
    fn ids_serialize_as_bare_strings() {
        let id = ToolCallId::new("call_1");
        let encoded = serde_json::to_string(&id).unwrap();

        assert_eq!(encoded, "\"call_1\"");
        assert_eq!(serde_json::from_str::<ToolCallId>(&encoded).unwrap(), id);
    }
}
