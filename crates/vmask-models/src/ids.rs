//! Identifier newtypes.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Create from an existing string.
            pub fn from_string(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Get the inner string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Identifier of a background task issued by the task service.
    TaskId
);
string_id!(
    /// Identifier of the uploaded video asset a selection session works on.
    AssetId
);
string_id!(
    /// Identifier of one user click on a sampled frame.
    ClickPointId
);
string_id!(
    /// Identifier of a visual prompt point fed to the segmentation model.
    PromptPointId
);
string_id!(
    /// Identifier of one selection session.
    ///
    /// A new id is issued every time the user opens an asset, so responses
    /// that arrive for an older session can be recognised and dropped.
    SessionId
);

impl ClickPointId {
    /// Generate a new random click point ID.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl PromptPointId {
    /// Generate a new random prompt point ID.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl SessionId {
    /// Generate a new random session ID.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(SessionId::generate(), SessionId::generate());
        assert_ne!(ClickPointId::generate(), ClickPointId::generate());
    }

    #[test]
    fn test_task_id_serializes_transparently() {
        let id = TaskId::from("task-42");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"task-42\"");
        assert_eq!(id.to_string(), "task-42");
    }
}
