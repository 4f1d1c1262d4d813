//! Run identity for tracking pipeline executions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunIdentity {
    /// The unique ID for this run.
    pub run_id: Uuid,

    /// Caller-supplied document label, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,

    /// Parent run when this run is one chunk of a larger document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<Uuid>,

    /// When the run was created.
    pub started_at: DateTime<Utc>,
}

impl Default for RunIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl RunIdentity {
    /// Creates a new identity with a generated run ID.
    #[must_use]
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            document_id: None,
            parent_run_id: None,
            started_at: Utc::now(),
        }
    }

    /// Sets the document label.
    #[must_use]
    pub fn with_document_id(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    /// Creates a child identity for a chunk run.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            document_id: self.document_id.clone(),
            parent_run_id: Some(self.run_id),
            started_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_identity_new_is_unique() {
        assert_ne!(RunIdentity::new().run_id, RunIdentity::new().run_id);
    }

    #[test]
    fn test_child_links_parent() {
        let parent = RunIdentity::new().with_document_id("report.txt");
        let child = parent.child();

        assert_eq!(child.parent_run_id, Some(parent.run_id));
        assert_eq!(child.document_id.as_deref(), Some("report.txt"));
        assert_ne!(child.run_id, parent.run_id);
    }

    #[test]
    fn test_run_identity_serialization() {
        let identity = RunIdentity::new();
        let json = serde_json::to_value(&identity).unwrap();
        assert!(json.get("document_id").is_none());

        let back: RunIdentity = serde_json::from_value(json).unwrap();
        assert_eq!(back, identity);
    }
}
