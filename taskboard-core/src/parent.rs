//! Parent references that arrive either as a bare id or as a resolved summary.
//!
//! Clients that received a joined record may echo the whole summary back
//! (`{"id": "...", "name": "Todo"}`) where the board only needs the id.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParentRef {
    Unresolved(Uuid),
    Resolved {
        #[serde(alias = "_id")]
        id: Uuid,
        name: String,
    },
}

impl ParentRef {
    pub fn id(&self) -> Uuid {
        match self {
            ParentRef::Unresolved(id) => *id,
            ParentRef::Resolved { id, .. } => *id,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            ParentRef::Unresolved(_) => None,
            ParentRef::Resolved { name, .. } => Some(name),
        }
    }
}

impl From<Uuid> for ParentRef {
    fn from(id: Uuid) -> Self {
        ParentRef::Unresolved(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_id() {
        let id = Uuid::new_v4();
        let parsed: ParentRef = serde_json::from_str(&format!("\"{id}\"")).unwrap();
        assert_eq!(parsed, ParentRef::Unresolved(id));
        assert_eq!(parsed.id(), id);
        assert!(parsed.name().is_none());
    }

    #[test]
    fn test_resolved_summary() {
        let id = Uuid::new_v4();
        let parsed: ParentRef =
            serde_json::from_str(&format!(r#"{{"_id":"{id}","name":"Todo"}}"#)).unwrap();
        assert_eq!(parsed.id(), id);
        assert_eq!(parsed.name(), Some("Todo"));
    }
}
