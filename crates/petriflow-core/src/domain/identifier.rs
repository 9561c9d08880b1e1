//! Value objects naming cases, specification elements and threads of control

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Borrow the raw id
            #[inline]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Value object: Case ID
    CaseId
);
string_id!(
    /// Value object: Specification ID
    SpecificationId
);
string_id!(
    /// Value object: Net ID, unique within a specification
    NetId
);
string_id!(
    /// Value object: Task ID, unique within a net
    TaskId
);
string_id!(
    /// Value object: Condition ID, unique within a net
    ConditionId
);
string_id!(
    /// Value object: Decomposition ID
    DecompositionId
);
string_id!(
    /// Value object: Work item ID
    WorkItemId
);

impl CaseId {
    /// Generate a fresh random case id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl WorkItemId {
    /// Deterministic work item id: `{case}:{task}#{serial}`
    pub fn for_task(case_id: &CaseId, task_id: &TaskId, serial: u64) -> Self {
        Self(format!("{}:{}#{}", case_id, task_id, serial))
    }
}

/// Specification id plus version; the cache and event log key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SpecificationKey {
    /// Specification id
    pub id: SpecificationId,
    /// Version string
    pub version: String,
}

impl SpecificationKey {
    /// Create a key
    pub fn new(id: impl Into<SpecificationId>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for SpecificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.version)
    }
}

/// Hierarchical thread-of-control identifier
///
/// The root net instance of a case is identified by the case id; sub-net
/// instances and multi-instance children append `.n` to their parent.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(pub String);

impl Identifier {
    /// Root identifier for a case
    pub fn root(case_id: &CaseId) -> Self {
        Self(case_id.0.clone())
    }

    /// Child identifier with ordinal `n`
    pub fn child(&self, n: u32) -> Self {
        Self(format!("{}.{}", self.0, n))
    }

    /// Whether `self` is a strict ancestor of `other`
    pub fn is_ancestor_of(&self, other: &Identifier) -> bool {
        other.0.len() > self.0.len()
            && other.0.starts_with(&self.0)
            && other.0.as_bytes()[self.0.len()] == b'.'
    }

    /// Borrow the raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_hierarchy() {
        let root = Identifier::root(&CaseId::from("case-1"));
        let child = root.child(2);
        let grandchild = child.child(1);

        assert_eq!(child.as_str(), "case-1.2");
        assert_eq!(grandchild.as_str(), "case-1.2.1");
        assert!(child.is_ancestor_of(&grandchild));
        assert!(root.is_ancestor_of(&grandchild));
        assert!(!child.is_ancestor_of(&root));
    }

    #[test]
    fn test_ancestor_requires_separator() {
        let a = Identifier("case-1".to_string());
        let b = Identifier("case-10".to_string());
        assert!(!a.is_ancestor_of(&b));
    }

    #[test]
    fn test_work_item_id_is_deterministic() {
        let id = WorkItemId::for_task(&CaseId::from("c"), &TaskId::from("approve"), 3);
        assert_eq!(id.as_str(), "c:approve#3");
    }

    #[test]
    fn test_specification_key_display() {
        assert_eq!(SpecificationKey::new("orders", "1.0").to_string(), "orders@1.0");
    }
}
