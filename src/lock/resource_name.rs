//! Hierarchical resource naming.
//!
//! The lock manager is name-agnostic: it knows nothing about databases,
//! tables, or pages, only that resource names form a tree and that a lock on
//! a name's ancestor constrains what can be held on the name itself. Grounded
//! on the teacher's `transaction::types` resource identifiers, generalized
//! from the teacher's fixed two-level (table, page) scheme to the spec's
//! arbitrary-depth hierarchy (§3: database -> table -> page, or deeper).

use std::fmt;
use std::sync::Arc;

/// A position in the resource hierarchy, represented as the path of segment
/// names from the root. Cheap to clone: the path is reference-counted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ResourceName {
    segments: Arc<Vec<String>>,
}

impl ResourceName {
    /// A root-level resource (depth 0), e.g. the database itself.
    pub fn root(name: impl Into<String>) -> Self {
        ResourceName {
            segments: Arc::new(vec![name.into()]),
        }
    }

    /// The child of this resource named `name`, e.g. `db.child("customers")`.
    pub fn child(&self, name: impl Into<String>) -> Self {
        let mut segments = (*self.segments).clone();
        segments.push(name.into());
        ResourceName {
            segments: Arc::new(segments),
        }
    }

    /// Depth in the hierarchy: 0 for the root, 1 for its direct children, etc.
    pub fn depth(&self) -> usize {
        self.segments.len() - 1
    }

    /// The immediate parent, or `None` if this is a root resource.
    pub fn parent(&self) -> Option<ResourceName> {
        if self.segments.len() <= 1 {
            return None;
        }
        let segments = self.segments[..self.segments.len() - 1].to_vec();
        Some(ResourceName {
            segments: Arc::new(segments),
        })
    }

    /// All ancestors, nearest first (does not include `self`).
    pub fn ancestors(&self) -> Vec<ResourceName> {
        let mut out = Vec::with_capacity(self.depth());
        let mut cur = self.parent();
        while let Some(p) = cur {
            let next = p.parent();
            out.push(p);
            cur = next;
        }
        out
    }

    /// True if `other` is a strict ancestor of `self` (i.e. `self` is a
    /// descendant of `other`).
    pub fn is_descendant_of(&self, other: &ResourceName) -> bool {
        other.segments.len() < self.segments.len()
            && self.segments[..other.segments.len()] == other.segments[..]
    }

    /// The leaf segment name, e.g. `"customers"` for `db.customers`.
    pub fn name(&self) -> &str {
        self.segments.last().expect("never empty")
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}
