//! Provenance and access-control tags attached to every runtime value.
//!
//! A [`Capability`] records where a value came from (`sources`, which only
//! grow as values combine) and who may read it (`readers`, which only shrink,
//! with [`ReaderSet::Public`] as the identity element of intersection).

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Origin class of a [`DataSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// A literal written by the trusted planner.
    User,
    /// Output of a named side-effecting tool call.
    Tool,
    /// Output of the quarantined data-extraction call.
    Quarantine,
    /// Internal computation over other values.
    Derived,
}

/// The origin of a piece of data.
///
/// Two sources are equal iff kind, tool and inner classification match; the
/// timestamp is recorded for audit but excluded from comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSource {
    pub kind: SourceKind,
    pub tool: Option<String>,
    pub inner: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl DataSource {
    pub fn user() -> Self {
        Self::new(SourceKind::User, None, None)
    }

    pub fn tool(name: impl Into<String>) -> Self {
        Self::new(SourceKind::Tool, Some(name.into()), None)
    }

    pub fn tool_with_inner(name: impl Into<String>, inner: impl Into<String>) -> Self {
        Self::new(SourceKind::Tool, Some(name.into()), Some(inner.into()))
    }

    pub fn quarantine(tool: impl Into<String>) -> Self {
        Self::new(SourceKind::Quarantine, Some(tool.into()), None)
    }

    pub fn derived() -> Self {
        Self::new(SourceKind::Derived, None, None)
    }

    fn new(kind: SourceKind, tool: Option<String>, inner: Option<String>) -> Self {
        Self {
            kind,
            tool,
            inner,
            timestamp: Utc::now(),
        }
    }

    fn key(&self) -> (SourceKind, &Option<String>, &Option<String>) {
        (self.kind, &self.tool, &self.inner)
    }
}

impl PartialEq for DataSource {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for DataSource {}

impl PartialOrd for DataSource {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DataSource {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}

impl Hash for DataSource {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            SourceKind::User => write!(f, "Source(User)")?,
            SourceKind::Derived => write!(f, "Source(Derived)")?,
            SourceKind::Tool => {
                write!(f, "Source(Tool")?;
                if let Some(tool) = &self.tool {
                    write!(f, ":{}", tool)?;
                }
                if let Some(inner) = &self.inner {
                    write!(f, "[{}]", inner)?;
                }
                write!(f, ")")?;
            }
            SourceKind::Quarantine => {
                write!(f, "Source(Quarantine")?;
                if let Some(tool) = &self.tool {
                    write!(f, ":{}", tool)?;
                }
                write!(f, ")")?;
            }
        }
        Ok(())
    }
}

/// The principals permitted to receive a value's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReaderSet {
    /// Any recipient may read the value.
    Public,
    Principals(BTreeSet<String>),
}

impl ReaderSet {
    pub fn principals<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ReaderSet::Principals(names.into_iter().map(Into::into).collect())
    }

    pub fn is_public(&self) -> bool {
        matches!(self, ReaderSet::Public)
    }

    /// Intersection of two reader sets. `Public` is the identity: merging
    /// with it never narrows the other side.
    pub fn intersect(&self, other: &ReaderSet) -> ReaderSet {
        match (self, other) {
            (ReaderSet::Public, r) => r.clone(),
            (r, ReaderSet::Public) => r.clone(),
            (ReaderSet::Principals(a), ReaderSet::Principals(b)) => {
                ReaderSet::Principals(a.intersection(b).cloned().collect())
            }
        }
    }

    /// Whether every requested principal is allowed to read.
    pub fn allows_all(&self, requested: &BTreeSet<String>) -> bool {
        match self {
            ReaderSet::Public => true,
            ReaderSet::Principals(allowed) => requested.is_subset(allowed),
        }
    }
}

impl fmt::Display for ReaderSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReaderSet::Public => write!(f, "Public"),
            ReaderSet::Principals(names) => {
                write!(f, "{{")?;
                for (i, name) in names.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", name)?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// The provenance-and-access tag carried by every runtime value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub sources: BTreeSet<DataSource>,
    pub readers: ReaderSet,
}

impl Default for Capability {
    fn default() -> Self {
        Self {
            sources: BTreeSet::new(),
            readers: ReaderSet::Public,
        }
    }
}

impl Capability {
    /// Tag for a literal written by the planner: trusted by construction.
    pub fn user_literal() -> Self {
        Self {
            sources: [DataSource::user()].into_iter().collect(),
            readers: ReaderSet::Public,
        }
    }

    /// Tag for the result of an internal computation.
    pub fn derived() -> Self {
        Self {
            sources: [DataSource::derived()].into_iter().collect(),
            readers: ReaderSet::Public,
        }
    }

    /// Tag for a tool result with the given readers.
    pub fn from_tool(tool: impl Into<String>, readers: ReaderSet) -> Self {
        Self {
            sources: [DataSource::tool(tool)].into_iter().collect(),
            readers,
        }
    }

    /// Tag for the quarantined extractor's output. Never `User`, so the
    /// result is untrusted regardless of what the query contained.
    pub fn quarantine(tool: impl Into<String>) -> Self {
        Self {
            sources: [DataSource::quarantine(tool)].into_iter().collect(),
            readers: ReaderSet::Public,
        }
    }

    /// Merge with another capability: sources union, readers intersect.
    pub fn merge(&self, other: &Capability) -> Capability {
        Capability {
            sources: self.sources.union(&other.sources).cloned().collect(),
            readers: self.readers.intersect(&other.readers),
        }
    }

    /// True when nothing untrusted contributed: every source is either the
    /// planner (`User`) or internal computation over such values. A `Tool`
    /// or `Quarantine` source anywhere breaks trust; the computation tag
    /// alone does not, since operands carry their own taint through the
    /// dependency graph.
    pub fn is_trusted(&self) -> bool {
        self.sources
            .iter()
            .all(|s| matches!(s.kind, SourceKind::User | SourceKind::Derived))
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Capability(sources={{")?;
        for (i, source) in self.sources.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", source)?;
        }
        write!(f, "}}, readers={})", self.readers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_unions_sources_and_intersects_readers() {
        let a = Capability {
            sources: [DataSource::user()].into_iter().collect(),
            readers: ReaderSet::principals(["alice", "bob"]),
        };
        let b = Capability {
            sources: [DataSource::tool("get_file")].into_iter().collect(),
            readers: ReaderSet::principals(["bob", "carol"]),
        };
        let merged = a.merge(&b);
        assert_eq!(merged.sources.len(), 2);
        assert_eq!(merged.readers, ReaderSet::principals(["bob"]));
    }

    #[test]
    fn public_is_identity_for_reader_intersection() {
        let restricted = ReaderSet::principals(["alice"]);
        assert_eq!(ReaderSet::Public.intersect(&restricted), restricted);
        assert_eq!(restricted.intersect(&ReaderSet::Public), restricted);
        assert_eq!(
            ReaderSet::Public.intersect(&ReaderSet::Public),
            ReaderSet::Public
        );
    }

    #[test]
    fn source_equality_ignores_timestamp() {
        let a = DataSource::tool("send_email");
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = DataSource::tool("send_email");
        assert_ne!(a.timestamp, b.timestamp);
        assert_eq!(a, b);

        let c = DataSource::tool_with_inner("send_email", "participants");
        assert_ne!(a, c);
    }

    #[test]
    fn trust_detection() {
        assert!(Capability::user_literal().is_trusted());
        assert!(Capability::derived().is_trusted());
        assert!(Capability::user_literal().merge(&Capability::derived()).is_trusted());
        assert!(!Capability::from_tool("get_contacts", ReaderSet::Public).is_trusted());
        let mixed = Capability::user_literal().merge(&Capability::quarantine("extract_data"));
        assert!(!mixed.is_trusted());
    }
}
