use std::collections::HashMap;
use std::fmt;

const NO_TOPIC: &str = "No Topic";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaxonomyKind {
    Topic,
    Tag,
    Organization,
}

impl fmt::Display for TaxonomyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaxonomyKind::Topic => "Topic",
            TaxonomyKind::Tag => "Tag",
            TaxonomyKind::Organization => "Organization",
        };
        f.write_str(label)
    }
}

/// Read-only lookup from a raw identifier to its display name.
#[derive(Debug, Clone)]
pub struct IdentifierMap {
    kind: TaxonomyKind,
    names: HashMap<String, String>,
}

impl IdentifierMap {
    pub fn build<I, K, V>(kind: TaxonomyKind, records: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let names = records
            .into_iter()
            .map(|(id, name)| (id.into(), name.into()))
            .collect();
        Self { kind, names }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Never fails: ids missing from the map come back as `Unknown <Kind> (<id>)`.
    pub fn resolve(&self, id: &str) -> String {
        match self.names.get(id) {
            Some(name) => name.clone(),
            None => format!("Unknown {} ({})", self.kind, id),
        }
    }

    pub fn resolve_all<S: AsRef<str>>(&self, ids: &[S]) -> Vec<String> {
        ids.iter().map(|id| self.resolve(id.as_ref())).collect()
    }
}

/// The three taxonomy maps, loaded once at startup and handed to whoever needs them.
#[derive(Debug, Clone)]
pub struct Taxonomies {
    pub topics: IdentifierMap,
    pub tags: IdentifierMap,
    pub organizations: IdentifierMap,
}

impl Taxonomies {
    /// Objects without topics are reported under a placeholder; tags have no such default.
    pub fn map_topics<S: AsRef<str>>(&self, ids: &[S]) -> Vec<String> {
        if ids.is_empty() {
            return vec![NO_TOPIC.to_string()];
        }
        self.topics.resolve_all(ids)
    }

    pub fn map_tags<S: AsRef<str>>(&self, ids: &[S]) -> Vec<String> {
        self.tags.resolve_all(ids)
    }

    pub fn map_organizations<S: AsRef<str>>(&self, ids: &[S]) -> Vec<String> {
        self.organizations.resolve_all(ids)
    }

    pub fn map_organization(&self, id: &str) -> String {
        self.organizations.resolve(id)
    }
}

#[cfg(test)]
pub(crate) fn sample_taxonomies() -> Taxonomies {
    Taxonomies {
        topics: IdentifierMap::build(
            TaxonomyKind::Topic,
            [("5f0c9b1e2a3b4c5d6e7f8091", "Cryptography")],
        ),
        tags: IdentifierMap::build(
            TaxonomyKind::Tag,
            [("60a1b2c3d4e5f60718293a4b", "Lab")],
        ),
        organizations: IdentifierMap::build(
            TaxonomyKind::Organization,
            [("61aa00000000000000000001", "Towson University")],
        ),
    }
}
