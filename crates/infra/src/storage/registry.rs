//! Domain name → database file mapping.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use deskside_core::Domain;

/// Where each storage domain keeps its database file.
///
/// A registry does not have to cover every domain: test overrides usually map
/// only the domains under test, and lookups for anything else fail.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainRegistry {
    locations: BTreeMap<Domain, PathBuf>,
}

impl DomainRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Every domain, using its default file name inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        let locations = Domain::ALL
            .into_iter()
            .map(|domain| (domain, dir.join(domain.file_name())))
            .collect();
        Self { locations }
    }

    pub fn with(mut self, domain: Domain, path: impl Into<PathBuf>) -> Self {
        self.insert(domain, path);
        self
    }

    pub fn insert(&mut self, domain: Domain, path: impl Into<PathBuf>) {
        self.locations.insert(domain, path.into());
    }

    pub fn get(&self, domain: Domain) -> Option<&Path> {
        self.locations.get(&domain).map(PathBuf::as_path)
    }

    pub fn domains(&self) -> impl Iterator<Item = Domain> + '_ {
        self.locations.keys().copied()
    }
}
