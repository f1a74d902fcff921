//! Optional capability sets.
//!
//! Capabilities accumulate by set union keyed on name. Adding a
//! capability that is already present under the same version is a no-op;
//! a different version is a [`LinkError`](crate::PackagingError::Link).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{PackagingError, Result};
use crate::platform::PlatformCatalog;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Capability {
    pub name: String,
    pub version: String,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// Split `name` or `name@version`.
pub fn parse_request(raw: &str) -> (&str, Option<&str>) {
    match raw.split_once('@') {
        Some((name, version)) if !version.is_empty() => (name.trim(), Some(version.trim())),
        Some((name, _)) => (name.trim(), None),
        None => (raw.trim(), None),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet {
    entries: BTreeMap<String, String>,
}

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve requested capability names against the platform catalog.
    /// A pinned version (`name@version`) must match the catalog.
    pub fn resolve(requested: &[String], catalog: &PlatformCatalog) -> Result<Self> {
        let mut set = Self::new();
        for raw in requested {
            let (name, pinned) = parse_request(raw);
            let component = catalog.get(name).ok_or_else(|| {
                PackagingError::link(
                    name,
                    format!(
                        "optional capability does not exist in platform catalog '{}'",
                        catalog.root().display()
                    ),
                )
            })?;
            if let Some(pinned) = pinned {
                if pinned != component.version {
                    return Err(PackagingError::link(
                        name,
                        format!(
                            "capability pinned to version {} but the platform provides {}",
                            pinned, component.version
                        ),
                    ));
                }
            }
            set.insert(Capability {
                name: name.to_string(),
                version: component.version.clone(),
            })?;
        }
        Ok(set)
    }

    /// Insert one capability. Returns `false` when it was already present.
    pub fn insert(&mut self, capability: Capability) -> Result<bool> {
        match self.entries.get(&capability.name) {
            Some(existing) if *existing == capability.version => Ok(false),
            Some(existing) => Err(PackagingError::link(
                &capability.name,
                format!(
                    "capability already present as version {} and cannot be merged as version {}",
                    existing, capability.version
                ),
            )),
            None => {
                self.entries.insert(capability.name, capability.version);
                Ok(true)
            }
        }
    }

    /// Additive merge. On conflict `self` is left untouched.
    pub fn merge(&mut self, other: &CapabilitySet) -> Result<()> {
        let mut merged = self.clone();
        for capability in other.iter() {
            merged.insert(capability)?;
        }
        *self = merged;
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.entries.iter().map(|(name, version)| Capability {
            name: name.clone(),
            version: version.clone(),
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn version_of(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    /// Later duplicates are ignored; use [`CapabilitySet::insert`] to
    /// detect conflicts.
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        let mut set = Self::new();
        for capability in iter {
            set.entries
                .entry(capability.name)
                .or_insert(capability.version);
        }
        set
    }
}
