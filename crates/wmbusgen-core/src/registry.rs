//! Reference registry: declared identifiers and the handles they were emitted under
//!
//! Resolution is strictly single pass. An identifier becomes visible once its
//! declaration has been emitted; referencing anything declared later fails
//! with [`RegistryError::UnknownIdentifier`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::declaration::{ComponentKind, IdRef, Identifier};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("ID '{id}' redefined, it is already declared as {existing}")]
    DuplicateIdentifier {
        id: Identifier,
        existing: ComponentKind,
    },
    #[error("Couldn't find ID '{id}' of type {expected}; it must be declared before it is used")]
    UnknownIdentifier {
        id: Identifier,
        expected: ComponentKind,
    },
    #[error("ID '{id}' of type {actual} doesn't inherit from {expected}")]
    KindMismatch {
        id: Identifier,
        expected: ComponentKind,
        actual: ComponentKind,
    },
    #[error("No {expected} declared before this component; declare one or set '{role}'")]
    NoDefault {
        expected: ComponentKind,
        role: &'static str,
    },
    #[error("Multiple {expected} declared ({}); set '{role}' explicitly", join_ids(.candidates))]
    AmbiguousDefault {
        expected: ComponentKind,
        role: &'static str,
        candidates: Vec<Identifier>,
    },
}

fn join_ids(ids: &[Identifier]) -> String {
    ids.iter().map(Identifier::as_str).collect::<Vec<_>>().join(", ")
}

/// Variable an object was emitted under
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(pub String);

impl Handle {
    pub fn for_id(id: &Identifier) -> Self {
        Self(id.as_str().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A registered, emitted object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryEntry {
    pub id: Identifier,
    pub kind: ComponentKind,
    pub handle: Handle,
}

/// Process-wide table of emitted identifiers
#[derive(Debug, Clone, Default)]
pub struct ReferenceRegistry {
    entries: BTreeMap<Identifier, RegistryEntry>,
    /// Registration order, for default resolution and listing
    order: Vec<Identifier>,
}

impl ReferenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an emitted object; identifiers are unique regardless of kind
    pub fn register(
        &mut self,
        id: Identifier,
        kind: ComponentKind,
        handle: Handle,
    ) -> Result<&RegistryEntry, RegistryError> {
        self.check_available(&id)?;
        self.order.push(id.clone());
        let entry = RegistryEntry {
            id: id.clone(),
            kind,
            handle,
        };
        Ok(self.entries.entry(id).or_insert(entry))
    }

    /// Fails if `id` is already registered
    pub fn check_available(&self, id: &Identifier) -> Result<(), RegistryError> {
        match self.entries.get(id) {
            Some(existing) => Err(RegistryError::DuplicateIdentifier {
                id: id.clone(),
                existing: existing.kind,
            }),
            None => Ok(()),
        }
    }

    /// Look up `id`, requiring it to be usable as `expected`
    pub fn resolve(&self, id: &Identifier, expected: ComponentKind) -> Result<&Handle, RegistryError> {
        let entry = self
            .entries
            .get(id)
            .ok_or_else(|| RegistryError::UnknownIdentifier {
                id: id.clone(),
                expected,
            })?;
        if !entry.kind.is_a(expected) {
            return Err(RegistryError::KindMismatch {
                id: id.clone(),
                expected,
                actual: entry.kind,
            });
        }
        Ok(&entry.handle)
    }

    /// The only registered object usable as `expected`
    pub fn resolve_default(
        &self,
        expected: ComponentKind,
        role: &'static str,
    ) -> Result<&Handle, RegistryError> {
        let candidates: Vec<&RegistryEntry> = self
            .iter()
            .filter(|entry| entry.kind.is_a(expected))
            .collect();
        match candidates.as_slice() {
            [] => Err(RegistryError::NoDefault { expected, role }),
            [only] => Ok(&only.handle),
            many => Err(RegistryError::AmbiguousDefault {
                expected,
                role,
                candidates: many.iter().map(|e| e.id.clone()).collect(),
            }),
        }
    }

    /// Resolve a reference field, explicit or defaulted
    pub fn resolve_ref(
        &self,
        target: &IdRef,
        expected: ComponentKind,
        role: &'static str,
    ) -> Result<&Handle, RegistryError> {
        match target {
            IdRef::Explicit(id) => self.resolve(id, expected),
            IdRef::Default => self.resolve_default(expected, role),
        }
    }

    pub fn get(&self, id: &Identifier) -> Option<&RegistryEntry> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &Identifier) -> bool {
        self.entries.contains_key(id)
    }

    /// Entries in registration order
    pub fn iter(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.order.iter().filter_map(|id| self.entries.get(id))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> Identifier {
        Identifier::parse(raw).unwrap()
    }

    fn register(registry: &mut ReferenceRegistry, raw: &str, kind: ComponentKind) {
        registry
            .register(id(raw), kind, Handle(raw.to_string()))
            .unwrap();
    }

    #[test]
    fn test_register_and_resolve() {
        let mut registry = ReferenceRegistry::new();
        register(&mut registry, "radio_1", ComponentKind::Radio);

        let handle = registry.resolve(&id("radio_1"), ComponentKind::Radio).unwrap();
        assert_eq!(handle.as_str(), "radio_1");
    }

    #[test]
    fn test_duplicate_regardless_of_kind() {
        let mut registry = ReferenceRegistry::new();
        register(&mut registry, "thing", ComponentKind::Radio);

        let err = registry
            .register(id("thing"), ComponentKind::Meter, Handle("thing".to_string()))
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::DuplicateIdentifier {
                id: id("thing"),
                existing: ComponentKind::Radio,
            }
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unknown_and_mismatch() {
        let mut registry = ReferenceRegistry::new();
        register(&mut registry, "water", ComponentKind::Meter);

        assert!(matches!(
            registry.resolve(&id("later"), ComponentKind::Meter),
            Err(RegistryError::UnknownIdentifier { .. })
        ));
        assert!(matches!(
            registry.resolve(&id("water"), ComponentKind::Radio),
            Err(RegistryError::KindMismatch {
                actual: ComponentKind::Meter,
                ..
            })
        ));
    }

    #[test]
    fn test_subkinds_resolve_as_base() {
        let mut registry = ReferenceRegistry::new();
        register(&mut registry, "oled", ComponentKind::Ssd1306);
        register(&mut registry, "flow", ComponentKind::Sensor);

        assert!(registry.resolve(&id("oled"), ComponentKind::Display).is_ok());
        assert!(registry.resolve(&id("flow"), ComponentKind::BaseSensor).is_ok());
    }

    #[test]
    fn test_default_resolution() {
        let mut registry = ReferenceRegistry::new();
        assert!(matches!(
            registry.resolve_default(ComponentKind::Radio, "radio_id"),
            Err(RegistryError::NoDefault { .. })
        ));

        register(&mut registry, "radio_a", ComponentKind::Radio);
        let handle = registry
            .resolve_ref(&IdRef::Default, ComponentKind::Radio, "radio_id")
            .unwrap();
        assert_eq!(handle.as_str(), "radio_a");

        register(&mut registry, "radio_b", ComponentKind::Radio);
        let err = registry
            .resolve_default(ComponentKind::Radio, "radio_id")
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Multiple wmbus_radio::Radio declared (radio_a, radio_b); set 'radio_id' explicitly"
        );
    }
}
