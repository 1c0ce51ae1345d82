//! Per-request type registry.
//!
//! # Responsibilities
//! - Map a type key to a value for the lifetime of one request
//! - Distinguish concrete keys from interface (trait object) keys
//!
//! # Design Decisions
//! - Linear scan over a small vector, first match wins
//! - Interface keys are explicit: a value is never found through a trait
//!   it implements unless it was registered under that trait
//! - Storage is cleared but its capacity kept when a context is reused

use std::any::{Any, TypeId};
use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Concrete,
    Interface,
}

/// Identity of a registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
    kind: KeyKind,
}

impl TypeKey {
    /// Key for a concrete type, matched by identity.
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
            kind: KeyKind::Concrete,
        }
    }

    /// Key for a trait object type such as `dyn Greeter`.
    pub fn interface<I: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<I>(),
            name: std::any::type_name::<I>(),
            kind: KeyKind::Interface,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> KeyKind {
        self.kind
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("provided type not found: {0}")]
    NotFound(&'static str),

    #[error("value registered for {0} has a different type")]
    TypeMismatch(&'static str),
}

type Entry = (TypeKey, Box<dyn Any + Send + Sync>);

#[derive(Default)]
pub struct TypeRegistry {
    entries: Vec<Entry>,
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(key, _)| key.name))
            .finish()
    }
}

impl TypeRegistry {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Append a raw entry. Earlier entries for the same key shadow it.
    pub fn set_by_type(&mut self, key: TypeKey, value: Box<dyn Any + Send + Sync>) {
        self.entries.push((key, value));
    }

    pub fn get_by_type(&self, key: TypeKey) -> Result<&(dyn Any + Send + Sync), RegistryError> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_ref())
            .ok_or(RegistryError::NotFound(key.name))
    }

    /// Register `value` under its own concrete type.
    pub fn map_value<T: Send + Sync + 'static>(&mut self, value: T) {
        self.set_by_type(TypeKey::of::<T>(), Box::new(value));
    }

    /// Register a shared trait object under the interface key of `I`.
    pub fn map_value_to<I: ?Sized + Send + Sync + 'static>(&mut self, value: Arc<I>) {
        self.set_by_type(TypeKey::interface::<I>(), Box::new(value));
    }

    pub fn get<T: 'static>(&self) -> Result<&T, RegistryError> {
        let key = TypeKey::of::<T>();
        self.get_by_type(key)?
            .downcast_ref::<T>()
            .ok_or(RegistryError::TypeMismatch(key.name))
    }

    pub fn get_interface<I: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<I>, RegistryError> {
        let key = TypeKey::interface::<I>();
        self.get_by_type(key)?
            .downcast_ref::<Arc<I>>()
            .cloned()
            .ok_or(RegistryError::TypeMismatch(key.name))
    }

    pub fn contains(&self, key: TypeKey) -> bool {
        self.entries.iter().any(|(k, _)| *k == key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct English;

    impl Greeter for English {
        fn greet(&self) -> String {
            "hello".into()
        }
    }

    #[test]
    fn test_concrete_lookup_first_match_wins() {
        let mut registry = TypeRegistry::with_capacity(4);
        registry.map_value(1u32);
        registry.map_value(2u32);
        registry.map_value(String::from("x"));

        assert_eq!(registry.get::<u32>(), Ok(&1));
        assert_eq!(registry.get::<String>().map(String::as_str), Ok("x"));
        assert_eq!(
            registry.get::<u64>(),
            Err(RegistryError::NotFound(std::any::type_name::<u64>()))
        );
    }

    #[test]
    fn test_interface_keys_are_explicit() {
        let mut registry = TypeRegistry::default();
        registry.map_value(English);
        assert!(registry.get_interface::<dyn Greeter>().is_err());

        registry.map_value_to::<dyn Greeter>(Arc::new(English));
        let greeter = registry.get_interface::<dyn Greeter>().unwrap();
        assert_eq!(greeter.greet(), "hello");
        assert_ne!(TypeKey::of::<English>(), TypeKey::interface::<dyn Greeter>());
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let mut registry = TypeRegistry::with_capacity(8);
        registry.map_value(1u8);
        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.capacity() >= 8);
    }
}
