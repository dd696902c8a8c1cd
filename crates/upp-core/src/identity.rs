//! Name to UUID resolution.

use std::collections::HashMap;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::EngineError;

/// Maps human-readable names to identities.
///
/// Names that were never registered still resolve if they parse as a UUID,
/// so callers can address identities directly.
#[derive(Debug, Default)]
pub struct IdentityRegistry {
    names: RwLock<HashMap<String, Uuid>>,
}

impl IdentityRegistry {
    /// Bind `name` to `id`, returning the identity it was bound to before.
    pub fn register(&self, name: impl Into<String>, id: Uuid) -> Option<Uuid> {
        self.names.write().insert(name.into(), id)
    }

    /// Drop the binding for `name`.
    pub fn remove(&self, name: &str) -> Option<Uuid> {
        self.names.write().remove(name)
    }

    /// Identity for `name`.
    pub fn resolve(&self, name: &str) -> Result<Uuid, EngineError> {
        if let Some(id) = self.names.read().get(name) {
            return Ok(*id);
        }
        Uuid::parse_str(name).map_err(|_| EngineError::UnknownIdentity(name.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_names_resolve() {
        let registry = IdentityRegistry::default();
        let id = Uuid::from_u128(42);
        assert_eq!(registry.register("sensor", id), None);
        assert_eq!(registry.resolve("sensor").unwrap(), id);

        let other = Uuid::from_u128(43);
        assert_eq!(registry.register("sensor", other), Some(id));
        assert_eq!(registry.resolve("sensor").unwrap(), other);
    }

    #[test]
    fn uuid_strings_resolve_without_registration() {
        let registry = IdentityRegistry::default();
        let id = Uuid::from_u128(0xdead_beef);
        assert_eq!(registry.resolve(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn unknown_names_fail() {
        let registry = IdentityRegistry::default();
        registry.register("gone", Uuid::from_u128(1));
        registry.remove("gone");
        assert!(matches!(registry.resolve("gone"), Err(EngineError::UnknownIdentity(name)) if name == "gone"));
    }
}
