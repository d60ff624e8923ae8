//! Construction and decomposition of cache keys
//!
//! Hash rule, applied to the raw identifier through the owning type's hasher:
//!
//! | tenant  | disassembled id | hash                         |
//! |---------|-----------------|------------------------------|
//! | absent  | scalar          | `type_hash`                  |
//! | absent  | array-shaped    | `31 * type_hash`             |
//! | present | any             | `31 * type_hash + tenant_hash` |
//!
//! A missing tenant contributes `0`, so the array-shaped row is the combined
//! form with an empty tenant.

use crate::error::KeyShapeError;
use crate::key::{polynomial_hash, CacheEntryKey, CacheKey, IdentifierValue, NaturalIdKey};

/// Type-specific identifier handling plugged in per owning type.
pub trait IdTypeHasher: Send + Sync {
    /// Convert a raw identifier into its canonical structural form.
    fn disassemble(&self, id: &IdentifierValue) -> IdentifierValue {
        id.clone()
    }

    /// Type-specific hash of a raw identifier.
    fn hash_code(&self, id: &IdentifierValue) -> i32;
}

/// Hashes identifiers by content.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralIdHasher;

impl IdTypeHasher for StructuralIdHasher {
    fn hash_code(&self, id: &IdentifierValue) -> i32 {
        id.structural_hash()
    }
}

impl<F> IdTypeHasher for F
where
    F: Fn(&IdentifierValue) -> i32 + Send + Sync,
{
    fn hash_code(&self, id: &IdentifierValue) -> i32 {
        self(id)
    }
}

/// Session information the natural-id key needs.
pub trait SessionContext {
    fn tenant_id(&self) -> Option<&str>;
}

/// Minimal session carrying only a tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenantSession {
    pub tenant_id: Option<String>,
}

impl TenantSession {
    pub fn new(tenant_id: Option<String>) -> Self {
        Self { tenant_id }
    }
}

impl SessionContext for TenantSession {
    fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }
}

/// Builds and decomposes the keys stored in second-level cache regions.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheKeyFactory;

impl CacheKeyFactory {
    pub const fn new() -> Self {
        CacheKeyFactory
    }

    /// Key for an entity entry, owned by the root entity name.
    pub fn build_entity_key(
        &self,
        raw_id: &IdentifierValue,
        hasher: &dyn IdTypeHasher,
        entity_type_name: &str,
        tenant_id: Option<&str>,
    ) -> CacheKey {
        self.build_key(raw_id, hasher, entity_type_name, tenant_id)
    }

    /// Key for a collection entry, owned by the collection role.
    pub fn build_collection_key(
        &self,
        raw_id: &IdentifierValue,
        hasher: &dyn IdTypeHasher,
        role_name: &str,
        tenant_id: Option<&str>,
    ) -> CacheKey {
        self.build_key(raw_id, hasher, role_name, tenant_id)
    }

    /// Natural-id key. The values pass through unchanged.
    pub fn build_natural_key(
        &self,
        natural_id_values: IdentifierValue,
        entity_type_name: &str,
        session: &dyn SessionContext,
    ) -> NaturalIdKey {
        NaturalIdKey::new(
            natural_id_values,
            entity_type_name,
            session.tenant_id().map(str::to_string),
        )
    }

    pub fn get_entity_id<'a>(&self, key: &'a CacheEntryKey) -> Result<&'a IdentifierValue, KeyShapeError> {
        composite_id(key)
    }

    pub fn get_collection_id<'a>(
        &self,
        key: &'a CacheEntryKey,
    ) -> Result<&'a IdentifierValue, KeyShapeError> {
        composite_id(key)
    }

    pub fn get_natural_id_values<'a>(
        &self,
        key: &'a CacheEntryKey,
    ) -> Result<&'a IdentifierValue, KeyShapeError> {
        match key {
            CacheEntryKey::NaturalId(natural) => Ok(natural.values()),
            other => Err(KeyShapeError::NotNaturalIdKey {
                found: other.shape().to_string(),
            }),
        }
    }

    fn build_key(
        &self,
        raw_id: &IdentifierValue,
        hasher: &dyn IdTypeHasher,
        owner_name: &str,
        tenant_id: Option<&str>,
    ) -> CacheKey {
        let disassembled = hasher.disassemble(raw_id);
        let hash = key_hash(raw_id, &disassembled, hasher, tenant_id);
        CacheKey::from_parts(disassembled, owner_name, tenant_id.map(str::to_string), hash)
    }
}

/// Hash a key would carry for the given identifier and tenant.
pub fn key_hash(
    raw_id: &IdentifierValue,
    disassembled: &IdentifierValue,
    hasher: &dyn IdTypeHasher,
    tenant_id: Option<&str>,
) -> i32 {
    let type_hash = hasher.hash_code(raw_id);
    if tenant_id.is_none() && !disassembled.is_array_shaped() {
        return type_hash;
    }
    let tenant_hash = tenant_id.map(polynomial_hash).unwrap_or(0);
    type_hash.wrapping_mul(31).wrapping_add(tenant_hash)
}

fn composite_id(key: &CacheEntryKey) -> Result<&IdentifierValue, KeyShapeError> {
    match key {
        CacheEntryKey::Composite(composite) => Ok(composite.id()),
        other => Err(KeyShapeError::NotCompositeKey {
            found: other.shape().to_string(),
        }),
    }
}
