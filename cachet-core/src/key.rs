//! Cache key types
//!
//! [`CacheKey`] carries a hash supplied at construction time instead of
//! deriving one from its fields. Equality compares the disassembled id, the
//! owner name and the tenant; hashing uses only the precomputed value. Two
//! equal keys must therefore be built with the same hash, which
//! [`crate::CacheKeyFactory`] guarantees by routing every key through the
//! owning type's [`crate::IdTypeHasher`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

// ============================================================================
// IDENTIFIER VALUES
// ============================================================================

/// Canonical structural form of an identifier.
///
/// Composite identifiers disassemble into `Array`, which is the only
/// array-shaped variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum IdentifierValue {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    Uuid(Uuid),
    Bytes(Vec<u8>),
    Array(Vec<IdentifierValue>),
}

impl IdentifierValue {
    pub fn is_array_shaped(&self) -> bool {
        matches!(self, IdentifierValue::Array(_))
    }

    /// Content hash of the value, stable across processes.
    pub fn structural_hash(&self) -> i32 {
        match self {
            IdentifierValue::Null => 0,
            IdentifierValue::Bool(b) => {
                if *b {
                    1231
                } else {
                    1237
                }
            }
            IdentifierValue::Int(v) => fold_i64(*v),
            IdentifierValue::Text(s) => polynomial_hash(s),
            IdentifierValue::Uuid(u) => {
                let (hi, lo) = u.as_u64_pair();
                fold_i64((hi ^ lo) as i64)
            }
            IdentifierValue::Bytes(bytes) => bytes
                .iter()
                .fold(1i32, |acc, b| acc.wrapping_mul(31).wrapping_add(*b as i8 as i32)),
            IdentifierValue::Array(items) => items.iter().fold(1i32, |acc, item| {
                acc.wrapping_mul(31).wrapping_add(item.structural_hash())
            }),
        }
    }
}

impl fmt::Display for IdentifierValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentifierValue::Null => f.write_str("null"),
            IdentifierValue::Bool(b) => write!(f, "{}", b),
            IdentifierValue::Int(v) => write!(f, "{}", v),
            IdentifierValue::Text(s) => f.write_str(s),
            IdentifierValue::Uuid(u) => write!(f, "{}", u),
            IdentifierValue::Bytes(bytes) => write!(f, "{:?}", bytes),
            IdentifierValue::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<i64> for IdentifierValue {
    fn from(v: i64) -> Self {
        IdentifierValue::Int(v)
    }
}

impl From<i32> for IdentifierValue {
    fn from(v: i32) -> Self {
        IdentifierValue::Int(v as i64)
    }
}

impl From<&str> for IdentifierValue {
    fn from(s: &str) -> Self {
        IdentifierValue::Text(s.to_string())
    }
}

impl From<String> for IdentifierValue {
    fn from(s: String) -> Self {
        IdentifierValue::Text(s)
    }
}

impl From<Uuid> for IdentifierValue {
    fn from(u: Uuid) -> Self {
        IdentifierValue::Uuid(u)
    }
}

impl From<Vec<IdentifierValue>> for IdentifierValue {
    fn from(items: Vec<IdentifierValue>) -> Self {
        IdentifierValue::Array(items)
    }
}

/// 31-polynomial hash over UTF-16 code units with wrapping arithmetic.
pub fn polynomial_hash(s: &str) -> i32 {
    s.encode_utf16()
        .fold(0i32, |acc, unit| acc.wrapping_mul(31).wrapping_add(unit as i32))
}

fn fold_i64(v: i64) -> i32 {
    (v ^ ((v as u64) >> 32) as i64) as i32
}

// ============================================================================
// COMPOSITE KEYS
// ============================================================================

/// Immutable, tenant-aware key for entity and collection entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheKey {
    id: IdentifierValue,
    owner_name: String,
    tenant_id: Option<String>,
    precomputed_hash: i32,
}

impl CacheKey {
    /// Assemble a key from already-disassembled parts.
    ///
    /// `precomputed_hash` must be the hash the factory would compute for the
    /// same `(id, owner_name, tenant_id)`; lookups break otherwise.
    pub fn from_parts(
        id: IdentifierValue,
        owner_name: impl Into<String>,
        tenant_id: Option<String>,
        precomputed_hash: i32,
    ) -> Self {
        Self {
            id,
            owner_name: owner_name.into(),
            tenant_id,
            precomputed_hash,
        }
    }

    /// The disassembled identifier.
    pub fn id(&self) -> &IdentifierValue {
        &self.id
    }

    /// Entity type or collection-role name.
    pub fn owner_name(&self) -> &str {
        &self.owner_name
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    pub fn precomputed_hash(&self) -> i32 {
        self.precomputed_hash
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.owner_name == other.owner_name
            && self.tenant_id == other.tenant_id
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_i32(self.precomputed_hash);
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.owner_name, self.id)
    }
}

// ============================================================================
// NATURAL-ID KEYS
// ============================================================================

/// Key addressing an entity by its natural id.
///
/// The values are kept exactly as supplied; the key resolves back to the
/// owning entity without the primary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NaturalIdKey {
    values: IdentifierValue,
    entity_name: String,
    tenant_id: Option<String>,
}

impl NaturalIdKey {
    pub fn new(values: IdentifierValue, entity_name: impl Into<String>, tenant_id: Option<String>) -> Self {
        Self {
            values,
            entity_name: entity_name.into(),
            tenant_id,
        }
    }

    pub fn values(&self) -> &IdentifierValue {
        &self.values
    }

    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }
}

impl fmt::Display for NaturalIdKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}##NaturalId{}", self.entity_name, self.values)
    }
}

// ============================================================================
// ENTRY KEYS
// ============================================================================

/// Every key shape a second-level cache region stores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheEntryKey {
    /// Entity or collection key built by the factory.
    Composite(CacheKey),
    /// Natural-id lookup key.
    NaturalId(NaturalIdKey),
    /// Update-timestamps region key (a table space name).
    Region(String),
}

impl CacheEntryKey {
    /// Short name of the key shape, used in diagnostics.
    pub fn shape(&self) -> &'static str {
        match self {
            CacheEntryKey::Composite(_) => "composite",
            CacheEntryKey::NaturalId(_) => "natural-id",
            CacheEntryKey::Region(_) => "timestamp region",
        }
    }
}

impl From<CacheKey> for CacheEntryKey {
    fn from(key: CacheKey) -> Self {
        CacheEntryKey::Composite(key)
    }
}

impl From<NaturalIdKey> for CacheEntryKey {
    fn from(key: NaturalIdKey) -> Self {
        CacheEntryKey::NaturalId(key)
    }
}

impl fmt::Display for CacheEntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheEntryKey::Composite(key) => write!(f, "{}", key),
            CacheEntryKey::NaturalId(key) => write!(f, "{}", key),
            CacheEntryKey::Region(region) => f.write_str(region),
        }
    }
}
