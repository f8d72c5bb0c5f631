//! Derived entity keys shared by the graph store and the vector index.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use intelgraph_shared::EntityLabel;

/// Namespace for v5 entity ids. Changing it orphans every stored vector.
const ENTITY_NAMESPACE: Uuid = Uuid::from_u128(0x6c1f_3a52_9d0e_4b7a_8f21_5e4c_0b9d_a731);

/// Normalized text + label. Both stores address an entity by this key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DerivedKey {
    pub label: EntityLabel,
    /// Trimmed, lower-cased, whitespace-collapsed text.
    pub normalized: String,
}

impl DerivedKey {
    pub fn new(text: &str, label: EntityLabel) -> Self {
        Self {
            label,
            normalized: normalize_entity_text(text),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.normalized.is_empty()
    }

    /// Deterministic id: UUID v5 of `label:normalized`.
    pub fn id(&self) -> Uuid {
        Uuid::new_v5(&ENTITY_NAMESPACE, self.to_string().as_bytes())
    }
}

impl std::fmt::Display for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.label, self.normalized)
    }
}

/// Normalize entity text for keying.
pub fn normalize_entity_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
