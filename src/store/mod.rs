//! # Persistent store
//!
//! The document-store boundary the core reads subjects and items through and
//! writes results back to. Subjects and items are owned by the store; the core
//! only ever holds short-lived copies.
//!
//! Two implementations ship with the crate:
//!
//! - [`MemoryStore`]: in-process maps, used by tests and throwaway runs.
//! - [`SqliteStore`]: a Diesel/SQLite backend used by the `sr` binary.
//!
//! Set membership writes (`add_liked`, `add_disliked`) are idempotent, so a
//! retried feedback event never double-counts.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::vector::UnitVector;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Identity of a subject (a user).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(String);

/// Identity of an item (a photo or other content unit).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

/// Categorical item attribute used for filtering (e.g. `"M"` / `"F"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(String);

macro_rules! string_newtype {
    ($name:ident) => {
        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_newtype!(SubjectId);
string_newtype!(ItemId);
string_newtype!(Tag);

/// A subject as read from the store.
///
/// `preference.is_none()` holds exactly when `sample_count == 0`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subject {
    pub id: SubjectId,
    pub preference: Option<UnitVector>,
    pub sample_count: u32,
    pub liked: HashSet<ItemId>,
    pub disliked: HashSet<ItemId>,
}

impl Subject {
    pub fn new(id: SubjectId) -> Self {
        Self {
            id,
            preference: None,
            sample_count: 0,
            liked: HashSet::new(),
            disliked: HashSet::new(),
        }
    }

    /// Everything the subject has already rated.
    pub fn excluded(&self) -> HashSet<&ItemId> {
        self.liked.iter().chain(self.disliked.iter()).collect()
    }
}

/// Display metadata carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemMetadata {
    pub filename: Option<String>,
    pub content_type: Option<String>,
}

/// An item as read from the store.
///
/// `embedding` is returned exactly as stored; it may be malformed and is
/// validated by whoever consumes it.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub id: ItemId,
    pub embedding: Option<Vec<f32>>,
    pub attribute: Option<Tag>,
    pub metadata: ItemMetadata,
}

/// An item about to be inserted.
#[derive(Debug, Clone, Default)]
pub struct NewItem {
    pub payload: Vec<u8>,
    pub embedding: Option<Vec<f32>>,
    pub attribute: Option<Tag>,
    pub metadata: ItemMetadata,
}

/// Selection for [`Store::list_items`]. All conditions are ANDed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemFilter {
    /// `Some(true)`: only items with an embedding. `Some(false)`: only items without.
    pub embedded: Option<bool>,
    pub attribute: Option<Tag>,
    /// Only items missing an embedding or an attribute.
    pub needs_processing: bool,
}

impl ItemFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn embedded() -> Self {
        Self {
            embedded: Some(true),
            ..Self::default()
        }
    }

    pub fn needs_processing() -> Self {
        Self {
            needs_processing: true,
            ..Self::default()
        }
    }

    pub fn with_attribute(mut self, attribute: Option<Tag>) -> Self {
        self.attribute = attribute;
        self
    }

    pub fn matches(&self, item: &Item) -> bool {
        if let Some(embedded) = self.embedded {
            if item.embedding.is_some() != embedded {
                return false;
            }
        }
        if let Some(attribute) = &self.attribute {
            if item.attribute.as_ref() != Some(attribute) {
                return false;
            }
        }
        if self.needs_processing && item.embedding.is_some() && item.attribute.is_some() {
            return false;
        }
        true
    }
}

/// Storage operations consumed by the core.
///
/// Implementations must be safe to share across threads. Operations on a
/// missing subject return `SubjectNotFound`; item writes on a missing item
/// return `ItemNotFound`.
pub trait Store: Send + Sync + 'static {
    fn register_subject(&self, id: &SubjectId) -> Result<()>;

    fn get_subject(&self, id: &SubjectId) -> Result<Option<Subject>>;

    /// Overwrite the subject's preference and sample count.
    fn upsert_subject_preference(
        &self,
        id: &SubjectId,
        preference: Option<&UnitVector>,
        sample_count: u32,
    ) -> Result<()>;

    fn add_liked(&self, id: &SubjectId, item: &ItemId) -> Result<()>;

    fn add_disliked(&self, id: &SubjectId, item: &ItemId) -> Result<()>;

    /// Reset preference, sample count and both rating sets.
    fn clear_preferences(&self, id: &SubjectId) -> Result<()>;

    fn list_items(&self, filter: &ItemFilter) -> Result<Vec<Item>>;

    fn get_item(&self, id: &ItemId) -> Result<Option<Item>>;

    fn insert_item(&self, item: NewItem) -> Result<ItemId>;

    /// Raw bytes handed to the embedding oracle.
    fn item_payload(&self, id: &ItemId) -> Result<Option<Vec<u8>>>;

    fn set_item_embedding(&self, id: &ItemId, vector: &[f32], attribute: Option<&Tag>)
    -> Result<()>;

    /// Returns `false` when the item did not exist.
    fn delete_item(&self, id: &ItemId) -> Result<bool>;

    fn count_items(&self) -> Result<usize>;
}
