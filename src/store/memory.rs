//! In-process [`Store`] backed by `RwLock`-guarded maps.
//!
//! Items are kept in insertion order so listings (and therefore index
//! enumeration order) are deterministic.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{RecommendError, Result};
use crate::store::{Item, ItemFilter, ItemId, NewItem, Store, Subject, SubjectId, Tag};
use crate::vector::UnitVector;

#[derive(Debug)]
struct StoredItem {
    item: Item,
    payload: Vec<u8>,
}

#[derive(Debug, Default)]
struct Inner {
    subjects: HashMap<SubjectId, Subject>,
    items: Vec<StoredItem>,
    next_item: u64,
}

impl Inner {
    fn subject_mut(&mut self, id: &SubjectId) -> Result<&mut Subject> {
        self.subjects
            .get_mut(id)
            .ok_or_else(|| RecommendError::SubjectNotFound(id.clone()))
    }

    fn position(&self, id: &ItemId) -> Option<usize> {
        self.items.iter().position(|s| &s.item.id == id)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an item under a caller-chosen id, replacing any existing item with that id.
    pub fn insert_with_id(&self, id: ItemId, item: NewItem) -> Result<()> {
        let mut inner = self.write()?;
        let stored = StoredItem {
            item: Item {
                id: id.clone(),
                embedding: item.embedding,
                attribute: item.attribute,
                metadata: item.metadata,
            },
            payload: item.payload,
        };
        match inner.position(&id) {
            Some(pos) => inner.items[pos] = stored,
            None => inner.items.push(stored),
        }
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| RecommendError::Store("memory store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| RecommendError::Store("memory store lock poisoned".into()))
    }
}

impl Store for MemoryStore {
    fn register_subject(&self, id: &SubjectId) -> Result<()> {
        let mut inner = self.write()?;
        if inner.subjects.contains_key(id) {
            return Err(RecommendError::SubjectExists(id.clone()));
        }
        inner.subjects.insert(id.clone(), Subject::new(id.clone()));
        Ok(())
    }

    fn get_subject(&self, id: &SubjectId) -> Result<Option<Subject>> {
        Ok(self.read()?.subjects.get(id).cloned())
    }

    fn upsert_subject_preference(
        &self,
        id: &SubjectId,
        preference: Option<&UnitVector>,
        sample_count: u32,
    ) -> Result<()> {
        let mut inner = self.write()?;
        let subject = inner.subject_mut(id)?;
        subject.preference = preference.cloned();
        subject.sample_count = sample_count;
        Ok(())
    }

    fn add_liked(&self, id: &SubjectId, item: &ItemId) -> Result<()> {
        self.write()?.subject_mut(id)?.liked.insert(item.clone());
        Ok(())
    }

    fn add_disliked(&self, id: &SubjectId, item: &ItemId) -> Result<()> {
        self.write()?.subject_mut(id)?.disliked.insert(item.clone());
        Ok(())
    }

    fn clear_preferences(&self, id: &SubjectId) -> Result<()> {
        let mut inner = self.write()?;
        let subject = inner.subject_mut(id)?;
        *subject = Subject::new(id.clone());
        Ok(())
    }

    fn list_items(&self, filter: &ItemFilter) -> Result<Vec<Item>> {
        Ok(self
            .read()?
            .items
            .iter()
            .filter(|s| filter.matches(&s.item))
            .map(|s| s.item.clone())
            .collect())
    }

    fn get_item(&self, id: &ItemId) -> Result<Option<Item>> {
        let inner = self.read()?;
        Ok(inner.position(id).map(|pos| inner.items[pos].item.clone()))
    }

    fn insert_item(&self, item: NewItem) -> Result<ItemId> {
        let id = {
            let mut inner = self.write()?;
            inner.next_item += 1;
            ItemId::from(format!("item-{}", inner.next_item))
        };
        self.insert_with_id(id.clone(), item)?;
        Ok(id)
    }

    fn item_payload(&self, id: &ItemId) -> Result<Option<Vec<u8>>> {
        let inner = self.read()?;
        Ok(inner.position(id).map(|pos| inner.items[pos].payload.clone()))
    }

    fn set_item_embedding(
        &self,
        id: &ItemId,
        vector: &[f32],
        attribute: Option<&Tag>,
    ) -> Result<()> {
        let mut inner = self.write()?;
        let pos = inner
            .position(id)
            .ok_or_else(|| RecommendError::ItemNotFound(id.clone()))?;
        let item = &mut inner.items[pos].item;
        item.embedding = Some(vector.to_vec());
        if let Some(attribute) = attribute {
            item.attribute = Some(attribute.clone());
        }
        Ok(())
    }

    fn delete_item(&self, id: &ItemId) -> Result<bool> {
        let mut inner = self.write()?;
        match inner.position(id) {
            Some(pos) => {
                inner.items.remove(pos);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn count_items(&self) -> Result<usize> {
        Ok(self.read()?.items.len())
    }
}
