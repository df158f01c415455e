//! Diesel/SQLite [`Store`].
//!
//! Vectors are persisted as `bincode`-encoded `Vec<f32>` blobs. A blob that no
//! longer decodes is surfaced as an empty embedding so the index builder
//! rejects it and maintenance can delete it, instead of failing every listing.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use tracing::{debug, warn};

use crate::error::{RecommendError, Result};
use crate::models::{
    ItemRow, NewItemRow, RatingRow, SCHEMA_SQL, SubjectRow, VERDICT_DISLIKED, VERDICT_LIKED,
};
use crate::schema::{items, ratings, subjects};
use crate::store::{
    Item, ItemFilter, ItemId, ItemMetadata, NewItem, Store, Subject, SubjectId, Tag,
};
use crate::vector::UnitVector;

pub struct SqliteStore {
    conn: Mutex<SqliteConnection>,
}

impl SqliteStore {
    /// Connect to `db_url` (a file path or `:memory:`) and create missing tables.
    pub fn open(db_url: &str) -> Result<Self> {
        let mut conn = SqliteConnection::establish(db_url)?;
        conn.batch_execute(SCHEMA_SQL)?;
        debug!("Opened SQLite store at {}", db_url);
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, SqliteConnection>> {
        self.conn
            .lock()
            .map_err(|_| RecommendError::Store("sqlite connection lock poisoned".into()))
    }
}

fn encode_vector(v: &[f32]) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(v, bincode::config::standard())
        .map_err(|e| RecommendError::Store(format!("encode vector: {e}")))
}

fn decode_vector(bytes: &[u8]) -> Option<Vec<f32>> {
    bincode::serde::decode_from_slice::<Vec<f32>, _>(bytes, bincode::config::standard())
        .map(|(v, _)| v)
        .ok()
}

fn parse_item_id(id: &ItemId) -> Option<i32> {
    id.as_str().parse().ok()
}

fn subject_exists(conn: &mut SqliteConnection, id: &SubjectId) -> Result<bool> {
    let count: i64 = subjects::table
        .filter(subjects::id.eq(id.as_str()))
        .count()
        .get_result(conn)?;
    Ok(count > 0)
}

fn add_rating(store: &SqliteStore, id: &SubjectId, item: &ItemId, verdict: &str) -> Result<()> {
    let mut conn = store.conn()?;
    if !subject_exists(&mut conn, id)? {
        return Err(RecommendError::SubjectNotFound(id.clone()));
    }
    diesel::insert_or_ignore_into(ratings::table)
        .values(&RatingRow {
            subject_id: id.to_string(),
            item_id: item.to_string(),
            verdict: verdict.to_string(),
        })
        .execute(&mut *conn)?;
    Ok(())
}

impl From<ItemRow> for Item {
    fn from(row: ItemRow) -> Self {
        let embedding = row.embedding.map(|blob| {
            decode_vector(&blob).unwrap_or_else(|| {
                warn!("Item {} has an undecodable embedding blob", row.id);
                Vec::new()
            })
        });
        Item {
            id: ItemId::from(row.id.to_string()),
            embedding,
            attribute: row.attribute.map(Tag::from),
            metadata: ItemMetadata {
                filename: row.filename,
                content_type: row.content_type,
            },
        }
    }
}

impl Store for SqliteStore {
    fn register_subject(&self, id: &SubjectId) -> Result<()> {
        let mut conn = self.conn()?;
        let row = SubjectRow {
            id: id.to_string(),
            preference: None,
            sample_count: 0,
        };
        match diesel::insert_into(subjects::table)
            .values(&row)
            .execute(&mut *conn)
        {
            Ok(_) => Ok(()),
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                Err(RecommendError::SubjectExists(id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn get_subject(&self, id: &SubjectId) -> Result<Option<Subject>> {
        let mut conn = self.conn()?;
        let row: Option<SubjectRow> = subjects::table
            .filter(subjects::id.eq(id.as_str()))
            .select(SubjectRow::as_select())
            .first(&mut *conn)
            .optional()?;
        let Some(row) = row else {
            return Ok(None);
        };

        let sample_count = u32::try_from(row.sample_count).map_err(|_| {
            RecommendError::Store(format!(
                "subject {id} has a negative sample count {}",
                row.sample_count
            ))
        })?;
        let preference = match (row.preference, sample_count) {
            (Some(blob), count) if count > 0 => {
                let values = decode_vector(&blob).ok_or_else(|| {
                    RecommendError::Store(format!("subject {id} has a corrupt preference blob"))
                })?;
                Some(UnitVector::normalize(values)?)
            }
            _ => None,
        };
        let sample_count = if preference.is_some() { sample_count } else { 0 };

        let memberships: Vec<(String, String)> = ratings::table
            .filter(ratings::subject_id.eq(id.as_str()))
            .select((ratings::item_id, ratings::verdict))
            .load(&mut *conn)?;

        let mut liked = HashSet::new();
        let mut disliked = HashSet::new();
        for (item_id, verdict) in memberships {
            match verdict.as_str() {
                VERDICT_LIKED => liked.insert(ItemId::from(item_id)),
                VERDICT_DISLIKED => disliked.insert(ItemId::from(item_id)),
                other => {
                    warn!("Ignoring unknown verdict {:?} for subject {}", other, id);
                    false
                }
            };
        }

        Ok(Some(Subject {
            id: id.clone(),
            preference,
            sample_count,
            liked,
            disliked,
        }))
    }

    fn upsert_subject_preference(
        &self,
        id: &SubjectId,
        preference: Option<&UnitVector>,
        sample_count: u32,
    ) -> Result<()> {
        let blob = preference.map(|p| encode_vector(p.as_slice())).transpose()?;
        let count = i32::try_from(sample_count)
            .map_err(|_| RecommendError::Store("sample count overflow".into()))?;
        let mut conn = self.conn()?;
        let updated = diesel::update(subjects::table.filter(subjects::id.eq(id.as_str())))
            .set((subjects::preference.eq(blob), subjects::sample_count.eq(count)))
            .execute(&mut *conn)?;
        if updated == 0 {
            return Err(RecommendError::SubjectNotFound(id.clone()));
        }
        Ok(())
    }

    fn add_liked(&self, id: &SubjectId, item: &ItemId) -> Result<()> {
        add_rating(self, id, item, VERDICT_LIKED)
    }

    fn add_disliked(&self, id: &SubjectId, item: &ItemId) -> Result<()> {
        add_rating(self, id, item, VERDICT_DISLIKED)
    }

    fn clear_preferences(&self, id: &SubjectId) -> Result<()> {
        let mut conn = self.conn()?;
        conn.transaction::<_, RecommendError, _>(|conn| {
            let updated = diesel::update(subjects::table.filter(subjects::id.eq(id.as_str())))
                .set((
                    subjects::preference.eq(None::<Vec<u8>>),
                    subjects::sample_count.eq(0),
                ))
                .execute(conn)?;
            if updated == 0 {
                return Err(RecommendError::SubjectNotFound(id.clone()));
            }
            diesel::delete(ratings::table.filter(ratings::subject_id.eq(id.as_str())))
                .execute(conn)?;
            Ok(())
        })
    }

    fn list_items(&self, filter: &ItemFilter) -> Result<Vec<Item>> {
        let mut query = items::table.select(ItemRow::as_select()).into_boxed();
        match filter.embedded {
            Some(true) => query = query.filter(items::embedding.is_not_null()),
            Some(false) => query = query.filter(items::embedding.is_null()),
            None => {}
        }
        if let Some(attribute) = &filter.attribute {
            query = query.filter(items::attribute.eq(attribute.as_str().to_string()));
        }
        if filter.needs_processing {
            query = query.filter(items::embedding.is_null().or(items::attribute.is_null()));
        }

        let mut conn = self.conn()?;
        let rows: Vec<ItemRow> = query.order(items::id.asc()).load(&mut *conn)?;
        Ok(rows.into_iter().map(Item::from).collect())
    }

    fn get_item(&self, id: &ItemId) -> Result<Option<Item>> {
        let Some(key) = parse_item_id(id) else {
            return Ok(None);
        };
        let mut conn = self.conn()?;
        let row: Option<ItemRow> = items::table
            .find(key)
            .select(ItemRow::as_select())
            .first(&mut *conn)
            .optional()?;
        Ok(row.map(Item::from))
    }

    fn insert_item(&self, item: NewItem) -> Result<ItemId> {
        let row = NewItemRow {
            payload: item.payload,
            embedding: item.embedding.as_deref().map(encode_vector).transpose()?,
            attribute: item.attribute.map(|t| t.to_string()),
            filename: item.metadata.filename,
            content_type: item.metadata.content_type,
        };
        let mut conn = self.conn()?;
        let id: i32 = diesel::insert_into(items::table)
            .values(&row)
            .returning(items::id)
            .get_result(&mut *conn)?;
        Ok(ItemId::from(id.to_string()))
    }

    fn item_payload(&self, id: &ItemId) -> Result<Option<Vec<u8>>> {
        let Some(key) = parse_item_id(id) else {
            return Ok(None);
        };
        let mut conn = self.conn()?;
        Ok(items::table
            .find(key)
            .select(items::payload)
            .first::<Vec<u8>>(&mut *conn)
            .optional()?)
    }

    fn set_item_embedding(
        &self,
        id: &ItemId,
        vector: &[f32],
        attribute: Option<&Tag>,
    ) -> Result<()> {
        let key = parse_item_id(id).ok_or_else(|| RecommendError::ItemNotFound(id.clone()))?;
        let blob = encode_vector(vector)?;
        let mut conn = self.conn()?;
        let target = items::table.find(key);
        let updated = match attribute {
            Some(tag) => diesel::update(target)
                .set((
                    items::embedding.eq(Some(blob)),
                    items::attribute.eq(Some(tag.to_string())),
                ))
                .execute(&mut *conn)?,
            None => diesel::update(target)
                .set(items::embedding.eq(Some(blob)))
                .execute(&mut *conn)?,
        };
        if updated == 0 {
            return Err(RecommendError::ItemNotFound(id.clone()));
        }
        Ok(())
    }

    fn delete_item(&self, id: &ItemId) -> Result<bool> {
        let Some(key) = parse_item_id(id) else {
            return Ok(false);
        };
        let mut conn = self.conn()?;
        let deleted = diesel::delete(items::table.find(key)).execute(&mut *conn)?;
        Ok(deleted > 0)
    }

    fn count_items(&self) -> Result<usize> {
        let mut conn = self.conn()?;
        let count: i64 = items::table.count().get_result(&mut *conn)?;
        Ok(count as usize)
    }
}
