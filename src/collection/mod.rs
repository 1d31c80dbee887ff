//! Collection directory and document bookkeeping
//!
//! Collections are registered by name in the header page. Every document
//! write goes through here so that each index holds exactly one entry per
//! stored document, keyed by the document's current field value.

use serde_json::{Map, Value};

use crate::data::DataService;
use crate::error::{EngineError, EngineResult};
use crate::file::PageId;
use crate::index::{IndexKey, IndexQuery, IndexService};
use crate::page::{CollectionPage, DocumentRef, MAX_COLLECTION_NAME_LENGTH, PageType};
use crate::pager::Pager;

/// Field holding the document key, indexed as unique in every collection
pub const ID_FIELD: &str = "_id";

/// Check that `name` can be used as a collection name
pub fn validate_name(name: &str) -> EngineResult<()> {
    if name.is_empty() {
        return Err(EngineError::InvalidName("collection name is empty".to_string()));
    }
    if name.len() > MAX_COLLECTION_NAME_LENGTH {
        return Err(EngineError::InvalidName(format!(
            "collection name longer than {} bytes: '{}'",
            MAX_COLLECTION_NAME_LENGTH, name
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(EngineError::InvalidName(format!(
            "collection name contains control characters: {:?}",
            name
        )));
    }
    Ok(())
}

fn as_object(document: &Value) -> EngineResult<&Map<String, Value>> {
    document
        .as_object()
        .ok_or_else(|| EngineError::InvalidArgument("documents must be JSON objects".to_string()))
}

/// Key of every index for `document`, in index slot order
fn index_keys(collection: &CollectionPage, document: &Value) -> EngineResult<Vec<IndexKey>> {
    collection
        .indexes
        .iter()
        .map(|slot| IndexKey::from_field(document, &slot.field))
        .collect()
}

pub struct CollectionService<'a> {
    pager: &'a mut Pager,
}

impl<'a> CollectionService<'a> {
    pub fn new(pager: &'a mut Pager) -> Self {
        Self { pager }
    }

    /// Page id of the collection named `name`
    pub fn page_id(&mut self, name: &str) -> EngineResult<Option<PageId>> {
        Ok(self.pager.header()?.collections.get(name).copied())
    }

    /// Collection page by name, `None` when absent
    pub fn get(&mut self, name: &str) -> EngineResult<Option<CollectionPage>> {
        match self.page_id(name)? {
            Some(page_id) => self.pager.load(page_id).map(Some),
            None => Ok(None),
        }
    }

    /// Like [`CollectionService::get`], but a missing collection is an error
    pub fn require(&mut self, name: &str) -> EngineResult<CollectionPage> {
        self.get(name)?
            .ok_or_else(|| EngineError::NotFound(format!("collection '{}'", name)))
    }

    /// Create a collection with its `_id` index and register it in the header
    pub fn add(&mut self, name: &str) -> EngineResult<CollectionPage> {
        validate_name(name)?;

        let header = self.pager.header()?;
        if header.collections.contains_key(name) {
            return Err(EngineError::DuplicateCollection(name.to_string()));
        }
        if !header.has_room_for(name) {
            return Err(EngineError::DirectoryFull);
        }

        let page_id = self.pager.allocate(PageType::Collection)?;
        let mut collection = CollectionPage::new(page_id, name);
        self.pager.store(&collection)?;
        IndexService::new(self.pager).create_index(&mut collection, ID_FIELD, true)?;

        // allocation moved the free list, so reload before registering
        let mut header = self.pager.header()?;
        header.collections.insert(name.to_string(), page_id);
        self.pager.store(&header)?;
        Ok(collection)
    }

    /// Delete a collection with all its documents and indexes
    pub fn drop(&mut self, name: &str) -> EngineResult<bool> {
        let Some(collection) = self.get(name)? else {
            return Ok(false);
        };

        let mut pages = Vec::new();
        let mut data = DataService::new(self.pager);
        for document in data.scan(&collection)? {
            pages.extend(data.chain(document)?);
        }
        for page_id in pages {
            self.pager.free(page_id)?;
        }

        let mut index = IndexService::new(self.pager);
        for slot in &collection.indexes {
            index.free_tree(slot.root_page)?;
        }
        self.pager.free(collection.page_id)?;

        let mut header = self.pager.header()?;
        header.collections.remove(name);
        self.pager.store(&header)?;
        Ok(true)
    }

    /// Collection names in byte order
    pub fn names(&mut self) -> EngineResult<Vec<String>> {
        Ok(self.pager.header()?.collections.into_keys().collect())
    }

    // ========== Documents ==========

    /// Store a JSON object, assigning the next sequence value as `_id` when it
    /// has none. Returns the document's `_id`.
    pub fn insert_document(
        &mut self,
        collection: &mut CollectionPage,
        mut document: Value,
    ) -> EngineResult<IndexKey> {
        as_object(&document)?;

        let id = match document.get(ID_FIELD) {
            None | Some(Value::Null) => {
                collection.sequence = collection.sequence.checked_add(1).ok_or_else(|| {
                    EngineError::InvalidState("automatic _id sequence exhausted".to_string())
                })?;
                if let Some(object) = document.as_object_mut() {
                    object.insert(ID_FIELD.to_string(), Value::from(collection.sequence));
                }
                IndexKey::Int(collection.sequence)
            }
            Some(value) => {
                let id = IndexKey::from_value(value)?;
                // automatic ids stay ahead of explicit integer ids
                if let IndexKey::Int(n) = id {
                    collection.sequence = collection.sequence.max(n);
                }
                id
            }
        };

        let keys = index_keys(collection, &document)?;
        let bytes = serde_json::to_vec(&document)?;

        let reference = DataService::new(self.pager).insert(collection, &bytes)?;

        let mut index = IndexService::new(self.pager);
        for (slot, key) in collection.indexes.iter().zip(keys) {
            index.insert(collection, &slot.field, key, reference)?;
        }
        Ok(id)
    }

    /// Location of the document whose `_id` is `id`
    pub fn find_reference(
        &mut self,
        collection: &CollectionPage,
        id: &IndexKey,
    ) -> EngineResult<Option<DocumentRef>> {
        let mut cursor =
            IndexService::new(self.pager).find(collection, ID_FIELD, IndexQuery::Eq(id.clone()))?;
        cursor.next().transpose().map(|entry| entry.map(|e| e.document))
    }

    pub fn read_document(&mut self, reference: DocumentRef) -> EngineResult<Value> {
        let bytes = DataService::new(self.pager).read(reference)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn find_by_id(
        &mut self,
        collection: &CollectionPage,
        id: &IndexKey,
    ) -> EngineResult<Option<Value>> {
        match self.find_reference(collection, id)? {
            Some(reference) => self.read_document(reference).map(Some),
            None => Ok(None),
        }
    }

    /// Replace the stored document carrying the same `_id`.
    /// Returns `false` when there is no such document.
    pub fn update_document(
        &mut self,
        collection: &mut CollectionPage,
        document: Value,
    ) -> EngineResult<bool> {
        as_object(&document)?;
        let id = match document.get(ID_FIELD) {
            None | Some(Value::Null) => {
                return Err(EngineError::InvalidArgument(
                    "document to update has no _id".to_string(),
                ));
            }
            Some(value) => IndexKey::from_value(value)?,
        };

        let Some(old_reference) = self.find_reference(collection, &id)? else {
            return Ok(false);
        };
        let old_keys = index_keys(collection, &self.read_document(old_reference)?)?;
        let new_keys = index_keys(collection, &document)?;
        let bytes = serde_json::to_vec(&document)?;

        let reference = DataService::new(self.pager).update(collection, old_reference, &bytes)?;

        let mut index = IndexService::new(self.pager);
        for ((slot, old_key), new_key) in collection.indexes.iter().zip(old_keys).zip(new_keys) {
            if reference == old_reference && old_key == new_key {
                continue;
            }
            index.delete(collection, &slot.field, &old_key, old_reference)?;
            index.insert(collection, &slot.field, new_key, reference)?;
        }
        Ok(true)
    }

    /// Remove the document whose `_id` is `id`. Returns `false` when absent.
    pub fn delete_document(
        &mut self,
        collection: &mut CollectionPage,
        id: &IndexKey,
    ) -> EngineResult<bool> {
        let Some(reference) = self.find_reference(collection, id)? else {
            return Ok(false);
        };
        let keys = index_keys(collection, &self.read_document(reference)?)?;

        let mut index = IndexService::new(self.pager);
        for (slot, key) in collection.indexes.iter().zip(keys) {
            index.delete(collection, &slot.field, &key, reference)?;
        }

        DataService::new(self.pager).delete(collection, reference)?;
        Ok(true)
    }

    /// Documents whose `field` matches `query`.
    ///
    /// Uses the index on `field` when there is one and returns documents in key
    /// order. Otherwise scans the collection and returns them in insertion order.
    pub fn find_documents(
        &mut self,
        collection: &CollectionPage,
        field: &str,
        query: &IndexQuery,
    ) -> EngineResult<Vec<Value>> {
        if collection.index(field).is_some() {
            let references = IndexService::new(self.pager)
                .find(collection, field, query.clone())?
                .map(|entry| entry.map(|e| e.document))
                .collect::<EngineResult<Vec<_>>>()?;

            return references
                .into_iter()
                .map(|reference| self.read_document(reference))
                .collect();
        }

        let references = DataService::new(self.pager).scan(collection)?;
        let mut documents = Vec::new();
        for reference in references {
            let document = self.read_document(reference)?;
            // arrays and objects are not keys and never match
            let matched =
                IndexKey::from_field(&document, field).is_ok_and(|key| query.matches(&key));
            if matched {
                documents.push(document);
            }
        }
        Ok(documents)
    }

    /// Create an index on `field` and fill it from the stored documents.
    /// Returns `false` when the index already exists.
    pub fn ensure_index(
        &mut self,
        collection: &mut CollectionPage,
        field: &str,
        unique: bool,
    ) -> EngineResult<bool> {
        if collection.index(field).is_some() {
            return Ok(false);
        }

        IndexService::new(self.pager).create_index(collection, field, unique)?;

        let references = DataService::new(self.pager).scan(collection)?;
        for reference in references {
            let key = IndexKey::from_field(&self.read_document(reference)?, field)?;
            IndexService::new(self.pager).insert(collection, field, key, reference)?;
        }
        Ok(true)
    }

    /// Drop the index on `field`. The `_id` index cannot be dropped.
    pub fn drop_index(
        &mut self,
        collection: &mut CollectionPage,
        field: &str,
    ) -> EngineResult<bool> {
        if field == ID_FIELD {
            return Err(EngineError::InvalidArgument(
                "the _id index cannot be dropped".to_string(),
            ));
        }
        IndexService::new(self.pager).drop_index(collection, field)
    }
}

#[cfg(test)]
mod tests {
    use std::ops::Bound;

    use serde_json::json;

    use super::*;
    use crate::file::{DiskService, MemoryDiskService, NO_PAGE};
    use crate::logger::Logger;
    use crate::page::HeaderPage;

    fn setup() -> Pager {
        let mut disk = MemoryDiskService::with_journal(false);
        disk.open().unwrap();

        let mut pager = Pager::new(Box::new(disk), 1000, Logger::default());
        pager.store(&HeaderPage::new()).unwrap();
        pager
    }

    #[test]
    fn test_add_and_get() {
        let mut pager = setup();
        let mut collections = CollectionService::new(&mut pager);

        assert!(collections.get("users").unwrap().is_none());
        let users = collections.add("users").unwrap();
        assert_eq!(users.name, "users");
        assert!(users.index(ID_FIELD).unwrap().unique);

        assert_eq!(collections.get("users").unwrap(), Some(users));
        assert!(collections.get("Users").unwrap().is_none());
    }

    #[test]
    fn test_add_rejects_duplicates_and_bad_names() {
        let mut pager = setup();
        let mut collections = CollectionService::new(&mut pager);
        collections.add("users").unwrap();

        assert!(matches!(
            collections.add("users"),
            Err(EngineError::DuplicateCollection(_))
        ));
        assert!(matches!(collections.add(""), Err(EngineError::InvalidName(_))));
        assert!(matches!(
            collections.add(&"x".repeat(MAX_COLLECTION_NAME_LENGTH + 1)),
            Err(EngineError::InvalidName(_))
        ));
        assert!(matches!(collections.add("a\nb"), Err(EngineError::InvalidName(_))));

        collections.add(&"x".repeat(MAX_COLLECTION_NAME_LENGTH)).unwrap();
        collections.add("Users").unwrap();
    }

    #[test]
    fn test_names_and_drop() {
        let mut pager = setup();
        let mut collections = CollectionService::new(&mut pager);
        collections.add("b").unwrap();
        let mut a = collections.add("a").unwrap();
        collections
            .insert_document(&mut a, json!({ "payload": "x".repeat(10_000) }))
            .unwrap();

        assert_eq!(collections.names().unwrap(), vec!["a", "b"]);
        assert!(collections.drop("a").unwrap());
        assert!(!collections.drop("a").unwrap());
        assert_eq!(collections.names().unwrap(), vec!["b"]);

        // the dropped pages are reused before the file grows
        let last_page = pager.header().unwrap().last_page_id;
        let mut collections = CollectionService::new(&mut pager);
        let mut c = collections.add("c").unwrap();
        collections
            .insert_document(&mut c, json!({ "payload": "y".repeat(5_000) }))
            .unwrap();
        assert_eq!(pager.header().unwrap().last_page_id, last_page);
    }

    #[test]
    fn test_insert_assigns_sequential_ids() {
        let mut pager = setup();
        let mut collections = CollectionService::new(&mut pager);
        let mut users = collections.add("users").unwrap();

        let first = collections.insert_document(&mut users, json!({ "name": "Ann" })).unwrap();
        let explicit = collections
            .insert_document(&mut users, json!({ "_id": 10, "name": "Bob" }))
            .unwrap();
        let next = collections.insert_document(&mut users, json!({ "name": "Cid" })).unwrap();

        assert_eq!(first, IndexKey::Int(1));
        assert_eq!(explicit, IndexKey::Int(10));
        assert_eq!(next, IndexKey::Int(11));

        let stored = collections.find_by_id(&users, &IndexKey::Int(1)).unwrap();
        assert_eq!(stored, Some(json!({ "_id": 1, "name": "Ann" })));
        assert_eq!(users.document_count, 3);
    }

    #[test]
    fn test_exhausted_sequence() {
        let mut pager = setup();
        let mut collections = CollectionService::new(&mut pager);
        let mut users = collections.add("users").unwrap();

        collections
            .insert_document(&mut users, json!({ "_id": i64::MAX }))
            .unwrap();
        let result = collections.insert_document(&mut users, json!({ "x": 1 }));
        assert!(matches!(result, Err(EngineError::InvalidState(_))));
        assert_eq!(users.sequence, i64::MAX);
        assert_eq!(users.document_count, 1);
    }

    #[test]
    fn test_insert_rejects_duplicate_id_and_non_objects() {
        let mut pager = setup();
        let mut collections = CollectionService::new(&mut pager);
        let mut users = collections.add("users").unwrap();

        collections.insert_document(&mut users, json!({ "_id": "ann" })).unwrap();
        let result = collections.insert_document(&mut users, json!({ "_id": "ann" }));
        assert!(matches!(result, Err(EngineError::DuplicateKey { .. })));

        assert!(matches!(
            collections.insert_document(&mut users, json!([1, 2])),
            Err(EngineError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_update_keeps_indexes_consistent() {
        let mut pager = setup();
        let mut collections = CollectionService::new(&mut pager);
        let mut users = collections.add("users").unwrap();
        collections.ensure_index(&mut users, "city", false).unwrap();

        let id = collections
            .insert_document(&mut users, json!({ "name": "Ann", "city": "Oslo" }))
            .unwrap();

        // grows past one page, so the document moves
        let updated = json!({ "_id": id.to_value(), "city": "Rome", "bio": "z".repeat(9000) });
        assert!(collections.update_document(&mut users, updated.clone()).unwrap());

        let oslo = IndexQuery::Eq(IndexKey::from("Oslo"));
        let rome = IndexQuery::Eq(IndexKey::from("Rome"));
        assert!(collections.find_documents(&users, "city", &oslo).unwrap().is_empty());
        assert_eq!(
            collections.find_documents(&users, "city", &rome).unwrap(),
            vec![updated.clone()]
        );
        assert_eq!(collections.find_by_id(&users, &id).unwrap(), Some(updated));

        assert!(!collections.update_document(&mut users, json!({ "_id": 99 })).unwrap());
        assert!(matches!(
            collections.update_document(&mut users, json!({ "name": "no id" })),
            Err(EngineError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_delete_document() {
        let mut pager = setup();
        let mut collections = CollectionService::new(&mut pager);
        let mut users = collections.add("users").unwrap();
        collections.ensure_index(&mut users, "name", false).unwrap();

        let id = collections.insert_document(&mut users, json!({ "name": "Ann" })).unwrap();
        assert!(collections.delete_document(&mut users, &id).unwrap());
        assert!(!collections.delete_document(&mut users, &id).unwrap());

        assert!(collections.find_by_id(&users, &id).unwrap().is_none());
        let by_name = IndexQuery::Eq(IndexKey::from("Ann"));
        assert!(collections.find_documents(&users, "name", &by_name).unwrap().is_empty());
        assert_eq!(users.document_count, 0);
        assert_eq!(users.first_data_page, NO_PAGE);
    }

    #[test]
    fn test_ensure_index_backfills() {
        let mut pager = setup();
        let mut collections = CollectionService::new(&mut pager);
        let mut users = collections.add("users").unwrap();
        for age in [30, 20, 40] {
            collections.insert_document(&mut users, json!({ "age": age })).unwrap();
        }

        let adults = IndexQuery::Range {
            start: Bound::Included(IndexKey::Int(25)),
            end: Bound::Unbounded,
        };
        let ages = |documents: Vec<Value>| {
            documents
                .iter()
                .map(|d| d["age"].as_i64().unwrap())
                .collect::<Vec<_>>()
        };

        // no index yet: insertion order
        let scanned = collections.find_documents(&users, "age", &adults).unwrap();
        assert_eq!(ages(scanned), vec![30, 40]);

        assert!(collections.ensure_index(&mut users, "age", false).unwrap());
        assert!(!collections.ensure_index(&mut users, "age", false).unwrap());

        let indexed = collections.find_documents(&users, "age", &IndexQuery::All).unwrap();
        assert_eq!(ages(indexed), vec![20, 30, 40]);
    }

    #[test]
    fn test_unique_index_over_duplicates_fails() {
        let mut pager = setup();
        let mut collections = CollectionService::new(&mut pager);
        let mut users = collections.add("users").unwrap();
        collections.insert_document(&mut users, json!({ "email": "a" })).unwrap();
        collections.insert_document(&mut users, json!({ "email": "a" })).unwrap();

        assert!(matches!(
            collections.ensure_index(&mut users, "email", true),
            Err(EngineError::DuplicateKey { .. })
        ));
    }

    #[test]
    fn test_drop_index() {
        let mut pager = setup();
        let mut collections = CollectionService::new(&mut pager);
        let mut users = collections.add("users").unwrap();
        collections.ensure_index(&mut users, "name", false).unwrap();

        assert!(collections.drop_index(&mut users, "name").unwrap());
        assert!(!collections.drop_index(&mut users, "name").unwrap());
        assert!(matches!(
            collections.drop_index(&mut users, ID_FIELD),
            Err(EngineError::InvalidArgument(_))
        ));
    }
}
