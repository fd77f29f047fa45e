//! Durable keyed-collection store: one JSON document on disk, CRUD + query
//! over fixed collections, export/import for backup.
//!
//! Single logical writer: the whole document lives behind one RwLock and
//! every mutation is a read-modify-write followed by an atomic file replace
//! (write temp sibling, rename). A successful create/update/delete is
//! durably visible to the next read. Concurrent multi-writer use is out of
//! scope; callers in a concurrent setting serialize through this lock.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::domain::{
    Assignment, Immutable, Lesson, ProgressEvent, Record, SchoolClass, Settings, User,
};
use crate::error::StoreError;

/// Rewritten forward-only when a loaded document predates it.
pub const SCHEMA_VERSION: &str = "1.0.0";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Meta {
    pub schema_version: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_backup_at: Option<DateTime<Utc>>,
}

/// The single persisted root object.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreDocument {
    pub meta: Meta,
    #[serde(default)]
    pub users: Vec<Record<User>>,
    #[serde(default)]
    pub classes: Vec<Record<SchoolClass>>,
    #[serde(default)]
    pub lessons: Vec<Record<Lesson>>,
    #[serde(default)]
    pub assignments: Vec<Record<Assignment>>,
    #[serde(default)]
    pub progress_events: Vec<Record<ProgressEvent>>,
    #[serde(default)]
    pub settings: Settings,
}

impl StoreDocument {
    fn blank() -> Self {
        Self {
            meta: Meta {
                schema_version: SCHEMA_VERSION.into(),
                created_at: Utc::now(),
                last_backup_at: None,
            },
            users: Vec::new(),
            classes: Vec::new(),
            lessons: Vec::new(),
            assignments: Vec::new(),
            progress_events: Vec::new(),
            settings: Settings::default(),
        }
    }
}

/// The fixed set of collection names. The string form is the wire name used
/// by the generic data endpoints.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollectionKind {
    Users,
    Classes,
    Lessons,
    Assignments,
    ProgressEvents,
}

impl CollectionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CollectionKind::Users => "users",
            CollectionKind::Classes => "classes",
            CollectionKind::Lessons => "lessons",
            CollectionKind::Assignments => "assignments",
            CollectionKind::ProgressEvents => "progress_events",
        }
    }
}

impl FromStr for CollectionKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "users" => Ok(CollectionKind::Users),
            "classes" => Ok(CollectionKind::Classes),
            "lessons" => Ok(CollectionKind::Lessons),
            "assignments" => Ok(CollectionKind::Assignments),
            "progress_events" => Ok(CollectionKind::ProgressEvents),
            other => Err(StoreError::UnknownCollection(other.to_string())),
        }
    }
}

/// A persistable entity type, tied to its collection slot in the document
/// and to its typed partial-update shape.
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: CollectionKind;
    type Patch: Send;

    fn apply_patch(&mut self, patch: Self::Patch);
    fn slot(doc: &StoreDocument) -> &Vec<Record<Self>>;
    fn slot_mut(doc: &mut StoreDocument) -> &mut Vec<Record<Self>>;
}

impl Entity for User {
    const KIND: CollectionKind = CollectionKind::Users;
    type Patch = crate::domain::UserPatch;

    fn apply_patch(&mut self, patch: Self::Patch) {
        self.apply(patch);
    }
    fn slot(doc: &StoreDocument) -> &Vec<Record<Self>> {
        &doc.users
    }
    fn slot_mut(doc: &mut StoreDocument) -> &mut Vec<Record<Self>> {
        &mut doc.users
    }
}

impl Entity for SchoolClass {
    const KIND: CollectionKind = CollectionKind::Classes;
    type Patch = crate::domain::ClassPatch;

    fn apply_patch(&mut self, patch: Self::Patch) {
        self.apply(patch);
    }
    fn slot(doc: &StoreDocument) -> &Vec<Record<Self>> {
        &doc.classes
    }
    fn slot_mut(doc: &mut StoreDocument) -> &mut Vec<Record<Self>> {
        &mut doc.classes
    }
}

impl Entity for Lesson {
    const KIND: CollectionKind = CollectionKind::Lessons;
    type Patch = crate::domain::LessonPatch;

    fn apply_patch(&mut self, patch: Self::Patch) {
        self.apply(patch);
    }
    fn slot(doc: &StoreDocument) -> &Vec<Record<Self>> {
        &doc.lessons
    }
    fn slot_mut(doc: &mut StoreDocument) -> &mut Vec<Record<Self>> {
        &mut doc.lessons
    }
}

impl Entity for Assignment {
    const KIND: CollectionKind = CollectionKind::Assignments;
    type Patch = crate::domain::AssignmentPatch;

    fn apply_patch(&mut self, patch: Self::Patch) {
        self.apply(patch);
    }
    fn slot(doc: &StoreDocument) -> &Vec<Record<Self>> {
        &doc.assignments
    }
    fn slot_mut(doc: &mut StoreDocument) -> &mut Vec<Record<Self>> {
        &mut doc.assignments
    }
}

impl Entity for ProgressEvent {
    const KIND: CollectionKind = CollectionKind::ProgressEvents;
    // Append-only: the patch type is uninhabited, so update() is uncallable.
    type Patch = Immutable;

    fn apply_patch(&mut self, patch: Self::Patch) {
        match patch {}
    }
    fn slot(doc: &StoreDocument) -> &Vec<Record<Self>> {
        &doc.progress_events
    }
    fn slot_mut(doc: &mut StoreDocument) -> &mut Vec<Record<Self>> {
        &mut doc.progress_events
    }
}

/// One filter entry: a scalar the field must equal, or a set the field must
/// be a member of. Untagged, so `{"kind": "student"}` and
/// `{"kind": ["student", "teacher"]}` both deserialize naturally.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum FieldFilter {
    AnyOf(Vec<Value>),
    Eq(Value),
}

pub type FieldFilters = BTreeMap<String, FieldFilter>;

fn record_matches(record: &Value, filters: &FieldFilters) -> bool {
    filters.iter().all(|(key, filter)| {
        let field = record.get(key).unwrap_or(&Value::Null);
        match filter {
            FieldFilter::Eq(expected) => field == expected,
            FieldFilter::AnyOf(set) => set.contains(field),
        }
    })
}

pub struct Store {
    path: PathBuf,
    doc: RwLock<StoreDocument>,
}

impl Store {
    /// Open the store at `path`, creating a blank document if the file does
    /// not exist yet. Loaded documents are migrated forward (meta/schema
    /// version filled in if absent) and re-persisted when that happens.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            let doc = StoreDocument::blank();
            persist(&path, &doc)?;
            info!(target: "store", "Initialized blank store document");
            return Ok(Self { path, doc: RwLock::new(doc) });
        }

        let contents = fs::read_to_string(&path)?;
        let mut raw: Value = serde_json::from_str(&contents)?;
        let migrated = migrate(&mut raw);
        let doc: StoreDocument = serde_json::from_value(raw)
            .map_err(|e| StoreError::InvalidDocumentFormat(e.to_string()))?;
        if migrated {
            persist(&path, &doc)?;
            info!(target: "store", schema_version = SCHEMA_VERSION, "Migrated store document");
        }
        info!(
            target: "store",
            users = doc.users.len(),
            lessons = doc.lessons.len(),
            progress_events = doc.progress_events.len(),
            "Store document loaded"
        );
        Ok(Self { path, doc: RwLock::new(doc) })
    }

    /// Append a new record: fresh id, both timestamps stamped to now,
    /// persisted before returning.
    pub async fn create<T: Entity>(&self, fields: T) -> Result<Record<T>, StoreError> {
        let now = Utc::now();
        let record = Record {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            fields,
        };
        let mut doc = self.doc.write().await;
        T::slot_mut(&mut doc).push(record.clone());
        persist(&self.path, &doc)?;
        debug!(target: "store", collection = T::KIND.as_str(), id = %record.id, "Record created");
        Ok(record)
    }

    /// Single record by id, or None.
    pub async fn get<T: Entity>(&self, id: &str) -> Option<Record<T>> {
        let doc = self.doc.read().await;
        T::slot(&doc).iter().find(|r| r.id == id).cloned()
    }

    /// Snapshot copy of the full collection, in insertion order.
    pub async fn list<T: Entity>(&self) -> Vec<Record<T>> {
        let doc = self.doc.read().await;
        T::slot(&doc).clone()
    }

    /// Records matching a typed predicate.
    pub async fn find<T, F>(&self, pred: F) -> Vec<Record<T>>
    where
        T: Entity,
        F: Fn(&Record<T>) -> bool,
    {
        let doc = self.doc.read().await;
        T::slot(&doc).iter().filter(|r| pred(r)).cloned().collect()
    }

    /// Records where every filter key matches (scalar equality or set
    /// membership). An empty filter map returns the full collection.
    pub async fn matching<T: Entity>(
        &self,
        filters: &FieldFilters,
    ) -> Result<Vec<Record<T>>, StoreError> {
        let doc = self.doc.read().await;
        let mut out = Vec::new();
        for record in T::slot(&doc) {
            let value = serde_json::to_value(record)?;
            if record_matches(&value, filters) {
                out.push(record.clone());
            }
        }
        Ok(out)
    }

    /// Merge a typed patch into the record, refresh `updated_at`, persist.
    /// Returns None without error when the id is absent.
    pub async fn update<T: Entity>(
        &self,
        id: &str,
        patch: T::Patch,
    ) -> Result<Option<Record<T>>, StoreError> {
        let mut doc = self.doc.write().await;
        let Some(record) = T::slot_mut(&mut doc).iter_mut().find(|r| r.id == id) else {
            return Ok(None);
        };
        record.fields.apply_patch(patch);
        record.updated_at = Utc::now();
        let updated = record.clone();
        persist(&self.path, &doc)?;
        debug!(target: "store", collection = T::KIND.as_str(), id, "Record updated");
        Ok(Some(updated))
    }

    /// Hard delete. Returns whether the id was present.
    pub async fn remove<T: Entity>(&self, id: &str) -> Result<bool, StoreError> {
        let mut doc = self.doc.write().await;
        let slot = T::slot_mut(&mut doc);
        let before = slot.len();
        slot.retain(|r| r.id != id);
        let removed = slot.len() < before;
        if removed {
            persist(&self.path, &doc)?;
            debug!(target: "store", collection = T::KIND.as_str(), id, "Record deleted");
        }
        Ok(removed)
    }

    /// Raw JSON view of a collection addressed by wire name.
    pub async fn collection_values(&self, kind: CollectionKind) -> Result<Vec<Value>, StoreError> {
        self.query_values(kind, &FieldFilters::new()).await
    }

    /// Filter query over a collection addressed by wire name.
    pub async fn query_values(
        &self,
        kind: CollectionKind,
        filters: &FieldFilters,
    ) -> Result<Vec<Value>, StoreError> {
        let doc = self.doc.read().await;
        let raw = match kind {
            CollectionKind::Users => serde_json::to_value(&doc.users)?,
            CollectionKind::Classes => serde_json::to_value(&doc.classes)?,
            CollectionKind::Lessons => serde_json::to_value(&doc.lessons)?,
            CollectionKind::Assignments => serde_json::to_value(&doc.assignments)?,
            CollectionKind::ProgressEvents => serde_json::to_value(&doc.progress_events)?,
        };
        let Value::Array(items) = raw else {
            return Err(StoreError::InvalidDocumentFormat("collection is not an array".into()));
        };
        Ok(items.into_iter().filter(|v| record_matches(v, filters)).collect())
    }

    pub async fn settings(&self) -> Settings {
        self.doc.read().await.settings.clone()
    }

    /// Mutate settings in place and persist.
    pub async fn update_settings<F>(&self, mutate: F) -> Result<Settings, StoreError>
    where
        F: FnOnce(&mut Settings),
    {
        let mut doc = self.doc.write().await;
        mutate(&mut doc.settings);
        persist(&self.path, &doc)?;
        Ok(doc.settings.clone())
    }

    /// Deep snapshot of the whole document for backup. Stamps
    /// `meta.last_backup_at` (persisted) before returning the copy.
    pub async fn export(&self) -> Result<StoreDocument, StoreError> {
        let mut doc = self.doc.write().await;
        doc.meta.last_backup_at = Some(Utc::now());
        persist(&self.path, &doc)?;
        info!(target: "store", "Document exported for backup");
        Ok(doc.clone())
    }

    /// Replace the whole document from a backup. The value must be a JSON
    /// object with `meta`; missing collections default to empty. Exclusive:
    /// holds the write lock for the whole swap.
    pub async fn import(&self, raw: Value) -> Result<(), StoreError> {
        if !raw.is_object() {
            return Err(StoreError::InvalidDocumentFormat("backup is not a JSON object".into()));
        }
        if raw.get("meta").map(|m| m.is_object()) != Some(true) {
            return Err(StoreError::InvalidDocumentFormat("backup is missing meta".into()));
        }
        let incoming: StoreDocument = serde_json::from_value(raw)
            .map_err(|e| StoreError::InvalidDocumentFormat(e.to_string()))?;

        let mut doc = self.doc.write().await;
        *doc = incoming;
        persist(&self.path, &doc)?;
        info!(
            target: "store",
            users = doc.users.len(),
            lessons = doc.lessons.len(),
            "Document restored from backup"
        );
        Ok(())
    }
}

/// Atomic replace: serialize next to the target, then rename over it. A
/// crash mid-write leaves the previous document intact.
fn persist(path: &Path, doc: &StoreDocument) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(doc)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Forward-only migration of a raw loaded document: fill in `meta` and
/// `schema_version` when absent. Returns whether anything changed.
fn migrate(raw: &mut Value) -> bool {
    let Some(obj) = raw.as_object_mut() else {
        return false;
    };
    let meta_ok = obj.get("meta").map(|m| m.is_object()) == Some(true);
    if !meta_ok {
        obj.insert(
            "meta".into(),
            serde_json::json!({
                "schema_version": SCHEMA_VERSION,
                "created_at": Utc::now(),
                "last_backup_at": null,
            }),
        );
        return true;
    }
    if let Some(meta) = obj.get_mut("meta").and_then(|m| m.as_object_mut()) {
        return match meta.get("schema_version") {
            Some(Value::String(s)) if !s.is_empty() => false,
            _ => {
                meta.insert("schema_version".into(), Value::String(SCHEMA_VERSION.into()));
                true
            }
        };
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Difficulty, ExamTarget, LessonPatch, LessonStatus};
    use std::collections::BTreeSet;

    fn lesson(title: &str) -> Lesson {
        Lesson {
            title: title.into(),
            category: "grammar".into(),
            exam_target: ExamTarget::Enem,
            difficulty: Difficulty::Medium,
            base_points: 10,
            estimated_time_minutes: 15,
            created_by_teacher_id: None,
            prerequisites: BTreeSet::new(),
            status: LessonStatus::Active,
        }
    }

    fn temp_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::open(dir.path().join("edudash_data.json")).expect("open");
        (dir, store)
    }

    #[tokio::test]
    async fn create_then_read_round_trips_fields_and_stamps() {
        let (_dir, store) = temp_store();
        let created = store.create(lesson("Past Simple")).await.unwrap();
        assert!(!created.id.is_empty());

        let read = store.get::<Lesson>(&created.id).await.expect("present");
        assert_eq!(read.fields.title, "Past Simple");
        assert_eq!(read.fields.base_points, 10);
        assert_eq!(read.created_at, created.created_at);
        assert_eq!(read.updated_at, created.updated_at);
    }

    #[tokio::test]
    async fn update_missing_id_is_a_no_op() {
        let (_dir, store) = temp_store();
        store.create(lesson("A")).await.unwrap();

        let out = store
            .update::<Lesson>("no-such-id", LessonPatch { title: Some("B".into()), ..Default::default() })
            .await
            .unwrap();
        assert!(out.is_none());

        let all = store.list::<Lesson>().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].fields.title, "A");
    }

    #[tokio::test]
    async fn update_merges_patch_and_refreshes_updated_at() {
        let (_dir, store) = temp_store();
        let created = store.create(lesson("Old")).await.unwrap();

        let updated = store
            .update::<Lesson>(&created.id, LessonPatch { title: Some("New".into()), ..Default::default() })
            .await
            .unwrap()
            .expect("found");
        assert_eq!(updated.fields.title, "New");
        assert_eq!(updated.fields.category, "grammar");
        assert!(updated.updated_at >= created.updated_at);
        assert_eq!(updated.created_at, created.created_at);
    }

    #[tokio::test]
    async fn delete_reports_presence() {
        let (_dir, store) = temp_store();
        let created = store.create(lesson("X")).await.unwrap();
        assert!(store.remove::<Lesson>(&created.id).await.unwrap());
        assert!(!store.remove::<Lesson>(&created.id).await.unwrap());
        assert!(store.get::<Lesson>(&created.id).await.is_none());
    }

    #[tokio::test]
    async fn changes_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("edudash_data.json");
        let id = {
            let store = Store::open(&path).expect("open");
            store.create(lesson("Durable")).await.unwrap().id
        };
        let reopened = Store::open(&path).expect("reopen");
        let read = reopened.get::<Lesson>(&id).await.expect("persisted");
        assert_eq!(read.fields.title, "Durable");
    }

    #[tokio::test]
    async fn query_filters_by_scalar_and_set() {
        let (_dir, store) = temp_store();
        store.create(lesson("A")).await.unwrap();
        let mut hard = lesson("B");
        hard.difficulty = Difficulty::Hard;
        store.create(hard).await.unwrap();

        let mut filters = FieldFilters::new();
        filters.insert("difficulty".into(), FieldFilter::Eq("hard".into()));
        let hards = store.matching::<Lesson>(&filters).await.unwrap();
        assert_eq!(hards.len(), 1);
        assert_eq!(hards[0].fields.title, "B");

        let mut filters = FieldFilters::new();
        filters.insert(
            "difficulty".into(),
            FieldFilter::AnyOf(vec!["easy".into(), "medium".into()]),
        );
        let others = store.matching::<Lesson>(&filters).await.unwrap();
        assert_eq!(others.len(), 1);
        assert_eq!(others[0].fields.title, "A");

        // Empty mapping returns everything.
        let all = store.matching::<Lesson>(&FieldFilters::new()).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn export_import_round_trip_preserves_everything_but_backup_stamp() {
        let (_dir, store) = temp_store();
        store.create(lesson("Kept")).await.unwrap();

        let exported = store.export().await.unwrap();
        let (_dir2, other) = temp_store();
        other
            .import(serde_json::to_value(&exported).unwrap())
            .await
            .unwrap();

        let reimported = other.export().await.unwrap();
        assert_eq!(reimported.lessons.len(), 1);
        assert_eq!(reimported.lessons[0].fields.title, "Kept");
        assert_eq!(reimported.meta.schema_version, exported.meta.schema_version);
        assert_eq!(reimported.meta.created_at, exported.meta.created_at);
        // last_backup_at differs by design: export stamps it.
        let a = serde_json::to_value(&exported.lessons).unwrap();
        let b = serde_json::to_value(&reimported.lessons).unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn import_rejects_malformed_documents() {
        let (_dir, store) = temp_store();
        let err = store.import(serde_json::json!([1, 2, 3])).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidDocumentFormat(_)));

        let err = store
            .import(serde_json::json!({ "users": [] }))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidDocumentFormat(_)));
    }

    #[tokio::test]
    async fn import_defaults_missing_collections_to_empty() {
        let (_dir, store) = temp_store();
        store
            .import(serde_json::json!({
                "meta": {
                    "schema_version": "1.0.0",
                    "created_at": "2026-01-01T00:00:00Z",
                    "last_backup_at": null
                }
            }))
            .await
            .unwrap();
        assert!(store.list::<Lesson>().await.is_empty());
        assert!(store.list::<User>().await.is_empty());
    }

    #[test]
    fn unknown_collection_name_is_an_error() {
        let err = "homework".parse::<CollectionKind>().unwrap_err();
        assert!(matches!(err, StoreError::UnknownCollection(name) if name == "homework"));
        assert_eq!("progress_events".parse::<CollectionKind>().unwrap(), CollectionKind::ProgressEvents);
    }

    #[test]
    fn legacy_document_without_meta_is_migrated_forward() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("edudash_data.json");
        std::fs::write(&path, r#"{"users": [], "lessons": []}"#).unwrap();

        let store = Store::open(&path).expect("open migrates");
        drop(store);
        let reloaded: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(reloaded["meta"]["schema_version"], SCHEMA_VERSION);
    }
}
