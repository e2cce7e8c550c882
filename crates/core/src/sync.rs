//! Annotation synchronizer
//!
//! Keeps the per-page annotation cache consistent with the two stores that
//! can own an annotation. Each origin is one [`OriginStore`]; the
//! synchronizer picks the store from the annotation's origin and only touches
//! the in-memory cache once that store reports success.
//!
//! The cache is filled once in [`AnnotationSynchronizer::open`] and is only
//! mutated incrementally afterwards.

use crate::annotation::{Annotation, AnnotationKind, HighlightColor, Origin};
use crate::embedded::{EmbeddedDocument, NativeAnnotation};
use crate::error::StoreError;
use crate::store::AnnotationStore;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{debug, warn};

/// Result of a store mutation that succeeded
///
/// `save_warning` is set when an embedded change was applied but writing the
/// document back to disk failed. The in-memory change is kept.
#[derive(Debug, Default)]
pub struct WriteOutcome {
    pub save_warning: Option<StoreError>,
}

impl WriteOutcome {
    fn saved() -> Self {
        Self::default()
    }
}

/// Mutations one backing store knows how to apply
pub trait OriginStore {
    fn origin(&self) -> Origin;

    fn add(&mut self, file: &Path, annotation: &Annotation) -> Result<WriteOutcome, StoreError>;

    fn remove(&mut self, file: &Path, annotation: &Annotation)
        -> Result<WriteOutcome, StoreError>;

    /// `annotation` already carries the new color
    fn update_color(
        &mut self,
        file: &Path,
        annotation: &Annotation,
    ) -> Result<WriteOutcome, StoreError>;

    /// `annotation` already carries the new content
    fn update_note(&mut self, file: &Path, annotation: &Annotation)
        -> Result<WriteOutcome, StoreError>;
}

/// Annotations kept in the external database
pub struct DatabaseOrigin {
    store: Rc<dyn AnnotationStore>,
}

impl DatabaseOrigin {
    pub fn new(store: Rc<dyn AnnotationStore>) -> Self {
        Self { store }
    }

    fn load(&self, file: &Path) -> Result<Vec<Annotation>, StoreError> {
        self.store.list(file)
    }
}

impl OriginStore for DatabaseOrigin {
    fn origin(&self) -> Origin {
        Origin::Database
    }

    fn add(&mut self, file: &Path, annotation: &Annotation) -> Result<WriteOutcome, StoreError> {
        self.store.add(file, annotation)?;
        Ok(WriteOutcome::saved())
    }

    fn remove(&mut self, file: &Path, annotation: &Annotation) -> Result<WriteOutcome, StoreError> {
        if !self.store.remove(file, annotation.id())? {
            debug!(id = annotation.id(), "annotation missing from store");
            return Err(StoreError::NotFound(annotation.id().to_string()));
        }
        Ok(WriteOutcome::saved())
    }

    fn update_color(
        &mut self,
        file: &Path,
        annotation: &Annotation,
    ) -> Result<WriteOutcome, StoreError> {
        self.store.update(file, annotation)?;
        Ok(WriteOutcome::saved())
    }

    fn update_note(&mut self, file: &Path, annotation: &Annotation) -> Result<WriteOutcome, StoreError> {
        self.store.update(file, annotation)?;
        Ok(WriteOutcome::saved())
    }
}

/// Annotations embedded in the open document
///
/// Objects are addressed by geometry. Adds and color changes only mark the
/// document dirty; deletes and note edits save immediately.
pub struct EmbeddedOrigin {
    document: Box<dyn EmbeddedDocument>,
    dirty: bool,
}

impl EmbeddedOrigin {
    pub fn new(document: Box<dyn EmbeddedDocument>) -> Self {
        Self {
            document,
            dirty: false,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn save(&mut self, file: &Path) -> Result<(), StoreError> {
        self.document.save_as(file)?;
        self.dirty = false;
        Ok(())
    }

    fn save_or_warn(&mut self, file: &Path) -> WriteOutcome {
        match self.save(file) {
            Ok(()) => WriteOutcome::saved(),
            Err(err) => {
                warn!(path = %file.display(), error = %err, "embedded change not saved");
                self.dirty = true;
                WriteOutcome {
                    save_warning: Some(err),
                }
            }
        }
    }

    fn load(&self, page_count: usize) -> (Vec<Annotation>, Vec<StoreError>) {
        let mut loaded = Vec::new();
        let mut errors = Vec::new();
        for page in 0..page_count {
            match self.document.list_highlights(page) {
                Ok(highlights) => loaded.extend(highlights.into_iter().map(|h| {
                    Annotation::highlight(page, h.rects, h.text, Origin::Embedded)
                        .with_color(h.color)
                })),
                Err(err) => errors.push(err),
            }
            match self.document.list_notes(page) {
                Ok(notes) => loaded.extend(notes.into_iter().map(|note| {
                    Annotation::note(page, note.anchor, note.content, Origin::Embedded)
                })),
                Err(err) => errors.push(err),
            }
        }
        (loaded, errors)
    }
}

impl OriginStore for EmbeddedOrigin {
    fn origin(&self) -> Origin {
        Origin::Embedded
    }

    fn add(&mut self, _file: &Path, annotation: &Annotation) -> Result<WriteOutcome, StoreError> {
        let native = match annotation.kind() {
            AnnotationKind::Highlight { rects, .. } => {
                NativeAnnotation::Highlight {
                    rects: rects.clone(),
                    color: annotation.color(),
                }
            }
            AnnotationKind::Note { anchor, content } => NativeAnnotation::Note {
                anchor: *anchor,
                content: content.clone().unwrap_or_default(),
            },
        };
        self.document.add_annotation(annotation.page(), &native)?;
        self.dirty = true;
        Ok(WriteOutcome::saved())
    }

    fn remove(&mut self, file: &Path, annotation: &Annotation) -> Result<WriteOutcome, StoreError> {
        self.document
            .delete_annotation(annotation.page(), &annotation.locator())?;
        Ok(self.save_or_warn(file))
    }

    fn update_color(
        &mut self,
        _file: &Path,
        annotation: &Annotation,
    ) -> Result<WriteOutcome, StoreError> {
        self.document
            .set_color(annotation.page(), &annotation.locator(), annotation.color())?;
        self.dirty = true;
        Ok(WriteOutcome::saved())
    }

    fn update_note(&mut self, file: &Path, annotation: &Annotation) -> Result<WriteOutcome, StoreError> {
        let AnnotationKind::Note { anchor, content } = annotation.kind() else {
            return Err(StoreError::NotANote(annotation.id().to_string()));
        };
        self.document.update_note_content(
            annotation.page(),
            anchor.x,
            anchor.y,
            content.as_deref().unwrap_or_default(),
        )?;
        Ok(self.save_or_warn(file))
    }
}

/// Per-document annotation cache backed by both origins
pub struct AnnotationSynchronizer {
    file: PathBuf,
    pages: Vec<Vec<Annotation>>,
    database: DatabaseOrigin,
    embedded: EmbeddedOrigin,
    redraw: BTreeSet<usize>,
}

impl AnnotationSynchronizer {
    /// Populate the cache from both stores
    ///
    /// Load failures of either store are returned alongside the
    /// synchronizer so the caller can report them; the cache then holds
    /// whatever could be read.
    pub fn open(
        file: impl Into<PathBuf>,
        page_count: usize,
        store: Rc<dyn AnnotationStore>,
        embedded: Box<dyn EmbeddedDocument>,
    ) -> (Self, Vec<StoreError>) {
        let mut sync = Self {
            file: file.into(),
            pages: vec![Vec::new(); page_count],
            database: DatabaseOrigin::new(store),
            embedded: EmbeddedOrigin::new(embedded),
            redraw: BTreeSet::new(),
        };

        let mut errors = Vec::new();
        let mut loaded = match sync.database.load(&sync.file) {
            Ok(annotations) => annotations,
            Err(err) => {
                errors.push(err);
                Vec::new()
            }
        };
        let (embedded, embedded_errors) = sync.embedded.load(page_count);
        loaded.extend(embedded);
        errors.extend(embedded_errors);

        for annotation in loaded {
            let page = annotation.page();
            match sync.pages.get_mut(page) {
                Some(slot) => slot.push(annotation),
                None => errors.push(StoreError::PageOutOfRange { page, page_count }),
            }
        }
        for slot in &mut sync.pages {
            slot.sort_by_key(Annotation::created_at);
        }

        debug!(
            path = %sync.file.display(),
            count = sync.len(),
            "annotations loaded"
        );
        (sync, errors)
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn len(&self) -> usize {
        self.pages.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.iter().all(Vec::is_empty)
    }

    fn store_for(&mut self, origin: Origin) -> &mut dyn OriginStore {
        match origin {
            Origin::Database => &mut self.database,
            Origin::Embedded => &mut self.embedded,
        }
    }

    pub fn add(&mut self, annotation: Annotation) -> Result<(), StoreError> {
        let page = annotation.page();
        if page >= self.pages.len() {
            return Err(StoreError::PageOutOfRange {
                page,
                page_count: self.pages.len(),
            });
        }
        let file = self.file.clone();
        self.store_for(annotation.origin()).add(&file, &annotation)?;
        debug!(id = annotation.id(), page, origin = ?annotation.origin(), "annotation added");
        self.pages[page].push(annotation);
        self.redraw.insert(page);
        Ok(())
    }

    /// Delete from the origin store, then from the cache
    ///
    /// A store failure leaves the cache untouched.
    pub fn remove(&mut self, id: &str, origin: Origin) -> Result<WriteOutcome, StoreError> {
        let annotation = self
            .get(id)
            .filter(|annotation| annotation.origin() == origin)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let file = self.file.clone();
        let outcome = self.store_for(origin).remove(&file, &annotation)?;

        for (page, slot) in self.pages.iter_mut().enumerate() {
            let before = slot.len();
            slot.retain(|cached| cached.id() != id);
            if slot.len() != before {
                self.redraw.insert(page);
            }
        }
        debug!(id, ?origin, "annotation removed");
        Ok(outcome)
    }

    /// Advance the color to `(old + 1) mod 4` and return it
    pub fn update_color(&mut self, id: &str) -> Result<HighlightColor, StoreError> {
        let mut updated = self
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let color = updated.color().next();
        updated.set_color(color);

        let file = self.file.clone();
        self.store_for(updated.origin())
            .update_color(&file, &updated)?;

        self.update_copies(id, |cached| cached.set_color(color));
        Ok(color)
    }

    pub fn update_note(
        &mut self,
        id: &str,
        content: Option<String>,
    ) -> Result<WriteOutcome, StoreError> {
        let mut updated = self
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if !updated.set_note_content(content.clone()) {
            return Err(StoreError::NotANote(id.to_string()));
        }

        let file = self.file.clone();
        let outcome = self
            .store_for(updated.origin())
            .update_note(&file, &updated)?;

        self.update_copies(id, |cached| {
            cached.set_note_content(content.clone());
        });
        Ok(outcome)
    }

    fn update_copies(&mut self, id: &str, mut apply: impl FnMut(&mut Annotation)) {
        for (page, slot) in self.pages.iter_mut().enumerate() {
            for cached in slot.iter_mut().filter(|cached| cached.id() == id) {
                apply(cached);
                self.redraw.insert(page);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&Annotation> {
        self.pages.iter().flatten().find(|cached| cached.id() == id)
    }

    pub fn list_for_page(&self, page: usize) -> &[Annotation] {
        self.pages.get(page).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every cached annotation ordered by page, then creation time
    pub fn list_all(&self) -> Vec<&Annotation> {
        let mut all: Vec<&Annotation> = self.pages.iter().flatten().collect();
        all.sort_by_key(|annotation| (annotation.page(), annotation.created_at()));
        all
    }

    /// Pages whose annotations changed since the last call
    pub fn take_redraw(&mut self) -> Vec<usize> {
        std::mem::take(&mut self.redraw).into_iter().collect()
    }

    /// True while embedded changes have not reached disk
    pub fn is_dirty(&self) -> bool {
        self.embedded.is_dirty()
    }

    pub fn save_embedded(&mut self) -> Result<(), StoreError> {
        let file = self.file.clone();
        self.embedded.save(&file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedded::{EmbeddedHighlight, EmbeddedNote};
    use crate::geometry::{Point, Rect};
    use crate::store::JsonAnnotationStore;
    use crate::testing::{EmbeddedCall, FakeEmbedded, MemoryStore};
    use tempfile::TempDir;

    const FILE: &str = "/docs/paper.pdf";

    fn open_with(
        store: Rc<dyn AnnotationStore>,
        embedded: FakeEmbedded,
    ) -> AnnotationSynchronizer {
        let (sync, errors) = AnnotationSynchronizer::open(FILE, 5, store, Box::new(embedded));
        assert!(errors.is_empty(), "unexpected load errors: {errors:?}");
        sync
    }

    fn db_highlight(page: usize) -> Annotation {
        Annotation::highlight(
            page,
            vec![Rect::new(0.0, 0.0, 10.0, 10.0)],
            Some("text".into()),
            Origin::Database,
        )
    }

    #[test]
    fn test_open_unions_both_stores() {
        let store = Rc::new(MemoryStore::default());
        store.add(Path::new(FILE), &db_highlight(1)).unwrap();
        let embedded = FakeEmbedded::default();
        embedded.with_state(|state| {
            state.notes.insert(
                1,
                vec![EmbeddedNote {
                    anchor: Point::new(5.0, 5.0),
                    content: Some("embedded".into()),
                }],
            );
            state.highlights.insert(
                3,
                vec![EmbeddedHighlight {
                    rects: vec![Rect::new(1.0, 1.0, 2.0, 2.0)],
                    text: None,
                    color: HighlightColor::Blue,
                }],
            );
        });

        let sync = open_with(store, embedded);
        assert_eq!(sync.len(), 3);
        assert_eq!(sync.list_for_page(1).len(), 2);
        let embedded_highlight = &sync.list_for_page(3)[0];
        assert_eq!(embedded_highlight.origin(), Origin::Embedded);
        assert_eq!(embedded_highlight.color(), HighlightColor::Blue);
    }

    #[test]
    fn test_load_errors_are_reported_not_fatal() {
        let store = Rc::new(MemoryStore::default());
        store.add(Path::new(FILE), &db_highlight(9)).unwrap();
        let (sync, errors) = AnnotationSynchronizer::open(
            FILE,
            5,
            store,
            Box::new(FakeEmbedded::default()),
        );
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors[0],
            StoreError::PageOutOfRange { page: 9, .. }
        ));
        assert!(sync.is_empty());
    }

    #[test]
    fn test_add_then_remove_database_annotation() {
        let store = Rc::new(MemoryStore::default());
        let mut sync = open_with(store.clone(), FakeEmbedded::default());
        let annotation = db_highlight(2);
        let id = annotation.id().to_string();

        sync.add(annotation).unwrap();
        assert_eq!(sync.list_for_page(2).len(), 1);
        assert_eq!(sync.take_redraw(), vec![2]);

        sync.remove(&id, Origin::Database).unwrap();
        assert!(sync.list_for_page(2).is_empty());
        assert!(store.list(Path::new(FILE)).unwrap().is_empty());
        assert_eq!(sync.take_redraw(), vec![2]);
    }

    #[test]
    fn test_database_annotations_survive_restart() {
        let dir = TempDir::new().unwrap();
        let store: Rc<dyn AnnotationStore> = Rc::new(JsonAnnotationStore::new(dir.path()));
        let mut sync = open_with(store, FakeEmbedded::default());
        let kept = db_highlight(0);
        let dropped = db_highlight(1);
        let (kept_id, dropped_id) = (kept.id().to_string(), dropped.id().to_string());
        sync.add(kept).unwrap();
        sync.add(dropped).unwrap();
        sync.remove(&dropped_id, Origin::Database).unwrap();
        drop(sync);

        let store: Rc<dyn AnnotationStore> = Rc::new(JsonAnnotationStore::new(dir.path()));
        let reopened = open_with(store, FakeEmbedded::default());
        assert_eq!(reopened.list_for_page(0)[0].id(), kept_id);
        assert!(reopened.list_for_page(1).is_empty());
    }

    #[test]
    fn test_store_failure_leaves_cache_unchanged() {
        let store = Rc::new(MemoryStore::default());
        let mut sync = open_with(store.clone(), FakeEmbedded::default());
        let annotation = db_highlight(0);
        let id = annotation.id().to_string();
        sync.add(annotation).unwrap();

        store.set_failing(true);
        assert!(sync.remove(&id, Origin::Database).is_err());
        assert_eq!(sync.list_for_page(0).len(), 1);

        assert!(sync.add(db_highlight(1)).is_err());
        assert!(sync.list_for_page(1).is_empty());

        assert!(sync.update_color(&id).is_err());
        assert_eq!(sync.get(&id).unwrap().color(), HighlightColor::Yellow);
    }

    #[test]
    fn test_remove_with_wrong_origin_is_not_found() {
        let mut sync = open_with(Rc::new(MemoryStore::default()), FakeEmbedded::default());
        let annotation = db_highlight(0);
        let id = annotation.id().to_string();
        sync.add(annotation).unwrap();
        assert!(matches!(
            sync.remove(&id, Origin::Embedded),
            Err(StoreError::NotFound(_))
        ));
        assert_eq!(sync.len(), 1);
    }

    #[test]
    fn test_remove_of_id_missing_from_store_keeps_cache() {
        let store = Rc::new(MemoryStore::default());
        let mut sync = open_with(store.clone(), FakeEmbedded::default());
        let annotation = db_highlight(2);
        let id = annotation.id().to_string();
        sync.add(annotation).unwrap();

        // Dropped behind the synchronizer's back
        assert!(store.remove(Path::new(FILE), &id).unwrap());

        assert!(matches!(
            sync.remove(&id, Origin::Database),
            Err(StoreError::NotFound(missing)) if missing == id
        ));
        assert_eq!(sync.list_for_page(2).len(), 1);
    }

    #[test]
    fn test_color_cycle_returns_to_start() {
        let store = Rc::new(MemoryStore::default());
        let mut sync = open_with(store.clone(), FakeEmbedded::default());
        let annotation = db_highlight(0).with_color(HighlightColor::from_index(3));
        let id = annotation.id().to_string();
        sync.add(annotation).unwrap();

        let colors: Vec<u8> = (0..4)
            .map(|_| sync.update_color(&id).unwrap().index())
            .collect();
        assert_eq!(colors, vec![0, 1, 2, 3]);
        assert_eq!(
            store.list(Path::new(FILE)).unwrap()[0].color(),
            HighlightColor::Red
        );
    }

    #[test]
    fn test_embedded_note_delete_uses_unit_box_and_saves() {
        let embedded = FakeEmbedded::default();
        let log = embedded.clone();
        let mut sync = open_with(Rc::new(MemoryStore::default()), embedded);
        let note = Annotation::note(1, Point::new(100.0, 200.0), None, Origin::Embedded);
        let id = note.id().to_string();
        sync.add(note).unwrap();
        assert!(sync.is_dirty());

        let outcome = sync.remove(&id, Origin::Embedded).unwrap();
        assert!(outcome.save_warning.is_none());
        assert!(!sync.is_dirty());
        assert!(sync.list_for_page(1).is_empty());

        let calls = log.calls();
        let geometry = calls
            .iter()
            .find_map(|call| match call {
                EmbeddedCall::Delete { page: 1, geometry } => Some(*geometry),
                _ => None,
            })
            .expect("delete issued");
        assert!(geometry.width() >= 1.0 && geometry.height() >= 1.0);
        assert!(geometry.contains(Point::new(100.0, 200.0)));
        assert!(calls.contains(&EmbeddedCall::Save(PathBuf::from(FILE))));
    }

    #[test]
    fn test_embedded_delete_save_failure_keeps_deletion() {
        let embedded = FakeEmbedded::default();
        let handle = embedded.clone();
        let mut sync = open_with(Rc::new(MemoryStore::default()), embedded);
        let highlight = Annotation::highlight(
            0,
            vec![Rect::new(1.0, 1.0, 4.0, 2.0)],
            None,
            Origin::Embedded,
        );
        let id = highlight.id().to_string();
        sync.add(highlight).unwrap();

        handle.with_state(|state| state.fail_save = true);
        let outcome = sync.remove(&id, Origin::Embedded).unwrap();
        assert!(outcome.save_warning.is_some());
        assert!(sync.get(&id).is_none());
        assert!(sync.is_dirty());
    }

    #[test]
    fn test_embedded_delete_failure_keeps_annotation() {
        let embedded = FakeEmbedded::default();
        let handle = embedded.clone();
        let mut sync = open_with(Rc::new(MemoryStore::default()), embedded);
        let note = Annotation::note(0, Point::new(3.0, 3.0), Some("x".into()), Origin::Embedded);
        let id = note.id().to_string();
        sync.add(note).unwrap();

        handle.with_state(|state| state.fail_delete = true);
        assert!(sync.remove(&id, Origin::Embedded).is_err());
        assert!(sync.get(&id).is_some());
    }

    #[test]
    fn test_update_embedded_note_saves_document() {
        let embedded = FakeEmbedded::default();
        let log = embedded.clone();
        let mut sync = open_with(Rc::new(MemoryStore::default()), embedded);
        let note = Annotation::note(2, Point::new(7.0, 8.0), Some("old".into()), Origin::Embedded);
        let id = note.id().to_string();
        sync.add(note).unwrap();

        sync.update_note(&id, Some("new".into())).unwrap();
        assert_eq!(sync.get(&id).and_then(Annotation::text), Some("new"));
        assert!(log.calls().contains(&EmbeddedCall::UpdateNote {
            page: 2,
            x: 7.0,
            y: 8.0,
            content: "new".into(),
        }));
    }

    #[test]
    fn test_update_note_on_highlight_is_rejected() {
        let mut sync = open_with(Rc::new(MemoryStore::default()), FakeEmbedded::default());
        let highlight = db_highlight(0);
        let id = highlight.id().to_string();
        sync.add(highlight).unwrap();
        assert!(matches!(
            sync.update_note(&id, Some("x".into())),
            Err(StoreError::NotANote(_))
        ));
    }

    #[test]
    fn test_list_all_orders_by_page_then_time() {
        let mut sync = open_with(Rc::new(MemoryStore::default()), FakeEmbedded::default());
        let base = chrono::Utc::now();
        let late = db_highlight(1).with_created_at(base + chrono::Duration::seconds(10));
        let early = db_highlight(1).with_created_at(base);
        let first_page = db_highlight(0).with_created_at(base + chrono::Duration::seconds(99));
        let expected = vec![
            first_page.id().to_string(),
            early.id().to_string(),
            late.id().to_string(),
        ];
        sync.add(late).unwrap();
        sync.add(early).unwrap();
        sync.add(first_page).unwrap();

        let ids: Vec<String> = sync.list_all().iter().map(|a| a.id().to_string()).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_add_out_of_range_page() {
        let mut sync = open_with(Rc::new(MemoryStore::default()), FakeEmbedded::default());
        assert!(matches!(
            sync.add(db_highlight(5)),
            Err(StoreError::PageOutOfRange { page: 5, page_count: 5 })
        ));
    }
}
