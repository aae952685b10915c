use shared::{
    domain::{ChapterId, LessonId},
    protocol::CourseStructure,
};
use tracing::{info, warn};

use crate::{
    plan::SyncPlan,
    reorder::{reorder, DragGesture, ReorderError, Touched},
    store::{CourseStore, StoreError},
    sync::{sync_plan, SyncError, SyncReport, SyncStrategy},
    tree::CourseTree,
};

/// Local, optimistic copy of a course structure plus the lists that changed
/// since the last successful save.
///
/// Gestures mutate the local tree immediately. `save` pushes the accumulated
/// changes; when it fails the local tree stays ahead of the store and the
/// pending changes are kept so a later `save` can retry them.
#[derive(Debug, Clone)]
pub struct StructureEditor {
    tree: CourseTree,
    pending: Touched,
}

impl StructureEditor {
    /// Lists loaded with gaps or duplicate positions are renumbered right away
    /// and count as unsaved, so the next save repairs them in the store.
    pub fn new(mut tree: CourseTree) -> Self {
        let pending = tree.normalize_positions();
        if !pending.is_empty() {
            warn!(
                course_id = tree.course_id.0,
                chapter_list = pending.chapter_list,
                lesson_lists = pending.lesson_lists.len(),
                "loaded positions were not dense, renumbered locally"
            );
        }
        Self { tree, pending }
    }

    pub fn from_structure(structure: CourseStructure) -> Self {
        Self::new(CourseTree::from_structure(structure))
    }

    pub fn tree(&self) -> &CourseTree {
        &self.tree
    }

    pub fn pending(&self) -> &Touched {
        &self.pending
    }

    pub fn has_unsaved_changes(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Flips a chapter's open flag and returns the new value.
    pub fn toggle_open(&mut self, chapter_id: ChapterId) -> Option<bool> {
        let chapter = self
            .tree
            .chapters
            .iter_mut()
            .find(|chapter| chapter.id == chapter_id)?;
        chapter.is_open = !chapter.is_open;
        Some(chapter.is_open)
    }

    /// Applies a gesture locally. Returns whether the order changed.
    pub fn apply(&mut self, gesture: DragGesture) -> Result<bool, ReorderError> {
        let reordered = reorder(&self.tree, gesture)?;
        if reordered.is_noop() {
            return Ok(false);
        }
        self.tree = reordered.tree;
        self.pending.merge(reordered.touched);
        Ok(true)
    }

    pub fn pending_plan(&self) -> SyncPlan {
        SyncPlan::project(&self.tree, &self.pending)
    }

    pub async fn save<S>(
        &mut self,
        store: &S,
        strategy: SyncStrategy,
    ) -> Result<SyncReport, SyncError>
    where
        S: CourseStore + ?Sized,
    {
        let plan = self.pending_plan();
        match sync_plan(store, self.tree.course_id, &plan, strategy).await {
            Ok(report) => {
                self.pending = Touched::default();
                Ok(report)
            }
            Err(err) => {
                warn!(
                    course_id = self.tree.course_id.0,
                    applied = err.applied(),
                    error = %err,
                    "save failed, keeping local order"
                );
                Err(err)
            }
        }
    }

    pub async fn create_chapter<S>(&mut self, store: &S, title: &str) -> Result<ChapterId, StoreError>
    where
        S: CourseStore + ?Sized,
    {
        let chapter = store.create_chapter(self.tree.course_id, title).await?;
        let chapter_id = chapter.chapter_id;
        self.tree.push_chapter(chapter);
        info!(course_id = self.tree.course_id.0, chapter_id = chapter_id.0, "chapter created");
        Ok(chapter_id)
    }

    pub async fn create_lesson<S>(
        &mut self,
        store: &S,
        chapter_id: ChapterId,
        title: &str,
    ) -> Result<LessonId, StoreError>
    where
        S: CourseStore + ?Sized,
    {
        if self.tree.chapter_index(chapter_id).is_none() {
            return Err(StoreError::NotFound(format!("chapter {chapter_id}")));
        }
        let lesson = store.create_lesson(chapter_id, title).await?;
        let lesson_id = lesson.lesson_id;
        self.tree.push_lesson(lesson);
        info!(chapter_id = chapter_id.0, lesson_id = lesson_id.0, "lesson created");
        Ok(lesson_id)
    }

    /// Deletes remotely first; the local tree only changes once the store
    /// confirmed. Surviving chapters are compacted the same way the store does.
    ///
    /// Unsaved order changes are saved before the delete is sent, since the
    /// store cascades over its own chapter membership. If that save fails
    /// nothing is deleted.
    pub async fn delete_chapter<S>(&mut self, store: &S, chapter_id: ChapterId) -> Result<(), StoreError>
    where
        S: CourseStore + ?Sized,
    {
        self.flush_pending(store).await?;
        store.delete_chapter(chapter_id).await?;
        self.tree.remove_chapter(chapter_id);
        self.pending.lesson_lists.remove(&chapter_id);
        info!(chapter_id = chapter_id.0, "chapter deleted");
        Ok(())
    }

    pub async fn delete_lesson<S>(&mut self, store: &S, lesson_id: LessonId) -> Result<(), StoreError>
    where
        S: CourseStore + ?Sized,
    {
        self.flush_pending(store).await?;
        store.delete_lesson(lesson_id).await?;
        self.tree.remove_lesson(lesson_id);
        info!(lesson_id = lesson_id.0, "lesson deleted");
        Ok(())
    }

    async fn flush_pending<S>(&mut self, store: &S) -> Result<(), StoreError>
    where
        S: CourseStore + ?Sized,
    {
        if !self.has_unsaved_changes() {
            return Ok(());
        }
        info!(course_id = self.tree.course_id.0, "saving pending order before delete");
        self.save(store, SyncStrategy::default())
            .await
            .map(|_| ())
            .map_err(SyncError::into_store_error)
    }
}

#[cfg(test)]
#[path = "tests/editor_tests.rs"]
mod tests;
