use async_trait::async_trait;
use shared::{
    domain::{ChapterId, CourseId, LessonId, Position},
    error::ApiException,
    protocol::{ChapterSummary, LessonSummary, PositionUpdate},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("course store unavailable: {0}")]
    Unavailable(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("position update conflicts with the stored structure: {0}")]
    Conflict(String),
    #[error("course store rejected the request: {0}")]
    Rejected(#[from] ApiException),
}

impl StoreError {
    /// Only transport failures are worth repeating; the position writes
    /// themselves are absolute and safe to replay.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// The remote collaborator that owns the persisted course structure.
#[async_trait]
pub trait CourseStore: Send + Sync {
    async fn update_chapter_position(
        &self,
        chapter_id: ChapterId,
        position: Position,
    ) -> Result<(), StoreError>;

    async fn update_lesson_position(
        &self,
        lesson_id: LessonId,
        position: Position,
        chapter_id: ChapterId,
    ) -> Result<(), StoreError>;

    /// Applies every update or none of them.
    async fn apply_positions(
        &self,
        course_id: CourseId,
        updates: &[PositionUpdate],
    ) -> Result<(), StoreError>;

    /// Deletes the chapter with its lessons and compacts the remaining chapters.
    async fn delete_chapter(&self, chapter_id: ChapterId) -> Result<(), StoreError>;

    /// Deletes the lesson and compacts its former siblings.
    async fn delete_lesson(&self, lesson_id: LessonId) -> Result<(), StoreError>;

    async fn create_chapter(
        &self,
        course_id: CourseId,
        title: &str,
    ) -> Result<ChapterSummary, StoreError>;

    async fn create_lesson(
        &self,
        chapter_id: ChapterId,
        title: &str,
    ) -> Result<LessonSummary, StoreError>;
}

#[async_trait]
impl<T> CourseStore for std::sync::Arc<T>
where
    T: CourseStore + ?Sized,
{
    async fn update_chapter_position(
        &self,
        chapter_id: ChapterId,
        position: Position,
    ) -> Result<(), StoreError> {
        (**self).update_chapter_position(chapter_id, position).await
    }

    async fn update_lesson_position(
        &self,
        lesson_id: LessonId,
        position: Position,
        chapter_id: ChapterId,
    ) -> Result<(), StoreError> {
        (**self)
            .update_lesson_position(lesson_id, position, chapter_id)
            .await
    }

    async fn apply_positions(
        &self,
        course_id: CourseId,
        updates: &[PositionUpdate],
    ) -> Result<(), StoreError> {
        (**self).apply_positions(course_id, updates).await
    }

    async fn delete_chapter(&self, chapter_id: ChapterId) -> Result<(), StoreError> {
        (**self).delete_chapter(chapter_id).await
    }

    async fn delete_lesson(&self, lesson_id: LessonId) -> Result<(), StoreError> {
        (**self).delete_lesson(lesson_id).await
    }

    async fn create_chapter(
        &self,
        course_id: CourseId,
        title: &str,
    ) -> Result<ChapterSummary, StoreError> {
        (**self).create_chapter(course_id, title).await
    }

    async fn create_lesson(
        &self,
        chapter_id: ChapterId,
        title: &str,
    ) -> Result<LessonSummary, StoreError> {
        (**self).create_lesson(chapter_id, title).await
    }
}
