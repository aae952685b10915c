use async_trait::async_trait;
use course_tree::{CourseStore, StoreError};
use shared::{
    domain::{ChapterId, CourseId, LessonId, Position},
    error::{ApiException, ErrorCode},
    protocol::{ChapterSummary, LessonSummary, PositionUpdate},
};

use crate::{PositionConflict, Storage};

const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// Only failures that may clear up on their own become `Unavailable`; the sync
/// executor retries those and nothing else.
fn store_error(err: anyhow::Error) -> StoreError {
    let err = match err.downcast::<PositionConflict>() {
        Ok(conflict) => return StoreError::Conflict(conflict.reason),
        Err(err) => err,
    };
    if err.downcast_ref::<sqlx::Error>().is_some_and(is_transient) {
        StoreError::Unavailable(format!("{err:#}"))
    } else {
        StoreError::Rejected(ApiException::new(ErrorCode::Internal, format!("{err:#}")))
    }
}

fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_) => true,
        // Extended result codes keep the primary code in the low byte.
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .is_some_and(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED)),
        _ => false,
    }
}

/// Lets the structure editor save straight into the database, e.g. from the
/// command line tools.
#[async_trait]
impl CourseStore for Storage {
    async fn update_chapter_position(
        &self,
        chapter_id: ChapterId,
        position: Position,
    ) -> Result<(), StoreError> {
        if Storage::update_chapter_position(self, chapter_id, position)
            .await
            .map_err(store_error)?
        {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("chapter {chapter_id}")))
        }
    }

    async fn update_lesson_position(
        &self,
        lesson_id: LessonId,
        position: Position,
        chapter_id: ChapterId,
    ) -> Result<(), StoreError> {
        if Storage::update_lesson_position(self, lesson_id, position, chapter_id)
            .await
            .map_err(store_error)?
        {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("lesson {lesson_id}")))
        }
    }

    async fn apply_positions(
        &self,
        course_id: CourseId,
        updates: &[PositionUpdate],
    ) -> Result<(), StoreError> {
        Storage::apply_positions(self, course_id, updates)
            .await
            .map(|_| ())
            .map_err(store_error)
    }

    async fn delete_chapter(&self, chapter_id: ChapterId) -> Result<(), StoreError> {
        if Storage::delete_chapter(self, chapter_id)
            .await
            .map_err(store_error)?
        {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("chapter {chapter_id}")))
        }
    }

    async fn delete_lesson(&self, lesson_id: LessonId) -> Result<(), StoreError> {
        if Storage::delete_lesson(self, lesson_id)
            .await
            .map_err(store_error)?
        {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("lesson {lesson_id}")))
        }
    }

    async fn create_chapter(
        &self,
        course_id: CourseId,
        title: &str,
    ) -> Result<ChapterSummary, StoreError> {
        Storage::create_chapter(self, course_id, title)
            .await
            .map_err(store_error)?
            .map(ChapterSummary::from)
            .ok_or_else(|| StoreError::NotFound(format!("course {course_id}")))
    }

    async fn create_lesson(
        &self,
        chapter_id: ChapterId,
        title: &str,
    ) -> Result<LessonSummary, StoreError> {
        Storage::create_lesson(self, chapter_id, title)
            .await
            .map_err(store_error)?
            .map(LessonSummary::from)
            .ok_or_else(|| StoreError::NotFound(format!("chapter {chapter_id}")))
    }
}

#[cfg(test)]
#[path = "tests/course_store_tests.rs"]
mod tests;
