use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ChapterId, CourseId, CourseStatus, LessonId, Position, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseSummary {
    pub course_id: CourseId,
    pub title: String,
    pub slug: String,
    pub status: CourseStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonSummary {
    pub lesson_id: LessonId,
    pub chapter_id: ChapterId,
    pub title: String,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterSummary {
    pub chapter_id: ChapterId,
    pub course_id: CourseId,
    pub title: String,
    pub position: Position,
    #[serde(default)]
    pub lessons: Vec<LessonSummary>,
}

/// A course's chapters and lessons, each list ordered by position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseStructure {
    pub course_id: CourseId,
    pub chapters: Vec<ChapterSummary>,
}

/// Absolute position assignment for one entity. Replaying the same update is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PositionUpdate {
    Chapter {
        chapter_id: ChapterId,
        position: Position,
    },
    Lesson {
        lesson_id: LessonId,
        chapter_id: ChapterId,
        position: Position,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub user_id: UserId,
    pub username: String,
}

/// Filters for the course list. `search` matches title or slug, ignoring
/// ASCII case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCourseRequest {
    pub title: String,
    pub slug: String,
    #[serde(default)]
    pub status: CourseStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateChapterRequest {
    pub course_id: CourseId,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateLessonRequest {
    pub chapter_id: ChapterId,
    pub title: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateChapterRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateLessonRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter_id: Option<ChapterId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetPositionsRequest {
    pub updates: Vec<PositionUpdate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetPositionsResponse {
    pub applied: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollRequest {
    pub user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollResponse {
    pub user_id: UserId,
    pub course_id: CourseId,
    /// False when the user was already enrolled.
    pub newly_enrolled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetProgressRequest {
    pub user_id: UserId,
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonProgress {
    pub user_id: UserId,
    pub lesson_id: LessonId,
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseProgress {
    pub user_id: UserId,
    pub course_id: CourseId,
    pub total_lessons: u32,
    pub completed_lessons: u32,
    pub completed_lesson_ids: Vec<LessonId>,
    pub percent_complete: f64,
}

impl CourseProgress {
    pub fn new(
        user_id: UserId,
        course_id: CourseId,
        total_lessons: u32,
        completed_lesson_ids: Vec<LessonId>,
    ) -> Self {
        let completed_lessons = completed_lesson_ids.len() as u32;
        let percent_complete = if total_lessons == 0 {
            0.0
        } else {
            (f64::from(completed_lessons) * 100.0 / f64::from(total_lessons)).round()
        };
        Self {
            user_id,
            course_id,
            total_lessons,
            completed_lessons,
            completed_lesson_ids,
            percent_complete,
        }
    }
}
