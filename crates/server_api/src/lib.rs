use std::collections::HashSet;

use shared::{
    domain::{ChapterId, CourseId, LessonId, UserId},
    error::{ApiError, ErrorCode},
    protocol::{
        ChapterSummary, CourseProgress, CourseQuery, CourseStructure, CourseSummary,
        CreateChapterRequest,
        CreateCourseRequest, CreateLessonRequest, EnrollResponse, LessonProgress, LessonSummary,
        PositionUpdate, SetPositionsRequest, SetPositionsResponse, SetProgressRequest,
        UpdateChapterRequest, UpdateLessonRequest, UserSummary,
    },
};
use storage::{PositionConflict, Storage, StoredCourse};
use tracing::info;

pub const MAX_TITLE_CHARS: usize = 100;
pub const MIN_COURSE_TITLE_CHARS: usize = 3;
pub const MAX_USERNAME_CHARS: usize = 32;
pub const MAX_COURSE_LIMIT: u32 = 100;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
}

impl ApiContext {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }
}

pub async fn create_user(ctx: &ApiContext, username: &str) -> Result<UserSummary, ApiError> {
    let username = username.trim();
    if username.is_empty() || username.chars().count() > MAX_USERNAME_CHARS {
        return Err(ApiError::validation(format!(
            "username must be 1 to {MAX_USERNAME_CHARS} characters"
        )));
    }
    let user_id = ctx.storage.create_user(username).await.map_err(internal)?;
    Ok(UserSummary {
        user_id,
        username: username.to_string(),
    })
}

pub async fn list_courses(
    ctx: &ApiContext,
    query: CourseQuery,
) -> Result<Vec<CourseSummary>, ApiError> {
    if let Some(limit) = query.limit {
        if limit == 0 || limit > MAX_COURSE_LIMIT {
            return Err(ApiError::validation(format!(
                "limit must be 1 to {MAX_COURSE_LIMIT}"
            )));
        }
    }
    let search = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|term| !term.is_empty());
    let courses = ctx
        .storage
        .list_courses(search, query.limit)
        .await
        .map_err(internal)?;
    Ok(courses.into_iter().map(course_summary).collect())
}

pub async fn course_by_slug(ctx: &ApiContext, slug: &str) -> Result<CourseSummary, ApiError> {
    ctx.storage
        .course_by_slug(slug)
        .await
        .map_err(internal)?
        .map(course_summary)
        .ok_or_else(|| ApiError::not_found("course not found"))
}

pub async fn user_courses(ctx: &ApiContext, user_id: UserId) -> Result<Vec<CourseSummary>, ApiError> {
    ensure_user(ctx, user_id).await?;
    let courses = ctx
        .storage
        .courses_for_user(user_id)
        .await
        .map_err(internal)?;
    Ok(courses.into_iter().map(course_summary).collect())
}

pub async fn create_course(
    ctx: &ApiContext,
    request: CreateCourseRequest,
) -> Result<CourseSummary, ApiError> {
    let title = validate_course_title(&request.title)?;
    let slug = validate_slug(&request.slug)?;
    if ctx
        .storage
        .course_by_slug(&slug)
        .await
        .map_err(internal)?
        .is_some()
    {
        return Err(ApiError::new(
            ErrorCode::Conflict,
            format!("slug '{slug}' is already taken"),
        ));
    }

    let course_id = ctx
        .storage
        .create_course(&title, &slug, request.status)
        .await
        .map_err(internal)?;
    info!(course_id = course_id.0, %slug, "course created");
    Ok(CourseSummary {
        course_id,
        title,
        slug,
        status: request.status,
    })
}

pub async fn course_structure(
    ctx: &ApiContext,
    course_id: CourseId,
) -> Result<CourseStructure, ApiError> {
    ctx.storage
        .load_course_structure(course_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("course not found"))
}

/// Applies a whole reorder atomically. Either every position is written or
/// none is.
pub async fn set_positions(
    ctx: &ApiContext,
    course_id: CourseId,
    request: SetPositionsRequest,
) -> Result<SetPositionsResponse, ApiError> {
    ensure_course(ctx, course_id).await?;

    let mut chapters = HashSet::new();
    let mut lessons = HashSet::new();
    for update in &request.updates {
        let (position, fresh) = match *update {
            PositionUpdate::Chapter {
                chapter_id,
                position,
            } => (position, chapters.insert(chapter_id)),
            PositionUpdate::Lesson {
                lesson_id,
                position,
                ..
            } => (position, lessons.insert(lesson_id)),
        };
        if position == 0 {
            return Err(ApiError::validation("positions start at 1"));
        }
        if !fresh {
            return Err(ApiError::validation(
                "an entity may appear only once per batch",
            ));
        }
    }

    let applied = ctx
        .storage
        .apply_positions(course_id, &request.updates)
        .await
        .map_err(storage_error)?;
    Ok(SetPositionsResponse { applied })
}

pub async fn enroll(
    ctx: &ApiContext,
    user_id: UserId,
    course_id: CourseId,
) -> Result<EnrollResponse, ApiError> {
    ensure_user(ctx, user_id).await?;
    ensure_course(ctx, course_id).await?;
    let newly_enrolled = ctx
        .storage
        .enroll(user_id, course_id)
        .await
        .map_err(internal)?;
    Ok(EnrollResponse {
        user_id,
        course_id,
        newly_enrolled,
    })
}

pub async fn course_progress(
    ctx: &ApiContext,
    user_id: UserId,
    course_id: CourseId,
) -> Result<CourseProgress, ApiError> {
    ensure_course(ctx, course_id).await?;
    ensure_enrolled(ctx, user_id, course_id).await?;
    let (total, completed) = ctx
        .storage
        .course_progress(user_id, course_id)
        .await
        .map_err(internal)?;
    Ok(CourseProgress::new(user_id, course_id, total, completed))
}

pub async fn create_chapter(
    ctx: &ApiContext,
    request: CreateChapterRequest,
) -> Result<ChapterSummary, ApiError> {
    let title = validate_title(&request.title)?;
    let chapter = ctx
        .storage
        .create_chapter(request.course_id, &title)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("course not found"))?;
    Ok(chapter.into())
}

/// Renames and/or repositions one chapter. A bare position write does not
/// shift siblings; callers send the full list when reordering.
pub async fn update_chapter(
    ctx: &ApiContext,
    chapter_id: ChapterId,
    request: UpdateChapterRequest,
) -> Result<ChapterSummary, ApiError> {
    if request.title.is_none() && request.position.is_none() {
        return Err(ApiError::validation("nothing to update"));
    }
    let title = request.title.as_deref().map(validate_title).transpose()?;
    if request.position == Some(0) {
        return Err(ApiError::validation("positions start at 1"));
    }
    ensure_chapter(ctx, chapter_id).await?;

    if let Some(title) = title {
        ctx.storage
            .rename_chapter(chapter_id, &title)
            .await
            .map_err(internal)?;
    }
    if let Some(position) = request.position {
        ctx.storage
            .update_chapter_position(chapter_id, position)
            .await
            .map_err(storage_error)?;
    }

    let chapter = ctx
        .storage
        .chapter(chapter_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("chapter not found"))?;
    Ok(chapter.into())
}

pub async fn delete_chapter(ctx: &ApiContext, chapter_id: ChapterId) -> Result<(), ApiError> {
    if !ctx
        .storage
        .delete_chapter(chapter_id)
        .await
        .map_err(internal)?
    {
        return Err(ApiError::not_found("chapter not found"));
    }
    Ok(())
}

pub async fn create_lesson(
    ctx: &ApiContext,
    request: CreateLessonRequest,
) -> Result<LessonSummary, ApiError> {
    let title = validate_title(&request.title)?;
    let lesson = ctx
        .storage
        .create_lesson(request.chapter_id, &title)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("chapter not found"))?;
    Ok(lesson.into())
}

/// Renames, repositions or moves one lesson. Moving to another chapter needs
/// an explicit position in that chapter.
pub async fn update_lesson(
    ctx: &ApiContext,
    lesson_id: LessonId,
    request: UpdateLessonRequest,
) -> Result<LessonSummary, ApiError> {
    if request.title.is_none() && request.position.is_none() && request.chapter_id.is_none() {
        return Err(ApiError::validation("nothing to update"));
    }
    if request.chapter_id.is_some() && request.position.is_none() {
        return Err(ApiError::validation(
            "moving a lesson requires a position in the new chapter",
        ));
    }
    if request.position == Some(0) {
        return Err(ApiError::validation("positions start at 1"));
    }
    let title = request.title.as_deref().map(validate_title).transpose()?;
    let current = ctx
        .storage
        .lesson(lesson_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("lesson not found"))?;

    if let Some(title) = title {
        ctx.storage
            .rename_lesson(lesson_id, &title)
            .await
            .map_err(internal)?;
    }
    if let Some(position) = request.position {
        let chapter_id = request.chapter_id.unwrap_or(current.chapter_id);
        ctx.storage
            .update_lesson_position(lesson_id, position, chapter_id)
            .await
            .map_err(storage_error)?;
    }

    let lesson = ctx
        .storage
        .lesson(lesson_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("lesson not found"))?;
    Ok(lesson.into())
}

pub async fn delete_lesson(ctx: &ApiContext, lesson_id: LessonId) -> Result<(), ApiError> {
    if !ctx
        .storage
        .delete_lesson(lesson_id)
        .await
        .map_err(internal)?
    {
        return Err(ApiError::not_found("lesson not found"));
    }
    Ok(())
}

/// A lesson the user never touched reads as not completed.
pub async fn lesson_progress(
    ctx: &ApiContext,
    user_id: UserId,
    lesson_id: LessonId,
) -> Result<LessonProgress, ApiError> {
    let course_id = course_for_lesson(ctx, lesson_id).await?;
    ensure_enrolled(ctx, user_id, course_id).await?;
    let progress = ctx
        .storage
        .lesson_progress(user_id, lesson_id)
        .await
        .map_err(internal)?;
    Ok(match progress {
        Some(progress) => LessonProgress {
            user_id,
            lesson_id,
            completed: progress.completed,
            completed_at: progress.completed_at,
        },
        None => LessonProgress {
            user_id,
            lesson_id,
            completed: false,
            completed_at: None,
        },
    })
}

pub async fn set_lesson_progress(
    ctx: &ApiContext,
    lesson_id: LessonId,
    request: SetProgressRequest,
) -> Result<LessonProgress, ApiError> {
    let course_id = course_for_lesson(ctx, lesson_id).await?;
    ensure_enrolled(ctx, request.user_id, course_id).await?;
    let progress = ctx
        .storage
        .set_lesson_completed(request.user_id, lesson_id, request.completed)
        .await
        .map_err(internal)?;
    Ok(LessonProgress {
        user_id: progress.user_id,
        lesson_id: progress.lesson_id,
        completed: progress.completed,
        completed_at: progress.completed_at,
    })
}

pub fn validate_title(raw: &str) -> Result<String, ApiError> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(ApiError::validation("title must not be empty"));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(ApiError::validation(format!(
            "title must be at most {MAX_TITLE_CHARS} characters"
        )));
    }
    Ok(title.to_string())
}

/// Chapter and lesson titles plus a minimum length.
pub fn validate_course_title(raw: &str) -> Result<String, ApiError> {
    let title = validate_title(raw)?;
    if title.chars().count() < MIN_COURSE_TITLE_CHARS {
        return Err(ApiError::validation(format!(
            "course title must be at least {MIN_COURSE_TITLE_CHARS} characters"
        )));
    }
    Ok(title)
}

pub fn validate_slug(raw: &str) -> Result<String, ApiError> {
    let slug = raw.trim();
    let valid = !slug.is_empty()
        && slug.len() <= MAX_TITLE_CHARS
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !valid {
        return Err(ApiError::validation(
            "slug must be lowercase letters, digits and inner dashes",
        ));
    }
    Ok(slug.to_string())
}

async fn ensure_user(ctx: &ApiContext, user_id: UserId) -> Result<(), ApiError> {
    ctx.storage
        .username_for_user(user_id)
        .await
        .map_err(internal)?
        .map(|_| ())
        .ok_or_else(|| ApiError::not_found("user not found"))
}

async fn ensure_course(ctx: &ApiContext, course_id: CourseId) -> Result<StoredCourse, ApiError> {
    ctx.storage
        .course(course_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("course not found"))
}

async fn ensure_chapter(ctx: &ApiContext, chapter_id: ChapterId) -> Result<(), ApiError> {
    ctx.storage
        .chapter(chapter_id)
        .await
        .map_err(internal)?
        .map(|_| ())
        .ok_or_else(|| ApiError::not_found("chapter not found"))
}

async fn course_for_lesson(ctx: &ApiContext, lesson_id: LessonId) -> Result<CourseId, ApiError> {
    ctx.storage
        .course_for_lesson(lesson_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("lesson not found"))
}

async fn ensure_enrolled(
    ctx: &ApiContext,
    user_id: UserId,
    course_id: CourseId,
) -> Result<(), ApiError> {
    let enrolled = ctx
        .storage
        .is_enrolled(user_id, course_id)
        .await
        .map_err(internal)?;
    if !enrolled {
        return Err(ApiError::new(
            ErrorCode::Forbidden,
            "user is not enrolled in this course",
        ));
    }
    Ok(())
}

fn course_summary(course: StoredCourse) -> CourseSummary {
    CourseSummary {
        course_id: course.course_id,
        title: course.title,
        slug: course.slug,
        status: course.status,
    }
}

fn storage_error(err: anyhow::Error) -> ApiError {
    match err.downcast_ref::<PositionConflict>() {
        Some(conflict) => ApiError::new(ErrorCode::Conflict, conflict.reason.clone()),
        None => internal(err),
    }
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
