use std::{
    collections::{BTreeSet, HashSet},
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite, SqliteConnection,
};
use thiserror::Error;
use tracing::{debug, info};

use shared::{
    domain::{ChapterId, CourseId, CourseStatus, LessonId, Position, UserId},
    protocol::{ChapterSummary, CourseStructure, LessonSummary, PositionUpdate},
};

mod course_store;

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCourse {
    pub course_id: CourseId,
    pub title: String,
    pub slug: String,
    pub status: CourseStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredChapter {
    pub chapter_id: ChapterId,
    pub course_id: CourseId,
    pub title: String,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredLesson {
    pub lesson_id: LessonId,
    pub chapter_id: ChapterId,
    pub title: String,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredProgress {
    pub user_id: UserId,
    pub lesson_id: LessonId,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A position write that would leave a chapter or lesson list non-dense, or
/// that references entities outside the course. The whole batch is rolled back.
#[derive(Debug, Error)]
#[error("position update rejected: {reason}")]
pub struct PositionConflict {
    pub reason: String,
}

impl PositionConflict {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl From<StoredLesson> for LessonSummary {
    fn from(value: StoredLesson) -> Self {
        Self {
            lesson_id: value.lesson_id,
            chapter_id: value.chapter_id,
            title: value.title,
            position: value.position,
        }
    }
}

impl From<StoredChapter> for ChapterSummary {
    fn from(value: StoredChapter) -> Self {
        Self {
            chapter_id: value.chapter_id,
            course_id: value.course_id,
            title: value.title,
            position: value.position,
            lessons: Vec::new(),
        }
    }
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn create_user(&self, username: &str) -> Result<UserId> {
        let rec = sqlx::query(
            "INSERT INTO users (username) VALUES (?)
             ON CONFLICT(username) DO UPDATE SET username=excluded.username
             RETURNING id",
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await?;
        Ok(UserId(rec.get::<i64, _>(0)))
    }

    pub async fn username_for_user(&self, user_id: UserId) -> Result<Option<String>> {
        let row = sqlx::query("SELECT username FROM users WHERE id = ?")
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }

    pub async fn create_course(
        &self,
        title: &str,
        slug: &str,
        status: CourseStatus,
    ) -> Result<CourseId> {
        let rec = sqlx::query("INSERT INTO courses (title, slug, status) VALUES (?, ?, ?) RETURNING id")
            .bind(title)
            .bind(slug)
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("failed to create course '{slug}'"))?;
        Ok(CourseId(rec.get::<i64, _>(0)))
    }

    /// Newest first. `search` is a substring of the title or slug; `limit`
    /// caps the number of rows.
    pub async fn list_courses(
        &self,
        search: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<StoredCourse>> {
        let pattern = search.map(|term| format!("%{}%", escape_like(term)));
        let rows = sqlx::query(
            "SELECT id, title, slug, status, created_at
             FROM courses
             WHERE ?1 IS NULL OR title LIKE ?1 ESCAPE '!' OR slug LIKE ?1 ESCAPE '!'
             ORDER BY created_at DESC, id DESC
             LIMIT ?2",
        )
        .bind(pattern)
        .bind(limit.map_or(-1, i64::from))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(course_from_row).collect())
    }

    /// Courses the user is enrolled in, most recent enrollment first.
    pub async fn courses_for_user(&self, user_id: UserId) -> Result<Vec<StoredCourse>> {
        let rows = sqlx::query(
            "SELECT c.id, c.title, c.slug, c.status, c.created_at
             FROM enrollments e
             INNER JOIN courses c ON c.id = e.course_id
             WHERE e.user_id = ?
             ORDER BY e.enrolled_at DESC, c.id DESC",
        )
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(course_from_row).collect())
    }

    pub async fn course(&self, course_id: CourseId) -> Result<Option<StoredCourse>> {
        let row = sqlx::query("SELECT id, title, slug, status, created_at FROM courses WHERE id = ?")
            .bind(course_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(course_from_row))
    }

    pub async fn course_by_slug(&self, slug: &str) -> Result<Option<StoredCourse>> {
        let row =
            sqlx::query("SELECT id, title, slug, status, created_at FROM courses WHERE slug = ?")
                .bind(slug)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(course_from_row))
    }

    pub async fn set_course_status(&self, course_id: CourseId, status: CourseStatus) -> Result<bool> {
        let result = sqlx::query("UPDATE courses SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(course_id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Appends a chapter after the course's current last chapter. `None` when
    /// the course does not exist.
    pub async fn create_chapter(
        &self,
        course_id: CourseId,
        title: &str,
    ) -> Result<Option<StoredChapter>> {
        let mut tx = self.pool.begin().await?;
        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM courses WHERE id = ?")
            .bind(course_id.0)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Ok(None);
        }

        let position: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(position), 0) + 1 FROM chapters WHERE course_id = ?",
        )
        .bind(course_id.0)
        .fetch_one(&mut *tx)
        .await?;
        let rec = sqlx::query(
            "INSERT INTO chapters (course_id, title, position) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(course_id.0)
        .bind(title)
        .bind(position)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(Some(StoredChapter {
            chapter_id: ChapterId(rec.get::<i64, _>(0)),
            course_id,
            title: title.to_string(),
            position: to_position(position)?,
        }))
    }

    /// Appends a lesson after the chapter's current last lesson. `None` when
    /// the chapter does not exist.
    pub async fn create_lesson(
        &self,
        chapter_id: ChapterId,
        title: &str,
    ) -> Result<Option<StoredLesson>> {
        let mut tx = self.pool.begin().await?;
        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM chapters WHERE id = ?")
            .bind(chapter_id.0)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Ok(None);
        }

        let position: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(position), 0) + 1 FROM lessons WHERE chapter_id = ?",
        )
        .bind(chapter_id.0)
        .fetch_one(&mut *tx)
        .await?;
        let rec = sqlx::query(
            "INSERT INTO lessons (chapter_id, title, position) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(chapter_id.0)
        .bind(title)
        .bind(position)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(Some(StoredLesson {
            lesson_id: LessonId(rec.get::<i64, _>(0)),
            chapter_id,
            title: title.to_string(),
            position: to_position(position)?,
        }))
    }

    pub async fn chapter(&self, chapter_id: ChapterId) -> Result<Option<StoredChapter>> {
        let row = sqlx::query("SELECT id, course_id, title, position FROM chapters WHERE id = ?")
            .bind(chapter_id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(chapter_from_row).transpose()
    }

    pub async fn lesson(&self, lesson_id: LessonId) -> Result<Option<StoredLesson>> {
        let row = sqlx::query("SELECT id, chapter_id, title, position FROM lessons WHERE id = ?")
            .bind(lesson_id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(lesson_from_row).transpose()
    }

    pub async fn course_for_chapter(&self, chapter_id: ChapterId) -> Result<Option<CourseId>> {
        let row: Option<i64> = sqlx::query_scalar("SELECT course_id FROM chapters WHERE id = ?")
            .bind(chapter_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(CourseId))
    }

    pub async fn course_for_lesson(&self, lesson_id: LessonId) -> Result<Option<CourseId>> {
        let row: Option<i64> = sqlx::query_scalar(
            "SELECT c.course_id
             FROM lessons l
             INNER JOIN chapters c ON c.id = l.chapter_id
             WHERE l.id = ?",
        )
        .bind(lesson_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(CourseId))
    }

    pub async fn rename_chapter(&self, chapter_id: ChapterId, title: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE chapters SET title = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(title)
        .bind(chapter_id.0)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn rename_lesson(&self, lesson_id: LessonId, title: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE lessons SET title = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(title)
        .bind(lesson_id.0)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// The course's chapters and lessons ordered by position, ties by id.
    pub async fn load_course_structure(&self, course_id: CourseId) -> Result<Option<CourseStructure>> {
        if self.course(course_id).await?.is_none() {
            return Ok(None);
        }

        let chapter_rows = sqlx::query(
            "SELECT id, course_id, title, position
             FROM chapters
             WHERE course_id = ?
             ORDER BY position, id",
        )
        .bind(course_id.0)
        .fetch_all(&self.pool)
        .await?;
        let lesson_rows = sqlx::query(
            "SELECT l.id, l.chapter_id, l.title, l.position
             FROM lessons l
             INNER JOIN chapters c ON c.id = l.chapter_id
             WHERE c.course_id = ?
             ORDER BY l.position, l.id",
        )
        .bind(course_id.0)
        .fetch_all(&self.pool)
        .await?;

        let mut chapters = chapter_rows
            .into_iter()
            .map(|row| chapter_from_row(row).map(ChapterSummary::from))
            .collect::<Result<Vec<_>>>()?;
        for row in lesson_rows {
            let lesson = lesson_from_row(row)?;
            if let Some(chapter) = chapters
                .iter_mut()
                .find(|chapter| chapter.chapter_id == lesson.chapter_id)
            {
                chapter.lessons.push(lesson.into());
            }
        }

        Ok(Some(CourseStructure { course_id, chapters }))
    }

    /// Sets one chapter's position without touching its siblings.
    pub async fn update_chapter_position(
        &self,
        chapter_id: ChapterId,
        position: Position,
    ) -> Result<bool> {
        ensure_valid_position(position)?;
        let result = sqlx::query(
            "UPDATE chapters SET position = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(i64::from(position))
        .bind(chapter_id.0)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Sets one lesson's position and parent chapter without touching its
    /// siblings. The new chapter must belong to the lesson's course.
    pub async fn update_lesson_position(
        &self,
        lesson_id: LessonId,
        position: Position,
        chapter_id: ChapterId,
    ) -> Result<bool> {
        ensure_valid_position(position)?;
        let Some(lesson_course) = self.course_for_lesson(lesson_id).await? else {
            return Ok(false);
        };
        let Some(chapter_course) = self.course_for_chapter(chapter_id).await? else {
            return Err(PositionConflict::new(format!("chapter {chapter_id} does not exist")).into());
        };
        if lesson_course != chapter_course {
            return Err(PositionConflict::new(format!(
                "chapter {chapter_id} belongs to another course than lesson {lesson_id}"
            ))
            .into());
        }

        let result = sqlx::query(
            "UPDATE lessons SET position = ?, chapter_id = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(i64::from(position))
        .bind(chapter_id.0)
        .bind(lesson_id.0)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Applies a batch of absolute position writes in one transaction.
    ///
    /// Every entity must belong to `course_id`. After the writes, the chapter
    /// list (when any chapter moved) and every lesson list a lesson left or
    /// entered must be exactly 1..N, otherwise nothing is kept and a
    /// [`PositionConflict`] is returned.
    pub async fn apply_positions(
        &self,
        course_id: CourseId,
        updates: &[PositionUpdate],
    ) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        let course_chapters: HashSet<i64> =
            sqlx::query_scalar::<_, i64>("SELECT id FROM chapters WHERE course_id = ?")
                .bind(course_id.0)
                .fetch_all(&mut *tx)
                .await?
                .into_iter()
                .collect();

        let mut chapters_moved = false;
        let mut lesson_lists: BTreeSet<i64> = BTreeSet::new();
        for update in updates {
            match *update {
                PositionUpdate::Chapter {
                    chapter_id,
                    position,
                } => {
                    ensure_valid_position(position)?;
                    if !course_chapters.contains(&chapter_id.0) {
                        return Err(PositionConflict::new(format!(
                            "chapter {chapter_id} is not part of course {course_id}"
                        ))
                        .into());
                    }
                    sqlx::query(
                        "UPDATE chapters SET position = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
                    )
                    .bind(i64::from(position))
                    .bind(chapter_id.0)
                    .execute(&mut *tx)
                    .await?;
                    chapters_moved = true;
                }
                PositionUpdate::Lesson {
                    lesson_id,
                    chapter_id,
                    position,
                } => {
                    ensure_valid_position(position)?;
                    if !course_chapters.contains(&chapter_id.0) {
                        return Err(PositionConflict::new(format!(
                            "chapter {chapter_id} is not part of course {course_id}"
                        ))
                        .into());
                    }
                    let current: Option<i64> =
                        sqlx::query_scalar("SELECT chapter_id FROM lessons WHERE id = ?")
                            .bind(lesson_id.0)
                            .fetch_optional(&mut *tx)
                            .await?;
                    let Some(current) = current.filter(|id| course_chapters.contains(id)) else {
                        return Err(PositionConflict::new(format!(
                            "lesson {lesson_id} is not part of course {course_id}"
                        ))
                        .into());
                    };
                    sqlx::query(
                        "UPDATE lessons SET position = ?, chapter_id = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
                    )
                    .bind(i64::from(position))
                    .bind(chapter_id.0)
                    .bind(lesson_id.0)
                    .execute(&mut *tx)
                    .await?;
                    lesson_lists.insert(current);
                    lesson_lists.insert(chapter_id.0);
                }
            }
        }

        if chapters_moved {
            let positions: Vec<i64> = sqlx::query_scalar(
                "SELECT position FROM chapters WHERE course_id = ? ORDER BY position",
            )
            .bind(course_id.0)
            .fetch_all(&mut *tx)
            .await?;
            if !is_dense(&positions) {
                return Err(PositionConflict::new(format!(
                    "chapter positions of course {course_id} would not be 1..{}",
                    positions.len()
                ))
                .into());
            }
        }
        for chapter_id in &lesson_lists {
            let positions: Vec<i64> = sqlx::query_scalar(
                "SELECT position FROM lessons WHERE chapter_id = ? ORDER BY position",
            )
            .bind(*chapter_id)
            .fetch_all(&mut *tx)
            .await?;
            if !is_dense(&positions) {
                return Err(PositionConflict::new(format!(
                    "lesson positions of chapter {chapter_id} would not be 1..{}",
                    positions.len()
                ))
                .into());
            }
        }

        tx.commit().await?;
        info!(
            course_id = course_id.0,
            updates = updates.len(),
            "applied position batch"
        );
        Ok(updates.len())
    }

    /// Deletes a chapter, its lessons and their progress, then compacts the
    /// remaining chapters of the course.
    pub async fn delete_chapter(&self, chapter_id: ChapterId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let course_id: Option<i64> = sqlx::query_scalar("SELECT course_id FROM chapters WHERE id = ?")
            .bind(chapter_id.0)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(course_id) = course_id else {
            return Ok(false);
        };

        sqlx::query(
            "DELETE FROM lesson_progress WHERE lesson_id IN (SELECT id FROM lessons WHERE chapter_id = ?)",
        )
        .bind(chapter_id.0)
        .execute(&mut *tx)
        .await?;
        let lessons = sqlx::query("DELETE FROM lessons WHERE chapter_id = ?")
            .bind(chapter_id.0)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM chapters WHERE id = ?")
            .bind(chapter_id.0)
            .execute(&mut *tx)
            .await?;
        renumber_chapters(&mut tx, course_id).await?;
        tx.commit().await?;

        debug!(chapter_id = chapter_id.0, lessons, "deleted chapter");
        Ok(true)
    }

    /// Deletes a lesson with its progress and compacts its former siblings.
    pub async fn delete_lesson(&self, lesson_id: LessonId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let chapter_id: Option<i64> = sqlx::query_scalar("SELECT chapter_id FROM lessons WHERE id = ?")
            .bind(lesson_id.0)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(chapter_id) = chapter_id else {
            return Ok(false);
        };

        sqlx::query("DELETE FROM lesson_progress WHERE lesson_id = ?")
            .bind(lesson_id.0)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM lessons WHERE id = ?")
            .bind(lesson_id.0)
            .execute(&mut *tx)
            .await?;
        renumber_lessons(&mut tx, chapter_id).await?;
        tx.commit().await?;

        debug!(lesson_id = lesson_id.0, chapter_id, "deleted lesson");
        Ok(true)
    }

    /// Returns `true` when the enrollment is new.
    pub async fn enroll(&self, user_id: UserId, course_id: CourseId) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO enrollments (user_id, course_id) VALUES (?, ?)
             ON CONFLICT(user_id, course_id) DO NOTHING",
        )
        .bind(user_id.0)
        .bind(course_id.0)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn is_enrolled(&self, user_id: UserId, course_id: CourseId) -> Result<bool> {
        let row: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM enrollments WHERE user_id = ? AND course_id = ?",
        )
        .bind(user_id.0)
        .bind(course_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    /// Records completion state. The first completion time is kept when a lesson
    /// is marked complete again; clearing completion clears the timestamp.
    pub async fn set_lesson_completed(
        &self,
        user_id: UserId,
        lesson_id: LessonId,
        completed: bool,
    ) -> Result<StoredProgress> {
        let completed_at = completed.then(Utc::now);
        let row = sqlx::query(
            "INSERT INTO lesson_progress (user_id, lesson_id, completed, completed_at, updated_at)
             VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP)
             ON CONFLICT(user_id, lesson_id) DO UPDATE SET
                completed = excluded.completed,
                completed_at = CASE
                    WHEN excluded.completed = 1 THEN COALESCE(lesson_progress.completed_at, excluded.completed_at)
                    ELSE NULL
                END,
                updated_at = CURRENT_TIMESTAMP
             RETURNING completed, completed_at",
        )
        .bind(user_id.0)
        .bind(lesson_id.0)
        .bind(completed)
        .bind(completed_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(StoredProgress {
            user_id,
            lesson_id,
            completed: row.get::<bool, _>(0),
            completed_at: row.get::<Option<DateTime<Utc>>, _>(1),
        })
    }

    pub async fn lesson_progress(
        &self,
        user_id: UserId,
        lesson_id: LessonId,
    ) -> Result<Option<StoredProgress>> {
        let row = sqlx::query(
            "SELECT completed, completed_at FROM lesson_progress WHERE user_id = ? AND lesson_id = ?",
        )
        .bind(user_id.0)
        .bind(lesson_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| StoredProgress {
            user_id,
            lesson_id,
            completed: r.get::<bool, _>(0),
            completed_at: r.get::<Option<DateTime<Utc>>, _>(1),
        }))
    }

    /// Total lesson count of the course and the lessons the user completed, in
    /// course order.
    pub async fn course_progress(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<(u32, Vec<LessonId>)> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*)
             FROM lessons l
             INNER JOIN chapters c ON c.id = l.chapter_id
             WHERE c.course_id = ?",
        )
        .bind(course_id.0)
        .fetch_one(&self.pool)
        .await?;
        let completed: Vec<i64> = sqlx::query_scalar(
            "SELECT l.id
             FROM lesson_progress p
             INNER JOIN lessons l ON l.id = p.lesson_id
             INNER JOIN chapters c ON c.id = l.chapter_id
             WHERE p.user_id = ? AND c.course_id = ? AND p.completed = 1
             ORDER BY c.position, l.position",
        )
        .bind(user_id.0)
        .bind(course_id.0)
        .fetch_all(&self.pool)
        .await?;

        Ok((
            u32::try_from(total).unwrap_or_default(),
            completed.into_iter().map(LessonId).collect(),
        ))
    }
}

async fn renumber_chapters(conn: &mut SqliteConnection, course_id: i64) -> Result<()> {
    let ids: Vec<i64> =
        sqlx::query_scalar("SELECT id FROM chapters WHERE course_id = ? ORDER BY position, id")
            .bind(course_id)
            .fetch_all(&mut *conn)
            .await?;
    for (index, id) in ids.into_iter().enumerate() {
        sqlx::query("UPDATE chapters SET position = ? WHERE id = ? AND position != ?")
            .bind(index as i64 + 1)
            .bind(id)
            .bind(index as i64 + 1)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

async fn renumber_lessons(conn: &mut SqliteConnection, chapter_id: i64) -> Result<()> {
    let ids: Vec<i64> =
        sqlx::query_scalar("SELECT id FROM lessons WHERE chapter_id = ? ORDER BY position, id")
            .bind(chapter_id)
            .fetch_all(&mut *conn)
            .await?;
    for (index, id) in ids.into_iter().enumerate() {
        sqlx::query("UPDATE lessons SET position = ? WHERE id = ? AND position != ?")
            .bind(index as i64 + 1)
            .bind(id)
            .bind(index as i64 + 1)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        match c {
            '!' | '%' | '_' => {
                out.push('!');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

fn is_dense(sorted_positions: &[i64]) -> bool {
    sorted_positions
        .iter()
        .enumerate()
        .all(|(index, position)| *position == index as i64 + 1)
}

fn ensure_valid_position(position: Position) -> Result<()> {
    if position == 0 {
        return Err(PositionConflict::new("positions start at 1").into());
    }
    Ok(())
}

fn to_position(raw: i64) -> Result<Position> {
    match Position::try_from(raw) {
        Ok(position) if position >= 1 => Ok(position),
        _ => bail!("stored position {raw} is out of range"),
    }
}

fn course_from_row(row: sqlx::sqlite::SqliteRow) -> StoredCourse {
    let status: String = row.get(3);
    StoredCourse {
        course_id: CourseId(row.get::<i64, _>(0)),
        title: row.get(1),
        slug: row.get(2),
        status: CourseStatus::parse(&status).unwrap_or_default(),
        created_at: row.get::<DateTime<Utc>, _>(4),
    }
}

fn chapter_from_row(row: sqlx::sqlite::SqliteRow) -> Result<StoredChapter> {
    let chapter_id = ChapterId(row.get::<i64, _>(0));
    Ok(StoredChapter {
        chapter_id,
        course_id: CourseId(row.get::<i64, _>(1)),
        title: row.get(2),
        position: to_position(row.get::<i64, _>(3))
            .with_context(|| format!("chapter {chapter_id}"))?,
    })
}

fn lesson_from_row(row: sqlx::sqlite::SqliteRow) -> Result<StoredLesson> {
    let lesson_id = LessonId(row.get::<i64, _>(0));
    Ok(StoredLesson {
        lesson_id,
        chapter_id: ChapterId(row.get::<i64, _>(1)),
        title: row.get(2),
        position: to_position(row.get::<i64, _>(3))
            .with_context(|| format!("lesson {lesson_id}"))?,
    })
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
