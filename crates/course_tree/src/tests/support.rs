use std::{collections::BTreeMap, sync::Mutex};

use async_trait::async_trait;
use shared::{
    domain::{ChapterId, CourseId, LessonId, Position},
    protocol::{ChapterSummary, LessonSummary, PositionUpdate},
};

use crate::{
    store::{CourseStore, StoreError},
    tree::{ChapterNode, CourseTree, LessonNode},
};

pub(crate) const COURSE: CourseId = CourseId(1);

/// Builds a densely numbered tree from `(chapter_id, [lesson_ids])` pairs.
pub(crate) fn tree_of(layout: &[(i64, &[i64])]) -> CourseTree {
    let chapters = layout
        .iter()
        .enumerate()
        .map(|(chapter_index, (chapter_id, lesson_ids))| ChapterNode {
            id: ChapterId(*chapter_id),
            title: format!("Chapter {chapter_id}"),
            position: chapter_index as Position + 1,
            lessons: lesson_ids
                .iter()
                .enumerate()
                .map(|(lesson_index, lesson_id)| LessonNode {
                    id: LessonId(*lesson_id),
                    chapter_id: ChapterId(*chapter_id),
                    title: format!("Lesson {lesson_id}"),
                    position: lesson_index as Position + 1,
                })
                .collect(),
            is_open: true,
        })
        .collect();
    CourseTree {
        course_id: COURSE,
        chapters,
    }
}

/// `(chapter_id, [lesson_ids])` view of a tree, in order.
pub(crate) fn layout_of(tree: &CourseTree) -> Vec<(i64, Vec<i64>)> {
    tree.chapters
        .iter()
        .map(|chapter| {
            (
                chapter.id.0,
                chapter.lessons.iter().map(|lesson| lesson.id.0).collect(),
            )
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    ChapterPosition(ChapterId, Position),
    LessonPosition(LessonId, Position, ChapterId),
    Batch(usize),
    DeleteChapter(ChapterId),
    DeleteLesson(LessonId),
    CreateChapter(String),
    CreateLesson(ChapterId, String),
}

#[derive(Default)]
struct MemoryState {
    chapters: BTreeMap<ChapterId, Position>,
    lessons: BTreeMap<LessonId, (ChapterId, Position)>,
    calls: Vec<Call>,
    unavailable_calls: u32,
    reject_lesson_updates: bool,
    reject_batches: bool,
    next_id: i64,
}

impl MemoryState {
    fn take_outage(&mut self) -> Result<(), StoreError> {
        if self.unavailable_calls > 0 {
            self.unavailable_calls -= 1;
            return Err(StoreError::Unavailable("connection reset".into()));
        }
        Ok(())
    }

    fn compact_chapters(&mut self) {
        let mut ordered: Vec<(ChapterId, Position)> =
            self.chapters.iter().map(|(id, pos)| (*id, *pos)).collect();
        ordered.sort_by_key(|(id, pos)| (*pos, *id));
        for (index, (id, _)) in ordered.into_iter().enumerate() {
            self.chapters.insert(id, index as Position + 1);
        }
    }

    fn compact_lessons(&mut self, chapter_id: ChapterId) {
        let mut ordered: Vec<(LessonId, Position)> = self
            .lessons
            .iter()
            .filter(|(_, (chapter, _))| *chapter == chapter_id)
            .map(|(id, (_, pos))| (*id, *pos))
            .collect();
        ordered.sort_by_key(|(id, pos)| (*pos, *id));
        for (index, (id, _)) in ordered.into_iter().enumerate() {
            self.lessons.insert(id, (chapter_id, index as Position + 1));
        }
    }
}

/// In-process course store recording every call, with switchable failures.
#[derive(Default)]
pub(crate) struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub(crate) fn seeded(tree: &CourseTree) -> Self {
        let store = Self::default();
        {
            let mut state = store.state.lock().expect("state");
            state.next_id = 1_000;
            for chapter in &tree.chapters {
                state.chapters.insert(chapter.id, chapter.position);
                for lesson in &chapter.lessons {
                    state
                        .lessons
                        .insert(lesson.id, (chapter.id, lesson.position));
                }
            }
        }
        store
    }

    pub(crate) fn make_unavailable_for(&self, calls: u32) {
        self.state.lock().expect("state").unavailable_calls = calls;
    }

    pub(crate) fn reject_lesson_updates(&self) {
        self.state.lock().expect("state").reject_lesson_updates = true;
    }

    pub(crate) fn reject_batches(&self) {
        self.state.lock().expect("state").reject_batches = true;
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.state.lock().expect("state").calls.clone()
    }

    pub(crate) fn chapter_position(&self, chapter_id: ChapterId) -> Option<Position> {
        self.state
            .lock()
            .expect("state")
            .chapters
            .get(&chapter_id)
            .copied()
    }

    pub(crate) fn lesson_state(&self, lesson_id: LessonId) -> Option<(ChapterId, Position)> {
        self.state
            .lock()
            .expect("state")
            .lessons
            .get(&lesson_id)
            .copied()
    }

    pub(crate) fn snapshot(
        &self,
    ) -> (
        BTreeMap<ChapterId, Position>,
        BTreeMap<LessonId, (ChapterId, Position)>,
    ) {
        let state = self.state.lock().expect("state");
        (state.chapters.clone(), state.lessons.clone())
    }
}

#[async_trait]
impl CourseStore for MemoryStore {
    async fn update_chapter_position(
        &self,
        chapter_id: ChapterId,
        position: Position,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().expect("state");
        state.calls.push(Call::ChapterPosition(chapter_id, position));
        state.take_outage()?;
        match state.chapters.get_mut(&chapter_id) {
            Some(current) => {
                *current = position;
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("chapter {chapter_id}"))),
        }
    }

    async fn update_lesson_position(
        &self,
        lesson_id: LessonId,
        position: Position,
        chapter_id: ChapterId,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().expect("state");
        state
            .calls
            .push(Call::LessonPosition(lesson_id, position, chapter_id));
        state.take_outage()?;
        if state.reject_lesson_updates {
            return Err(StoreError::Unavailable("lesson endpoint down".into()));
        }
        match state.lessons.get_mut(&lesson_id) {
            Some(current) => {
                *current = (chapter_id, position);
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("lesson {lesson_id}"))),
        }
    }

    async fn apply_positions(
        &self,
        _course_id: CourseId,
        updates: &[PositionUpdate],
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().expect("state");
        state.calls.push(Call::Batch(updates.len()));
        state.take_outage()?;
        if state.reject_batches {
            return Err(StoreError::Conflict("batch rejected".into()));
        }
        for update in updates {
            let known = match update {
                PositionUpdate::Chapter { chapter_id, .. } => {
                    state.chapters.contains_key(chapter_id)
                }
                PositionUpdate::Lesson { lesson_id, .. } => state.lessons.contains_key(lesson_id),
            };
            if !known {
                return Err(StoreError::Conflict(format!("unknown entity in {update:?}")));
            }
        }
        for update in updates {
            match *update {
                PositionUpdate::Chapter {
                    chapter_id,
                    position,
                } => {
                    state.chapters.insert(chapter_id, position);
                }
                PositionUpdate::Lesson {
                    lesson_id,
                    chapter_id,
                    position,
                } => {
                    state.lessons.insert(lesson_id, (chapter_id, position));
                }
            }
        }
        Ok(())
    }

    async fn delete_chapter(&self, chapter_id: ChapterId) -> Result<(), StoreError> {
        let mut state = self.state.lock().expect("state");
        state.calls.push(Call::DeleteChapter(chapter_id));
        state.take_outage()?;
        if state.chapters.remove(&chapter_id).is_none() {
            return Err(StoreError::NotFound(format!("chapter {chapter_id}")));
        }
        state.lessons.retain(|_, (chapter, _)| *chapter != chapter_id);
        state.compact_chapters();
        Ok(())
    }

    async fn delete_lesson(&self, lesson_id: LessonId) -> Result<(), StoreError> {
        let mut state = self.state.lock().expect("state");
        state.calls.push(Call::DeleteLesson(lesson_id));
        state.take_outage()?;
        let Some((chapter_id, _)) = state.lessons.remove(&lesson_id) else {
            return Err(StoreError::NotFound(format!("lesson {lesson_id}")));
        };
        state.compact_lessons(chapter_id);
        Ok(())
    }

    async fn create_chapter(
        &self,
        course_id: CourseId,
        title: &str,
    ) -> Result<ChapterSummary, StoreError> {
        let mut state = self.state.lock().expect("state");
        state.calls.push(Call::CreateChapter(title.to_string()));
        state.take_outage()?;
        state.next_id += 1;
        let chapter_id = ChapterId(state.next_id);
        let position = state.chapters.len() as Position + 1;
        state.chapters.insert(chapter_id, position);
        Ok(ChapterSummary {
            chapter_id,
            course_id,
            title: title.to_string(),
            position,
            lessons: Vec::new(),
        })
    }

    async fn create_lesson(
        &self,
        chapter_id: ChapterId,
        title: &str,
    ) -> Result<LessonSummary, StoreError> {
        let mut state = self.state.lock().expect("state");
        state
            .calls
            .push(Call::CreateLesson(chapter_id, title.to_string()));
        state.take_outage()?;
        if !state.chapters.contains_key(&chapter_id) {
            return Err(StoreError::NotFound(format!("chapter {chapter_id}")));
        }
        state.next_id += 1;
        let lesson_id = LessonId(state.next_id);
        let position = state
            .lessons
            .values()
            .filter(|(chapter, _)| *chapter == chapter_id)
            .count() as Position
            + 1;
        state.lessons.insert(lesson_id, (chapter_id, position));
        Ok(LessonSummary {
            lesson_id,
            chapter_id,
            title: title.to_string(),
            position,
        })
    }
}
