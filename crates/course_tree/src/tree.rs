use std::collections::HashSet;

use shared::{
    domain::{ChapterId, CourseId, LessonId, Position},
    protocol::{ChapterSummary, CourseStructure, LessonSummary},
};
use thiserror::Error;

use crate::reorder::Touched;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LessonNode {
    pub id: LessonId,
    pub chapter_id: ChapterId,
    pub title: String,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterNode {
    pub id: ChapterId,
    pub title: String,
    pub position: Position,
    pub lessons: Vec<LessonNode>,
    /// Editor view state only; never sent to the store.
    pub is_open: bool,
}

impl ChapterNode {
    pub fn lesson_ids(&self) -> Vec<LessonId> {
        self.lessons.iter().map(|lesson| lesson.id).collect()
    }

    pub(crate) fn renumber_lessons(&mut self) {
        let chapter_id = self.id;
        for (index, lesson) in self.lessons.iter_mut().enumerate() {
            lesson.position = position_for_index(index);
            lesson.chapter_id = chapter_id;
        }
    }

    fn check_lessons(&self) -> Result<(), InvariantViolation> {
        for (index, lesson) in self.lessons.iter().enumerate() {
            if lesson.chapter_id != self.id {
                return Err(InvariantViolation::LessonParent {
                    lesson_id: lesson.id,
                    listed_under: self.id,
                    chapter_id: lesson.chapter_id,
                });
            }
            let expected = position_for_index(index);
            if lesson.position != expected {
                return Err(InvariantViolation::LessonPosition {
                    lesson_id: lesson.id,
                    chapter_id: self.id,
                    expected,
                    actual: lesson.position,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseTree {
    pub course_id: CourseId,
    pub chapters: Vec<ChapterNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("chapter {chapter_id} has position {actual}, expected {expected}")]
    ChapterPosition {
        chapter_id: ChapterId,
        expected: Position,
        actual: Position,
    },
    #[error("lesson {lesson_id} in chapter {chapter_id} has position {actual}, expected {expected}")]
    LessonPosition {
        lesson_id: LessonId,
        chapter_id: ChapterId,
        expected: Position,
        actual: Position,
    },
    #[error("lesson {lesson_id} is listed under chapter {listed_under} but references chapter {chapter_id}")]
    LessonParent {
        lesson_id: LessonId,
        listed_under: ChapterId,
        chapter_id: ChapterId,
    },
    #[error("chapter {0} appears more than once")]
    DuplicateChapter(ChapterId),
    #[error("lesson {0} appears more than once")]
    DuplicateLesson(LessonId),
}

impl CourseTree {
    pub fn new(course_id: CourseId) -> Self {
        Self {
            course_id,
            chapters: Vec::new(),
        }
    }

    /// Builds the editor tree from a fetched structure. Chapters and lessons are
    /// ordered by their stored position (ties broken by id); positions are kept
    /// as stored so gaps left by older data stay visible to `check_invariants`.
    pub fn from_structure(structure: CourseStructure) -> Self {
        let mut chapters: Vec<ChapterNode> = structure
            .chapters
            .into_iter()
            .map(|chapter| {
                let mut lessons: Vec<LessonNode> = chapter
                    .lessons
                    .into_iter()
                    .map(|lesson| LessonNode {
                        id: lesson.lesson_id,
                        chapter_id: lesson.chapter_id,
                        title: lesson.title,
                        position: lesson.position,
                    })
                    .collect();
                lessons.sort_by_key(|lesson| (lesson.position, lesson.id));
                ChapterNode {
                    id: chapter.chapter_id,
                    title: chapter.title,
                    position: chapter.position,
                    lessons,
                    is_open: true,
                }
            })
            .collect();
        chapters.sort_by_key(|chapter| (chapter.position, chapter.id));

        Self {
            course_id: structure.course_id,
            chapters,
        }
    }

    pub fn to_structure(&self) -> CourseStructure {
        CourseStructure {
            course_id: self.course_id,
            chapters: self
                .chapters
                .iter()
                .map(|chapter| ChapterSummary {
                    chapter_id: chapter.id,
                    course_id: self.course_id,
                    title: chapter.title.clone(),
                    position: chapter.position,
                    lessons: chapter
                        .lessons
                        .iter()
                        .map(|lesson| LessonSummary {
                            lesson_id: lesson.id,
                            chapter_id: lesson.chapter_id,
                            title: lesson.title.clone(),
                            position: lesson.position,
                        })
                        .collect(),
                })
                .collect(),
        }
    }

    pub fn chapter(&self, chapter_id: ChapterId) -> Option<&ChapterNode> {
        self.chapters.iter().find(|chapter| chapter.id == chapter_id)
    }

    pub fn chapter_index(&self, chapter_id: ChapterId) -> Option<usize> {
        self.chapters
            .iter()
            .position(|chapter| chapter.id == chapter_id)
    }

    /// Returns `(chapter_index, lesson_index)` for a lesson.
    pub fn locate_lesson(&self, lesson_id: LessonId) -> Option<(usize, usize)> {
        self.chapters
            .iter()
            .enumerate()
            .find_map(|(chapter_index, chapter)| {
                chapter
                    .lessons
                    .iter()
                    .position(|lesson| lesson.id == lesson_id)
                    .map(|lesson_index| (chapter_index, lesson_index))
            })
    }

    pub fn lesson(&self, lesson_id: LessonId) -> Option<&LessonNode> {
        self.locate_lesson(lesson_id)
            .map(|(chapter_index, lesson_index)| {
                &self.chapters[chapter_index].lessons[lesson_index]
            })
    }

    pub fn chapter_ids(&self) -> Vec<ChapterId> {
        self.chapters.iter().map(|chapter| chapter.id).collect()
    }

    pub fn lesson_count(&self) -> usize {
        self.chapters
            .iter()
            .map(|chapter| chapter.lessons.len())
            .sum()
    }

    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        self.check_chapter_positions()?;

        let mut seen_chapters = HashSet::new();
        let mut seen_lessons = HashSet::new();
        for chapter in &self.chapters {
            if !seen_chapters.insert(chapter.id) {
                return Err(InvariantViolation::DuplicateChapter(chapter.id));
            }
            for lesson in &chapter.lessons {
                if !seen_lessons.insert(lesson.id) {
                    return Err(InvariantViolation::DuplicateLesson(lesson.id));
                }
            }
            chapter.check_lessons()?;
        }
        Ok(())
    }

    pub fn check_chapter_positions(&self) -> Result<(), InvariantViolation> {
        for (index, chapter) in self.chapters.iter().enumerate() {
            let expected = position_for_index(index);
            if chapter.position != expected {
                return Err(InvariantViolation::ChapterPosition {
                    chapter_id: chapter.id,
                    expected,
                    actual: chapter.position,
                });
            }
        }
        Ok(())
    }

    pub fn check_lesson_positions(&self, chapter_id: ChapterId) -> Result<(), InvariantViolation> {
        match self.chapter(chapter_id) {
            Some(chapter) => chapter.check_lessons(),
            None => Ok(()),
        }
    }

    /// Renumbers every list whose positions are not 1..N, keeping its order.
    /// Returns the lists that were rewritten.
    pub fn normalize_positions(&mut self) -> Touched {
        let mut touched = Touched::default();
        if self.check_chapter_positions().is_err() {
            self.renumber_chapters();
            touched.chapter_list = true;
        }
        for chapter in &mut self.chapters {
            if chapter.check_lessons().is_err() {
                chapter.renumber_lessons();
                touched.lesson_lists.insert(chapter.id);
            }
        }
        touched
    }

    pub(crate) fn renumber_chapters(&mut self) {
        for (index, chapter) in self.chapters.iter_mut().enumerate() {
            chapter.position = position_for_index(index);
        }
    }

    /// Removes a chapter with all of its lessons and compacts the remaining
    /// chapter positions.
    pub fn remove_chapter(&mut self, chapter_id: ChapterId) -> Option<ChapterNode> {
        let index = self.chapter_index(chapter_id)?;
        let removed = self.chapters.remove(index);
        self.renumber_chapters();
        Some(removed)
    }

    /// Removes a lesson and compacts its former siblings.
    pub fn remove_lesson(&mut self, lesson_id: LessonId) -> Option<LessonNode> {
        let (chapter_index, lesson_index) = self.locate_lesson(lesson_id)?;
        let chapter = &mut self.chapters[chapter_index];
        let removed = chapter.lessons.remove(lesson_index);
        chapter.renumber_lessons();
        Some(removed)
    }

    /// Appends a freshly created chapter at the end of the course.
    pub fn push_chapter(&mut self, chapter: ChapterSummary) {
        let mut node = ChapterNode {
            id: chapter.chapter_id,
            title: chapter.title,
            position: 0,
            lessons: chapter
                .lessons
                .into_iter()
                .map(|lesson| LessonNode {
                    id: lesson.lesson_id,
                    chapter_id: chapter.chapter_id,
                    title: lesson.title,
                    position: lesson.position,
                })
                .collect(),
            is_open: true,
        };
        node.renumber_lessons();
        self.chapters.push(node);
        self.renumber_chapters();
    }

    /// Appends a freshly created lesson to its chapter. Returns `false` when the
    /// chapter is not part of this tree.
    pub fn push_lesson(&mut self, lesson: LessonSummary) -> bool {
        let Some(index) = self.chapter_index(lesson.chapter_id) else {
            return false;
        };
        let chapter = &mut self.chapters[index];
        chapter.lessons.push(LessonNode {
            id: lesson.lesson_id,
            chapter_id: lesson.chapter_id,
            title: lesson.title,
            position: lesson.position,
        });
        chapter.renumber_lessons();
        true
    }
}

pub(crate) fn position_for_index(index: usize) -> Position {
    Position::try_from(index + 1).unwrap_or(Position::MAX)
}

#[cfg(test)]
#[path = "tests/tree_tests.rs"]
mod tests;
