use std::collections::BTreeSet;

use shared::domain::{ChapterId, LessonId, NodeRef};
use thiserror::Error;

use crate::tree::CourseTree;

/// A finished drag: `dragged` was dropped over `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DragGesture {
    pub dragged: NodeRef,
    pub target: NodeRef,
}

impl DragGesture {
    pub fn new(dragged: NodeRef, target: NodeRef) -> Self {
        Self { dragged, target }
    }

    pub fn chapter_onto_chapter(dragged: ChapterId, target: ChapterId) -> Self {
        Self::new(NodeRef::Chapter(dragged), NodeRef::Chapter(target))
    }

    pub fn lesson_onto_lesson(dragged: LessonId, target: LessonId) -> Self {
        Self::new(NodeRef::Lesson(dragged), NodeRef::Lesson(target))
    }

    pub fn lesson_onto_chapter(dragged: LessonId, target: ChapterId) -> Self {
        Self::new(NodeRef::Lesson(dragged), NodeRef::Chapter(target))
    }
}

/// Which ordered lists a reorder rewrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Touched {
    pub chapter_list: bool,
    pub lesson_lists: BTreeSet<ChapterId>,
}

impl Touched {
    pub fn is_empty(&self) -> bool {
        !self.chapter_list && self.lesson_lists.is_empty()
    }

    pub fn merge(&mut self, other: Touched) {
        self.chapter_list |= other.chapter_list;
        self.lesson_lists.extend(other.lesson_lists);
    }

    pub fn touches_lessons_of(&self, chapter_id: ChapterId) -> bool {
        self.lesson_lists.contains(&chapter_id)
    }

    fn chapters() -> Self {
        Self {
            chapter_list: true,
            lesson_lists: BTreeSet::new(),
        }
    }

    fn lessons_of(chapter_ids: impl IntoIterator<Item = ChapterId>) -> Self {
        Self {
            chapter_list: false,
            lesson_lists: chapter_ids.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reordered {
    pub tree: CourseTree,
    pub touched: Touched,
}

impl Reordered {
    pub fn is_noop(&self) -> bool {
        self.touched.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReorderError {
    #[error("chapter {0} is not part of the course")]
    UnknownChapter(ChapterId),
    #[error("lesson {0} is not part of the course")]
    UnknownLesson(LessonId),
}

/// Applies a drag gesture to a copy of `tree`.
///
/// Chapters dropped on chapters and lessons dropped on lessons of the same
/// chapter are classic array moves. A lesson dropped on another chapter's
/// lesson is inserted at that lesson's index; dropped on a chapter header it is
/// appended to that chapter (its own chapter included). A chapter dropped on a
/// lesson behaves as if dropped on the lesson's chapter. Every list that changes
/// is renumbered 1..N; lists that do not change are left exactly as they were.
pub fn reorder(tree: &CourseTree, gesture: DragGesture) -> Result<Reordered, ReorderError> {
    if gesture.dragged == gesture.target {
        ensure_known(tree, gesture.dragged)?;
        return Ok(Reordered {
            tree: tree.clone(),
            touched: Touched::default(),
        });
    }

    let mut next = tree.clone();
    let touched = match (gesture.dragged, gesture.target) {
        (NodeRef::Chapter(dragged), NodeRef::Chapter(target)) => {
            move_chapter(&mut next, dragged, target)?
        }
        (NodeRef::Chapter(dragged), NodeRef::Lesson(target)) => {
            let (chapter_index, _) = next
                .locate_lesson(target)
                .ok_or(ReorderError::UnknownLesson(target))?;
            let owner = next.chapters[chapter_index].id;
            if owner == dragged {
                Touched::default()
            } else {
                move_chapter(&mut next, dragged, owner)?
            }
        }
        (NodeRef::Lesson(dragged), NodeRef::Lesson(target)) => {
            let (chapter_index, lesson_index) = next
                .locate_lesson(target)
                .ok_or(ReorderError::UnknownLesson(target))?;
            move_lesson(&mut next, dragged, chapter_index, Some(lesson_index))?
        }
        (NodeRef::Lesson(dragged), NodeRef::Chapter(target)) => {
            let chapter_index = next
                .chapter_index(target)
                .ok_or(ReorderError::UnknownChapter(target))?;
            move_lesson(&mut next, dragged, chapter_index, None)?
        }
    };

    if touched.is_empty() {
        return Ok(Reordered {
            tree: tree.clone(),
            touched,
        });
    }

    if touched.chapter_list {
        debug_assert_eq!(next.check_chapter_positions(), Ok(()));
    }
    for chapter_id in &touched.lesson_lists {
        debug_assert_eq!(next.check_lesson_positions(*chapter_id), Ok(()));
    }

    Ok(Reordered {
        tree: next,
        touched,
    })
}

fn ensure_known(tree: &CourseTree, node: NodeRef) -> Result<(), ReorderError> {
    match node {
        NodeRef::Chapter(id) if tree.chapter_index(id).is_none() => {
            Err(ReorderError::UnknownChapter(id))
        }
        NodeRef::Lesson(id) if tree.locate_lesson(id).is_none() => {
            Err(ReorderError::UnknownLesson(id))
        }
        _ => Ok(()),
    }
}

fn move_chapter(
    tree: &mut CourseTree,
    dragged: ChapterId,
    target: ChapterId,
) -> Result<Touched, ReorderError> {
    let from = tree
        .chapter_index(dragged)
        .ok_or(ReorderError::UnknownChapter(dragged))?;
    let to = tree
        .chapter_index(target)
        .ok_or(ReorderError::UnknownChapter(target))?;
    if from == to {
        return Ok(Touched::default());
    }

    array_move(&mut tree.chapters, from, to);
    tree.renumber_chapters();
    Ok(Touched::chapters())
}

/// Moves a lesson into the chapter at `dest_chapter`. `dest_lesson` is the index
/// of the lesson it was dropped on, or `None` for the chapter header.
fn move_lesson(
    tree: &mut CourseTree,
    dragged: LessonId,
    dest_chapter: usize,
    dest_lesson: Option<usize>,
) -> Result<Touched, ReorderError> {
    let (src_chapter, src_lesson) = tree
        .locate_lesson(dragged)
        .ok_or(ReorderError::UnknownLesson(dragged))?;

    if src_chapter == dest_chapter {
        let chapter = &mut tree.chapters[src_chapter];
        let last = chapter.lessons.len() - 1;
        let to = dest_lesson.unwrap_or(last);
        if to == src_lesson {
            return Ok(Touched::default());
        }
        array_move(&mut chapter.lessons, src_lesson, to);
        chapter.renumber_lessons();
        return Ok(Touched::lessons_of([chapter.id]));
    }

    let lesson = tree.chapters[src_chapter].lessons.remove(src_lesson);
    let destination = &mut tree.chapters[dest_chapter];
    let at = dest_lesson
        .unwrap_or(destination.lessons.len())
        .min(destination.lessons.len());
    destination.lessons.insert(at, lesson);
    destination.renumber_lessons();
    let destination_id = destination.id;

    let source = &mut tree.chapters[src_chapter];
    source.renumber_lessons();

    Ok(Touched::lessons_of([source.id, destination_id]))
}

fn array_move<T>(items: &mut Vec<T>, from: usize, to: usize) {
    let item = items.remove(from);
    items.insert(to, item);
}

#[cfg(test)]
#[path = "tests/reorder_tests.rs"]
mod tests;
