use shared::protocol::PositionUpdate;

use crate::{
    reorder::Touched,
    tree::{position_for_index, ChapterNode, CourseTree},
};

/// Ordered position writes that bring a store in line with a local tree.
///
/// Chapter updates always come first so chapter positions settle before any
/// lesson update that references them. Positions are taken from list order,
/// not from the nodes, so a plan always describes dense 1..N lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    updates: Vec<PositionUpdate>,
}

impl SyncPlan {
    /// Every chapter of the tree, then every lesson of each touched chapter.
    /// Nothing is emitted when nothing was touched.
    pub fn project(tree: &CourseTree, touched: &Touched) -> Self {
        if touched.is_empty() {
            return Self::default();
        }

        let mut updates = chapter_updates(tree);
        for chapter in &tree.chapters {
            if touched.touches_lessons_of(chapter.id) {
                updates.extend(lesson_updates(chapter));
            }
        }
        Self { updates }
    }

    /// Every chapter and every lesson of the tree.
    pub fn full(tree: &CourseTree) -> Self {
        let mut updates = chapter_updates(tree);
        for chapter in &tree.chapters {
            updates.extend(lesson_updates(chapter));
        }
        Self { updates }
    }

    pub fn updates(&self) -> &[PositionUpdate] {
        &self.updates
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn chapter_update_count(&self) -> usize {
        self.updates
            .iter()
            .filter(|update| matches!(update, PositionUpdate::Chapter { .. }))
            .count()
    }

    pub fn lesson_update_count(&self) -> usize {
        self.len() - self.chapter_update_count()
    }
}

impl<'a> IntoIterator for &'a SyncPlan {
    type Item = &'a PositionUpdate;
    type IntoIter = std::slice::Iter<'a, PositionUpdate>;

    fn into_iter(self) -> Self::IntoIter {
        self.updates.iter()
    }
}

fn chapter_updates(tree: &CourseTree) -> Vec<PositionUpdate> {
    tree.chapters
        .iter()
        .enumerate()
        .map(|(index, chapter)| PositionUpdate::Chapter {
            chapter_id: chapter.id,
            position: position_for_index(index),
        })
        .collect()
}

fn lesson_updates(chapter: &ChapterNode) -> impl Iterator<Item = PositionUpdate> + '_ {
    let chapter_id = chapter.id;
    chapter
        .lessons
        .iter()
        .enumerate()
        .map(move |(index, lesson)| PositionUpdate::Lesson {
            lesson_id: lesson.id,
            chapter_id,
            position: position_for_index(index),
        })
}

#[cfg(test)]
#[path = "tests/plan_tests.rs"]
mod tests;
