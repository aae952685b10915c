use super::*;
use crate::{
    reorder::{reorder, DragGesture},
    test_support::tree_of,
};
use shared::domain::{ChapterId, LessonId};

#[test]
fn untouched_tree_projects_nothing() {
    let tree = tree_of(&[(1, &[11])]);
    assert!(SyncPlan::project(&tree, &Touched::default()).is_empty());
}

#[test]
fn chapter_move_emits_every_chapter_and_no_lessons() {
    let tree = tree_of(&[(1, &[11]), (2, &[21]), (3, &[31])]);
    let result = reorder(&tree, DragGesture::chapter_onto_chapter(ChapterId(3), ChapterId(1)))
        .expect("reorder");
    let plan = SyncPlan::project(&result.tree, &result.touched);
    assert_eq!(
        plan.updates(),
        &[
            PositionUpdate::Chapter { chapter_id: ChapterId(3), position: 1 },
            PositionUpdate::Chapter { chapter_id: ChapterId(1), position: 2 },
            PositionUpdate::Chapter { chapter_id: ChapterId(2), position: 3 },
        ]
    );
    assert_eq!(plan.lesson_update_count(), 0);
}

#[test]
fn cross_chapter_move_emits_chapters_then_both_lesson_lists() {
    let tree = tree_of(&[(1, &[1, 2]), (2, &[3]), (3, &[4])]);
    let result = reorder(&tree, DragGesture::lesson_onto_chapter(LessonId(2), ChapterId(2)))
        .expect("reorder");
    let plan = SyncPlan::project(&result.tree, &result.touched);

    assert_eq!(plan.chapter_update_count(), 3);
    assert_eq!(
        &plan.updates()[3..],
        &[
            PositionUpdate::Lesson { lesson_id: LessonId(1), chapter_id: ChapterId(1), position: 1 },
            PositionUpdate::Lesson { lesson_id: LessonId(3), chapter_id: ChapterId(2), position: 1 },
            PositionUpdate::Lesson { lesson_id: LessonId(2), chapter_id: ChapterId(2), position: 2 },
        ]
    );
    assert!(plan
        .into_iter()
        .all(|update| !matches!(update, PositionUpdate::Lesson { lesson_id: LessonId(4), .. })));
}

#[test]
fn chapter_updates_precede_lesson_updates() {
    let tree = tree_of(&[(1, &[11, 12]), (2, &[21])]);
    let plan = SyncPlan::full(&tree);
    let first_lesson = plan
        .updates()
        .iter()
        .position(|update| matches!(update, PositionUpdate::Lesson { .. }))
        .expect("lesson update");
    assert_eq!(first_lesson, plan.chapter_update_count());
    assert_eq!(plan.len(), 5);
}

#[test]
fn positions_follow_list_order_not_stored_values() {
    let mut tree = tree_of(&[(1, &[11, 12]), (2, &[21]), (3, &[31])]);
    tree.chapters[2].position = 1;
    let result = reorder(&tree, DragGesture::lesson_onto_lesson(LessonId(12), LessonId(11)))
        .expect("reorder");
    let plan = SyncPlan::project(&result.tree, &result.touched);
    assert_eq!(
        plan.updates(),
        &[
            PositionUpdate::Chapter { chapter_id: ChapterId(1), position: 1 },
            PositionUpdate::Chapter { chapter_id: ChapterId(2), position: 2 },
            PositionUpdate::Chapter { chapter_id: ChapterId(3), position: 3 },
            PositionUpdate::Lesson { lesson_id: LessonId(12), chapter_id: ChapterId(1), position: 1 },
            PositionUpdate::Lesson { lesson_id: LessonId(11), chapter_id: ChapterId(1), position: 2 },
        ]
    );
}
