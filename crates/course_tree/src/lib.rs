//! Ordered two-level course structure (chapters containing lessons) and the
//! machinery that keeps its positions dense while an editor drags nodes around
//! and pushes the resulting order to a course store.

pub mod editor;
pub mod plan;
pub mod reorder;
pub mod store;
pub mod sync;
pub mod tree;

pub use editor::StructureEditor;
pub use plan::SyncPlan;
pub use reorder::{reorder, DragGesture, ReorderError, Reordered, Touched};
pub use store::{CourseStore, StoreError};
pub use sync::{sync_plan, RetryPolicy, SyncError, SyncReport, SyncStrategy};
pub use tree::{ChapterNode, CourseTree, InvariantViolation, LessonNode};

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;
