use super::*;
use shared::domain::CourseStatus;

async fn setup() -> (ApiContext, UserId, CourseId) {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let ctx = ApiContext::new(storage);
    let user = create_user(&ctx, "alice").await.expect("user").user_id;
    let course = create_course(
        &ctx,
        CreateCourseRequest {
            title: "Rust in practice".into(),
            slug: "rust-in-practice".into(),
            status: CourseStatus::Published,
        },
    )
    .await
    .expect("course")
    .course_id;
    (ctx, user, course)
}

async fn chapter(ctx: &ApiContext, course_id: CourseId, title: &str) -> ChapterId {
    create_chapter(
        ctx,
        CreateChapterRequest {
            course_id,
            title: title.into(),
        },
    )
    .await
    .expect("chapter")
    .chapter_id
}

async fn lesson(ctx: &ApiContext, chapter_id: ChapterId, title: &str) -> LessonId {
    create_lesson(
        ctx,
        CreateLessonRequest {
            chapter_id,
            title: title.into(),
        },
    )
    .await
    .expect("lesson")
    .lesson_id
}

#[test]
fn titles_are_trimmed_and_bounded() {
    assert_eq!(validate_title("  Intro  ").expect("valid"), "Intro");
    assert!(validate_title("   ").is_err());
    assert!(validate_title(&"x".repeat(MAX_TITLE_CHARS)).is_ok());
    assert!(validate_title(&"x".repeat(MAX_TITLE_CHARS + 1)).is_err());
}

#[test]
fn course_titles_need_three_characters() {
    assert!(validate_title("Go").is_ok());
    assert!(validate_course_title("Go").is_err());
    assert_eq!(validate_course_title("  Zig  ").expect("valid"), "Zig");
    assert!(validate_course_title(&"x".repeat(MAX_TITLE_CHARS + 1)).is_err());
}

#[tokio::test]
async fn short_course_title_is_rejected_but_short_chapter_titles_are_not() {
    let (ctx, _, course) = setup().await;
    let err = create_course(
        &ctx,
        CreateCourseRequest {
            title: "C".into(),
            slug: "c".into(),
            status: CourseStatus::Draft,
        },
    )
    .await
    .expect_err("too short");
    assert_eq!(err.code, ErrorCode::Validation);
    assert!(ctx.storage.course_by_slug("c").await.expect("lookup").is_none());

    chapter(&ctx, course, "C").await;
}

#[test]
fn slugs_are_lowercase_with_inner_dashes() {
    assert!(validate_slug("rust-101").is_ok());
    assert!(validate_slug("Rust").is_err());
    assert!(validate_slug("-rust").is_err());
    assert!(validate_slug("rust course").is_err());
}

#[tokio::test]
async fn duplicate_slug_is_a_conflict() {
    let (ctx, _, _) = setup().await;
    let err = create_course(
        &ctx,
        CreateCourseRequest {
            title: "Again".into(),
            slug: "rust-in-practice".into(),
            status: CourseStatus::Draft,
        },
    )
    .await
    .expect_err("duplicate");
    assert_eq!(err.code, ErrorCode::Conflict);
    assert_eq!(
        list_courses(&ctx, CourseQuery::default())
            .await
            .expect("list")
            .len(),
        1
    );
}

#[tokio::test]
async fn course_list_takes_search_and_limit() {
    let (ctx, _, course) = setup().await;
    for (title, slug) in [("Go for Rustaceans", "go"), ("Zig tour", "zig")] {
        create_course(
            &ctx,
            CreateCourseRequest {
                title: title.into(),
                slug: slug.into(),
                status: CourseStatus::Published,
            },
        )
        .await
        .expect("course");
    }

    let query = |search: Option<&str>, limit: Option<u32>| CourseQuery {
        search: search.map(String::from),
        limit,
    };
    let rust = list_courses(&ctx, query(Some(" rust "), None))
        .await
        .expect("search");
    assert_eq!(rust.len(), 2);
    assert!(rust.iter().any(|summary| summary.course_id == course));
    assert_eq!(list_courses(&ctx, query(Some("  "), None)).await.expect("blank").len(), 3);
    assert_eq!(list_courses(&ctx, query(None, Some(1))).await.expect("limit").len(), 1);

    for limit in [0, MAX_COURSE_LIMIT + 1] {
        let err = list_courses(&ctx, query(None, Some(limit)))
            .await
            .expect_err("bad limit");
        assert_eq!(err.code, ErrorCode::Validation);
    }
}

#[tokio::test]
async fn course_by_slug_and_user_courses() {
    let (ctx, user, course) = setup().await;
    let found = course_by_slug(&ctx, "rust-in-practice").await.expect("slug");
    assert_eq!(found.course_id, course);
    assert_eq!(found.status, CourseStatus::Published);
    let missing = course_by_slug(&ctx, "nope").await.expect_err("missing");
    assert_eq!(missing.code, ErrorCode::NotFound);

    assert!(user_courses(&ctx, user).await.expect("none").is_empty());
    enroll(&ctx, user, course).await.expect("enroll");
    let enrolled = user_courses(&ctx, user).await.expect("enrolled");
    assert_eq!(enrolled, vec![found]);

    let err = user_courses(&ctx, UserId(404)).await.expect_err("no user");
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn structure_of_unknown_course_is_not_found() {
    let (ctx, _, _) = setup().await;
    let err = course_structure(&ctx, CourseId(404))
        .await
        .expect_err("missing");
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn set_positions_reorders_chapters() {
    let (ctx, _, course) = setup().await;
    let a = chapter(&ctx, course, "A").await;
    let b = chapter(&ctx, course, "B").await;

    let response = set_positions(
        &ctx,
        course,
        SetPositionsRequest {
            updates: vec![
                PositionUpdate::Chapter { chapter_id: b, position: 1 },
                PositionUpdate::Chapter { chapter_id: a, position: 2 },
            ],
        },
    )
    .await
    .expect("positions");
    assert_eq!(response.applied, 2);

    let structure = course_structure(&ctx, course).await.expect("structure");
    let order: Vec<ChapterId> = structure.chapters.iter().map(|c| c.chapter_id).collect();
    assert_eq!(order, vec![b, a]);
}

#[tokio::test]
async fn set_positions_validates_before_writing() {
    let (ctx, _, course) = setup().await;
    let a = chapter(&ctx, course, "A").await;

    let zero = set_positions(
        &ctx,
        course,
        SetPositionsRequest {
            updates: vec![PositionUpdate::Chapter { chapter_id: a, position: 0 }],
        },
    )
    .await
    .expect_err("zero");
    assert_eq!(zero.code, ErrorCode::Validation);

    let repeated = set_positions(
        &ctx,
        course,
        SetPositionsRequest {
            updates: vec![
                PositionUpdate::Chapter { chapter_id: a, position: 1 },
                PositionUpdate::Chapter { chapter_id: a, position: 1 },
            ],
        },
    )
    .await
    .expect_err("repeated");
    assert_eq!(repeated.code, ErrorCode::Validation);
}

#[tokio::test]
async fn non_dense_batch_is_a_conflict() {
    let (ctx, _, course) = setup().await;
    let a = chapter(&ctx, course, "A").await;
    chapter(&ctx, course, "B").await;

    let err = set_positions(
        &ctx,
        course,
        SetPositionsRequest {
            updates: vec![PositionUpdate::Chapter { chapter_id: a, position: 2 }],
        },
    )
    .await
    .expect_err("gap");
    assert_eq!(err.code, ErrorCode::Conflict);
}

#[tokio::test]
async fn update_lesson_moves_between_chapters() {
    let (ctx, _, course) = setup().await;
    let a = chapter(&ctx, course, "A").await;
    let b = chapter(&ctx, course, "B").await;
    let moved = lesson(&ctx, a, "one").await;

    let missing_position = update_lesson(
        &ctx,
        moved,
        UpdateLessonRequest {
            chapter_id: Some(b),
            ..Default::default()
        },
    )
    .await
    .expect_err("position required");
    assert_eq!(missing_position.code, ErrorCode::Validation);

    let updated = update_lesson(
        &ctx,
        moved,
        UpdateLessonRequest {
            title: Some("  renamed ".into()),
            position: Some(1),
            chapter_id: Some(b),
        },
    )
    .await
    .expect("update");
    assert_eq!(updated.chapter_id, b);
    assert_eq!(updated.position, 1);
    assert_eq!(updated.title, "renamed");
}

#[tokio::test]
async fn update_chapter_requires_a_change() {
    let (ctx, _, course) = setup().await;
    let a = chapter(&ctx, course, "A").await;

    let err = update_chapter(&ctx, a, UpdateChapterRequest::default())
        .await
        .expect_err("empty");
    assert_eq!(err.code, ErrorCode::Validation);

    let renamed = update_chapter(
        &ctx,
        a,
        UpdateChapterRequest {
            title: Some("Basics".into()),
            position: None,
        },
    )
    .await
    .expect("rename");
    assert_eq!(renamed.title, "Basics");

    let missing = update_chapter(
        &ctx,
        ChapterId(999),
        UpdateChapterRequest {
            title: Some("Nope".into()),
            position: None,
        },
    )
    .await
    .expect_err("missing");
    assert_eq!(missing.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn deletes_report_missing_entities() {
    let (ctx, _, course) = setup().await;
    let a = chapter(&ctx, course, "A").await;
    let one = lesson(&ctx, a, "one").await;

    delete_lesson(&ctx, one).await.expect("delete lesson");
    assert_eq!(
        delete_lesson(&ctx, one).await.expect_err("gone").code,
        ErrorCode::NotFound
    );
    delete_chapter(&ctx, a).await.expect("delete chapter");
    assert_eq!(
        delete_chapter(&ctx, a).await.expect_err("gone").code,
        ErrorCode::NotFound
    );
}

#[tokio::test]
async fn progress_requires_enrollment() {
    let (ctx, user, course) = setup().await;
    let a = chapter(&ctx, course, "A").await;
    let one = lesson(&ctx, a, "one").await;
    lesson(&ctx, a, "two").await;

    let err = set_lesson_progress(
        &ctx,
        one,
        SetProgressRequest {
            user_id: user,
            completed: true,
        },
    )
    .await
    .expect_err("not enrolled");
    assert_eq!(err.code, ErrorCode::Forbidden);

    assert!(enroll(&ctx, user, course).await.expect("enroll").newly_enrolled);
    let untouched = lesson_progress(&ctx, user, one).await.expect("progress");
    assert!(!untouched.completed);

    let done = set_lesson_progress(
        &ctx,
        one,
        SetProgressRequest {
            user_id: user,
            completed: true,
        },
    )
    .await
    .expect("complete");
    assert!(done.completed);
    assert!(done.completed_at.is_some());

    let summary = course_progress(&ctx, user, course).await.expect("summary");
    assert_eq!(summary.total_lessons, 2);
    assert_eq!(summary.completed_lesson_ids, vec![one]);
    assert_eq!(summary.percent_complete, 50.0);
}

#[tokio::test]
async fn enroll_checks_user_and_course() {
    let (ctx, user, course) = setup().await;
    assert_eq!(
        enroll(&ctx, UserId(999), course).await.expect_err("user").code,
        ErrorCode::NotFound
    );
    assert_eq!(
        enroll(&ctx, user, CourseId(999)).await.expect_err("course").code,
        ErrorCode::NotFound
    );
    enroll(&ctx, user, course).await.expect("enroll");
    assert!(!enroll(&ctx, user, course).await.expect("again").newly_enrolled);
}
