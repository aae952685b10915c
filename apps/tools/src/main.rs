use anyhow::{anyhow, Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use course_tree::{CourseTree, DragGesture, StructureEditor, SyncStrategy};
use server_api::{validate_course_title, validate_slug, validate_title};
use shared::domain::{ChapterId, CourseId, CourseStatus, LessonId, NodeRef};
use storage::Storage;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://./data/courses.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    CreateCourse {
        title: String,
        slug: String,
        #[arg(long, default_value = "draft")]
        status: String,
    },
    CreateChapter {
        course_id: i64,
        title: String,
    },
    CreateLesson {
        chapter_id: i64,
        title: String,
    },
    /// Prints the ordered chapter and lesson tree.
    Show {
        course_id: i64,
    },
    /// Drops a chapter onto another chapter.
    MoveChapter {
        course_id: i64,
        chapter_id: i64,
        target_chapter_id: i64,
    },
    /// Drops a lesson onto another lesson or onto a chapter header.
    #[command(group(ArgGroup::new("target").required(true).args(["onto_lesson", "onto_chapter"])))]
    MoveLesson {
        course_id: i64,
        lesson_id: i64,
        #[arg(long)]
        onto_lesson: Option<i64>,
        #[arg(long)]
        onto_chapter: Option<i64>,
    },
    DeleteChapter {
        chapter_id: i64,
    },
    DeleteLesson {
        lesson_id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::CreateCourse {
            title,
            slug,
            status,
        } => {
            let status = CourseStatus::parse(&status)
                .ok_or_else(|| anyhow!("unknown status '{status}' (draft, published, archived)"))?;
            let title = validate_course_title(&title).map_err(|e| anyhow!(e.message))?;
            let slug = validate_slug(&slug).map_err(|e| anyhow!(e.message))?;
            let course_id = storage.create_course(&title, &slug, status).await?;
            println!("created course_id={course_id}");
        }
        Command::CreateChapter { course_id, title } => {
            let title = validate_title(&title).map_err(|e| anyhow!(e.message))?;
            let chapter = storage
                .create_chapter(CourseId(course_id), &title)
                .await?
                .ok_or_else(|| anyhow!("course {course_id} not found"))?;
            println!(
                "created chapter_id={} position={}",
                chapter.chapter_id, chapter.position
            );
        }
        Command::CreateLesson { chapter_id, title } => {
            let title = validate_title(&title).map_err(|e| anyhow!(e.message))?;
            let lesson = storage
                .create_lesson(ChapterId(chapter_id), &title)
                .await?
                .ok_or_else(|| anyhow!("chapter {chapter_id} not found"))?;
            println!(
                "created lesson_id={} position={}",
                lesson.lesson_id, lesson.position
            );
        }
        Command::Show { course_id } => {
            let editor = open_editor(&storage, CourseId(course_id)).await?;
            print_tree(editor.tree());
        }
        Command::MoveChapter {
            course_id,
            chapter_id,
            target_chapter_id,
        } => {
            let gesture = DragGesture::chapter_onto_chapter(
                ChapterId(chapter_id),
                ChapterId(target_chapter_id),
            );
            apply_and_save(&storage, CourseId(course_id), gesture).await?;
        }
        Command::MoveLesson {
            course_id,
            lesson_id,
            onto_lesson,
            onto_chapter,
        } => {
            let target = match (onto_lesson, onto_chapter) {
                (Some(lesson), _) => NodeRef::Lesson(LessonId(lesson)),
                (None, Some(chapter)) => NodeRef::Chapter(ChapterId(chapter)),
                (None, None) => return Err(anyhow!("a drop target is required")),
            };
            let gesture = DragGesture::new(NodeRef::Lesson(LessonId(lesson_id)), target);
            apply_and_save(&storage, CourseId(course_id), gesture).await?;
        }
        Command::DeleteChapter { chapter_id } => {
            if !storage.delete_chapter(ChapterId(chapter_id)).await? {
                return Err(anyhow!("chapter {chapter_id} not found"));
            }
            println!("deleted chapter_id={chapter_id}");
        }
        Command::DeleteLesson { lesson_id } => {
            if !storage.delete_lesson(LessonId(lesson_id)).await? {
                return Err(anyhow!("lesson {lesson_id} not found"));
            }
            println!("deleted lesson_id={lesson_id}");
        }
    }

    Ok(())
}

async fn open_editor(storage: &Storage, course_id: CourseId) -> Result<StructureEditor> {
    let structure = storage
        .load_course_structure(course_id)
        .await?
        .ok_or_else(|| anyhow!("course {course_id} not found"))?;
    Ok(StructureEditor::from_structure(structure))
}

async fn apply_and_save(storage: &Storage, course_id: CourseId, gesture: DragGesture) -> Result<()> {
    let mut editor = open_editor(storage, course_id).await?;
    if !editor.apply(gesture)? {
        println!("order unchanged");
        return Ok(());
    }
    let report = editor
        .save(storage, SyncStrategy::default())
        .await
        .context("saving the new order failed, nothing was changed")?;
    println!("saved {} position updates", report.applied);
    print_tree(editor.tree());
    Ok(())
}

fn print_tree(tree: &CourseTree) {
    println!("course {}", tree.course_id);
    for chapter in &tree.chapters {
        println!("{:>3}. [{}] {}", chapter.position, chapter.id, chapter.title);
        for lesson in &chapter.lessons {
            println!("     {:>3}. [{}] {}", lesson.position, lesson.id, lesson.title);
        }
    }
}
