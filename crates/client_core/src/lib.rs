use anyhow::{anyhow, Result};
use async_trait::async_trait;
use course_tree::{CourseStore, StoreError, StructureEditor};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use shared::{
    domain::{ChapterId, CourseId, LessonId, Position},
    error::{ApiError, ErrorCode},
    protocol::{
        ChapterSummary, CourseQuery, CourseStructure, CourseSummary, CreateChapterRequest,
        CreateLessonRequest,
        LessonSummary, PositionUpdate, SetPositionsRequest, SetPositionsResponse,
        UpdateChapterRequest, UpdateLessonRequest,
    },
};
use tracing::{debug, warn};
use url::Url;

/// `CourseStore` backed by the HTTP service.
#[derive(Clone)]
pub struct RemoteCourseStore {
    http: Client,
    server_url: String,
}

impl RemoteCourseStore {
    pub fn new(server_url: impl Into<String>) -> Result<Self> {
        Self::with_client(Client::new(), server_url)
    }

    pub fn with_client(http: Client, server_url: impl Into<String>) -> Result<Self> {
        let server_url = server_url.into();
        let parsed = Url::parse(&server_url)?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(anyhow!("server_url must start with http:// or https://"));
        }
        Ok(Self {
            http,
            server_url: server_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub async fn list_courses(&self, query: &CourseQuery) -> Result<Vec<CourseSummary>, StoreError> {
        read_json(self.http.get(self.url("/courses")).query(query)).await
    }

    pub async fn fetch_structure(&self, course_id: CourseId) -> Result<CourseStructure, StoreError> {
        read_json(
            self.http
                .get(self.url(&format!("/courses/{course_id}/structure"))),
        )
        .await
    }

    /// Loads the current structure into a fresh editor. Nothing is pending
    /// unless the stored positions had gaps.
    pub async fn open_editor(&self, course_id: CourseId) -> Result<StructureEditor, StoreError> {
        let structure = self.fetch_structure(course_id).await?;
        Ok(StructureEditor::from_structure(structure))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.server_url)
    }

    async fn put_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<(), StoreError> {
        expect_success(self.http.put(self.url(path)).json(body)).await
    }
}

#[async_trait]
impl CourseStore for RemoteCourseStore {
    async fn update_chapter_position(
        &self,
        chapter_id: ChapterId,
        position: Position,
    ) -> Result<(), StoreError> {
        self.put_json(
            &format!("/chapters/{chapter_id}"),
            &UpdateChapterRequest {
                title: None,
                position: Some(position),
            },
        )
        .await
    }

    async fn update_lesson_position(
        &self,
        lesson_id: LessonId,
        position: Position,
        chapter_id: ChapterId,
    ) -> Result<(), StoreError> {
        self.put_json(
            &format!("/lessons/{lesson_id}"),
            &UpdateLessonRequest {
                title: None,
                position: Some(position),
                chapter_id: Some(chapter_id),
            },
        )
        .await
    }

    async fn apply_positions(
        &self,
        course_id: CourseId,
        updates: &[PositionUpdate],
    ) -> Result<(), StoreError> {
        let response: SetPositionsResponse = read_json(
            self.http
                .put(self.url(&format!("/courses/{course_id}/positions")))
                .json(&SetPositionsRequest {
                    updates: updates.to_vec(),
                }),
        )
        .await?;
        debug!(course_id = course_id.0, applied = response.applied, "position batch accepted");
        Ok(())
    }

    async fn delete_chapter(&self, chapter_id: ChapterId) -> Result<(), StoreError> {
        expect_success(self.http.delete(self.url(&format!("/chapters/{chapter_id}")))).await
    }

    async fn delete_lesson(&self, lesson_id: LessonId) -> Result<(), StoreError> {
        expect_success(self.http.delete(self.url(&format!("/lessons/{lesson_id}")))).await
    }

    async fn create_chapter(
        &self,
        course_id: CourseId,
        title: &str,
    ) -> Result<ChapterSummary, StoreError> {
        read_json(self.http.post(self.url("/chapters")).json(&CreateChapterRequest {
            course_id,
            title: title.to_string(),
        }))
        .await
    }

    async fn create_lesson(
        &self,
        chapter_id: ChapterId,
        title: &str,
    ) -> Result<LessonSummary, StoreError> {
        read_json(self.http.post(self.url("/lessons")).json(&CreateLessonRequest {
            chapter_id,
            title: title.to_string(),
        }))
        .await
    }
}

async fn send(request: RequestBuilder) -> Result<Response, StoreError> {
    let response = request
        .send()
        .await
        .map_err(|err| StoreError::Unavailable(err.to_string()))?;
    if response.status().is_success() {
        return Ok(response);
    }
    Err(error_from_response(response).await)
}

async fn expect_success(request: RequestBuilder) -> Result<(), StoreError> {
    send(request).await.map(|_| ())
}

async fn read_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, StoreError> {
    send(request)
        .await?
        .json::<T>()
        .await
        .map_err(|err| StoreError::Unavailable(format!("unreadable response: {err}")))
}

async fn error_from_response(response: Response) -> StoreError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let api_error = serde_json::from_str::<ApiError>(&body)
        .unwrap_or_else(|_| ApiError::new(code_for_status(status), body));
    warn!(%status, code = ?api_error.code, message = %api_error.message, "course store request failed");
    store_error_for(status, api_error)
}

fn store_error_for(status: StatusCode, api_error: ApiError) -> StoreError {
    match status {
        StatusCode::NOT_FOUND => StoreError::NotFound(api_error.message),
        StatusCode::CONFLICT => StoreError::Conflict(api_error.message),
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            StoreError::Unavailable(format!("{status}: {}", api_error.message))
        }
        _ => StoreError::Rejected(api_error.into()),
    }
}

/// Fallback code for error bodies that are not `ApiError` JSON, e.g. from a
/// proxy in front of the server. The server itself never answers 401 or 429.
fn code_for_status(status: StatusCode) -> ErrorCode {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::PAYLOAD_TOO_LARGE => ErrorCode::Validation,
        StatusCode::UNAUTHORIZED => ErrorCode::Unauthorized,
        StatusCode::FORBIDDEN => ErrorCode::Forbidden,
        StatusCode::NOT_FOUND => ErrorCode::NotFound,
        StatusCode::CONFLICT => ErrorCode::Conflict,
        StatusCode::TOO_MANY_REQUESTS => ErrorCode::RateLimited,
        _ => ErrorCode::Internal,
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
