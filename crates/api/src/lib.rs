//! Shared API types, crypto, and service helpers for quizhub.
//!
//! This crate is the single source of truth for all API request/response
//! types. The Axum server and the background dispatcher both import these
//! types directly.

use serde::{Deserialize, Serialize};

pub mod crypto;
pub mod service;

// ─── Shared Enums ────────────────────────────────────────────────────────────

/// Role within a company.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Admin,
    Member,
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }

    /// Owner and admin can manage company content and membership.
    pub fn can_manage(&self) -> bool {
        matches!(self, Self::Owner | Self::Admin)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "owner" => Some(Self::Owner),
            "admin" => Some(Self::Admin),
            "member" => Some(Self::Member),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of an invitation or join request.
///
/// Transitions are monotonic: a row leaves `pending` exactly once and the
/// terminal states never revert.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Declined,
    Cancelled,
    Expired,
}

impl InvitationStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            "declined" => Some(Self::Declined),
            "cancelled" => Some(Self::Cancelled),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

impl std::fmt::Display for InvitationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of an invitation row: company-to-user invite, or user-to-company
/// join request. Both share the same lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InvitationKind {
    Invite,
    Request,
}

impl InvitationKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Invite => "invite",
            Self::Request => "request",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "invite" => Some(Self::Invite),
            "request" => Some(Self::Request),
            _ => None,
        }
    }
}

impl std::fmt::Display for InvitationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery status of a notification. `pending` rows are the dispatch queue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Read,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Read => "read",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "read" => Some(Self::Read),
            _ => None,
        }
    }
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Auth ────────────────────────────────────────────────────────────────────

/// Email + password registration.
#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub firstname: Option<String>,
    pub lastname: Option<String>,
}

/// Email + password login.
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Returned on successful login / register / refresh.
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthTokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
    pub user_id: String,
    pub email: String,
}

/// Refresh token request.
#[derive(Debug, Serialize, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Logout request (invalidate refresh token).
#[derive(Debug, Serialize, Deserialize)]
pub struct LogoutRequest {
    pub refresh_token: String,
}

/// Change password request.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// Generic success response for operations that don't return data.
#[derive(Debug, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

// ─── Users ───────────────────────────────────────────────────────────────────

/// Public user profile returned by list and detail endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub city: Option<String>,
    pub phone: Option<String>,
    pub is_active: bool,
    pub created_at: String,
}

/// Returned by `GET /api/v1/users` — paginated user listing.
#[derive(Debug, Serialize, Deserialize)]
pub struct ListUsersResponse {
    pub users: Vec<UserResponse>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
}

/// Request body for `PUT /api/v1/users/{id}` — partial profile update.
/// Email and password are managed through the auth routes, never here.
#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateUserRequest {
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub city: Option<String>,
    pub phone: Option<String>,
}

// ─── Companies ───────────────────────────────────────────────────────────────

/// Request body for `POST /api/v1/companies`.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateCompanyRequest {
    pub name: String,
    pub description: Option<String>,
    pub is_visible: Option<bool>,
}

/// Single company record returned by list and detail endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyResponse {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub owner_id: String,
    pub is_visible: bool,
    pub created_at: String,
}

/// Returned by `GET /api/v1/companies` — paginated company listing.
#[derive(Debug, Serialize, Deserialize)]
pub struct ListCompaniesResponse {
    pub companies: Vec<CompanyResponse>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
}

/// Request body for `PUT /api/v1/companies/{id}` — partial update.
#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateCompanyRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

/// Request body for `PUT /api/v1/companies/{id}/visibility`.
#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateVisibilityRequest {
    pub is_visible: bool,
}

// ─── Members ─────────────────────────────────────────────────────────────────

/// Single company member record.
#[derive(Debug, Serialize, Deserialize)]
pub struct MemberResponse {
    pub user_id: String,
    pub email: String,
    pub role: Role,
    pub joined_at: String,
}

/// Returned by `GET /api/v1/companies/{id}/members` and `/admins`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ListMembersResponse {
    pub members: Vec<MemberResponse>,
    pub total: i64,
}

// ─── Invitations ─────────────────────────────────────────────────────────────

/// Request body for `POST /api/v1/invitations` — owner invites a user.
#[derive(Debug, Serialize, Deserialize)]
pub struct SendInvitationRequest {
    pub company_id: String,
    pub receiver_id: String,
    pub title: String,
    pub description: Option<String>,
}

/// Request body for `POST /api/v1/companies/{id}/join` — join request.
#[derive(Debug, Serialize, Deserialize)]
pub struct JoinRequestBody {
    pub title: String,
    pub description: Option<String>,
}

/// Single invitation record returned by list and detail endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct InvitationResponse {
    pub id: String,
    pub company_id: String,
    pub company_name: String,
    pub kind: InvitationKind,
    pub sender_id: String,
    pub receiver_id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: InvitationStatus,
    pub created_at: String,
    pub expires_at: String,
}

/// Returned by the invitation listing endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct ListInvitationsResponse {
    pub invitations: Vec<InvitationResponse>,
    pub total: i64,
}

/// Returned by accept — confirms the membership created.
#[derive(Debug, Serialize, Deserialize)]
pub struct AcceptInvitationResponse {
    pub company_id: String,
    pub user_id: String,
    pub role: Role,
}

// ─── Notifications ───────────────────────────────────────────────────────────

/// Single notification record.
#[derive(Debug, Serialize, Deserialize)]
pub struct NotificationResponse {
    pub id: String,
    pub company_id: String,
    pub message: String,
    pub status: NotificationStatus,
    pub created_at: String,
}

/// Returned by `GET /api/v1/notifications`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ListNotificationsResponse {
    pub notifications: Vec<NotificationResponse>,
    pub total: i64,
}

// ─── Quizzes ─────────────────────────────────────────────────────────────────

/// Request body for `POST /api/v1/companies/{id}/quizzes`.
/// `questions` holds ids of existing, unattached questions.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateQuizRequest {
    pub title: String,
    pub description: Option<String>,
    pub questions: Vec<String>,
}

/// Flat quiz record returned by create/update/list endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizResponse {
    pub id: String,
    pub company_id: String,
    pub title: String,
    pub description: Option<String>,
    pub frequency: i64,
    pub created_at: String,
}

/// Returned by `GET /api/v1/companies/{id}/quizzes`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ListQuizzesResponse {
    pub quizzes: Vec<QuizResponse>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
}

/// Request body for `PUT /api/v1/quizzes/{id}` — partial update.
#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateQuizRequest {
    pub title: Option<String>,
    pub description: Option<String>,
}

/// Quiz detail with its questions and answers.
#[derive(Debug, Serialize, Deserialize)]
pub struct QuizDetailResponse {
    #[serde(flatten)]
    pub quiz: QuizResponse,
    pub questions: Vec<QuestionDetail>,
}

// ─── Questions / Answers ─────────────────────────────────────────────────────

/// Request body for `POST /api/v1/companies/{id}/questions`.
/// `answers` holds ids of existing, unattached answers (2–4 of them).
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateQuestionRequest {
    pub title: String,
    pub answers: Vec<String>,
}

/// Flat question record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionResponse {
    pub id: String,
    pub company_id: String,
    pub quiz_id: Option<String>,
    pub title: String,
    pub created_at: String,
}

/// Request body for `PUT /api/v1/questions/{id}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateQuestionRequest {
    pub title: String,
}

/// Question with its answers, as embedded in a quiz detail.
#[derive(Debug, Serialize, Deserialize)]
pub struct QuestionDetail {
    pub id: String,
    pub title: String,
    pub answers: Vec<AnswerView>,
}

/// Request body for `POST /api/v1/companies/{id}/answers`.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateAnswerRequest {
    pub text: String,
    pub is_correct: Option<bool>,
}

/// Flat answer record returned to owners/admins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResponse {
    pub id: String,
    pub question_id: Option<String>,
    pub text: String,
    pub is_correct: bool,
}

/// Answer as presented inside a quiz. `is_correct` is only serialized for
/// owners and admins — plain members taking the quiz never see it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerView {
    pub id: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_correct: Option<bool>,
}

/// Request body for `PUT /api/v1/answers/{id}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateAnswerRequest {
    pub text: Option<String>,
    pub is_correct: Option<bool>,
}

// ─── Submissions ─────────────────────────────────────────────────────────────

/// Request body for `POST /api/v1/quizzes/{id}/submissions` — the member's
/// chosen answer per question.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitQuizRequest {
    /// question_id -> answer_id
    pub answers: std::collections::BTreeMap<String, String>,
}

/// Returned after grading a submission.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitQuizResponse {
    pub quiz_id: String,
    pub total: usize,
    pub correct: usize,
    pub score: f64,
}

// ─── Analytics ───────────────────────────────────────────────────────────────

/// A correct-answer ratio over some scope (system, company, or quiz).
#[derive(Debug, Serialize, Deserialize)]
pub struct ScoreResponse {
    pub user_id: String,
    pub total_answers: i64,
    pub correct_answers: i64,
    pub score: f64,
}

// ─── Export / Import ─────────────────────────────────────────────────────────

/// One answered-question record as exported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRecord {
    pub user_id: String,
    pub company_id: String,
    pub quiz_id: String,
    pub question_id: String,
    pub answer_id: String,
    pub answer_text: String,
    pub is_correct: bool,
    pub created_at: String,
}

/// Import bundle: rows are matched by title/text. Existing rows are renamed
/// via `updates`; missing rows are created.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ImportBundle {
    #[serde(default)]
    pub answers: Vec<ImportAnswer>,
    #[serde(default)]
    pub questions: Vec<ImportQuestion>,
    #[serde(default)]
    pub quizzes: Vec<ImportQuiz>,
    /// old title/text -> new title/text
    #[serde(default)]
    pub updates: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImportAnswer {
    pub text: String,
    #[serde(default)]
    pub is_correct: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImportQuestion {
    pub title: String,
    #[serde(default)]
    pub answers: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImportQuiz {
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    pub questions: Vec<String>,
}

/// Returned by `POST /api/v1/companies/{id}/import`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ImportReport {
    pub created: usize,
    pub renamed: usize,
    pub skipped: usize,
}

// ─── Pagination ──────────────────────────────────────────────────────────────

/// Query parameters shared by every paginated listing.
#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

fn default_page() -> u32 {
    1
}
fn default_per_page() -> u32 {
    10
}

impl Default for PageQuery {
    fn default() -> Self {
        Self {
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}

// ─── Health ──────────────────────────────────────────────────────────────────

/// Returned by `GET /api/v1/health` — server liveness check.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

// ─── Service Error ───────────────────────────────────────────────────────────

/// Framework-agnostic service error.
///
/// Each variant maps to an HTTP status code; the server converts this into
/// its response type.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum ServiceError {
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl ServiceError {
    /// HTTP status code as a `u16`.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest(_) => 400,
            Self::Unauthorized(_) => 401,
            Self::Forbidden(_) => 403,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::Internal(_) => 500,
        }
    }

    /// The error message.
    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest(m)
            | Self::Unauthorized(m)
            | Self::Forbidden(m)
            | Self::NotFound(m)
            | Self::Conflict(m)
            | Self::Internal(m) => m,
        }
    }
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ServiceError {}

/// JSON error shape `{ "error": "..." }` returned by all error responses.
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
}

impl From<&ServiceError> for ApiError {
    fn from(e: &ServiceError) -> Self {
        Self {
            error: e.message().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_str() {
        for role in [Role::Owner, Role::Admin, Role::Member] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("unemployed"), None);
    }

    #[test]
    fn only_owner_and_admin_can_manage() {
        assert!(Role::Owner.can_manage());
        assert!(Role::Admin.can_manage());
        assert!(!Role::Member.can_manage());
    }

    #[test]
    fn invitation_status_serializes_snake_case() {
        let s = serde_json::to_string(&InvitationStatus::Cancelled).unwrap();
        assert_eq!(s, "\"cancelled\"");
    }

    #[test]
    fn answer_view_hides_correctness_when_absent() {
        let view = AnswerView {
            id: "a1".into(),
            text: "42".into(),
            is_correct: None,
        };
        let json = serde_json::to_value(&view).unwrap();
        assert!(json.get("is_correct").is_none());
    }
}
