use axum::{
    extract::{Path, State},
    Json,
};

use quizhub_api::{service, ScoreResponse};
use quizhub_db::Db;

use crate::error::ApiErr;
use crate::routes::auth::AuthUser;
use crate::routes::companies::load_company;
use crate::routes::members::{require_manager, require_member};

fn score_where(
    conn: &rusqlite::Connection,
    user_id: &str,
    clause: &str,
    scope: Option<&str>,
) -> Result<ScoreResponse, ApiErr> {
    let sql = format!(
        "SELECT COUNT(*), COALESCE(SUM(is_correct), 0)
         FROM answered_questions WHERE user_id = ?1 {clause}"
    );
    let (total, correct): (i64, i64) = match scope {
        Some(scope) => conn.query_row(&sql, [user_id, scope], |r| Ok((r.get(0)?, r.get(1)?))),
        None => conn.query_row(&sql, [user_id], |r| Ok((r.get(0)?, r.get(1)?))),
    }
    .map_err(ApiErr::from_db("score query"))?;

    Ok(ScoreResponse {
        user_id: user_id.to_string(),
        total_answers: total,
        correct_answers: correct,
        score: service::score_ratio(correct, total),
    })
}

/// GET /api/v1/analytics/me — the caller's all-time correct ratio.
pub async fn my_overall_score(
    State(db): State<Db>,
    user: AuthUser,
) -> Result<Json<ScoreResponse>, ApiErr> {
    let conn = db.conn();
    score_where(&conn, &user.user_id, "", None).map(Json)
}

/// GET /api/v1/quizzes/{id}/analytics/me — the caller's ratio for one quiz.
pub async fn my_quiz_score(
    State(db): State<Db>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ScoreResponse>, ApiErr> {
    let conn = db.conn();
    let quiz: Result<String, _> = conn.query_row(
        "SELECT company_id FROM quizzes WHERE id = ?1",
        [&id],
        |row| row.get(0),
    );
    let company_id = quiz.map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => ApiErr::not_found("quiz not found"),
        e => ApiErr::from_db("quiz lookup")(e),
    })?;
    require_member(&conn, &company_id, &user.user_id)?;

    score_where(&conn, &user.user_id, "AND quiz_id = ?2", Some(&id)).map(Json)
}

/// GET /api/v1/companies/{id}/analytics/members/{user_id} — owner/admin;
/// one member's ratio within the company.
pub async fn member_score(
    State(db): State<Db>,
    user: AuthUser,
    Path((company_id, target_id)): Path<(String, String)>,
) -> Result<Json<ScoreResponse>, ApiErr> {
    let conn = db.conn();
    load_company(&conn, &company_id)?;
    require_manager(&conn, &company_id, &user.user_id)?;
    require_member(&conn, &company_id, &target_id)
        .map_err(|_| ApiErr::not_found("member not found"))?;

    score_where(&conn, &target_id, "AND company_id = ?2", Some(&company_id)).map(Json)
}
