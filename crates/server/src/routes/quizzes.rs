use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use quizhub_api::{
    service, AnswerResponse, AnswerView, CreateAnswerRequest, CreateQuestionRequest,
    CreateQuizRequest, ListQuizzesResponse, OkResponse, PageQuery, QuestionDetail,
    QuestionResponse, QuizDetailResponse, QuizResponse, SubmitQuizRequest, SubmitQuizResponse,
    UpdateAnswerRequest, UpdateQuestionRequest, UpdateQuizRequest,
};
use quizhub_db::Db;

use crate::error::ApiErr;
use crate::routes::auth::AuthUser;
use crate::routes::companies::load_company;
use crate::routes::members::{require_manager, require_member};

/// Answers per question, inclusive bounds.
const MIN_ANSWERS: usize = 2;
const MAX_ANSWERS: usize = 4;

// ---------------------------------------------------------------------------
// Answers
// ---------------------------------------------------------------------------

fn load_answer(conn: &rusqlite::Connection, id: &str) -> Result<(AnswerResponse, String), ApiErr> {
    conn.query_row(
        "SELECT id, company_id, question_id, text, is_correct FROM answers WHERE id = ?1",
        [id],
        |row| {
            Ok((
                AnswerResponse {
                    id: row.get(0)?,
                    question_id: row.get(2)?,
                    text: row.get(3)?,
                    is_correct: row.get(4)?,
                },
                row.get::<_, String>(1)?,
            ))
        },
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => ApiErr::not_found("answer not found"),
        e => ApiErr::from_db("load answer")(e),
    })
}

/// POST /api/v1/companies/{id}/answers — owner/admin. Answers start
/// unattached and are bound to a question later.
pub async fn create_answer(
    State(db): State<Db>,
    user: AuthUser,
    Path(company_id): Path<String>,
    Json(req): Json<CreateAnswerRequest>,
) -> Result<(StatusCode, Json<AnswerResponse>), ApiErr> {
    let text = service::validate_title(&req.text)?;

    let conn = db.conn();
    load_company(&conn, &company_id)?;
    require_manager(&conn, &company_id, &user.user_id)?;

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO answers (id, company_id, text, is_correct) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![id, company_id, text, req.is_correct.unwrap_or(false)],
    )
    .map_err(ApiErr::from_db("create answer"))?;

    let (answer, _) = load_answer(&conn, &id)?;
    Ok((StatusCode::CREATED, Json(answer)))
}

/// PUT /api/v1/answers/{id} — owner/admin of the answer's company.
pub async fn update_answer(
    State(db): State<Db>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateAnswerRequest>,
) -> Result<Json<AnswerResponse>, ApiErr> {
    let conn = db.conn();
    let (_, company_id) = load_answer(&conn, &id)?;
    require_manager(&conn, &company_id, &user.user_id)?;

    let text = match &req.text {
        Some(t) => Some(service::validate_title(t)?),
        None => None,
    };

    conn.execute(
        "UPDATE answers SET
             text = COALESCE(?1, text),
             is_correct = COALESCE(?2, is_correct),
             updated_at = ?3
         WHERE id = ?4",
        rusqlite::params![text, req.is_correct, quizhub_db::now_string(), id],
    )
    .map_err(ApiErr::from_db("update answer"))?;

    load_answer(&conn, &id).map(|(a, _)| Json(a))
}

/// DELETE /api/v1/answers/{id} — owner/admin; only while unattached.
pub async fn delete_answer(
    State(db): State<Db>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<OkResponse>, ApiErr> {
    let conn = db.conn();
    let (answer, company_id) = load_answer(&conn, &id)?;
    require_manager(&conn, &company_id, &user.user_id)?;
    if answer.question_id.is_some() {
        return Err(ApiErr::conflict(
            "answer is attached to a question; delete the question instead",
        ));
    }

    conn.execute("DELETE FROM answers WHERE id = ?1", [&id])
        .map_err(ApiErr::from_db("delete answer"))?;
    Ok(Json(OkResponse { ok: true }))
}

// ---------------------------------------------------------------------------
// Questions
// ---------------------------------------------------------------------------

fn load_question(
    conn: &rusqlite::Connection,
    id: &str,
) -> Result<QuestionResponse, ApiErr> {
    conn.query_row(
        "SELECT id, company_id, quiz_id, title, created_at FROM questions WHERE id = ?1",
        [id],
        |row| {
            Ok(QuestionResponse {
                id: row.get(0)?,
                company_id: row.get(1)?,
                quiz_id: row.get(2)?,
                title: row.get(3)?,
                created_at: row.get(4)?,
            })
        },
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => ApiErr::not_found("question not found"),
        e => ApiErr::from_db("load question")(e),
    })
}

/// POST /api/v1/companies/{id}/questions — owner/admin; binds 2–4 existing
/// unattached answers from the same company.
pub async fn create_question(
    State(db): State<Db>,
    user: AuthUser,
    Path(company_id): Path<String>,
    Json(req): Json<CreateQuestionRequest>,
) -> Result<(StatusCode, Json<QuestionResponse>), ApiErr> {
    let title = service::validate_title(&req.title)?;

    let conn = db.conn();
    load_company(&conn, &company_id)?;
    require_manager(&conn, &company_id, &user.user_id)?;

    if req.answers.len() < MIN_ANSWERS || req.answers.len() > MAX_ANSWERS {
        return Err(ApiErr::bad_request(format!(
            "a question needs {MIN_ANSWERS}-{MAX_ANSWERS} answers"
        )));
    }

    // Every answer must exist in this company and be unattached
    for answer_id in &req.answers {
        let (answer, answer_company) = load_answer(&conn, answer_id)?;
        if answer_company != company_id {
            return Err(ApiErr::bad_request("answer belongs to another company"));
        }
        if answer.question_id.is_some() {
            return Err(ApiErr::conflict("answer is already attached to a question"));
        }
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO questions (id, company_id, title) VALUES (?1, ?2, ?3)",
        rusqlite::params![id, company_id, title],
    )
    .map_err(ApiErr::from_db("create question"))?;
    for answer_id in &req.answers {
        conn.execute(
            "UPDATE answers SET question_id = ?1 WHERE id = ?2",
            [&id, answer_id],
        )
        .map_err(ApiErr::from_db("attach answer"))?;
    }

    let question = load_question(&conn, &id)?;
    Ok((StatusCode::CREATED, Json(question)))
}

/// PUT /api/v1/questions/{id}
pub async fn update_question(
    State(db): State<Db>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateQuestionRequest>,
) -> Result<Json<QuestionResponse>, ApiErr> {
    let title = service::validate_title(&req.title)?;

    let conn = db.conn();
    let question = load_question(&conn, &id)?;
    require_manager(&conn, &question.company_id, &user.user_id)?;

    conn.execute(
        "UPDATE questions SET title = ?1, updated_at = ?2 WHERE id = ?3",
        rusqlite::params![title, quizhub_db::now_string(), id],
    )
    .map_err(ApiErr::from_db("update question"))?;

    load_question(&conn, &id).map(Json)
}

/// DELETE /api/v1/questions/{id} — cascades to its answers; only while the
/// question is not part of a quiz.
pub async fn delete_question(
    State(db): State<Db>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<OkResponse>, ApiErr> {
    let conn = db.conn();
    let question = load_question(&conn, &id)?;
    require_manager(&conn, &question.company_id, &user.user_id)?;
    if question.quiz_id.is_some() {
        return Err(ApiErr::conflict(
            "question is part of a quiz; delete the quiz instead",
        ));
    }

    conn.execute("DELETE FROM questions WHERE id = ?1", [&id])
        .map_err(ApiErr::from_db("delete question"))?;
    Ok(Json(OkResponse { ok: true }))
}

// ---------------------------------------------------------------------------
// Quizzes
// ---------------------------------------------------------------------------

fn load_quiz(conn: &rusqlite::Connection, id: &str) -> Result<QuizResponse, ApiErr> {
    conn.query_row(
        "SELECT id, company_id, title, description, frequency, created_at
         FROM quizzes WHERE id = ?1",
        [id],
        |row| {
            Ok(QuizResponse {
                id: row.get(0)?,
                company_id: row.get(1)?,
                title: row.get(2)?,
                description: row.get(3)?,
                frequency: row.get(4)?,
                created_at: row.get(5)?,
            })
        },
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => ApiErr::not_found("quiz not found"),
        e => ApiErr::from_db("load quiz")(e),
    })
}

/// POST /api/v1/companies/{id}/quizzes — owner/admin; binds at least one
/// existing unattached question, then queues a notification for every member.
pub async fn create_quiz(
    State(db): State<Db>,
    user: AuthUser,
    Path(company_id): Path<String>,
    Json(req): Json<CreateQuizRequest>,
) -> Result<(StatusCode, Json<QuizResponse>), ApiErr> {
    let title = service::validate_title(&req.title)?;

    let conn = db.conn();
    load_company(&conn, &company_id)?;
    require_manager(&conn, &company_id, &user.user_id)?;

    if req.questions.is_empty() {
        return Err(ApiErr::bad_request("a quiz needs at least one question"));
    }
    for question_id in &req.questions {
        let question = load_question(&conn, question_id)?;
        if question.company_id != company_id {
            return Err(ApiErr::bad_request("question belongs to another company"));
        }
        if question.quiz_id.is_some() {
            return Err(ApiErr::conflict("question is already part of a quiz"));
        }
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO quizzes (id, company_id, title, description) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![id, company_id, title, req.description],
    )
    .map_err(ApiErr::from_db("create quiz"))?;
    for question_id in &req.questions {
        conn.execute(
            "UPDATE questions SET quiz_id = ?1 WHERE id = ?2",
            [&id, question_id],
        )
        .map_err(ApiErr::from_db("attach question"))?;
    }

    // Fan out a pending notification per member; the dispatcher delivers them
    let message = format!("New quiz '{title}' is available [quiz:{id}]");
    conn.execute(
        "INSERT INTO notifications (id, company_id, receiver_id, message, status)
         SELECT lower(hex(randomblob(16))), ?1, user_id, ?2, 'pending'
         FROM members WHERE company_id = ?1",
        rusqlite::params![company_id, message],
    )
    .map_err(ApiErr::from_db("notification fan-out"))?;

    let quiz = load_quiz(&conn, &id)?;
    Ok((StatusCode::CREATED, Json(quiz)))
}

/// GET /api/v1/companies/{id}/quizzes — members only, paginated.
pub async fn list_quizzes(
    State(db): State<Db>,
    user: AuthUser,
    Path(company_id): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<Json<ListQuizzesResponse>, ApiErr> {
    let (limit, offset) = service::page_bounds(page.page, page.per_page);

    let conn = db.conn();
    load_company(&conn, &company_id)?;
    require_member(&conn, &company_id, &user.user_id)?;

    let total: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM quizzes WHERE company_id = ?1",
            [&company_id],
            |r| r.get(0),
        )
        .map_err(ApiErr::from_db("count quizzes"))?;

    let mut stmt = conn
        .prepare(
            "SELECT id, company_id, title, description, frequency, created_at
             FROM quizzes WHERE company_id = ?1
             ORDER BY created_at DESC LIMIT ?2 OFFSET ?3",
        )
        .map_err(ApiErr::from_db("list quizzes"))?;
    let quizzes = stmt
        .query_map(rusqlite::params![company_id, limit, offset], |row| {
            Ok(QuizResponse {
                id: row.get(0)?,
                company_id: row.get(1)?,
                title: row.get(2)?,
                description: row.get(3)?,
                frequency: row.get(4)?,
                created_at: row.get(5)?,
            })
        })
        .map_err(ApiErr::from_db("list quizzes"))?
        .filter_map(|r| r.ok())
        .collect();

    Ok(Json(ListQuizzesResponse {
        quizzes,
        total,
        page: page.page.max(1),
        per_page: limit as u32,
    }))
}

/// GET /api/v1/quizzes/{id} — members only. `is_correct` is only included
/// for owners and admins.
pub async fn get_quiz(
    State(db): State<Db>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<QuizDetailResponse>, ApiErr> {
    let conn = db.conn();
    let quiz = load_quiz(&conn, &id)?;
    let role = require_member(&conn, &quiz.company_id, &user.user_id)?;
    let reveal = role.can_manage();

    let mut stmt = conn
        .prepare(
            "SELECT id, title FROM questions WHERE quiz_id = ?1 ORDER BY created_at ASC",
        )
        .map_err(ApiErr::from_db("quiz questions"))?;
    let question_rows: Vec<(String, String)> = stmt
        .query_map([&id], |row| Ok((row.get(0)?, row.get(1)?)))
        .map_err(ApiErr::from_db("quiz questions"))?
        .filter_map(|r| r.ok())
        .collect();

    let mut questions = Vec::with_capacity(question_rows.len());
    for (question_id, title) in question_rows {
        let mut stmt = conn
            .prepare(
                "SELECT id, text, is_correct FROM answers
                 WHERE question_id = ?1 ORDER BY created_at ASC",
            )
            .map_err(ApiErr::from_db("quiz answers"))?;
        let answers = stmt
            .query_map([&question_id], |row| {
                let is_correct: bool = row.get(2)?;
                Ok(AnswerView {
                    id: row.get(0)?,
                    text: row.get(1)?,
                    is_correct: reveal.then_some(is_correct),
                })
            })
            .map_err(ApiErr::from_db("quiz answers"))?
            .filter_map(|r| r.ok())
            .collect();
        questions.push(QuestionDetail {
            id: question_id,
            title,
            answers,
        });
    }

    Ok(Json(QuizDetailResponse { quiz, questions }))
}

/// PUT /api/v1/quizzes/{id}
pub async fn update_quiz(
    State(db): State<Db>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateQuizRequest>,
) -> Result<Json<QuizResponse>, ApiErr> {
    let conn = db.conn();
    let quiz = load_quiz(&conn, &id)?;
    require_manager(&conn, &quiz.company_id, &user.user_id)?;

    let title = match &req.title {
        Some(t) => Some(service::validate_title(t)?),
        None => None,
    };

    conn.execute(
        "UPDATE quizzes SET
             title = COALESCE(?1, title),
             description = COALESCE(?2, description),
             updated_at = ?3
         WHERE id = ?4",
        rusqlite::params![title, req.description, quizhub_db::now_string(), id],
    )
    .map_err(ApiErr::from_db("update quiz"))?;

    load_quiz(&conn, &id).map(Json)
}

/// DELETE /api/v1/quizzes/{id} — cascades to questions, answers, and history.
pub async fn delete_quiz(
    State(db): State<Db>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<OkResponse>, ApiErr> {
    let conn = db.conn();
    let quiz = load_quiz(&conn, &id)?;
    require_manager(&conn, &quiz.company_id, &user.user_id)?;

    conn.execute("DELETE FROM quizzes WHERE id = ?1", [&id])
        .map_err(ApiErr::from_db("delete quiz"))?;
    Ok(Json(OkResponse { ok: true }))
}

// ---------------------------------------------------------------------------
// Submissions
// ---------------------------------------------------------------------------

/// POST /api/v1/quizzes/{id}/submissions — members only. Grades each chosen
/// answer, records the history rows, and bumps the quiz frequency.
pub async fn submit_quiz(
    State(db): State<Db>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<SubmitQuizRequest>,
) -> Result<Json<SubmitQuizResponse>, ApiErr> {
    let conn = db.conn();
    let quiz = load_quiz(&conn, &id)?;
    require_member(&conn, &quiz.company_id, &user.user_id)?;

    if req.answers.is_empty() {
        return Err(ApiErr::bad_request("submission has no answers"));
    }

    let mut correct = 0usize;
    let now = quizhub_db::now_string();
    for (question_id, answer_id) in &req.answers {
        // The question must belong to this quiz
        let belongs: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM questions WHERE id = ?1 AND quiz_id = ?2",
                [question_id, &id],
                |row| row.get(0),
            )
            .map_err(ApiErr::from_db("submission question check"))?;
        if !belongs {
            return Err(ApiErr::bad_request("question is not part of this quiz"));
        }

        // The answer must belong to the question
        let row = conn.query_row(
            "SELECT text, is_correct FROM answers WHERE id = ?1 AND question_id = ?2",
            [answer_id, question_id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?)),
        );
        let (answer_text, is_correct) = match row {
            Ok(r) => r,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Err(ApiErr::bad_request("answer is not an option for this question"));
            }
            Err(e) => return Err(ApiErr::from_db("submission answer check")(e)),
        };
        if is_correct {
            correct += 1;
        }

        conn.execute(
            "INSERT INTO answered_questions
             (id, user_id, company_id, quiz_id, question_id, answer_id, answer_text, is_correct, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                Uuid::new_v4().to_string(),
                user.user_id,
                quiz.company_id,
                id,
                question_id,
                answer_id,
                answer_text,
                is_correct,
                now
            ],
        )
        .map_err(ApiErr::from_db("record submission"))?;
    }

    conn.execute(
        "UPDATE quizzes SET frequency = frequency + 1 WHERE id = ?1",
        [&id],
    )
    .map_err(ApiErr::from_db("bump frequency"))?;

    let total = req.answers.len();
    Ok(Json(SubmitQuizResponse {
        quiz_id: id,
        total,
        correct,
        score: service::score_ratio(correct as i64, total as i64),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_db() -> Db {
        let db = Db::open_in_memory().unwrap();
        db.conn()
            .execute_batch(
                "INSERT INTO users (id, email, password_hash, password_salt)
                 VALUES ('u1', 'a@example.com', 'h', 's');
                 INSERT INTO companies (id, name, owner_id) VALUES ('c1', 'Acme', 'u1');
                 INSERT INTO members (company_id, user_id, role) VALUES ('c1', 'u1', 'owner');
                 INSERT INTO quizzes (id, company_id, title) VALUES ('q1', 'c1', 'Daily');
                 INSERT INTO questions (id, company_id, quiz_id, title)
                 VALUES ('qq1', 'c1', 'q1', 'Capital of France?');
                 INSERT INTO answers (id, company_id, question_id, text, is_correct)
                 VALUES ('a1', 'c1', 'qq1', 'Paris', 1),
                        ('a2', 'c1', 'qq1', 'Lyon', 0);",
            )
            .unwrap();
        db
    }

    fn owner() -> AuthUser {
        AuthUser {
            user_id: "u1".into(),
            email: "a@example.com".into(),
        }
    }

    #[tokio::test]
    async fn submissions_bump_quiz_frequency() {
        let db = seeded_db();
        let mut answers = std::collections::BTreeMap::new();
        answers.insert("qq1".to_string(), "a1".to_string());

        for expected in 1..=2i64 {
            let req = SubmitQuizRequest {
                answers: answers.clone(),
            };
            let Json(resp) =
                submit_quiz(State(db.clone()), owner(), Path("q1".into()), Json(req))
                    .await
                    .unwrap();
            assert_eq!(resp.correct, 1);
            assert_eq!(resp.total, 1);

            let frequency: i64 = db
                .conn()
                .query_row("SELECT frequency FROM quizzes WHERE id = 'q1'", [], |r| {
                    r.get(0)
                })
                .unwrap();
            assert_eq!(frequency, expected);
        }

        // One history row per graded answer
        let history: i64 = db
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM answered_questions WHERE user_id = 'u1'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(history, 2);
    }

    #[tokio::test]
    async fn submission_grades_wrong_answers() {
        let db = seeded_db();
        let mut answers = std::collections::BTreeMap::new();
        answers.insert("qq1".to_string(), "a2".to_string());

        let Json(resp) = submit_quiz(
            State(db.clone()),
            owner(),
            Path("q1".into()),
            Json(SubmitQuizRequest { answers }),
        )
        .await
        .unwrap();
        assert_eq!(resp.correct, 0);
        assert_eq!(resp.score, 0.0);
    }
}
