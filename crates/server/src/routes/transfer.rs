use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use quizhub_api::{ExportRecord, ImportBundle, ImportReport};
use quizhub_db::Db;

use crate::error::ApiErr;
use crate::routes::auth::AuthUser;
use crate::routes::companies::load_company;
use crate::routes::members::require_manager;

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    #[serde(default)]
    pub format: Option<String>,
    pub user_id: Option<String>,
    pub quiz_id: Option<String>,
}

fn load_records(
    conn: &rusqlite::Connection,
    company_id: &str,
    filter: &ExportQuery,
) -> Result<Vec<ExportRecord>, ApiErr> {
    let mut sql = String::from(
        "SELECT user_id, company_id, quiz_id, question_id, answer_id, answer_text,
                is_correct, created_at
         FROM answered_questions WHERE company_id = ?1",
    );
    let mut params: Vec<&str> = vec![company_id];
    if let Some(user_id) = &filter.user_id {
        sql.push_str(&format!(" AND user_id = ?{}", params.len() + 1));
        params.push(user_id);
    }
    if let Some(quiz_id) = &filter.quiz_id {
        sql.push_str(&format!(" AND quiz_id = ?{}", params.len() + 1));
        params.push(quiz_id);
    }
    sql.push_str(" ORDER BY created_at ASC");

    let mut stmt = conn.prepare(&sql).map_err(ApiErr::from_db("export"))?;
    let records = stmt
        .query_map(rusqlite::params_from_iter(params), |row| {
            Ok(ExportRecord {
                user_id: row.get(0)?,
                company_id: row.get(1)?,
                quiz_id: row.get(2)?,
                question_id: row.get(3)?,
                answer_id: row.get(4)?,
                answer_text: row.get(5)?,
                is_correct: row.get(6)?,
                created_at: row.get(7)?,
            })
        })
        .map_err(ApiErr::from_db("export"))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(records)
}

/// Quote a CSV field: wrap in quotes and double any embedded quotes when the
/// value contains a comma, quote, or newline.
fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn records_to_csv(records: &[ExportRecord]) -> String {
    let mut out = String::from(
        "user_id,company_id,quiz_id,question_id,answer_id,answer_text,is_correct,created_at\n",
    );
    for r in records {
        out.push_str(&format!(
            "{},{},{},{},{},{},{},{}\n",
            csv_field(&r.user_id),
            csv_field(&r.company_id),
            csv_field(&r.quiz_id),
            csv_field(&r.question_id),
            csv_field(&r.answer_id),
            csv_field(&r.answer_text),
            r.is_correct,
            csv_field(&r.created_at),
        ));
    }
    out
}

fn attachment_headers(content_type: &'static str, filename: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{filename}\"")) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    headers
}

/// GET /api/v1/companies/{id}/export?format=json|csv&user_id=&quiz_id= —
/// owner/admin. Streams the company's answered-question history as a
/// download attachment.
pub async fn export(
    State(db): State<Db>,
    user: AuthUser,
    Path(company_id): Path<String>,
    Query(query): Query<ExportQuery>,
) -> Result<(HeaderMap, String), ApiErr> {
    let conn = db.conn();
    load_company(&conn, &company_id)?;
    require_manager(&conn, &company_id, &user.user_id)?;

    let records = load_records(&conn, &company_id, &query)?;

    match query.format.as_deref().unwrap_or("json") {
        "json" => {
            let body = serde_json::to_string_pretty(&records)
                .map_err(ApiErr::from_db("export serialize"))?;
            Ok((
                attachment_headers("application/json", "answers.json"),
                body,
            ))
        }
        "csv" => Ok((
            attachment_headers("text/csv", "answers.csv"),
            records_to_csv(&records),
        )),
        other => Err(ApiErr::bad_request(format!(
            "unknown export format '{other}' (expected json or csv)"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Import
// ---------------------------------------------------------------------------

/// Apply the rename map to one title/text value.
fn renamed<'a>(updates: &'a ImportBundle, value: &'a str) -> &'a str {
    updates
        .updates
        .get(value)
        .map(String::as_str)
        .unwrap_or(value)
}

/// POST /api/v1/companies/{id}/import — owner/admin. JSON bundle of answers,
/// questions, and quizzes matched by title/text. Existing rows named in the
/// `updates` map are renamed; unknown rows are created; the rest are skipped.
/// Passes run in dependency order: answers, questions, quizzes.
pub async fn import(
    State(db): State<Db>,
    user: AuthUser,
    Path(company_id): Path<String>,
    Json(bundle): Json<ImportBundle>,
) -> Result<Json<ImportReport>, ApiErr> {
    let conn = db.conn();
    load_company(&conn, &company_id)?;
    require_manager(&conn, &company_id, &user.user_id)?;

    let mut report = ImportReport::default();

    // Renames first, so the create passes below see the new names
    for (old, new) in &bundle.updates {
        let mut changed = conn
            .execute(
                "UPDATE answers SET text = ?1 WHERE company_id = ?2 AND text = ?3",
                rusqlite::params![new, company_id, old],
            )
            .map_err(ApiErr::from_db("import rename answer"))?;
        changed += conn
            .execute(
                "UPDATE questions SET title = ?1 WHERE company_id = ?2 AND title = ?3",
                rusqlite::params![new, company_id, old],
            )
            .map_err(ApiErr::from_db("import rename question"))?;
        changed += conn
            .execute(
                "UPDATE quizzes SET title = ?1 WHERE company_id = ?2 AND title = ?3",
                rusqlite::params![new, company_id, old],
            )
            .map_err(ApiErr::from_db("import rename quiz"))?;
        if changed > 0 {
            report.renamed += 1;
        }
    }

    // Answers
    for answer in &bundle.answers {
        let text = renamed(&bundle, &answer.text);
        let exists: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM answers WHERE company_id = ?1 AND text = ?2",
                [company_id.as_str(), text],
                |row| row.get(0),
            )
            .map_err(ApiErr::from_db("import answer check"))?;
        if exists {
            report.skipped += 1;
            continue;
        }
        conn.execute(
            "INSERT INTO answers (id, company_id, text, is_correct) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![Uuid::new_v4().to_string(), company_id, text, answer.is_correct],
        )
        .map_err(ApiErr::from_db("import answer"))?;
        report.created += 1;
    }

    // Questions, attaching their answers by (renamed) text
    for question in &bundle.questions {
        let title = renamed(&bundle, &question.title);
        let exists: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM questions WHERE company_id = ?1 AND title = ?2",
                [company_id.as_str(), title],
                |row| row.get(0),
            )
            .map_err(ApiErr::from_db("import question check"))?;
        if exists {
            report.skipped += 1;
            continue;
        }
        let question_id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO questions (id, company_id, title) VALUES (?1, ?2, ?3)",
            rusqlite::params![question_id, company_id, title],
        )
        .map_err(ApiErr::from_db("import question"))?;
        for answer_text in &question.answers {
            let answer_text = renamed(&bundle, answer_text);
            conn.execute(
                "UPDATE answers SET question_id = ?1
                 WHERE company_id = ?2 AND text = ?3 AND question_id IS NULL",
                rusqlite::params![question_id, company_id, answer_text],
            )
            .map_err(ApiErr::from_db("import attach answer"))?;
        }
        report.created += 1;
    }

    // Quizzes, attaching their questions by (renamed) title
    for quiz in &bundle.quizzes {
        let title = renamed(&bundle, &quiz.title);
        let exists: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM quizzes WHERE company_id = ?1 AND title = ?2",
                [company_id.as_str(), title],
                |row| row.get(0),
            )
            .map_err(ApiErr::from_db("import quiz check"))?;
        if exists {
            report.skipped += 1;
            continue;
        }
        let quiz_id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO quizzes (id, company_id, title, description) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![quiz_id, company_id, title, quiz.description],
        )
        .map_err(ApiErr::from_db("import quiz"))?;
        for question_title in &quiz.questions {
            let question_title = renamed(&bundle, question_title);
            conn.execute(
                "UPDATE questions SET quiz_id = ?1
                 WHERE company_id = ?2 AND title = ?3 AND quiz_id IS NULL",
                rusqlite::params![quiz_id, company_id, question_title],
            )
            .map_err(ApiErr::from_db("import attach question"))?;
        }
        report.created += 1;
    }

    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_field_quotes_only_when_needed() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_field("line\nbreak"), "\"line\nbreak\"");
    }

    #[test]
    fn csv_output_has_header_and_rows() {
        let records = vec![ExportRecord {
            user_id: "u1".into(),
            company_id: "c1".into(),
            quiz_id: "q1".into(),
            question_id: "qq1".into(),
            answer_id: "a1".into(),
            answer_text: "Paris, France".into(),
            is_correct: true,
            created_at: "2024-01-01 00:00:00".into(),
        }];
        let csv = records_to_csv(&records);
        let mut lines = csv.lines();
        assert!(lines.next().unwrap().starts_with("user_id,"));
        let row = lines.next().unwrap();
        assert!(row.contains("\"Paris, France\""));
        assert!(row.contains("true"));
    }

    #[test]
    fn rename_map_applies() {
        let mut bundle = ImportBundle::default();
        bundle
            .updates
            .insert("Old title".to_string(), "New title".to_string());
        assert_eq!(renamed(&bundle, "Old title"), "New title");
        assert_eq!(renamed(&bundle, "Untouched"), "Untouched");
    }

    #[tokio::test]
    async fn import_renames_skips_and_attaches() {
        use quizhub_api::{ImportAnswer, ImportQuestion, ImportQuiz};

        let db = Db::open_in_memory().unwrap();
        db.conn()
            .execute_batch(
                "INSERT INTO users (id, email, password_hash, password_salt)
                 VALUES ('u1', 'a@example.com', 'h', 's');
                 INSERT INTO companies (id, name, owner_id) VALUES ('c1', 'Acme', 'u1');
                 INSERT INTO members (company_id, user_id, role) VALUES ('c1', 'u1', 'owner');
                 INSERT INTO answers (id, company_id, text, is_correct)
                 VALUES ('a1', 'c1', 'Stale', 1);",
            )
            .unwrap();

        let mut bundle = ImportBundle::default();
        bundle.updates.insert("Stale".into(), "Paris".into());
        bundle.answers = vec![
            ImportAnswer {
                text: "Paris".into(),
                is_correct: true,
            },
            ImportAnswer {
                text: "Lyon".into(),
                is_correct: false,
            },
        ];
        bundle.questions = vec![ImportQuestion {
            title: "Capital of France?".into(),
            answers: vec!["Paris".into(), "Lyon".into()],
        }];
        bundle.quizzes = vec![ImportQuiz {
            title: "Geography".into(),
            description: None,
            questions: vec!["Capital of France?".into()],
        }];

        let user = AuthUser {
            user_id: "u1".into(),
            email: "a@example.com".into(),
        };
        let Json(report) = import(State(db.clone()), user, Path("c1".into()), Json(bundle))
            .await
            .unwrap();

        // 'Stale' renamed to 'Paris'; the bundle's 'Paris' then matches and
        // is skipped; 'Lyon', the question, and the quiz are created.
        assert_eq!(report.renamed, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.created, 3);

        let conn = db.conn();
        let stale: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM answers WHERE text = 'Stale'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(stale, 0);

        // Both answers attached to the new question, which is in the new quiz
        let attached: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM answers a
                 JOIN questions q ON q.id = a.question_id
                 JOIN quizzes z ON z.id = q.quiz_id
                 WHERE z.title = 'Geography' AND q.title = 'Capital of France?'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(attached, 2);
    }
}
