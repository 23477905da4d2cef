use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, ensure_row_exists, now_ts, parse_opt_f64, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn find_submission(
    conn: &rusqlite::Connection,
    student_id: &str,
    exercise_id: &str,
) -> Result<Option<(String, Option<f64>, String)>, rusqlite::Error> {
    conn.query_row(
        "SELECT id, score, submitted_at FROM submissions WHERE student_id = ? AND exercise_id = ?",
        [student_id, exercise_id],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
    )
    .optional()
}

fn handle_submissions_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exercise_id = match required_str(req, "exerciseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = ensure_row_exists(conn, req, "students", &student_id, "student") {
        return e;
    }
    if let Err(e) = ensure_row_exists(conn, req, "exercises", &exercise_id, "exercise") {
        return e;
    }

    let ts = now_ts();
    match find_submission(conn, &student_id, &exercise_id) {
        Ok(Some((id, _, _))) => {
            // Resubmitting refreshes the timestamp and keeps any grade.
            if let Err(e) = conn.execute(
                "UPDATE submissions SET submitted_at = ? WHERE id = ?",
                params![ts, id],
            ) {
                return err(&req.id, "db_update_failed", e.to_string(), None);
            }
            ok(&req.id, json!({ "submissionId": id, "created": false }))
        }
        Ok(None) => {
            let submission_id = Uuid::new_v4().to_string();
            if let Err(e) = conn.execute(
                "INSERT INTO submissions(id, student_id, exercise_id, score, submitted_at) VALUES(?, ?, ?, NULL, ?)",
                params![submission_id, student_id, exercise_id, ts],
            ) {
                return err(&req.id, "db_insert_failed", e.to_string(), None);
            }
            tracing::info!(student_id = %student_id, exercise_id = %exercise_id, "submission received");
            ok(&req.id, json!({ "submissionId": submission_id, "created": true }))
        }
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_submissions_grade(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exercise_id = match required_str(req, "exerciseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if req.params.get("score").is_none() {
        return err(&req.id, "bad_params", "missing score (use null to clear)", None);
    }
    let score = match parse_opt_f64(req.params.get("score")) {
        Ok(Some(v)) if v < 0.0 => {
            return err(&req.id, "bad_params", "score must be >= 0", None)
        }
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("score {}", m), None),
    };

    let id = match find_submission(conn, &student_id, &exercise_id) {
        Ok(Some((id, _, _))) => id,
        Ok(None) => return err(&req.id, "not_found", "submission not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let graded_at = score.map(|_| now_ts());
    if let Err(e) = conn.execute(
        "UPDATE submissions SET score = ?, graded_at = ? WHERE id = ?",
        params![score, graded_at, id],
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::info!(submission_id = %id, graded = score.is_some(), "submission graded");
    ok(&req.id, json!({ "ok": true }))
}

fn handle_submissions_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exercise_id = match required_str(req, "exerciseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match find_submission(conn, &student_id, &exercise_id) {
        Ok(Some((id, score, submitted_at))) => ok(
            &req.id,
            json!({
                "submission": {
                    "id": id,
                    "score": score,
                    "submittedAt": submitted_at,
                }
            }),
        ),
        Ok(None) => ok(&req.id, json!({ "submission": null })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "submissions.submit" => Some(handle_submissions_submit(state, req)),
        "submissions.grade" => Some(handle_submissions_grade(state, req)),
        "submissions.get" => Some(handle_submissions_get(state, req)),
        _ => None,
    }
}
