use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, ensure_row_exists, now_ts, parse_opt_string, required_str};
use crate::ipc::types::{AppState, Request};
use crate::store::{fmt_ts, parse_instant};
use rusqlite::{params, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn handle_enrollments_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = ensure_row_exists(conn, req, "students", &student_id, "student") {
        return e;
    }
    if let Err(e) = ensure_row_exists(conn, req, "courses", &course_id, "course") {
        return e;
    }
    let term_id = match parse_opt_string(req.params.get("termId")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("termId {}", m), None),
    };
    if let Some(tid) = term_id.as_deref() {
        if let Err(e) = ensure_row_exists(conn, req, "terms", tid, "term") {
            return e;
        }
    }
    let enrolled_at = match parse_opt_string(req.params.get("enrolledAt")) {
        Ok(None) => now_ts(),
        Ok(Some(raw)) => match parse_instant(&raw) {
            Some(ts) => fmt_ts(ts),
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "enrolledAt must be an RFC 3339 timestamp or YYYY-MM-DD",
                    None,
                )
            }
        },
        Err(m) => return err(&req.id, "bad_params", format!("enrolledAt {}", m), None),
    };

    let existing: Result<Option<String>, rusqlite::Error> = conn
        .query_row(
            "SELECT id FROM enrollments WHERE student_id = ? AND course_id = ?",
            [&student_id, &course_id],
            |r| r.get(0),
        )
        .optional();
    match existing {
        Ok(Some(id)) => {
            return err(
                &req.id,
                "bad_params",
                "student is already enrolled in this course",
                Some(json!({ "enrollmentId": id })),
            )
        }
        Ok(None) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let enrollment_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO enrollments(id, student_id, course_id, term_id, enrolled_at) VALUES(?, ?, ?, ?, ?)",
        params![enrollment_id, student_id, course_id, term_id, enrolled_at],
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    tracing::info!(
        student_id = %student_id,
        course_id = %course_id,
        has_term = term_id.is_some(),
        "student enrolled"
    );
    ok(&req.id, json!({ "enrollmentId": enrollment_id }))
}

fn handle_enrollments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = ensure_row_exists(conn, req, "courses", &course_id, "course") {
        return e;
    }
    let mut stmt = match conn.prepare(
        "SELECT e.id, e.student_id, s.display_name, e.enrolled_at, e.term_id, t.start_date
         FROM enrollments e
         JOIN students s ON s.id = e.student_id
         LEFT JOIN terms t ON t.id = e.term_id
         WHERE e.course_id = ?
         ORDER BY s.display_name, s.id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&course_id], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "studentId": row.get::<_, String>(1)?,
                "displayName": row.get::<_, String>(2)?,
                "enrolledAt": row.get::<_, String>(3)?,
                "termId": row.get::<_, Option<String>>(4)?,
                "termStartDate": row.get::<_, Option<String>>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(enrollments) => ok(&req.id, json!({ "enrollments": enrollments })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "enrollments.create" => Some(handle_enrollments_create(state, req)),
        "enrollments.list" => Some(handle_enrollments_list(state, req)),
        _ => None,
    }
}
