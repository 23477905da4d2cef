use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, now_ts, parse_opt_string, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter};
use serde_json::json;
use uuid::Uuid;

const ROLES: [&str; 4] = ["admin", "trainer", "trainee", "teammate"];

fn parse_role(raw: &str) -> Option<&'static str> {
    let lowered = raw.trim().to_ascii_lowercase();
    ROLES.iter().copied().find(|r| *r == lowered)
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "students": [] }));
    };
    let role = match parse_opt_string(req.params.get("role")) {
        Ok(None) => None,
        Ok(Some(raw)) => match parse_role(&raw) {
            Some(r) => Some(r),
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "role must be one of: admin, trainer, trainee, teammate",
                    None,
                )
            }
        },
        Err(m) => return err(&req.id, "bad_params", format!("role {}", m), None),
    };

    let mut sql = "SELECT id, display_name, role FROM students".to_string();
    let mut bind: Vec<Value> = Vec::new();
    if let Some(r) = role {
        sql.push_str(" WHERE role = ?");
        bind.push(Value::Text(r.to_string()));
    }
    sql.push_str(" ORDER BY display_name, id");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(params_from_iter(bind), |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "displayName": row.get::<_, String>(1)?,
                "role": row.get::<_, String>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let display_name = match required_str(req, "displayName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let role = match req.params.get("role").and_then(|v| v.as_str()) {
        None => "trainee",
        Some(raw) => match parse_role(raw) {
            Some(r) => r,
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "role must be one of: admin, trainer, trainee, teammate",
                    None,
                )
            }
        },
    };

    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, display_name, role, created_at) VALUES(?, ?, ?, ?)",
        params![student_id, display_name, role, now_ts()],
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "studentId": student_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        _ => None,
    }
}
