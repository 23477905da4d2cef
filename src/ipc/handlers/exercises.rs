use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup::load_scheduling_settings;
use crate::ipc::helpers::{
    db_conn, ensure_row_exists, now_ts, parse_opt_f64, parse_opt_i64, parse_opt_string,
    required_str,
};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{self, CourseLayout, SortKeyAssignment};
use crate::store;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{json, Value as JsonValue};
use std::collections::HashSet;
use uuid::Uuid;

fn ensure_course(conn: &Connection, req: &Request, course_id: &str) -> Result<(), JsonValue> {
    ensure_row_exists(conn, req, "courses", course_id, "course")
}

fn warnings_json(assignments: &[SortKeyAssignment]) -> Vec<JsonValue> {
    assignments
        .iter()
        .filter_map(|a| {
            a.warning.map(|w| {
                json!({
                    "exerciseId": a.exercise_id,
                    "sortKey": a.sort_key,
                    "message": w.to_string(),
                    "detail": w,
                })
            })
        })
        .collect()
}

/// Derives keys for every exercise in `layout` and writes them back together
/// with the layout's category orders. With `strictSortKeys` on, any
/// out-of-range key rejects the whole write before anything is stored.
fn resequence(
    conn: &Connection,
    req: &Request,
    course_id: &str,
    layout: &CourseLayout,
) -> Result<JsonValue, JsonValue> {
    let settings = load_scheduling_settings(conn);
    let assignments = schedule::assign_sort_keys(layout);
    let warnings = warnings_json(&assignments);
    if !warnings.is_empty() {
        if settings.strict_sort_keys {
            return Err(err(
                &req.id,
                "bad_params",
                "layout produces sort keys outside the collision-free range",
                Some(json!({ "warnings": warnings })),
            ));
        }
        for a in &assignments {
            if let Some(w) = a.warning {
                tracing::warn!(
                    course_id,
                    exercise_id = %a.exercise_id,
                    sort_key = a.sort_key,
                    "sort key out of range: {}",
                    w
                );
            }
        }
    }

    let updated = store::apply_layout(conn, course_id, layout, &assignments, &now_ts())
        .map_err(|e| err(&req.id, "db_update_failed", format!("{e:#}"), None))?;
    tracing::info!(course_id, updated, "sort keys rewritten");
    Ok(json!({ "updated": updated, "warnings": warnings }))
}

fn handle_categories_list(state: &mut AppState, req: &Request) -> JsonValue {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = ensure_course(conn, req, &course_id) {
        return e;
    }
    match store::load_categories(conn, &course_id) {
        Ok(rows) => {
            let categories: Vec<JsonValue> = rows
                .into_iter()
                .map(|c| json!({ "id": c.id, "name": c.name, "order": c.sort_order }))
                .collect();
            ok(&req.id, json!({ "categories": categories }))
        }
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_categories_create(state: &mut AppState, req: &Request) -> JsonValue {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = ensure_course(conn, req, &course_id) {
        return e;
    }
    let order = match parse_opt_i64(req.params.get("order")) {
        Ok(Some(v)) if v >= 0 => v,
        Ok(Some(_)) => return err(&req.id, "bad_params", "order must be >= 0", None),
        Ok(None) => {
            let next: Result<i64, rusqlite::Error> = conn.query_row(
                "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM categories WHERE course_id = ?",
                [&course_id],
                |r| r.get(0),
            );
            match next {
                Ok(v) => v,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            }
        }
        Err(m) => return err(&req.id, "bad_params", format!("order {}", m), None),
    };

    // Two categories sharing an order would share a sort-key range.
    let taken: Result<Option<String>, rusqlite::Error> = conn
        .query_row(
            "SELECT id FROM categories WHERE course_id = ? AND sort_order = ? LIMIT 1",
            params![course_id, order],
            |r| r.get(0),
        )
        .optional();
    match taken {
        Ok(Some(existing)) => {
            return err(
                &req.id,
                "bad_params",
                format!("order {} is already used by another category", order),
                Some(json!({ "categoryId": existing })),
            )
        }
        Ok(None) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let category_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO categories(id, course_id, name, sort_order) VALUES(?, ?, ?, ?)",
        params![category_id, course_id, name, order],
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "categoryId": category_id, "order": order }))
}

fn handle_categories_reorder(state: &mut AppState, req: &Request) -> JsonValue {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = ensure_course(conn, req, &course_id) {
        return e;
    }
    let Some(ids) = req.params.get("categoryIds").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing categoryIds", None);
    };
    let mut provided: Vec<String> = Vec::new();
    let mut seen = HashSet::new();
    for v in ids {
        let Some(s) = v.as_str() else {
            return err(&req.id, "bad_params", "categoryIds must be strings", None);
        };
        let s = s.trim();
        if s.is_empty() {
            return err(&req.id, "bad_params", "categoryIds must not contain empty values", None);
        }
        if seen.insert(s.to_string()) {
            provided.push(s.to_string());
        }
    }

    let existing: Vec<String> = match store::load_categories(conn, &course_id) {
        Ok(rows) => rows.into_iter().map(|c| c.id).collect(),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let existing_set: HashSet<&String> = existing.iter().collect();
    for id in &provided {
        if !existing_set.contains(id) {
            return err(
                &req.id,
                "bad_params",
                format!("category id not found for course: {}", id),
                None,
            );
        }
    }
    let mut final_order = provided;
    for id in &existing {
        if !final_order.contains(id) {
            final_order.push(id.clone());
        }
    }

    let current = match store::current_layout(conn, &course_id) {
        Ok(l) => l,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let mut categories = Vec::with_capacity(current.categories.len());
    for (idx, id) in final_order.iter().enumerate() {
        if let Some(c) = current.categories.iter().find(|c| &c.category_id == id) {
            let mut c = c.clone();
            c.order = idx as i64;
            categories.push(c);
        }
    }
    let layout = CourseLayout {
        categories,
        uncategorized: current.uncategorized,
    };
    match resequence(conn, req, &course_id, &layout) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e,
    }
}

fn handle_exercises_list(state: &mut AppState, req: &Request) -> JsonValue {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = ensure_course(conn, req, &course_id) {
        return e;
    }
    match store::load_exercises(conn, &course_id) {
        Ok(rows) => {
            let exercises: Vec<JsonValue> = rows
                .into_iter()
                .map(|r| {
                    json!({
                        "id": r.exercise.id,
                        "title": r.title,
                        "categoryId": r.exercise.category_id,
                        "daysToOpen": r.exercise.days_to_open,
                        "daysToDue": r.exercise.days_to_due,
                        "daysToClose": r.exercise.days_to_close,
                        "points": r.exercise.points,
                        "sortKey": r.sort_key,
                    })
                })
                .collect();
            ok(&req.id, json!({ "exercises": exercises }))
        }
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_exercises_create(state: &mut AppState, req: &Request) -> JsonValue {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = ensure_course(conn, req, &course_id) {
        return e;
    }
    let settings = load_scheduling_settings(conn);

    let Some(input) = req.params.get("input").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing input", None);
    };
    let title = match input.get("title").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "input.title is required", None),
    };
    if title.is_empty() {
        return err(&req.id, "bad_params", "input.title must not be empty", None);
    }
    let category_id = match parse_opt_string(input.get("categoryId")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("input.categoryId {}", m), None),
    };
    let days_to_open = match parse_opt_i64(input.get("daysToOpen")) {
        Ok(v) => v.unwrap_or(0),
        Err(m) => return err(&req.id, "bad_params", format!("input.daysToOpen {}", m), None),
    };
    let days_to_due = match parse_opt_i64(input.get("daysToDue")) {
        Ok(v) => v.unwrap_or(settings.default_days_to_due),
        Err(m) => return err(&req.id, "bad_params", format!("input.daysToDue {}", m), None),
    };
    let days_to_close = match parse_opt_i64(input.get("daysToClose")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("input.daysToClose {}", m), None),
    };
    let points = match parse_opt_f64(input.get("points")) {
        Ok(Some(v)) if v >= 0.0 => v,
        Ok(Some(_)) => return err(&req.id, "bad_params", "input.points must be >= 0", None),
        Ok(None) => 0.0,
        Err(m) => return err(&req.id, "bad_params", format!("input.points {}", m), None),
    };

    // Next slot of the target category, or the uncategorized tail.
    let slot: Result<Option<(i64, i64)>, rusqlite::Error> = match category_id.as_deref() {
        Some(cid) => conn
            .query_row(
                "SELECT c.sort_order,
                        (SELECT COUNT(*) FROM exercises x WHERE x.category_id = c.id)
                 FROM categories c
                 WHERE c.id = ? AND c.course_id = ?",
                params![cid, course_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional(),
        None => conn
            .query_row(
                "SELECT COUNT(*) FROM exercises WHERE course_id = ? AND category_id IS NULL",
                [&course_id],
                |r| r.get::<_, i64>(0),
            )
            .map(|count| Some((0, count))),
    };
    let (order, index) = match slot {
        Ok(Some(v)) => v,
        Ok(None) => {
            return err(
                &req.id,
                "not_found",
                "category not found for course",
                None,
            )
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let category_order = category_id.as_ref().map(|_| order);
    let sort_key = schedule::sort_key(order, index, category_id.is_none());
    if let Err(w) = schedule::checked_sort_key(category_order, index) {
        if settings.strict_sort_keys {
            return err(
                &req.id,
                "bad_params",
                w.to_string(),
                Some(json!({ "detail": w })),
            );
        }
        tracing::warn!(course_id = %course_id, sort_key, "sort key out of range: {}", w);
    }

    let exercise_id = Uuid::new_v4().to_string();
    let ts = now_ts();
    if let Err(e) = conn.execute(
        "INSERT INTO exercises(
            id, course_id, category_id, title, days_to_open, days_to_due, days_to_close, points, sort_key, created_at, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            exercise_id,
            course_id,
            category_id,
            title,
            days_to_open,
            days_to_due,
            days_to_close,
            points,
            sort_key,
            ts,
            ts
        ],
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    tracing::info!(course_id = %course_id, exercise_id = %exercise_id, sort_key, "exercise created");
    ok(&req.id, json!({ "exerciseId": exercise_id, "sortKey": sort_key }))
}

fn handle_exercises_reorder(state: &mut AppState, req: &Request) -> JsonValue {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = ensure_course(conn, req, &course_id) {
        return e;
    }
    let Some(raw_layout) = req.params.get("layout") else {
        return err(&req.id, "bad_params", "missing layout", None);
    };
    let requested: CourseLayout = match serde_json::from_value(raw_layout.clone()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "bad_params", format!("invalid layout: {}", e), None),
    };

    let current = match store::current_layout(conn, &course_id) {
        Ok(l) => l,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let known_categories: HashSet<&str> = current
        .categories
        .iter()
        .map(|c| c.category_id.as_str())
        .collect();
    let known_exercises: HashSet<&str> = current
        .categories
        .iter()
        .flat_map(|c| c.exercise_ids.iter())
        .chain(current.uncategorized.iter())
        .map(String::as_str)
        .collect();

    let mut seen_categories = HashSet::new();
    for c in &requested.categories {
        if !known_categories.contains(c.category_id.as_str()) {
            return err(
                &req.id,
                "bad_params",
                format!("category id not found for course: {}", c.category_id),
                None,
            );
        }
        if !seen_categories.insert(c.category_id.as_str()) {
            return err(
                &req.id,
                "bad_params",
                format!("category listed twice: {}", c.category_id),
                None,
            );
        }
    }
    let mut placed: HashSet<&str> = HashSet::new();
    let requested_ids = requested
        .categories
        .iter()
        .map(|c| (Some(c.category_id.as_str()), &c.exercise_ids))
        .chain(std::iter::once((None, &requested.uncategorized)));
    for (category, ids) in requested_ids {
        let mut within = HashSet::new();
        for id in ids {
            if !known_exercises.contains(id.as_str()) {
                return err(
                    &req.id,
                    "bad_params",
                    format!("exercise id not found for course: {}", id),
                    None,
                );
            }
            if within.insert(id.as_str()) && !placed.insert(id.as_str()) {
                return err(
                    &req.id,
                    "bad_params",
                    format!("exercise placed in more than one slot: {}", id),
                    Some(json!({ "categoryId": category })),
                );
            }
        }
    }

    let merged = store::merge_layout(&current, &requested);
    match resequence(conn, req, &course_id, &merged) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e,
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<JsonValue> {
    match req.method.as_str() {
        "categories.list" => Some(handle_categories_list(state, req)),
        "categories.create" => Some(handle_categories_create(state, req)),
        "categories.reorder" => Some(handle_categories_reorder(state, req)),
        "exercises.list" => Some(handle_exercises_list(state, req)),
        "exercises.create" => Some(handle_exercises_create(state, req)),
        "exercises.reorder" => Some(handle_exercises_reorder(state, req)),
        _ => None,
    }
}
