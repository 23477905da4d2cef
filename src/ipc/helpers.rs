use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::store::{fmt_ts, parse_instant};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value as JsonValue;

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, JsonValue> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn required_str(req: &Request, key: &str) -> Result<String, JsonValue> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn now_ts() -> String {
    fmt_ts(Utc::now())
}

pub fn parse_opt_string(v: Option<&JsonValue>) -> Result<Option<String>, &'static str> {
    match v {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let s = v.as_str().ok_or("must be string or null")?.trim();
            Ok(if s.is_empty() { None } else { Some(s.to_string()) })
        }
    }
}

pub fn parse_opt_i64(v: Option<&JsonValue>) -> Result<Option<i64>, &'static str> {
    match v {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v.as_i64().map(Some).ok_or("must be integer or null"),
    }
}

pub fn parse_opt_f64(v: Option<&JsonValue>) -> Result<Option<f64>, &'static str> {
    match v {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_f64()
            .filter(|n| n.is_finite())
            .map(Some)
            .ok_or("must be number or null"),
    }
}

/// `now` override for deterministic reads; defaults to the system clock.
pub fn request_now(req: &Request) -> Result<DateTime<Utc>, JsonValue> {
    match req.params.get("now") {
        None => Ok(Utc::now()),
        Some(v) if v.is_null() => Ok(Utc::now()),
        Some(v) => v.as_str().and_then(parse_instant).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                "now must be an RFC 3339 timestamp or YYYY-MM-DD",
                None,
            )
        }),
    }
}

/// `table` is always a literal from the calling handler.
pub fn ensure_row_exists(
    conn: &Connection,
    req: &Request,
    table: &str,
    id: &str,
    label: &str,
) -> Result<(), JsonValue> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ? LIMIT 1", table);
    let exists = conn
        .query_row(&sql, [id], |_r| Ok(()))
        .optional()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    if exists.is_some() {
        Ok(())
    } else {
        Err(err(&req.id, "not_found", format!("{} not found", label), None))
    }
}
