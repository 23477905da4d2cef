use crate::schedule::{
    CategoryLayout, CourseLayout, Enrollment, Exercise, SortKeyAssignment, Submission, Term,
};
use anyhow::Context;
use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{HashMap, HashSet};

pub fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Accepts RFC 3339 timestamps or bare `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    parse_date(raw).map(|d| Utc.from_utc_datetime(&d.and_time(NaiveTime::MIN)))
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

#[derive(Debug, Clone)]
pub struct ExerciseRow {
    pub exercise: Exercise,
    pub title: String,
    pub sort_key: i64,
}

#[derive(Debug, Clone)]
pub struct CategoryRow {
    pub id: String,
    pub name: String,
    pub sort_order: i64,
}

pub fn load_categories(conn: &Connection, course_id: &str) -> anyhow::Result<Vec<CategoryRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, sort_order FROM categories WHERE course_id = ? ORDER BY sort_order, name, id",
    )?;
    let rows = stmt
        .query_map([course_id], |r| {
            Ok(CategoryRow {
                id: r.get(0)?,
                name: r.get(1)?,
                sort_order: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn load_exercises(conn: &Connection, course_id: &str) -> anyhow::Result<Vec<ExerciseRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, course_id, category_id, title, days_to_open, days_to_due, days_to_close, points, sort_key
         FROM exercises
         WHERE course_id = ?
         ORDER BY sort_key, created_at, id",
    )?;
    let rows = stmt
        .query_map([course_id], |r| {
            Ok(ExerciseRow {
                exercise: Exercise {
                    id: r.get(0)?,
                    course_id: r.get(1)?,
                    category_id: r.get(2)?,
                    days_to_open: r.get(4)?,
                    days_to_due: r.get(5)?,
                    days_to_close: r.get(6)?,
                    points: r.get(7)?,
                },
                title: r.get(3)?,
                sort_key: r.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn enrollment_from_columns(enrolled_at: String, start: Option<String>, end: Option<String>) -> Enrollment {
    let term = start.as_deref().and_then(parse_date).map(|start_date| Term {
        start_date,
        end_date: end.as_deref().and_then(parse_date),
    });
    Enrollment {
        enrolled_at: parse_instant(&enrolled_at),
        term,
    }
}

pub fn load_enrollment(
    conn: &Connection,
    student_id: &str,
    course_id: &str,
) -> anyhow::Result<Option<Enrollment>> {
    let row = conn
        .query_row(
            "SELECT e.enrolled_at, t.start_date, t.end_date
             FROM enrollments e
             LEFT JOIN terms t ON t.id = e.term_id
             WHERE e.student_id = ? AND e.course_id = ?",
            [student_id, course_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, Option<String>>(1)?,
                    r.get::<_, Option<String>>(2)?,
                ))
            },
        )
        .optional()
        .context("failed to read enrollment")?;
    Ok(row.map(|(at, start, end)| enrollment_from_columns(at, start, end)))
}

/// Enrolled students of a course with their enrollment, ordered by name.
pub fn load_course_enrollments(
    conn: &Connection,
    course_id: &str,
) -> anyhow::Result<Vec<(String, Enrollment)>> {
    let mut stmt = conn.prepare(
        "SELECT e.student_id, e.enrolled_at, t.start_date, t.end_date
         FROM enrollments e
         JOIN students s ON s.id = e.student_id
         LEFT JOIN terms t ON t.id = e.term_id
         WHERE e.course_id = ?
         ORDER BY s.display_name, s.id",
    )?;
    let rows = stmt
        .query_map([course_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<String>>(2)?,
                r.get::<_, Option<String>>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows
        .into_iter()
        .map(|(student_id, at, start, end)| (student_id, enrollment_from_columns(at, start, end)))
        .collect())
}

/// Submissions for a course keyed by `(student_id, exercise_id)`.
pub fn load_course_submissions(
    conn: &Connection,
    course_id: &str,
) -> anyhow::Result<HashMap<(String, String), Submission>> {
    let mut stmt = conn.prepare(
        "SELECT s.student_id, s.exercise_id, s.score, s.submitted_at
         FROM submissions s
         JOIN exercises x ON x.id = s.exercise_id
         WHERE x.course_id = ?",
    )?;
    let rows = stmt
        .query_map([course_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<f64>>(2)?,
                r.get::<_, String>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let mut out = HashMap::new();
    for (student_id, exercise_id, score, submitted_at) in rows {
        out.insert(
            (student_id, exercise_id),
            Submission {
                score,
                submitted_at: parse_instant(&submitted_at).unwrap_or_default(),
            },
        );
    }
    Ok(out)
}

/// Layout as currently stored: categories by `sort_order`, exercises by
/// their persisted key.
pub fn current_layout(conn: &Connection, course_id: &str) -> anyhow::Result<CourseLayout> {
    let categories = load_categories(conn, course_id)?;
    let exercises = load_exercises(conn, course_id)?;
    let mut layout = CourseLayout {
        categories: categories
            .iter()
            .map(|c| CategoryLayout {
                category_id: c.id.clone(),
                order: c.sort_order,
                exercise_ids: Vec::new(),
            })
            .collect(),
        uncategorized: Vec::new(),
    };
    for row in exercises {
        let slot = row
            .exercise
            .category_id
            .as_ref()
            .and_then(|cid| layout.categories.iter_mut().find(|c| &c.category_id == cid));
        match slot {
            Some(category) => category.exercise_ids.push(row.exercise.id),
            None => layout.uncategorized.push(row.exercise.id),
        }
    }
    Ok(layout)
}

/// Moves the requested exercises into the requested positions. Anything
/// the request does not mention keeps its category and relative order,
/// after the requested ones.
pub fn merge_layout(current: &CourseLayout, requested: &CourseLayout) -> CourseLayout {
    let mentioned: HashSet<&str> = requested
        .categories
        .iter()
        .flat_map(|c| c.exercise_ids.iter())
        .chain(requested.uncategorized.iter())
        .map(String::as_str)
        .collect();

    let keep_unmentioned = |ids: &[String], head: Vec<String>| -> Vec<String> {
        let mut out = head;
        for id in ids {
            if !mentioned.contains(id.as_str()) {
                out.push(id.clone());
            }
        }
        out
    };

    let categories = current
        .categories
        .iter()
        .map(|c| {
            let head = requested
                .categories
                .iter()
                .find(|r| r.category_id == c.category_id)
                .map(|r| dedup(&r.exercise_ids))
                .unwrap_or_default();
            CategoryLayout {
                category_id: c.category_id.clone(),
                order: c.order,
                exercise_ids: keep_unmentioned(&c.exercise_ids, head),
            }
        })
        .collect();

    CourseLayout {
        categories,
        uncategorized: keep_unmentioned(&current.uncategorized, dedup(&requested.uncategorized)),
    }
}

fn dedup(ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}

/// Writes the category orders of `layout` and each exercise assignment as
/// individual updates inside one transaction.
pub fn apply_layout(
    conn: &Connection,
    course_id: &str,
    layout: &CourseLayout,
    assignments: &[SortKeyAssignment],
    updated_at: &str,
) -> anyhow::Result<usize> {
    let tx = conn
        .unchecked_transaction()
        .context("failed to start transaction")?;
    for category in &layout.categories {
        tx.execute(
            "UPDATE categories SET sort_order = ? WHERE course_id = ? AND id = ?",
            params![category.order, course_id, category.category_id],
        )
        .with_context(|| format!("failed to update category {}", category.category_id))?;
    }
    let mut updated = 0;
    for a in assignments {
        updated += tx
            .execute(
                "UPDATE exercises SET sort_key = ?, category_id = ?, updated_at = ?
                 WHERE course_id = ? AND id = ?",
                params![a.sort_key, a.category_id, updated_at, course_id, a.exercise_id],
            )
            .with_context(|| format!("failed to update exercise {}", a.exercise_id))?;
    }
    tx.commit().context("failed to commit layout")?;
    Ok(updated)
}
