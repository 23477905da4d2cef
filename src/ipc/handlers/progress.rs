use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, ensure_row_exists, request_now, required_str};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{self, SubmissionStatus};
use crate::store::{self, fmt_ts};
use serde_json::json;

fn handle_progress_student(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let now = match request_now(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = ensure_row_exists(conn, req, "students", &student_id, "student") {
        return e;
    }
    if let Err(e) = ensure_row_exists(conn, req, "courses", &course_id, "course") {
        return e;
    }

    let enrollment = match store::load_enrollment(conn, &student_id, &course_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", format!("{e:#}"), None),
    };
    let exercises = match store::load_exercises(conn, &course_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let submissions = match store::load_course_submissions(conn, &course_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let reference = schedule::reference_date(enrollment.as_ref(), now);
    let mut rows = Vec::with_capacity(exercises.len());
    for row in exercises {
        let dates = schedule::adjust_dates_at(&row.exercise, enrollment.as_ref(), now);
        let submission = submissions.get(&(student_id.clone(), row.exercise.id.clone()));
        let status = schedule::classify(submission, dates.open_date, dates.close_date);
        rows.push(json!({
            "exerciseId": row.exercise.id,
            "title": row.title,
            "categoryId": row.exercise.category_id,
            "sortKey": row.sort_key,
            "points": row.exercise.points,
            "openDate": fmt_ts(dates.open_date),
            "dueDate": fmt_ts(dates.due_date),
            "closeDate": fmt_ts(dates.close_date),
            "status": status,
            "availability": schedule::availability(&dates, now),
            "score": submission.and_then(|s| s.score),
        }));
    }

    ok(
        &req.id,
        json!({
            "enrolled": enrollment.is_some(),
            "referenceDate": fmt_ts(reference),
            "exercises": rows,
        }),
    )
}

fn handle_progress_course(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let now = match request_now(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = ensure_row_exists(conn, req, "courses", &course_id, "course") {
        return e;
    }

    let enrollments = match store::load_course_enrollments(conn, &course_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let exercises = match store::load_exercises(conn, &course_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let submissions = match store::load_course_submissions(conn, &course_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut rows = Vec::with_capacity(exercises.len());
    for row in &exercises {
        let (mut not_started, mut pending, mut completed, mut closed_unsubmitted) = (0, 0, 0, 0);
        for (student_id, enrollment) in &enrollments {
            let dates = schedule::adjust_dates_at(&row.exercise, Some(enrollment), now);
            let submission = submissions.get(&(student_id.clone(), row.exercise.id.clone()));
            match schedule::classify(submission, dates.open_date, dates.close_date) {
                SubmissionStatus::NotStarted => {
                    not_started += 1;
                    if schedule::availability(&dates, now) == schedule::Availability::Closed {
                        closed_unsubmitted += 1;
                    }
                }
                SubmissionStatus::Pending => pending += 1,
                SubmissionStatus::Completed => completed += 1,
            }
        }
        rows.push(json!({
            "exerciseId": row.exercise.id,
            "title": row.title,
            "sortKey": row.sort_key,
            "notStarted": not_started,
            "pending": pending,
            "completed": completed,
            "closedWithoutSubmission": closed_unsubmitted,
        }));
    }

    ok(
        &req.id,
        json!({
            "enrolledCount": enrollments.len(),
            "exercises": rows,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "progress.student" => Some(handle_progress_student(state, req)),
        "progress.course" => Some(handle_progress_course(state, req)),
        _ => None,
    }
}
