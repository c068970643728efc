use std::sync::Arc;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Deserialize;

use crate::err::Error;
use crate::export::{self, Dashboard, Period, Statistics};
use crate::models::{Exam, Payment, Student};
use crate::state::AppState;
use crate::store::RecordStore;
use crate::{proceeds, Payload};

struct Snapshot {
    students: Vec<Student>,
    exams: Vec<Exam>,
    payments: Vec<Payment>,
}

async fn snapshot(store: &RecordStore) -> Result<Snapshot, Error> {
    Ok(Snapshot {
        students: store.list().await?,
        exams: store.list().await?,
        payments: store.list().await?,
    })
}

fn attachment(content_type: &'static str, file_name: &str, body: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file_name),
            ),
        ],
        body,
    )
        .into_response()
}

fn csv_file(file_name: &str, text: String) -> Response {
    attachment("text/csv; charset=utf-8", file_name, text.into_bytes())
}

pub async fn show_dashboard(State(state): State<Arc<AppState>>) -> Payload<Dashboard> {
    let data = snapshot(&state.store).await?;
    proceeds(export::dashboard(&data.students, &data.exams, &data.payments))
}

#[derive(Debug, Deserialize)]
pub struct PeriodQuery {
    period: Option<String>,
}

pub async fn show_statistics(
    State(state): State<Arc<AppState>>,
    query: Result<Query<PeriodQuery>, QueryRejection>,
) -> Payload<Statistics> {
    let Query(query) = query?;
    let period = match query.period.as_deref() {
        Some(period) => period.parse::<Period>()?,
        None => Period::default(),
    };
    let data = snapshot(&state.store).await?;
    proceeds(export::statistics(
        &data.students,
        &data.exams,
        &data.payments,
        period,
        Utc::now().naive_utc(),
    ))
}

pub async fn export_students(State(state): State<Arc<AppState>>) -> Result<Response, Error> {
    let students = state.store.list::<Student>().await?;
    let text = export::to_csv(&export::student_rows(&students))?;
    Ok(csv_file("students.csv", text))
}

pub async fn export_exams(State(state): State<Arc<AppState>>) -> Result<Response, Error> {
    let data = snapshot(&state.store).await?;
    let text = export::to_csv(&export::exam_rows(&data.exams, &data.students))?;
    Ok(csv_file("exams.csv", text))
}

pub async fn export_payments(State(state): State<Arc<AppState>>) -> Result<Response, Error> {
    let data = snapshot(&state.store).await?;
    let text = export::to_csv(&export::payment_rows(&data.payments, &data.students))?;
    Ok(csv_file("payments.csv", text))
}

pub async fn export_summary(State(state): State<Arc<AppState>>) -> Result<Response, Error> {
    let data = snapshot(&state.store).await?;
    let rows = export::summary_rows(
        &data.students,
        &data.exams,
        &data.payments,
        Utc::now().naive_utc(),
    );
    Ok(csv_file("summary.csv", export::to_csv(&rows)?))
}

pub async fn export_all(State(state): State<Arc<AppState>>) -> Result<Response, Error> {
    let data = snapshot(&state.store).await?;
    let now = Utc::now();

    let students = export::to_csv(&export::student_rows(&data.students))?;
    let exams = export::to_csv(&export::exam_rows(&data.exams, &data.students))?;
    let payments = export::to_csv(&export::payment_rows(&data.payments, &data.students))?;
    let summary = export::to_csv(&export::summary_rows(
        &data.students,
        &data.exams,
        &data.payments,
        now.naive_utc(),
    ))?;

    let archive = export::bundle(
        &[
            ("students.csv", students.as_bytes()),
            ("exams.csv", exams.as_bytes()),
            ("payments.csv", payments.as_bytes()),
            ("summary.csv", summary.as_bytes()),
        ],
        now.timestamp().max(0) as u64,
    )?;
    let file_name = format!("auto-ecole-{}.tar.gz", now.format("%Y-%m-%d"));
    Ok(attachment("application/gzip", &file_name, archive))
}
