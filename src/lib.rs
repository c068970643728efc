//! Administration server for a driving school: students, their exams and
//! payments, kept in a file-backed key-value store, with CSV exports and
//! period statistics.

pub mod auth;
pub mod config;
pub mod err;
pub mod exams;
pub mod export;
pub mod form;
pub mod images;
pub mod io;
pub mod models;
pub mod payments;
pub mod reports;
pub mod rules;
pub mod state;
pub mod store;
pub mod students;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use serde::Serialize;

pub use crate::err::Error;
use crate::err::Success;
use crate::state::AppState;

pub type Payload<T> = Result<Json<Success<T>>, Error>;

pub fn proceeds<V>(value: V) -> Payload<V>
where
    V: Serialize,
{
    Ok(Json(Success::of(value)))
}

pub fn breaks<V>(err: Error) -> Payload<V>
where
    V: Serialize,
{
    Err(err)
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(reports::show_dashboard))
        .route(
            "/students",
            get(students::list_students).post(students::create_student),
        )
        .route(
            "/students/:id",
            get(students::show_student)
                .post(students::update_student)
                .delete(students::delete_student),
        )
        .route("/exams", get(exams::list_exams).post(exams::create_exam))
        .route(
            "/exams/:id",
            get(exams::show_exam)
                .post(exams::update_exam)
                .put(exams::update_exam)
                .delete(exams::delete_exam),
        )
        .route(
            "/payments",
            get(payments::list_payments).post(payments::create_payment),
        )
        .route(
            "/payments/:id",
            get(payments::show_payment)
                .post(payments::update_payment)
                .put(payments::update_payment)
                .delete(payments::delete_payment),
        )
        .route("/images/:id", get(images::show_image))
        .route("/statistics", get(reports::show_statistics))
        .route("/export/students.csv", get(reports::export_students))
        .route("/export/exams.csv", get(reports::export_exams))
        .route("/export/payments.csv", get(reports::export_payments))
        .route("/export/summary.csv", get(reports::export_summary))
        .route("/export/all.tar.gz", get(reports::export_all))
        .route("/login", get(auth::login_page))
        .route("/auth", post(auth::authenticate))
        .route("/logout", get(auth::logout).post(auth::logout))
        .route("/change-password", post(auth::change_password))
        .fallback(err::handler404)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_session,
        ))
        .layer(DefaultBodyLimit::max(state.config.max_upload))
        .with_state(state)
}
