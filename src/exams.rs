use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Redirect;
use serde::Serialize;

use crate::err::Error;
use crate::form::{FormData, RecordId};
use crate::models::{Exam, ExamPatch, ExamResult, Student};
use crate::state::AppState;
use crate::{proceeds, Payload};

#[derive(Debug, Clone, Serialize)]
pub struct ExamListing {
    pub exams: Vec<Exam>,
    pub students: Vec<Student>,
}

fn new_exam(form: &FormData) -> Result<Exam, Error> {
    Ok(Exam {
        id: String::new(),
        student_id: form.required("student_id")?,
        exam_type: form.required("exam_type")?,
        exam_date: form.required_date("exam_date")?,
        result: form.required_as::<ExamResult>("result")?,
        notes: form.optional("notes"),
    })
}

fn exam_patch(form: &FormData) -> Result<ExamPatch, Error> {
    Ok(ExamPatch {
        student_id: form.replacement("student_id")?,
        exam_type: form.replacement("exam_type")?,
        exam_date: form.replacement_date("exam_date")?,
        result: form.replacement_as::<ExamResult>("result")?,
        notes: form.clearable("notes"),
    })
}

pub async fn list_exams(State(state): State<Arc<AppState>>) -> Payload<ExamListing> {
    let exams = state.store.list::<Exam>().await?;
    let students = state.store.list::<Student>().await?;
    proceeds(ExamListing { exams, students })
}

pub async fn create_exam(
    State(state): State<Arc<AppState>>,
    form: FormData,
) -> Result<Redirect, Error> {
    let exam = new_exam(&form)?;

    let _guard = state.store.exclusive().await;
    state.store.fetch::<Student>(&exam.student_id).await?;
    let exam = state.store.create(exam).await?;
    log::info!("Exam `{}` recorded for student `{}`", exam.id, exam.student_id);
    Ok(Redirect::to("/exams"))
}

pub async fn show_exam(
    State(state): State<Arc<AppState>>,
    RecordId(id): RecordId,
) -> Payload<Exam> {
    proceeds(state.store.fetch::<Exam>(&id).await?)
}

pub async fn update_exam(
    State(state): State<Arc<AppState>>,
    RecordId(id): RecordId,
    form: FormData,
) -> Result<Redirect, Error> {
    state.store.fetch::<Exam>(&id).await?;
    let patch = exam_patch(&form)?;

    let _guard = state.store.exclusive().await;
    if let Some(student_id) = &patch.student_id {
        state.store.fetch::<Student>(student_id).await?;
    }
    state
        .store
        .update(&id, |exam: &mut Exam| patch.apply(exam))
        .await?;
    log::info!("Exam `{}` updated", id);
    Ok(Redirect::to("/exams"))
}

pub async fn delete_exam(
    State(state): State<Arc<AppState>>,
    RecordId(id): RecordId,
) -> Result<StatusCode, Error> {
    if state.store.delete::<Exam>(&id).await? {
        log::info!("Exam `{}` deleted", id);
    }
    Ok(StatusCode::NO_CONTENT)
}
