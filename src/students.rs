use std::sync::Arc;

use axum::extract::State;
use axum::response::Redirect;
use axum::Json;
use chrono::Utc;

use crate::err::Error;
use crate::form::{FormData, RecordId};
use crate::images::{discard_image, save_image};
use crate::models::{PaymentStatus, Student, StudentPatch, StudentStatus};
use crate::rules::{self, StudentDetail};
use crate::state::AppState;
use crate::store::is_valid_key;
use crate::{proceeds, Payload};

fn new_student(form: &FormData) -> Result<Student, Error> {
    let id = form.optional("id").unwrap_or_default();
    if !id.is_empty() && !is_valid_key(&id) {
        return Err(Error::invalid(format!("Invalid student identifier `{}`", id)));
    }

    Ok(Student {
        id,
        name: form.required("name")?,
        phone: form.required("phone")?,
        national_id: form.required("national_id")?,
        status: form.required_as::<StudentStatus>("status")?,
        payment_status: form.required_as::<PaymentStatus>("payment_status")?,
        address: form.optional("address"),
        date_of_registration: Utc::now(),
        total_fees: form.clearable_number("total_fees")?.flatten(),
        image_id: None,
        birthday: form.clearable_date("birthday")?.flatten(),
    })
}

fn student_patch(form: &FormData) -> Result<StudentPatch, Error> {
    Ok(StudentPatch {
        name: form.replacement("name")?,
        phone: form.replacement("phone")?,
        national_id: form.replacement("national_id")?,
        address: form.clearable("address"),
        status: form.replacement_as::<StudentStatus>("status")?,
        payment_status: form.replacement_as::<PaymentStatus>("payment_status")?,
        total_fees: form.clearable_number("total_fees")?,
        image_id: None,
        birthday: form.clearable_date("birthday")?,
    })
}

pub async fn list_students(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Student>>, Error> {
    Ok(Json(state.store.list::<Student>().await?))
}

pub async fn create_student(
    State(state): State<Arc<AppState>>,
    form: FormData,
) -> Result<Redirect, Error> {
    let mut student = new_student(&form)?;
    if let Some(file) = &form.file {
        student.image_id = Some(save_image(&state.store, file).await?);
    }
    let image_id = student.image_id.clone();

    let student = match rules::register_student(&state.store, student).await {
        Ok(student) => student,
        Err(err) => {
            if let Some(image_id) = &image_id {
                discard_image(&state.store, image_id).await;
            }
            return Err(err);
        }
    };
    log::info!("Student `{}` registered ({})", student.id, student.name);
    Ok(Redirect::to("/students"))
}

pub async fn show_student(
    State(state): State<Arc<AppState>>,
    RecordId(id): RecordId,
) -> Payload<StudentDetail> {
    proceeds(rules::student_detail(&state.store, &id).await?)
}

pub async fn update_student(
    State(state): State<Arc<AppState>>,
    RecordId(id): RecordId,
    form: FormData,
) -> Result<Redirect, Error> {
    let existing = state.store.fetch::<Student>(&id).await?;
    let mut patch = student_patch(&form)?;
    if let Some(file) = &form.file {
        patch.image_id = Some(save_image(&state.store, file).await?);
    }

    let target = form.optional("id").filter(|new_id| *new_id != id);
    let outcome = match target {
        Some(new_id) => rules::change_student_id(&state.store, &id, &new_id, &patch).await,
        None => rules::update_student(&state.store, &id, &patch).await,
    };
    let student = match outcome {
        Ok(student) => student,
        Err(err) => {
            if let Some(image_id) = &patch.image_id {
                discard_image(&state.store, image_id).await;
            }
            return Err(err);
        }
    };

    // a replaced photo is no longer referenced
    if let (Some(old), Some(_)) = (&existing.image_id, &patch.image_id) {
        discard_image(&state.store, old).await;
    }

    log::info!("Student `{}` updated", student.id);
    Ok(Redirect::to(&format!("/students/{}", student.id)))
}

pub async fn delete_student(
    State(state): State<Arc<AppState>>,
    RecordId(id): RecordId,
) -> Result<Redirect, Error> {
    if !rules::delete_student(&state.store, &id).await? {
        log::info!("Student `{}` was already absent", id);
    }
    Ok(Redirect::to("/students"))
}
