use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Redirect;
use serde::Serialize;

use crate::err::Error;
use crate::form::{FormData, RecordId};
use crate::models::{parse_amount, Payment, PaymentPatch, PaymentType, Student};
use crate::rules;
use crate::state::AppState;
use crate::{proceeds, Payload};

#[derive(Debug, Clone, Serialize)]
pub struct PaymentListing {
    pub payments: Vec<Payment>,
    pub students: Vec<Student>,
}

fn checked_amount(amount: String) -> Result<String, Error> {
    match parse_amount(&amount) {
        Some(_) => Ok(amount),
        None => Err(Error::invalid(format!("Invalid amount `{}`", amount))),
    }
}

fn new_payment(form: &FormData) -> Result<Payment, Error> {
    Ok(Payment {
        id: String::new(),
        student_id: form.required("student_id")?,
        amount: checked_amount(form.required("amount")?)?,
        payment_date: form.required_date("payment_date")?,
        payment_type: form.required_as::<PaymentType>("payment_type")?,
        notes: form.optional("notes"),
    })
}

fn payment_patch(form: &FormData) -> Result<PaymentPatch, Error> {
    Ok(PaymentPatch {
        student_id: form.replacement("student_id")?,
        amount: form.replacement("amount")?.map(checked_amount).transpose()?,
        payment_date: form.replacement_date("payment_date")?,
        payment_type: form.replacement_as::<PaymentType>("payment_type")?,
        notes: form.clearable("notes"),
    })
}

pub async fn list_payments(State(state): State<Arc<AppState>>) -> Payload<PaymentListing> {
    let payments = state.store.list::<Payment>().await?;
    let students = state.store.list::<Student>().await?;
    proceeds(PaymentListing { payments, students })
}

pub async fn create_payment(
    State(state): State<Arc<AppState>>,
    form: FormData,
) -> Result<Redirect, Error> {
    let payment = rules::record_payment(&state.store, new_payment(&form)?).await?;
    log::info!(
        "Payment `{}` of {} recorded for student `{}`",
        payment.id,
        payment.amount,
        payment.student_id
    );
    Ok(Redirect::to("/payments"))
}

pub async fn show_payment(
    State(state): State<Arc<AppState>>,
    RecordId(id): RecordId,
) -> Payload<Payment> {
    proceeds(state.store.fetch::<Payment>(&id).await?)
}

pub async fn update_payment(
    State(state): State<Arc<AppState>>,
    RecordId(id): RecordId,
    form: FormData,
) -> Result<Redirect, Error> {
    state.store.fetch::<Payment>(&id).await?;
    let patch = payment_patch(&form)?;
    rules::amend_payment(&state.store, &id, &patch).await?;
    log::info!("Payment `{}` updated", id);
    Ok(Redirect::to("/payments"))
}

pub async fn delete_payment(
    State(state): State<Arc<AppState>>,
    RecordId(id): RecordId,
) -> Result<StatusCode, Error> {
    if rules::remove_payment(&state.store, &id).await? {
        log::info!("Payment `{}` deleted", id);
    }
    Ok(StatusCode::NO_CONTENT)
}
