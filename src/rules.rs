//! Rules that span several records: the derived payment status of a student
//! and the re-keying of a student together with everything that references it.

use serde::Serialize;

use crate::err::Error;
use crate::models::{Exam, ImageBlob, Payment, PaymentPatch, PaymentStatus, Student, StudentPatch};
use crate::store::{is_valid_key, RecordStore};

pub fn total_paid(payments: &[Payment]) -> f64 {
    payments.iter().map(Payment::amount_value).sum()
}

/// Status implied by the fees and the payments made so far. Without fees
/// (unset or zero) the status is always `NotDefined`.
pub fn derive_payment_status(total_fees: Option<f64>, payments: &[Payment]) -> PaymentStatus {
    let fees = total_fees.unwrap_or(0.0);
    let paid = total_paid(payments);
    if fees <= 0.0 {
        PaymentStatus::NotDefined
    } else if paid >= fees {
        PaymentStatus::Complete
    } else if paid > 0.0 {
        PaymentStatus::Partial
    } else {
        PaymentStatus::NotDefined
    }
}

pub async fn exams_of(store: &RecordStore, student_id: &str) -> Result<Vec<Exam>, Error> {
    let exams = store.list::<Exam>().await?;
    Ok(exams
        .into_iter()
        .filter(|exam| exam.student_id == student_id)
        .collect())
}

pub async fn payments_of(store: &RecordStore, student_id: &str) -> Result<Vec<Payment>, Error> {
    let payments = store.list::<Payment>().await?;
    Ok(payments
        .into_iter()
        .filter(|payment| payment.student_id == student_id)
        .collect())
}

// callers hold `store.exclusive()`
async fn refresh_locked(store: &RecordStore, student_id: &str) -> Result<Option<Student>, Error> {
    let student = match store.get::<Student>(student_id).await? {
        Some(student) => student,
        None => return Ok(None),
    };
    let payments = payments_of(store, student_id).await?;
    let status = derive_payment_status(student.total_fees, &payments);
    if status == student.payment_status {
        return Ok(Some(student));
    }

    log::info!(
        "Payment status of student `{}` changed: {} -> {}",
        student_id,
        student.payment_status,
        status
    );
    let student = store
        .update(student_id, |student: &mut Student| student.payment_status = status)
        .await?;
    Ok(Some(student))
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentDetail {
    pub student: Student,
    pub exams: Vec<Exam>,
    pub payments: Vec<Payment>,
    pub total_paid: f64,
}

/// Everything the detail view shows, with the payment status brought up to date.
pub async fn student_detail(store: &RecordStore, id: &str) -> Result<StudentDetail, Error> {
    let _guard = store.exclusive().await;
    let student = refresh_locked(store, id)
        .await?
        .ok_or_else(|| Error::not_found(format!("Student `{}` not found", id)))?;

    let mut exams = exams_of(store, id).await?;
    exams.sort_by(|a, b| b.exam_date.cmp(&a.exam_date));
    let mut payments = payments_of(store, id).await?;
    payments.sort_by(|a, b| b.payment_date.cmp(&a.payment_date));
    let total_paid = total_paid(&payments);

    Ok(StudentDetail {
        student,
        exams,
        payments,
        total_paid,
    })
}

pub async fn register_student(store: &RecordStore, student: Student) -> Result<Student, Error> {
    let _guard = store.exclusive().await;
    let student = store.create(student).await?;
    let id = student.id.clone();
    Ok(refresh_locked(store, &id).await?.unwrap_or(student))
}

pub async fn update_student(
    store: &RecordStore,
    id: &str,
    patch: &StudentPatch,
) -> Result<Student, Error> {
    let _guard = store.exclusive().await;
    store
        .update(id, |student: &mut Student| patch.apply(student))
        .await?;
    refresh_locked(store, id)
        .await?
        .ok_or_else(|| Error::not_found(format!("Student `{}` not found", id)))
}

#[derive(Default)]
struct Migrated {
    exams: Vec<String>,
    payments: Vec<String>,
}

async fn migrate_dependents(
    store: &RecordStore,
    old_id: &str,
    new_id: &str,
    migrated: &mut Migrated,
) -> Result<(), Error> {
    for exam in exams_of(store, old_id).await? {
        store
            .update(&exam.id, |exam: &mut Exam| exam.student_id = new_id.to_string())
            .await?;
        log::debug!("Exam `{}` moved from `{}` to `{}`", exam.id, old_id, new_id);
        migrated.exams.push(exam.id);
    }
    for payment in payments_of(store, old_id).await? {
        store
            .update(&payment.id, |payment: &mut Payment| {
                payment.student_id = new_id.to_string()
            })
            .await?;
        log::debug!("Payment `{}` moved from `{}` to `{}`", payment.id, old_id, new_id);
        migrated.payments.push(payment.id);
    }
    Ok(())
}

/// Points migrated dependents back at `old_id` and drops the copy at `new_id`.
async fn roll_back(store: &RecordStore, old_id: &str, new_id: &str, migrated: &Migrated) {
    for id in &migrated.exams {
        let restored = store
            .update(id, |exam: &mut Exam| exam.student_id = old_id.to_string())
            .await;
        if let Err(err) = restored {
            log::error!("Could not restore exam `{}` to `{}`: {}", id, old_id, err);
        }
    }
    for id in &migrated.payments {
        let restored = store
            .update(id, |payment: &mut Payment| {
                payment.student_id = old_id.to_string()
            })
            .await;
        if let Err(err) = restored {
            log::error!("Could not restore payment `{}` to `{}`: {}", id, old_id, err);
        }
    }
    if let Err(err) = store.delete::<Student>(new_id).await {
        log::error!("Could not remove student copy `{}`: {}", new_id, err);
    }
}

/// Re-keys a student from `old_id` to `new_id`, applying `patch` on the way,
/// and rewrites `student_id` on every exam and payment of that student.
///
/// The old record is removed only after every dependent has been moved. If a
/// step fails, moved dependents are restored and the new record is removed.
pub async fn change_student_id(
    store: &RecordStore,
    old_id: &str,
    new_id: &str,
    patch: &StudentPatch,
) -> Result<Student, Error> {
    if !is_valid_key(new_id) {
        return Err(Error::invalid(format!("Invalid student identifier `{}`", new_id)));
    }

    let _guard = store.exclusive().await;
    let existing = store.fetch::<Student>(old_id).await?;
    if store.get::<Student>(new_id).await?.is_some() {
        return Err(Error::Conflict {
            message: format!("Student identifier `{}` is already in use", new_id),
        });
    }

    let mut renamed = existing;
    patch.apply(&mut renamed);
    renamed.id = new_id.to_string();

    store.put(&renamed).await?;
    let copied = store.get::<Student>(new_id).await;
    if !matches!(&copied, Ok(Some(copy)) if *copy == renamed) {
        roll_back(store, old_id, new_id, &Migrated::default()).await;
        return Err(match copied {
            Err(err) => err,
            Ok(_) => Error::internal(
                "StoreError",
                format!("Copy of student `{}` at `{}` could not be verified", old_id, new_id),
            ),
        });
    }

    let mut migrated = Migrated::default();
    let outcome = match migrate_dependents(store, old_id, new_id, &mut migrated).await {
        Ok(()) => store.delete::<Student>(old_id).await.map(|_| ()),
        Err(err) => Err(err),
    };
    if let Err(err) = outcome {
        log::error!(
            "Renaming student `{}` to `{}` failed, rolling back: {}",
            old_id,
            new_id,
            err
        );
        roll_back(store, old_id, new_id, &migrated).await;
        return Err(err);
    }

    log::info!(
        "Student `{}` renamed to `{}` ({} exams, {} payments moved)",
        old_id,
        new_id,
        migrated.exams.len(),
        migrated.payments.len()
    );
    Ok(refresh_locked(store, new_id).await?.unwrap_or(renamed))
}

/// Deletes a student together with its exams, payments and photo.
pub async fn delete_student(store: &RecordStore, id: &str) -> Result<bool, Error> {
    let _guard = store.exclusive().await;
    let student = store.get::<Student>(id).await?;

    for exam in exams_of(store, id).await? {
        store.delete::<Exam>(&exam.id).await?;
    }
    for payment in payments_of(store, id).await? {
        store.delete::<Payment>(&payment.id).await?;
    }

    match student {
        Some(student) => {
            if let Some(image_id) = &student.image_id {
                store.delete::<ImageBlob>(image_id).await?;
            }
            store.delete::<Student>(id).await?;
            log::info!("Student `{}` deleted with its exams and payments", id);
            Ok(true)
        }
        None => Ok(false),
    }
}

pub async fn record_payment(store: &RecordStore, payment: Payment) -> Result<Payment, Error> {
    let _guard = store.exclusive().await;
    store.fetch::<Student>(&payment.student_id).await?;
    let payment = store.create(payment).await?;
    refresh_locked(store, &payment.student_id).await?;
    Ok(payment)
}

pub async fn amend_payment(
    store: &RecordStore,
    id: &str,
    patch: &PaymentPatch,
) -> Result<Payment, Error> {
    let _guard = store.exclusive().await;
    let before = store.fetch::<Payment>(id).await?;
    if let Some(student_id) = &patch.student_id {
        store.fetch::<Student>(student_id).await?;
    }
    let payment = store
        .update(id, |payment: &mut Payment| patch.apply(payment))
        .await?;

    refresh_locked(store, &payment.student_id).await?;
    if before.student_id != payment.student_id {
        refresh_locked(store, &before.student_id).await?;
    }
    Ok(payment)
}

pub async fn remove_payment(store: &RecordStore, id: &str) -> Result<bool, Error> {
    let _guard = store.exclusive().await;
    let payment = match store.get::<Payment>(id).await? {
        Some(payment) => payment,
        None => return Ok(false),
    };
    store.delete::<Payment>(id).await?;
    refresh_locked(store, &payment.student_id).await?;
    Ok(true)
}
