use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::err::Error;
use crate::store::{Kind, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StudentStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Complete,
    Partial,
    NotDefined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExamResult {
    Pass,
    Fail,
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    Cash,
    Card,
}

macro_rules! form_enum {
    ($ty:ident, $what:literal, { $($text:literal => $variant:ident),+ $(,)? }) => {
        impl FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim() {
                    $($text => Ok($ty::$variant),)+
                    other => Err(Error::invalid(format!(
                        "Invalid {} `{}`",
                        $what, other
                    ))),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(match self {
                    $($ty::$variant => $text,)+
                })
            }
        }
    };
}

form_enum!(StudentStatus, "status", { "active" => Active, "inactive" => Inactive });
form_enum!(PaymentStatus, "payment_status", {
    "complete" => Complete,
    "partial" => Partial,
    "not_defined" => NotDefined,
});
form_enum!(ExamResult, "result", { "pass" => Pass, "fail" => Fail, "pending" => Pending });
form_enum!(PaymentType, "payment_type", { "cash" => Cash, "card" => Card });

/// Exam types the school uses; `exam_type` itself stays free-form.
pub const EXAM_TYPE_CODE: &str = "code";
pub const EXAM_TYPE_DRIVING: &str = "driving";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: String,
    pub name: String,
    pub phone: String,
    pub national_id: String,
    pub address: Option<String>,
    pub date_of_registration: DateTime<Utc>,
    pub status: StudentStatus,
    pub payment_status: PaymentStatus,
    pub total_fees: Option<f64>,
    pub image_id: Option<String>,
    pub birthday: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exam {
    pub id: String,
    pub student_id: String,
    pub exam_type: String,
    pub exam_date: NaiveDate,
    pub result: ExamResult,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    pub student_id: String,
    /// Decimal string as typed in the form.
    pub amount: String,
    pub payment_date: NaiveDate,
    pub payment_type: PaymentType,
    pub notes: Option<String>,
}

impl Payment {
    /// Amount as a number; unparsable amounts count as zero.
    pub fn amount_value(&self) -> f64 {
        parse_amount(&self.amount).unwrap_or(0.0)
    }
}

/// An uploaded photo, kept base64 encoded next to its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageBlob {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub data: String,
}

pub fn parse_amount(amount: &str) -> Option<f64> {
    amount
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite() && *value >= 0.0)
}

impl Record for Student {
    const KIND: Kind = Kind::Students;

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

impl Record for Exam {
    const KIND: Kind = Kind::Exams;

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

impl Record for Payment {
    const KIND: Kind = Kind::Payments;

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

impl Record for ImageBlob {
    const KIND: Kind = Kind::Images;

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

/// Fields supplied by an edit form. `None` keeps the stored value; for the
/// optional fields `Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct StudentPatch {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub national_id: Option<String>,
    pub address: Option<Option<String>>,
    pub status: Option<StudentStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub total_fees: Option<Option<f64>>,
    pub image_id: Option<String>,
    pub birthday: Option<Option<NaiveDate>>,
}

impl StudentPatch {
    pub fn apply(&self, student: &mut Student) {
        if let Some(name) = &self.name {
            student.name = name.clone();
        }
        if let Some(phone) = &self.phone {
            student.phone = phone.clone();
        }
        if let Some(national_id) = &self.national_id {
            student.national_id = national_id.clone();
        }
        if let Some(address) = &self.address {
            student.address = address.clone();
        }
        if let Some(status) = self.status {
            student.status = status;
        }
        if let Some(payment_status) = self.payment_status {
            student.payment_status = payment_status;
        }
        if let Some(total_fees) = self.total_fees {
            student.total_fees = total_fees;
        }
        if let Some(image_id) = &self.image_id {
            student.image_id = Some(image_id.clone());
        }
        if let Some(birthday) = self.birthday {
            student.birthday = birthday;
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExamPatch {
    pub student_id: Option<String>,
    pub exam_type: Option<String>,
    pub exam_date: Option<NaiveDate>,
    pub result: Option<ExamResult>,
    pub notes: Option<Option<String>>,
}

impl ExamPatch {
    pub fn apply(&self, exam: &mut Exam) {
        if let Some(student_id) = &self.student_id {
            exam.student_id = student_id.clone();
        }
        if let Some(exam_type) = &self.exam_type {
            exam.exam_type = exam_type.clone();
        }
        if let Some(exam_date) = self.exam_date {
            exam.exam_date = exam_date;
        }
        if let Some(result) = self.result {
            exam.result = result;
        }
        if let Some(notes) = &self.notes {
            exam.notes = notes.clone();
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PaymentPatch {
    pub student_id: Option<String>,
    pub amount: Option<String>,
    pub payment_date: Option<NaiveDate>,
    pub payment_type: Option<PaymentType>,
    pub notes: Option<Option<String>>,
}

impl PaymentPatch {
    pub fn apply(&self, payment: &mut Payment) {
        if let Some(student_id) = &self.student_id {
            payment.student_id = student_id.clone();
        }
        if let Some(amount) = &self.amount {
            payment.amount = amount.clone();
        }
        if let Some(payment_date) = self.payment_date {
            payment.payment_date = payment_date;
        }
        if let Some(payment_type) = self.payment_type {
            payment.payment_type = payment_type;
        }
        if let Some(notes) = &self.notes {
            payment.notes = notes.clone();
        }
    }
}
