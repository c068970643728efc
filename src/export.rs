//! Read-only reporting over already loaded records: labelled CSV rows,
//! period statistics, the summary sheet and the dashboard figures.
//!
//! Nothing here touches the store. Dates are compared in UTC, each record
//! date taken at midnight.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{Duration, Months, NaiveDate, NaiveDateTime, NaiveTime};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;

use crate::err::Error;
use crate::models::{
    Exam, ExamResult, Payment, PaymentStatus, PaymentType, Student, StudentStatus,
    EXAM_TYPE_CODE, EXAM_TYPE_DRIVING,
};

const UNKNOWN_STUDENT: &str = "Inconnu";
const DATE_FORMAT: &str = "%d/%m/%Y";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    #[default]
    Day,
    Week,
    Month,
    Year,
}

impl Period {
    pub const ALL: [Period; 4] = [Period::Day, Period::Week, Period::Month, Period::Year];

    pub fn label(self) -> &'static str {
        match self {
            Period::Day => "Aujourd'hui",
            Period::Week => "7 derniers jours",
            Period::Month => "Dernier mois",
            Period::Year => "12 derniers mois",
        }
    }
}

impl FromStr for Period {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "day" => Ok(Period::Day),
            "week" => Ok(Period::Week),
            "month" => Ok(Period::Month),
            "year" => Ok(Period::Year),
            other => Err(Error::invalid(format!("Invalid period `{}`", other))),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Period::Day => "day",
            Period::Week => "week",
            Period::Month => "month",
            Period::Year => "year",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl DateRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        let at_midnight = date.and_time(NaiveTime::MIN);
        at_midnight >= self.start && at_midnight <= self.end
    }
}

/// `[start of the period, now]`, the start always at midnight.
pub fn period_range(period: Period, now: NaiveDateTime) -> DateRange {
    let today = now.date();
    let first_day = match period {
        Period::Day => Some(today),
        Period::Week => today.checked_sub_signed(Duration::days(7)),
        Period::Month => today.checked_sub_months(Months::new(1)),
        Period::Year => today.checked_sub_months(Months::new(12)),
    }
    .unwrap_or(NaiveDate::MIN);

    DateRange {
        start: first_day.and_time(NaiveTime::MIN),
        end: now,
    }
}

/// Percentage of passes, 0 when there is nothing to divide by.
pub fn success_rate(passed: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        100.0 * passed as f64 / total as f64
    }
}

fn passed_count<'a, I: IntoIterator<Item = &'a Exam>>(exams: I) -> usize {
    exams
        .into_iter()
        .filter(|exam| exam.result == ExamResult::Pass)
        .count()
}

pub fn type_success_rate(exams: &[&Exam], exam_type: &str) -> f64 {
    let of_type: Vec<&Exam> = exams
        .iter()
        .copied()
        .filter(|exam| exam.exam_type == exam_type)
        .collect();
    success_rate(passed_count(of_type.iter().copied()), of_type.len())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StudentCounts {
    pub total: usize,
    pub active: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExamCounts {
    pub total: usize,
    pub passed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PaymentTotals {
    pub total: f64,
    pub cash: f64,
    pub card: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SuccessRates {
    pub overall: f64,
    pub code: f64,
    pub driving: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    pub period: Period,
    pub students: StudentCounts,
    pub exams: ExamCounts,
    pub payments: PaymentTotals,
    pub success_rates: SuccessRates,
}

fn sum_amounts<'a, I: IntoIterator<Item = &'a Payment>>(payments: I) -> f64 {
    payments.into_iter().map(Payment::amount_value).sum()
}

pub fn statistics(
    students: &[Student],
    exams: &[Exam],
    payments: &[Payment],
    period: Period,
    now: NaiveDateTime,
) -> Statistics {
    let range = period_range(period, now);

    let students: Vec<&Student> = students
        .iter()
        .filter(|s| range.contains(s.date_of_registration.date_naive()))
        .collect();
    let exams: Vec<&Exam> = exams
        .iter()
        .filter(|e| range.contains(e.exam_date))
        .collect();
    let payments: Vec<&Payment> = payments
        .iter()
        .filter(|p| range.contains(p.payment_date))
        .collect();

    let passed = passed_count(exams.iter().copied());
    let of_type = |kind: PaymentType| {
        sum_amounts(
            payments
                .iter()
                .copied()
                .filter(move |p| p.payment_type == kind),
        )
    };

    Statistics {
        period,
        students: StudentCounts {
            total: students.len(),
            active: students
                .iter()
                .filter(|s| s.status == StudentStatus::Active)
                .count(),
        },
        exams: ExamCounts {
            total: exams.len(),
            passed,
        },
        payments: PaymentTotals {
            total: sum_amounts(payments.iter().copied()),
            cash: of_type(PaymentType::Cash),
            card: of_type(PaymentType::Card),
        },
        success_rates: SuccessRates {
            overall: success_rate(passed, exams.len()),
            code: type_success_rate(&exams, EXAM_TYPE_CODE),
            driving: type_success_rate(&exams, EXAM_TYPE_DRIVING),
        },
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentRow {
    pub id: String,
    pub name: String,
    pub phone: String,
    pub national_id: String,
    pub status: &'static str,
    pub payment_status: &'static str,
    pub date_of_registration: String,
    pub birthday: String,
    pub total_fees: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExamRow {
    pub id: String,
    pub student_name: String,
    pub student_id: String,
    pub exam_type: &'static str,
    pub exam_date: String,
    pub result: &'static str,
    pub notes: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentRow {
    pub id: String,
    pub student_name: String,
    pub student_id: String,
    pub amount: String,
    pub payment_date: String,
    pub payment_type: String,
    pub notes: String,
}

fn status_label(status: StudentStatus) -> &'static str {
    match status {
        StudentStatus::Active => "Actif",
        StudentStatus::Inactive => "Inactif",
    }
}

fn payment_status_label(status: PaymentStatus) -> &'static str {
    match status {
        PaymentStatus::Complete => "Complet",
        PaymentStatus::Partial => "Partiel",
        PaymentStatus::NotDefined => "Non défini",
    }
}

fn exam_type_label(exam_type: &str) -> &'static str {
    if exam_type == EXAM_TYPE_CODE {
        "Code"
    } else {
        "Conduite"
    }
}

fn result_label(result: ExamResult) -> &'static str {
    match result {
        ExamResult::Pass => "Réussi",
        ExamResult::Fail => "Échoué",
        ExamResult::Pending => "En attente",
    }
}

fn names_by_id(students: &[Student]) -> HashMap<&str, &str> {
    students
        .iter()
        .map(|s| (s.id.as_str(), s.name.as_str()))
        .collect()
}

pub fn student_rows(students: &[Student]) -> Vec<StudentRow> {
    students
        .iter()
        .map(|student| StudentRow {
            id: student.id.clone(),
            name: student.name.clone(),
            phone: student.phone.clone(),
            national_id: student.national_id.clone(),
            status: status_label(student.status),
            payment_status: payment_status_label(student.payment_status),
            date_of_registration: student
                .date_of_registration
                .format(DATE_FORMAT)
                .to_string(),
            birthday: student
                .birthday
                .map(|day| day.format(DATE_FORMAT).to_string())
                .unwrap_or_else(|| "Non spécifié".to_string()),
            total_fees: student.total_fees.unwrap_or(0.0),
        })
        .collect()
}

pub fn exam_rows(exams: &[Exam], students: &[Student]) -> Vec<ExamRow> {
    let names = names_by_id(students);
    exams
        .iter()
        .map(|exam| ExamRow {
            id: exam.id.clone(),
            student_name: names
                .get(exam.student_id.as_str())
                .copied()
                .unwrap_or(UNKNOWN_STUDENT)
                .to_string(),
            student_id: exam.student_id.clone(),
            exam_type: exam_type_label(&exam.exam_type),
            exam_date: exam.exam_date.format(DATE_FORMAT).to_string(),
            result: result_label(exam.result),
            notes: exam.notes.clone().unwrap_or_default(),
        })
        .collect()
}

pub fn payment_rows(payments: &[Payment], students: &[Student]) -> Vec<PaymentRow> {
    let names = names_by_id(students);
    payments
        .iter()
        .map(|payment| PaymentRow {
            id: payment.id.clone(),
            student_name: names
                .get(payment.student_id.as_str())
                .copied()
                .unwrap_or(UNKNOWN_STUDENT)
                .to_string(),
            student_id: payment.student_id.clone(),
            amount: payment.amount.clone(),
            payment_date: payment.payment_date.format(DATE_FORMAT).to_string(),
            payment_type: payment.payment_type.to_string(),
            notes: payment.notes.clone().unwrap_or_default(),
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryRow {
    pub periode: &'static str,
    pub total_etudiants: usize,
    pub etudiants_actifs: usize,
    pub total_examens: usize,
    pub examens_reussis: usize,
    pub taux_reussite: String,
    pub revenu_total: String,
    pub revenu_especes: String,
    pub revenu_carte: String,
}

fn dirhams(amount: f64) -> String {
    format!("{:.2} DH", amount)
}

/// One row per period, from today up to the last twelve months.
pub fn summary_rows(
    students: &[Student],
    exams: &[Exam],
    payments: &[Payment],
    now: NaiveDateTime,
) -> Vec<SummaryRow> {
    Period::ALL
        .iter()
        .map(|period| {
            let stats = statistics(students, exams, payments, *period, now);
            SummaryRow {
                periode: period.label(),
                total_etudiants: stats.students.total,
                etudiants_actifs: stats.students.active,
                total_examens: stats.exams.total,
                examens_reussis: stats.exams.passed,
                taux_reussite: format!("{:.1}%", stats.success_rates.overall),
                revenu_total: dirhams(stats.payments.total),
                revenu_especes: dirhams(stats.payments.cash),
                revenu_carte: dirhams(stats.payments.card),
            }
        })
        .collect()
}

/// RFC 4180 CSV: a header line from the row's field names, fields quoted
/// only when they hold a comma, quote or line break, CRLF between records.
/// No rows give an empty document.
pub fn to_csv<T: Serialize>(rows: &[T]) -> Result<String, Error> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::CRLF)
        .quote_style(csv::QuoteStyle::Necessary)
        .from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| Error::internal("CsvError", err.to_string()))?;
    String::from_utf8(bytes).map_err(|err| Error::internal("CsvError", err.to_string()))
}

/// Packs named files into a gzip-compressed tar archive.
pub fn bundle(files: &[(&str, &[u8])], mtime: u64) -> Result<Vec<u8>, Error> {
    let mut archive = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (name, bytes) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(bytes.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(mtime);
        archive.append_data(&mut header, name, *bytes)?;
    }
    let encoder = archive.into_inner()?;
    Ok(encoder.finish()?)
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentAction {
    pub kind: &'static str,
    pub id: String,
    pub label: String,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub total_students: usize,
    pub active_students: usize,
    pub total_exams: usize,
    pub passed_exams: usize,
    pub total_payments: f64,
    pub recent: Vec<RecentAction>,
}

pub const RECENT_ACTIONS: usize = 5;

pub fn dashboard(students: &[Student], exams: &[Exam], payments: &[Payment]) -> Dashboard {
    let names = names_by_id(students);
    let name_of = |id: &str| names.get(id).copied().unwrap_or(UNKNOWN_STUDENT).to_string();

    let mut recent: Vec<RecentAction> = students
        .iter()
        .map(|s| RecentAction {
            kind: "student",
            id: s.id.clone(),
            label: s.name.clone(),
            date: s.date_of_registration.date_naive(),
        })
        .chain(exams.iter().map(|e| RecentAction {
            kind: "exam",
            id: e.id.clone(),
            label: format!("{} - {}", name_of(&e.student_id), exam_type_label(&e.exam_type)),
            date: e.exam_date,
        }))
        .chain(payments.iter().map(|p| RecentAction {
            kind: "payment",
            id: p.id.clone(),
            label: format!("{} - {} DH", name_of(&p.student_id), p.amount),
            date: p.payment_date,
        }))
        .collect();
    recent.sort_by(|a, b| b.date.cmp(&a.date));
    recent.truncate(RECENT_ACTIONS);

    Dashboard {
        total_students: students.len(),
        active_students: students
            .iter()
            .filter(|s| s.status == StudentStatus::Active)
            .count(),
        total_exams: exams.len(),
        passed_exams: passed_count(exams),
        total_payments: sum_amounts(payments),
        recent,
    }
}
