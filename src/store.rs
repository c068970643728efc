//! Key-value persistence for students, exams, payments and uploaded images.
//!
//! Every record lives at `<root>/<kind>/<id>.dat`, encoded with postcard.
//! Single-key operations are atomic on their own; sequences that touch
//! several keys take [`RecordStore::exclusive`] first.

use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::err::Error;
use crate::io::{list_io_files, prepare_io, read_io_file, remove_io_file, write_io_file};

const RECORD_EXTENSION: &str = "dat";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Students,
    Exams,
    Payments,
    Images,
}

impl Kind {
    pub const ALL: [Kind; 4] = [Kind::Students, Kind::Exams, Kind::Payments, Kind::Images];

    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Students => "students",
            Kind::Exams => "exams",
            Kind::Payments => "payments",
            Kind::Images => "images",
        }
    }

    /// Singular label used in error messages.
    pub fn label(self) -> &'static str {
        match self {
            Kind::Students => "Student",
            Kind::Exams => "Exam",
            Kind::Payments => "Payment",
            Kind::Images => "Image",
        }
    }
}

pub trait Record: Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: Kind;

    fn id(&self) -> &str;

    fn set_id(&mut self, id: String);
}

/// Keys become file names, so only a conservative alphabet is accepted.
pub fn is_valid_key(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

pub struct RecordStore {
    root: PathBuf,
    txn: Mutex<()>,
}

impl RecordStore {
    pub async fn open<P: Into<PathBuf>>(root: P) -> Result<Self, Error> {
        let root = root.into();
        let dirs: Vec<&str> = Kind::ALL.iter().map(|kind| kind.as_str()).collect();
        prepare_io(&root, &dirs).await?;
        log::info!("Record store opened at {}", root.display());
        Ok(Self {
            root,
            txn: Mutex::new(()),
        })
    }

    /// Serialises multi-record operations within this process.
    pub async fn exclusive(&self) -> MutexGuard<'_, ()> {
        self.txn.lock().await
    }

    fn path_of(&self, kind: Kind, id: &str) -> Result<PathBuf, Error> {
        if !is_valid_key(id) {
            return Err(Error::invalid(format!(
                "Invalid {} identifier `{}`",
                kind.label().to_lowercase(),
                id
            )));
        }
        Ok(self
            .root
            .join(kind.as_str())
            .join(format!("{}.{}", id, RECORD_EXTENSION)))
    }

    /// Stores a new record. An empty identifier is replaced by a fresh UUID;
    /// a supplied one overwrites whatever is stored under it.
    pub async fn create<R: Record>(&self, mut record: R) -> Result<R, Error> {
        if record.id().is_empty() {
            record.set_id(Uuid::new_v4().to_string());
        }
        self.put(&record).await?;
        Ok(record)
    }

    /// Writes the record under its own identifier.
    pub async fn put<R: Record>(&self, record: &R) -> Result<(), Error> {
        let path = self.path_of(R::KIND, record.id())?;
        let bytes = postcard::to_allocvec(record)?;
        write_io_file(&path, &bytes).await?;
        Ok(())
    }

    pub async fn get<R: Record>(&self, id: &str) -> Result<Option<R>, Error> {
        // an identifier that could never have been stored is simply absent
        if !is_valid_key(id) {
            return Ok(None);
        }
        let path = self.path_of(R::KIND, id)?;
        match read_io_file(&path).await? {
            Some(bytes) => Ok(Some(postcard::from_bytes::<R>(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Like [`get`](Self::get) but a missing record is a `NotFound` error.
    pub async fn fetch<R: Record>(&self, id: &str) -> Result<R, Error> {
        self.get(id).await?.ok_or_else(|| {
            Error::not_found(format!("{} `{}` not found", R::KIND.label(), id))
        })
    }

    /// All records of a kind, ordered by key.
    pub async fn list<R: Record>(&self) -> Result<Vec<R>, Error> {
        let dir = self.root.join(R::KIND.as_str());
        let mut records = Vec::new();
        for path in list_io_files(&dir, RECORD_EXTENSION).await? {
            // a concurrent delete between listing and reading is not an error
            if let Some(bytes) = read_io_file(&path).await? {
                records.push(postcard::from_bytes::<R>(&bytes)?);
            }
        }
        Ok(records)
    }

    /// Applies `change` to the stored record and writes it back. Missing
    /// records of every kind are reported as `NotFound`.
    pub async fn update<R, F>(&self, id: &str, change: F) -> Result<R, Error>
    where
        R: Record,
        F: FnOnce(&mut R),
    {
        let mut record = self.fetch::<R>(id).await?;
        change(&mut record);
        // the key is fixed; re-keying goes through the identifier rules
        record.set_id(id.to_string());
        self.put(&record).await?;
        Ok(record)
    }

    /// Removes the record; returns whether anything was stored.
    pub async fn delete<R: Record>(&self, id: &str) -> Result<bool, Error> {
        if !is_valid_key(id) {
            return Ok(false);
        }
        let path = self.path_of(R::KIND, id)?;
        Ok(remove_io_file(&path).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Exam, ExamResult};
    use chrono::NaiveDate;

    fn exam(id: &str, student_id: &str) -> Exam {
        Exam {
            id: id.to_string(),
            student_id: student_id.to_string(),
            exam_type: "code".to_string(),
            exam_date: NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(),
            result: ExamResult::Pending,
            notes: None,
        }
    }

    #[tokio::test]
    async fn create_assigns_identifier_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(dir.path()).await.unwrap();

        let created = store.create(exam("", "s1")).await.unwrap();
        assert!(Uuid::parse_str(&created.id).is_ok());

        let kept = store.create(exam("E-7", "s1")).await.unwrap();
        assert_eq!(kept.id, "E-7");

        let loaded: Exam = store.get(&created.id).await.unwrap().unwrap();
        assert_eq!(loaded, created);
    }

    #[tokio::test]
    async fn get_and_delete_of_missing_keys_do_not_fail() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(dir.path()).await.unwrap();

        assert!(store.get::<Exam>("nope").await.unwrap().is_none());
        assert!(store.get::<Exam>("../escape").await.unwrap().is_none());
        assert!(!store.delete::<Exam>("nope").await.unwrap());
    }

    #[tokio::test]
    async fn update_merges_and_reports_missing_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(dir.path()).await.unwrap();
        store.create(exam("e1", "s1")).await.unwrap();

        let updated: Exam = store
            .update("e1", |exam: &mut Exam| exam.result = ExamResult::Pass)
            .await
            .unwrap();
        assert_eq!(updated.result, ExamResult::Pass);
        assert_eq!(updated.student_id, "s1");

        let missing = store
            .update("e2", |exam: &mut Exam| exam.result = ExamResult::Fail)
            .await;
        assert!(matches!(missing, Err(Error::NotFound { .. })));
    }

    #[tokio::test]
    async fn list_is_ordered_by_key_and_scoped_to_kind() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(dir.path()).await.unwrap();
        for id in ["c", "a", "b"] {
            store.create(exam(id, "s1")).await.unwrap();
        }

        let ids: Vec<String> = store
            .list::<Exam>()
            .await
            .unwrap()
            .into_iter()
            .map(|exam| exam.id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(store
            .list::<crate::models::Payment>()
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn rejects_identifiers_that_are_not_plain_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(dir.path()).await.unwrap();

        let result = store.create(exam("../../etc", "s1")).await;
        assert!(matches!(result, Err(Error::InvalidPayload { .. })));
    }
}
