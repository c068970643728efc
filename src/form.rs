//! Inbound form bodies, url-encoded or multipart, flattened to named text
//! fields plus at most one uploaded file.

use std::collections::HashMap;
use std::str::FromStr;

use axum::async_trait;
use axum::extract::{FromRequest, FromRequestParts, Multipart, Path, Request};
use axum::http::header::CONTENT_TYPE;
use axum::http::request::Parts;
use axum::Form;
use chrono::{DateTime, NaiveDate};

use crate::err::Error;

/// Name of the file field carrying a student photo.
pub const IMAGE_FIELD: &str = "image";

/// The `:id` path segment of a record route, rejected as `InvalidPayload`.
#[derive(Debug, Clone)]
pub struct RecordId(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for RecordId
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(id) = Path::<String>::from_request_parts(parts, state).await?;
        Ok(Self(id))
    }
}

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct FormData {
    fields: HashMap<String, String>,
    pub file: Option<UploadedFile>,
}

#[async_trait]
impl<S> FromRequest<S> for FormData
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map_or(false, |value| value.starts_with("multipart/form-data"));

        if !is_multipart {
            let Form(fields) = Form::<HashMap<String, String>>::from_request(req, state).await?;
            return Ok(Self { fields, file: None });
        }

        let mut multipart = Multipart::from_request(req, state)
            .await
            .map_err(|err| Error::invalid(err.body_text()))?;
        let mut form = FormData::default();
        while let Some(field) = multipart.next_field().await? {
            let name = match field.name() {
                Some(name) => name.to_string(),
                None => continue,
            };
            if let Some(file_name) = field.file_name().map(str::to_string) {
                let mime_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field.bytes().await?;
                // browsers send an empty part when no file was chosen
                if name == IMAGE_FIELD && !bytes.is_empty() {
                    form.file = Some(UploadedFile {
                        name: file_name,
                        mime_type,
                        bytes: bytes.to_vec(),
                    });
                }
                continue;
            }
            let text = field.text().await?;
            form.fields.insert(name, text);
        }
        Ok(form)
    }
}

impl FormData {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            fields: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            file: None,
        }
    }

    /// Trimmed value; `None` when absent.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(|value| value.trim())
    }

    /// Non-empty value or `None`.
    pub fn optional(&self, name: &str) -> Option<String> {
        self.get(name)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }

    /// Non-empty value, or an `InvalidPayload` naming the field.
    pub fn required(&self, name: &str) -> Result<String, Error> {
        self.optional(name)
            .ok_or_else(|| Error::invalid(format!("Missing required field `{}`", name)))
    }

    /// For edits: absent keeps the stored value, present must not be empty.
    pub fn replacement(&self, name: &str) -> Result<Option<String>, Error> {
        match self.get(name) {
            None => Ok(None),
            Some(_) => self.required(name).map(Some),
        }
    }

    /// For edits of optional fields: absent keeps, empty clears.
    pub fn clearable(&self, name: &str) -> Option<Option<String>> {
        self.get(name).map(|_| self.optional(name))
    }

    pub fn parse<T>(value: &str, name: &str) -> Result<T, Error>
    where
        T: FromStr,
    {
        value
            .parse::<T>()
            .map_err(|_| Error::invalid(format!("Invalid value `{}` for `{}`", value, name)))
    }

    /// Required field parsed with the type's own `FromStr`.
    pub fn required_as<T>(&self, name: &str) -> Result<T, Error>
    where
        T: FromStr<Err = Error>,
    {
        self.required(name)?.parse()
    }

    pub fn replacement_as<T>(&self, name: &str) -> Result<Option<T>, Error>
    where
        T: FromStr<Err = Error>,
    {
        self.replacement(name)?.map(|value| value.parse()).transpose()
    }

    pub fn required_date(&self, name: &str) -> Result<NaiveDate, Error> {
        parse_date(&self.required(name)?, name)
    }

    pub fn replacement_date(&self, name: &str) -> Result<Option<NaiveDate>, Error> {
        self.replacement(name)?
            .map(|value| parse_date(&value, name))
            .transpose()
    }

    pub fn clearable_date(&self, name: &str) -> Result<Option<Option<NaiveDate>>, Error> {
        match self.clearable(name) {
            None => Ok(None),
            Some(None) => Ok(Some(None)),
            Some(Some(value)) => parse_date(&value, name).map(|date| Some(Some(date))),
        }
    }

    pub fn clearable_number(&self, name: &str) -> Result<Option<Option<f64>>, Error> {
        match self.clearable(name) {
            None => Ok(None),
            Some(None) => Ok(Some(None)),
            Some(Some(value)) => {
                let number: f64 = Self::parse(&value, name)?;
                if !number.is_finite() || number < 0.0 {
                    return Err(Error::invalid(format!(
                        "Invalid value `{}` for `{}`",
                        value, name
                    )));
                }
                Ok(Some(Some(number)))
            }
        }
    }
}

/// Accepts `YYYY-MM-DD` as sent by date inputs, or a full RFC 3339 timestamp.
pub fn parse_date(value: &str, name: &str) -> Result<NaiveDate, Error> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| DateTime::parse_from_rfc3339(value).map(|dt| dt.date_naive()))
        .map_err(|_| Error::invalid(format!("Invalid date `{}` for `{}`", value, name)))
}
