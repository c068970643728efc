use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::err::Error;
use crate::form::{RecordId, UploadedFile};
use crate::models::ImageBlob;
use crate::state::AppState;
use crate::store::RecordStore;

/// Stores an uploaded photo and returns its identifier.
pub async fn save_image(store: &RecordStore, file: &UploadedFile) -> Result<String, Error> {
    if !file.mime_type.starts_with("image/") {
        return Err(Error::invalid(format!(
            "Uploaded file `{}` is not an image ({})",
            file.name, file.mime_type
        )));
    }
    let blob = store
        .create(ImageBlob {
            id: String::new(),
            name: file.name.clone(),
            mime_type: file.mime_type.clone(),
            data: STANDARD.encode(&file.bytes),
        })
        .await?;
    log::info!(
        "Stored image `{}` ({}, {} bytes) as {}",
        blob.name,
        blob.mime_type,
        file.bytes.len(),
        blob.id
    );
    Ok(blob.id)
}

/// Removes a photo that is no longer referenced. Failures are logged only,
/// the owning record is already consistent.
pub async fn discard_image(store: &RecordStore, id: &str) {
    match store.delete::<ImageBlob>(id).await {
        Ok(true) => log::debug!("Discarded image {}", id),
        Ok(false) => {}
        Err(err) => log::warn!("Could not remove image {}: {}", id, err),
    }
}

pub async fn show_image(
    State(state): State<Arc<AppState>>,
    RecordId(id): RecordId,
) -> Result<Response, Error> {
    let blob = state.store.fetch::<ImageBlob>(&id).await?;
    let bytes = STANDARD.decode(blob.data.as_bytes())?;
    Ok(([(header::CONTENT_TYPE, blob.mime_type)], bytes).into_response())
}
