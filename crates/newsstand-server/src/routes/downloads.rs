//! Download credential redemption.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::Response,
    routing::get,
    Router,
};
use std::path::{Component, Path as FsPath, PathBuf};

use crate::credentials;
use crate::error::AppError;
use crate::settlement;
use crate::state::AppState;

/// Creates the downloads router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/{token}", get(download))
        .with_state(state)
}

/// Resolves a product file key inside the storage directory.
///
/// Keys are relative paths made of normal components only; anything that
/// could escape `storage_dir` is refused.
fn resolve_file(storage_dir: &FsPath, file_key: &str) -> Result<PathBuf, AppError> {
    let key = FsPath::new(file_key);
    let is_plain = !file_key.is_empty()
        && key
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
    if !is_plain {
        return Err(AppError::Internal(format!("unsafe file key: {}", file_key)));
    }
    Ok(storage_dir.join(key))
}

fn attachment_name(file_key: &str) -> String {
    FsPath::new(file_key)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("download")
        .replace('"', "")
}

/// GET /api/v1/download/{token}
///
/// The file is located before the token is consumed, so a missing file does
/// not burn the buyer's only download.
async fn download(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Response, AppError> {
    // Step 1: Validate the token without consuming it
    let credential = credentials::peek(&state.pool, &token).await?;

    // Step 2: Locate the file
    let product = settlement::load_product(&state.pool, credential.product_id).await?;
    let path = resolve_file(&state.config.storage_dir, &product.file_key)?;
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        tracing::error!(
            product_id = %product.id,
            file_key = %product.file_key,
            "Product file missing from storage"
        );
        return Err(AppError::NotFound("file not available".to_string()));
    }

    // Step 3: Consume the token; only one concurrent caller gets past here
    let credential = credentials::redeem(&state.pool, &token).await?;

    // Step 4: Stream the file back
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| AppError::Internal(format!("failed to read {}: {}", path.display(), e)))?;

    let content_type = mime_guess::from_path(&path).first_or_octet_stream();
    let disposition = format!("attachment; filename=\"{}\"", attachment_name(&product.file_key));

    tracing::info!(
        order_id = %credential.order_id,
        product_id = %product.id,
        bytes = bytes.len(),
        "File downloaded"
    );

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type.essence_str())
            .unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}
