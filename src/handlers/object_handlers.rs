//! HTTP handlers for bucket and object operations.
//! Streams object bodies in both directions and delegates everything else
//! to `SiaBridge`.

use crate::{
    errors::AppError,
    models::{bucket::BucketInfo, object::ObjectInfo},
    services::bridge::SiaBridge,
};
use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use std::io;
use tokio_util::io::ReaderStream;

/// Request header carrying the purge window in seconds (`0` = keep cached).
pub const PURGE_AFTER_HEADER: &str = "x-purge-after";
const STATE_HEADER: &str = "x-object-state";

/// `GET /`: list buckets.
pub async fn list_buckets(
    State(bridge): State<SiaBridge>,
) -> Result<Json<Vec<BucketInfo>>, AppError> {
    Ok(Json(bridge.list_buckets().await?))
}

/// `PUT /{bucket}`: create bucket (idempotent).
pub async fn create_bucket(
    State(bridge): State<SiaBridge>,
    Path(bucket): Path<String>,
) -> Result<Json<BucketInfo>, AppError> {
    bridge.create_bucket(&bucket).await?;
    Ok(Json(bridge.get_bucket_info(&bucket).await?))
}

/// `HEAD /{bucket}`: 200 if the bucket exists.
pub async fn head_bucket(
    State(bridge): State<SiaBridge>,
    Path(bucket): Path<String>,
) -> Result<StatusCode, AppError> {
    bridge.get_bucket_info(&bucket).await?;
    Ok(StatusCode::OK)
}

/// `GET /{bucket}`: list objects.
pub async fn list_objects(
    State(bridge): State<SiaBridge>,
    Path(bucket): Path<String>,
) -> Result<Json<Vec<ObjectInfo>>, AppError> {
    Ok(Json(bridge.list_objects(&bucket).await?))
}

/// `DELETE /{bucket}`: delete bucket and everything in it.
pub async fn delete_bucket(
    State(bridge): State<SiaBridge>,
    Path(bucket): Path<String>,
) -> Result<StatusCode, AppError> {
    bridge.delete_bucket(&bucket).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `PUT /{bucket}/{*name}`: upload object. Requires `Content-Length`.
pub async fn upload_object(
    State(bridge): State<SiaBridge>,
    Path((bucket, name)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, AppError> {
    let size = header_i64(&headers, header::CONTENT_LENGTH.as_str())?
        .ok_or_else(|| AppError::new(StatusCode::LENGTH_REQUIRED, "Content-Length required"))?;
    let purge_after = header_i64(&headers, PURGE_AFTER_HEADER)?.unwrap_or(0);

    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(io::Error::other));

    let object = bridge
        .put_object_from_stream(stream, &bucket, &name, size, purge_after)
        .await?;
    Ok((StatusCode::CREATED, Json(object)))
}

/// `GET /{bucket}/{*name}`: download object as a streaming response.
pub async fn get_object(
    State(bridge): State<SiaBridge>,
    Path((bucket, name)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let (meta, file) = bridge.get_object_reader(&bucket, &name).await?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &meta);
    Ok(response)
}

/// `HEAD /{bucket}/{*name}`: same headers as GET but no body.
pub async fn head_object(
    State(bridge): State<SiaBridge>,
    Path((bucket, name)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let meta = bridge.get_object_info(&bucket, &name).await?;
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &meta);
    Ok(response)
}

/// `DELETE /{bucket}/{*name}`: delete object.
pub async fn delete_object(
    State(bridge): State<SiaBridge>,
    Path((bucket, name)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    bridge.delete_object(&bucket, &name).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn header_i64(headers: &HeaderMap, name: &str) -> Result<Option<i64>, AppError> {
    let Some(value) = headers.get(name) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|v| *v >= 0)
        .map(Some)
        .ok_or_else(|| AppError::bad_request(format!("invalid {} header", name)))
}

fn set_object_headers(headers: &mut HeaderMap, meta: &ObjectInfo) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.size.max(0)));
    headers.insert(
        header::LAST_MODIFIED,
        HeaderValue::from_str(&meta.queued.to_rfc2822())
            .unwrap_or_else(|_| HeaderValue::from_static("")),
    );
    headers.insert(
        HeaderName::from_static(PURGE_AFTER_HEADER),
        HeaderValue::from(meta.purge_after),
    );
    let state = if meta.is_durable() { "durable" } else { "queued" };
    headers.insert(
        HeaderName::from_static(STATE_HEADER),
        HeaderValue::from_static(state),
    );
}
