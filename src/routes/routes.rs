//! Defines routes for all bucket and object operations.
//!
//! ## Structure
//! - **Service-level endpoints**
//!   - `GET    /`        : list buckets
//!   - `GET    /healthz` : liveness
//!   - `GET    /readyz`  : readiness
//!
//! - **Bucket-level endpoints**
//!   - `GET    /{bucket}`: list objects
//!   - `PUT    /{bucket}`: create bucket
//!   - `HEAD   /{bucket}`: check bucket exists
//!   - `DELETE /{bucket}`: delete bucket and its objects
//!
//! - **Object-level endpoints**
//!   - `PUT    /{bucket}/{*name}`: upload object (`x-purge-after` sets the purge window)
//!   - `GET    /{bucket}/{*name}`: download object
//!   - `HEAD   /{bucket}/{*name}`: retrieve metadata only
//!   - `DELETE /{bucket}/{*name}`: delete object
//!
//! The wildcard `*name` allows nested names like `photos/2025/img.jpg`.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        object_handlers::{
            create_bucket, delete_bucket, delete_object, get_object, head_bucket, head_object,
            list_buckets, list_objects, upload_object,
        },
    },
    services::bridge::SiaBridge,
};
use axum::{
    Router,
    routing::{get, put},
};

/// Build and return the router for all bridge routes.
///
/// The router carries shared state (`SiaBridge`) to all handlers.
pub fn routes() -> Router<SiaBridge> {
    Router::new()
        .route("/", get(list_buckets))
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Object-level routes
        .route(
            "/{bucket}/{*name}",
            put(upload_object)
                .get(get_object)
                .head(head_object)
                .delete(delete_object),
        )
        // Bucket-level routes
        .route(
            "/{bucket}",
            get(list_objects)
                .put(create_bucket)
                .head(head_bucket)
                .delete(delete_bucket),
        )
}
