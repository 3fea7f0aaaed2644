//! Prometheus metrics for post-feed-service.
//!
//! Exposes operation collectors and an HTTP handler for the `/metrics` endpoint.

use actix_web::HttpResponse;
use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder,
    HistogramVec, IntCounter, IntCounterVec, TextEncoder,
};

use crate::error::FeedResult;

lazy_static! {
    /// Post service operations segmented by operation and outcome.
    pub static ref POST_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "post_feed_operations_total",
        "Post service operations segmented by operation and outcome",
        &["operation", "outcome"]
    )
    .expect("failed to register post_feed_operations_total");

    /// Duration of aggregation plan execution by query shape (single, batch, cursor, page).
    pub static ref PLAN_EXECUTION_SECONDS: HistogramVec = register_histogram_vec!(
        "post_feed_plan_execution_seconds",
        "Aggregation plan execution duration segmented by query shape",
        &["shape"]
    )
    .expect("failed to register post_feed_plan_execution_seconds");

    /// Post id candidates rejected because they were already taken.
    pub static ref POST_ID_COLLISIONS_TOTAL: IntCounter = register_int_counter!(
        "post_feed_id_collisions_total",
        "Post id candidates that collided with an existing post"
    )
    .expect("failed to register post_feed_id_collisions_total");
}

/// Count one service call by its outcome.
pub fn record_outcome<T>(operation: &str, result: &FeedResult<T>) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(err) => err.kind(),
    };
    POST_OPERATIONS_TOTAL
        .with_label_values(&[operation, outcome])
        .inc();
}

/// Actix handler that renders Prometheus metrics in text format.
pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
