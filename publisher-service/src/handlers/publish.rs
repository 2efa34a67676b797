use axum::extract::{Path, State};
use std::sync::Arc;
use tracing::info;

use crate::emitter::{emit_pooled, emit_sequential, DeliveryMode};
use crate::error::ApiError;
use crate::targets::EmitMode;
use crate::AppState;

/// GET /publish/:route
///
/// Answers "done" once every message has been handed over. Unless acknowledgments are
/// awaited, broker failures do not change the answer.
pub async fn publish(
    State(state): State<Arc<AppState>>,
    Path(route): Path<String>,
) -> Result<&'static str, ApiError> {
    let publish = &state.config.publish;
    let target = publish
        .target(&route)
        .ok_or_else(|| ApiError::UnknownTarget(route.clone()))?;

    info!(route = %route, topic = %target.topic, "Publish requested");

    let report = match target.mode {
        EmitMode::Sequential => {
            emit_sequential(state.publisher.as_ref(), target, publish.delivery).await
        }
        EmitMode::Pooled => {
            emit_pooled(state.publisher.clone(), target, &publish.pool, publish.delivery).await
        }
    };

    if publish.delivery == DeliveryMode::AwaitAcks && !report.is_clean() {
        return Err(ApiError::DeliveryFailed {
            topic: report.topic,
            requested: report.requested,
            failures: report.enqueue_failures + report.rejected + report.delivery_failures,
        });
    }

    Ok("done")
}
