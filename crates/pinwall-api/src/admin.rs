use axum::{
    Json,
    extract::State,
    http::{HeaderMap, Method},
};
use tracing::{error, info};

use pinwall_types::api::AdminResponse;

use crate::error::ApiError;
use crate::middleware::authorize_admin;
use crate::state::AppState;

/// POST /api/admin/upgrade-db: rebuild walls with integer owner ids.
///
/// Not safe to run alongside itself or live traffic on the same database
/// file from another process; operators run it one at a time.
pub async fn upgrade_db(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<AdminResponse>, ApiError> {
    authorize_admin(&headers, &state.admin_api_key)?;
    info!("Admin requested database upgrade");

    // Run the rebuild off the async runtime
    let db = state.clone();
    let report = tokio::task::spawn_blocking(move || db.db.migrate_wall_owner(db.owner_fallback_id))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal("database upgrade task did not complete".into())
        })??;

    Ok(Json(AdminResponse::ok(report.summary())))
}

/// Any verb other than POST on the upgrade route.
pub async fn method_not_allowed(method: Method) -> ApiError {
    ApiError::MethodNotAllowed(method)
}
