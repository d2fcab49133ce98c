use std::sync::Arc;

use pinwall_db::Database;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub admin_api_key: String,
    /// Owner id for walls whose legacy owner is not numeric.
    pub owner_fallback_id: i64,
}
