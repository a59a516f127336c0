use sqlx::SqlitePool;

use crate::config::IntakeConfig;
use crate::dispatch::DispatchQueue;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: IntakeConfig,
    pub queue: DispatchQueue,
}
