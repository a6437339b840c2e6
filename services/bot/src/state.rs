//! Application state shared across handlers

use std::sync::Arc;

use dispatch::{clock::Clock, ports::Stores};
use sqlx::PgPool;

use crate::{
    config::AppConfig, conversation::SessionStore, handler::ChatHandler,
    telegram::TelegramClient,
};

/// The storage the bot was started with
#[derive(Clone)]
pub enum Backend {
    Postgres(PgPool),
    Memory,
}

impl Backend {
    /// Whether the backing store answers
    pub async fn is_healthy(&self) -> bool {
        match self {
            Backend::Postgres(pool) => common::database::health_check(pool)
                .await
                .unwrap_or(false),
            Backend::Memory => true,
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub backend: Backend,
    pub stores: Stores,
    pub clock: Arc<dyn Clock>,
    pub sessions: Arc<dyn SessionStore>,
    pub telegram: TelegramClient,
    pub handler: Arc<ChatHandler>,
}
