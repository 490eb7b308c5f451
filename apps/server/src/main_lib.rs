use std::sync::Arc;

use relief_budget_core::notifications::NotificationSink;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::{
    config::Config,
    hub::SessionHub,
    notifier::TracingNotificationSink,
    repository::{BudgetRepository, InMemoryBudgetRepository},
};

pub struct AppState {
    pub repository: Arc<dyn BudgetRepository>,
    pub hub: Arc<SessionHub>,
    pub notifier: Arc<dyn NotificationSink>,
    pub api_token: Option<String>,
    pub ws_subprotocol: Option<String>,
}

impl AppState {
    pub fn new(
        config: &Config,
        repository: Arc<dyn BudgetRepository>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            repository,
            hub: Arc::new(SessionHub::new()),
            notifier,
            api_token: config.api_token.clone(),
            ws_subprotocol: config.ws_subprotocol.clone(),
        }
    }

    /// Checks a presented token. Always true when auth is disabled.
    pub fn accepts_token(&self, presented: Option<&str>) -> bool {
        match self.api_token.as_deref() {
            None => true,
            Some(expected) => presented.is_some_and(|token| token == expected),
        }
    }
}

pub fn init_tracing() {
    let log_format = std::env::var("RB_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if log_format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init();
    }
}

pub async fn build_state(config: &Config) -> anyhow::Result<Arc<AppState>> {
    let repository = match &config.seed_file {
        Some(path) => {
            let repository = InMemoryBudgetRepository::from_seed_file(path).await?;
            tracing::info!(
                "Loaded {} budget snapshot(s) from {}",
                repository.len(),
                path.display()
            );
            repository
        }
        None => InMemoryBudgetRepository::new(),
    };
    if config.api_token.is_none() {
        tracing::warn!("RB_API_TOKEN is not set; budget endpoints accept unauthenticated requests");
    }

    Ok(Arc::new(AppState::new(
        config,
        Arc::new(repository),
        Arc::new(TracingNotificationSink),
    )))
}
