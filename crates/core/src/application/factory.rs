// Session Factory - owns the shared driver and hands out sessions

use super::session::Session;
use crate::config::SessionConfig;
use crate::error::{AppError, Result};
use crate::port::{Driver, EventLog, IdProvider, TracingEventLog, UuidProvider};
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Explicitly owned database resource: one driver (usually a pool), one
/// event sink, many sessions.
pub struct SessionFactory {
    driver: Arc<dyn Driver>,
    log: Arc<dyn EventLog>,
    id_provider: Arc<dyn IdProvider>,
    shut_down: AtomicBool,
}

impl SessionFactory {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            log: Arc::new(TracingEventLog),
            id_provider: Arc::new(UuidProvider),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn with_event_log(mut self, log: Arc<dyn EventLog>) -> Self {
        self.log = log;
        self
    }

    pub fn with_id_provider(mut self, id_provider: Arc<dyn IdProvider>) -> Self {
        self.id_provider = id_provider;
        self
    }

    /// New session sharing this factory's driver and event log
    pub fn session(&self, config: SessionConfig) -> Result<Session> {
        if self.is_shut_down() {
            return Err(AppError::InvalidState(
                "the session factory has been shut down".to_string(),
            ));
        }
        Ok(
            Session::new(Arc::clone(&self.driver), Arc::clone(&self.log), config)
                .with_id(self.id_provider.generate_id()),
        )
    }

    /// Run `unit_of_work` in a fresh session
    pub async fn execute<T, E, F>(&self, config: SessionConfig, unit_of_work: F) -> std::result::Result<T, E>
    where
        F: for<'a> FnOnce(&'a mut Session) -> BoxFuture<'a, std::result::Result<T, E>>,
        E: From<AppError>,
    {
        let mut session = self.session(config)?;
        session.execute(unit_of_work).await
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Close the shared driver resources. Only the first call reaches the driver.
    pub async fn shutdown(&self) -> Result<()> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Shutting down database driver...");
        self.driver.shutdown().await.map_err(AppError::Connection)
    }
}
