//! Process-wide connection manager.
//!
//! A [`ConnectionGuard`] owns at most one live handle produced by a
//! [`Connector`]. Callers racing through [`ConnectionGuard::ensure_connected`]
//! queue behind a single in-flight attempt and share its outcome: its handle
//! on success, its error on failure. A failed attempt or a
//! [`ConnectionGuard::reset`] leaves the guard disconnected so the next call
//! starts a clean retry.

use crate::error::{Result, ServiceError};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Handle: Clone + Send + Sync + 'static;

    async fn connect(&self) -> anyhow::Result<Self::Handle>;

    async fn close(&self, _handle: Self::Handle) {}
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GuardStatus {
    pub connected: bool,
    pub attempts: u64,
    pub last_error: Option<String>,
}

pub struct ConnectionGuard<C: Connector> {
    connector: C,
    slot: AsyncMutex<Option<C::Handle>>,
    status: Mutex<GuardStatus>,
    /// Attempts that have run to completion, successful or not.
    settled: AtomicU64,
}

impl<C: Connector> ConnectionGuard<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            slot: AsyncMutex::new(None),
            status: Mutex::new(GuardStatus::default()),
            settled: AtomicU64::new(0),
        }
    }

    /// Returns the live handle, connecting first when there is none.
    pub async fn ensure_connected(&self) -> Result<C::Handle> {
        let seen = self.settled.load(Ordering::Acquire);
        let mut slot = self.slot.lock().await;
        if let Some(handle) = slot.as_ref() {
            return Ok(handle.clone());
        }

        // An attempt settled while we waited on the slot and it failed.
        if self.settled.load(Ordering::Acquire) > seen {
            if let Some(message) = self.status.lock().last_error.clone() {
                return Err(ServiceError::Connection(message));
            }
        }

        let handle = self.attempt().await?;
        *slot = Some(handle.clone());
        Ok(handle)
    }

    /// Opens a fresh handle, closing the previous one if present.
    pub async fn connect(&self) -> Result<()> {
        let mut slot = self.slot.lock().await;
        if let Some(previous) = slot.take() {
            self.connector.close(previous).await;
            self.status.lock().connected = false;
        }

        let handle = self.attempt().await?;
        *slot = Some(handle);
        Ok(())
    }

    pub async fn close(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(handle) = slot.take() {
            self.connector.close(handle).await;
            info!("database connection closed");
        }
        self.status.lock().connected = false;
    }

    /// Forgets the current handle after a disconnect so the next caller reconnects.
    pub async fn reset(&self) {
        let mut slot = self.slot.lock().await;
        if slot.take().is_some() {
            warn!("database connection reset; next request will reconnect");
        }
        self.status.lock().connected = false;
    }

    pub fn status(&self) -> GuardStatus {
        self.status.lock().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.status.lock().connected
    }

    async fn attempt(&self) -> Result<C::Handle> {
        let attempt = {
            let mut status = self.status.lock();
            status.attempts += 1;
            status.attempts
        };

        let outcome = self.connector.connect().await;
        self.settled.fetch_add(1, Ordering::AcqRel);

        match outcome {
            Ok(handle) => {
                let mut status = self.status.lock();
                status.connected = true;
                status.last_error = None;
                info!(attempt, "database connection established");
                Ok(handle)
            }
            Err(err) => {
                let message = format!("{err:#}");
                let mut status = self.status.lock();
                status.connected = false;
                status.last_error = Some(message.clone());
                warn!(attempt, error = %message, "database connection attempt failed");
                Err(ServiceError::Connection(message))
            }
        }
    }
}
