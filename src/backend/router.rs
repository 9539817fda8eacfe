//! Identity-mode routing between the two read paths

use std::sync::Arc;
use tracing::debug;

use super::http::HttpBackendConfig;
use super::institutional::InstitutionalBackend;
use super::wallet::WalletBackend;
use super::ReservationBackend;
use crate::types::{BackendResult, IdentityMode, Subject};

/// Holds one backend per identity mode and hands out exactly one per call
#[derive(Clone)]
pub struct BackendRouter {
    wallet: Arc<dyn ReservationBackend>,
    institutional: Arc<dyn ReservationBackend>,
}

impl BackendRouter {
    pub fn new(
        wallet: Arc<dyn ReservationBackend>,
        institutional: Arc<dyn ReservationBackend>,
    ) -> Self {
        Self {
            wallet,
            institutional,
        }
    }

    /// Both HTTP read paths against the same API host
    pub fn http(config: &HttpBackendConfig) -> BackendResult<Self> {
        Ok(Self::new(
            Arc::new(WalletBackend::new(config)?),
            Arc::new(InstitutionalBackend::new(config)?),
        ))
    }

    /// Backend serving `mode`; the other path is never touched
    pub fn select(&self, mode: IdentityMode) -> Arc<dyn ReservationBackend> {
        let backend = match mode {
            IdentityMode::Wallet => &self.wallet,
            IdentityMode::Institutional => &self.institutional,
        };
        debug!(mode = %mode, backend = backend.name(), "Read path selected");
        Arc::clone(backend)
    }

    pub fn for_subject(&self, subject: &Subject) -> Arc<dyn ReservationBackend> {
        self.select(subject.mode())
    }
}
