//! Shared application state.

use std::sync::Arc;
use std::time::Instant;

use sqlx::PgPool;

use onair_common::vault::TokenVault;

use crate::config::Config;
use crate::controller::Controller;
use crate::logbuf::LogBuffer;
use crate::media::MediaLibrary;
use crate::ms::MsClient;
use crate::supervisor::Supervisor;

/// State shared across the reconciler, webhooks and all request handlers.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<Inner>,
}

struct Inner {
    pool: PgPool,
    config: Config,
    vault: TokenVault,
    controller: Controller,
    supervisor: Supervisor,
    ms: MsClient,
    logs: LogBuffer,
    media: MediaLibrary,
    started_at: Instant,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config, vault: TokenVault) -> Self {
        let controller = Controller::new(config.stability_window);
        let supervisor = Supervisor::new(config.clone());
        let ms = MsClient::new(&config.ms_api_url);
        let media = MediaLibrary::new(config.media_path.clone());
        Self {
            inner: Arc::new(Inner {
                pool,
                config,
                vault,
                controller,
                supervisor,
                ms,
                logs: LogBuffer::new(),
                media,
                started_at: Instant::now(),
            }),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.inner.pool
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn vault(&self) -> &TokenVault {
        &self.inner.vault
    }

    pub fn controller(&self) -> &Controller {
        &self.inner.controller
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.inner.supervisor
    }

    pub fn ms(&self) -> &MsClient {
        &self.inner.ms
    }

    pub fn logs(&self) -> &LogBuffer {
        &self.inner.logs
    }

    pub fn media(&self) -> &MediaLibrary {
        &self.inner.media
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.inner.started_at.elapsed()
    }
}
