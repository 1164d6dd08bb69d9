//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! # Fail-fast 設計
//! - build() 時に設定を検証（send_timeout < claim_ttl など）
//! - 送信手段が無い（SMTP 未設定かつ dry run でない）なら起動しない
//! - store を開けなければ起動しない
//!
//! テストでは store / notifier / clock を差し替えられます。

use std::path::Path;
use std::sync::Arc;

use crate::config::{ConfigError, MemoirConfig};
use crate::domain::StoreError;
use crate::impls::{InMemoryCapsuleStore, LogNotifier, SmtpNotifier, SqliteCapsuleStore};
use crate::ports::{CapsuleStore, Clock, IdGenerator, Notifier, SystemClock, UlidGenerator};

use super::capsules::CapsuleService;
use super::coordinator::{DeliveryCoordinator, DeliverySettings};
use super::scheduler_loop::SchedulerLoop;
use super::status::StatusSnapshot;

/// AppBuilder はアプリケーションを構築
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new(MemoirConfig::load(Some(path))?)
///     .dry_run(true)
///     .build()?;
/// let handle = app.scheduler().spawn();
/// ```
pub struct AppBuilder {
    config: MemoirConfig,
    dry_run: bool,
    store: Option<Arc<dyn CapsuleStore>>,
    notifier: Option<Arc<dyn Notifier>>,
    clock: Option<Arc<dyn Clock>>,
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to open capsule store: {0}")]
    Store(#[from] StoreError),

    #[error("no email transport: configure [smtp] or run with --dry-run")]
    MissingTransport,
}

impl AppBuilder {
    pub fn new(config: MemoirConfig) -> Self {
        Self {
            config,
            dry_run: false,
            store: None,
            notifier: None,
            clock: None,
        }
    }

    /// Log emails instead of sending them.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn store(mut self, store: Arc<dyn CapsuleStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<App, BuildError> {
        self.config.validate()?;

        let store = match self.store {
            Some(store) => store,
            None => open_store(&self.config)?,
        };
        let notifier = match self.notifier {
            Some(notifier) => notifier,
            None => open_notifier(&self.config, self.dry_run)?,
        };
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(Arc::clone(&clock)));

        let mut capsules =
            CapsuleService::new(Arc::clone(&store), Arc::clone(&clock), Arc::clone(&ids));
        if self.config.send_confirmation {
            capsules = capsules.with_confirmations(Arc::clone(&notifier));
        }

        let coordinator = Arc::new(DeliveryCoordinator::new(
            Arc::clone(&store),
            notifier,
            Arc::clone(&clock),
            ids,
            DeliverySettings::from(&self.config.scheduler),
        ));

        Ok(App {
            config: self.config,
            store,
            clock,
            capsules,
            coordinator,
        })
    }
}

fn open_store(config: &MemoirConfig) -> Result<Arc<dyn CapsuleStore>, BuildError> {
    if config.store.is_in_memory() {
        tracing::warn!("using in-memory capsule store; nothing will be persisted");
        return Ok(Arc::new(InMemoryCapsuleStore::new()));
    }
    let store = SqliteCapsuleStore::open(Path::new(&config.store.path))?;
    tracing::info!(path = %config.store.path, "capsule store opened");
    Ok(Arc::new(store))
}

fn open_notifier(config: &MemoirConfig, dry_run: bool) -> Result<Arc<dyn Notifier>, BuildError> {
    if dry_run {
        tracing::info!("dry run: emails are logged, not sent");
        return Ok(Arc::new(LogNotifier));
    }
    let smtp = config.smtp.as_ref().ok_or(BuildError::MissingTransport)?;
    Ok(Arc::new(SmtpNotifier::from_config(smtp)?))
}

/// App はアプリケーションのランタイム
pub struct App {
    pub config: MemoirConfig,
    pub store: Arc<dyn CapsuleStore>,
    pub clock: Arc<dyn Clock>,
    pub capsules: CapsuleService,
    pub coordinator: Arc<DeliveryCoordinator>,
}

impl App {
    /// Loop driving `coordinator` every `scheduler.interval_secs`.
    pub fn scheduler(&self) -> SchedulerLoop {
        SchedulerLoop::new(Arc::clone(&self.coordinator), self.config.scheduler.interval())
    }

    pub async fn status(&self) -> Result<StatusSnapshot, StoreError> {
        StatusSnapshot::collect(self.store.as_ref(), self.clock.as_ref()).await
    }
}
