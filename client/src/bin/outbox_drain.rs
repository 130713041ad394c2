//! Drain the durable community outbox once and report what happened.
#![cfg_attr(not(any(test, doctest)), deny(clippy::unwrap_used))]
#![cfg_attr(not(any(test, doctest)), deny(clippy::expect_used))]

use std::ffi::OsString;
use std::sync::Arc;

use chrono::TimeDelta;
use clap::Parser;
use color_eyre::eyre::{Result, WrapErr, eyre};
use community_client::config::ClientSettings;
use community_client::domain::backoff::{RandomJitter, Retrier, TokioSleeper};
use community_client::domain::community_api::{
    CommunityApiClient, CommunityApiPorts, CommunityApiRuntime,
};
use community_client::domain::outbox::{OutboxDrainer, OutboxDrainerPorts};
use community_client::domain::ports::StaticSessionProvider;
use community_client::domain::{AccessToken, AuthSession, UserId};
use community_client::outbound::http::HttpCommunityBackend;
use community_client::outbound::memory::InMemoryIdempotencyStore;
use community_client::outbound::storage::{DurableOutboxStore, FsDurableStorage};
use community_client::telemetry::init_tracing;
use mockable::{Clock, DefaultClock};
use ortho_config::OrthoConfig;
use tokio::runtime::Builder;
use tracing::info;

const USER_ID_ENV: &str = "COMMUNITY_USER_ID";
const ACCESS_TOKEN_ENV: &str = "COMMUNITY_ACCESS_TOKEN";

/// `outbox-drain` command arguments.
///
/// Connection settings come from `COMMUNITY_*` variables and configuration
/// files.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "outbox-drain",
    about = "Redeliver queued community mutations with their original idempotency keys",
    version
)]
struct CliArgs {
    /// Also drop processed entries older than this many hours.
    #[arg(long = "compact-after-hours", value_name = "hours")]
    compact_after_hours: Option<u32>,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let runtime = Builder::new_current_thread()
        .enable_all()
        .build()
        .wrap_err("create Tokio runtime")?;
    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    let args = CliArgs::parse();
    init_tracing();

    let settings = ClientSettings::load_from_iter([OsString::from("outbox-drain")])
        .map_err(|error| eyre!("load settings: {error}"))?;
    let session = session_from_env()?;
    let clock: Arc<dyn Clock> = Arc::new(DefaultClock);
    let sleeper = Arc::new(TokioSleeper);

    let retrier = Retrier::new(
        settings.backoff_policy(),
        sleeper.clone(),
        Arc::new(RandomJitter),
        Arc::clone(&clock),
    );
    let backend = HttpCommunityBackend::new(settings.http_backend()?, retrier)
        .wrap_err("build HTTP client")?;
    let storage = FsDurableStorage::open(settings.outbox_dir())
        .wrap_err_with(|| format!("open outbox at {}", settings.outbox_dir().display()))?;

    let api = CommunityApiClient::new(
        CommunityApiPorts {
            backend: Arc::new(backend),
            sessions: Arc::new(StaticSessionProvider::signed_in(session)),
            idempotency_store: Arc::new(InMemoryIdempotencyStore::new()),
        },
        CommunityApiRuntime {
            clock: Arc::clone(&clock),
            sleeper,
            idempotency: settings.idempotency(),
            undo_refetch: settings.undo_refetch(),
        },
    );
    let drainer = OutboxDrainer::new(
        OutboxDrainerPorts {
            store: Arc::new(DurableOutboxStore::new(Arc::new(storage))),
            api,
        },
        Arc::clone(&clock),
        settings.drain(),
    )
    .with_jitter(Arc::new(RandomJitter));

    let report = drainer.drain_once().await.wrap_err("drain outbox")?;
    info!(
        processed = report.processed,
        reconciled = report.reconciled,
        rescheduled = report.rescheduled,
        failed = report.failed,
        skipped = report.skipped,
        "outbox drain finished"
    );

    if let Some(hours) = args.compact_after_hours {
        let cutoff = clock.utc() - TimeDelta::hours(i64::from(hours));
        let removed = drainer.compact(cutoff).await.wrap_err("compact outbox")?;
        info!(removed, "outbox compacted");
    }
    Ok(())
}

fn session_from_env() -> Result<AuthSession> {
    let user_id = std::env::var(USER_ID_ENV).wrap_err_with(|| format!("{USER_ID_ENV} is not set"))?;
    let token =
        std::env::var(ACCESS_TOKEN_ENV).wrap_err_with(|| format!("{ACCESS_TOKEN_ENV} is not set"))?;
    let id = UserId::new(&user_id).wrap_err_with(|| format!("{USER_ID_ENV} is invalid"))?;
    Ok(AuthSession::new(id, AccessToken::new(token)))
}
