use anyhow::Context;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use basket_core::auth::Principal;
use basket_core::domain::basket::{GenerationRequest, Snapshot};
use basket_core::generation::subprocess::SubprocessGenerator;
use basket_core::orchestrator::{BasketOrchestrator, GenerationPolicy, OrchestrationError};
use basket_core::reader::SnapshotReader;
use basket_core::storage::FileSnapshotStore;

#[derive(Debug, Parser)]
#[command(name = "basket_worker")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one basket generation and make it the live snapshot.
    Generate {
        /// Amount to invest.
        #[arg(long)]
        investment: f64,

        /// Risk level: low, medium or high.
        #[arg(long, default_value = "medium")]
        risk: String,

        /// Clear the live baskets before generating.
        #[arg(long)]
        force_new: bool,
    },
    /// Print the live snapshot.
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = basket_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();
    let principal = Principal::local_operator();
    let store = Arc::new(FileSnapshotStore::from_settings(&settings));

    let snapshot = match args.command {
        Command::Show => SnapshotReader::new(store)
            .current(&principal)
            .await
            .context("failed to read live snapshot")?,
        Command::Generate {
            investment,
            risk,
            force_new,
        } => {
            let generator = Arc::new(SubprocessGenerator::from_settings(&settings)?);
            let policy = GenerationPolicy::from_settings(&settings)?;
            let orchestrator = BasketOrchestrator::new(store, generator).with_policy(policy);

            let request = GenerationRequest {
                investment,
                risk,
                force_new,
            };
            match orchestrator.generate(&principal, &request).await {
                Ok(snapshot) => snapshot,
                Err(err) => return Err(report_failure(err)),
            }
        }
    };

    print_snapshot(&snapshot)
}

fn report_failure(err: OrchestrationError) -> anyhow::Error {
    let stage = err.stage();
    if let OrchestrationError::Persist { baskets, .. } = &err {
        // The caller still gets the computed result even though it was not saved.
        match serde_json::to_string_pretty(baskets) {
            Ok(json) => println!("{json}"),
            Err(e) => tracing::warn!(error = %e, "failed to print unsaved baskets"),
        }
    }

    let err = anyhow::Error::new(err).context(format!("basket generation failed at stage {stage}"));
    sentry_anyhow::capture_anyhow(&err);
    err
}

fn print_snapshot(snapshot: &Snapshot) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(snapshot).context("serialize snapshot failed")?;
    println!("{json}");
    Ok(())
}

fn init_sentry(settings: &basket_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
