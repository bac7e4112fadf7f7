//! One-shot sync and the long-running daemon.

use crate::context::Context;
use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{error, info, warn};
use wlsync_engine::{migrate_legacy_names, ReconcileReport, ServerOutcome, WhitelistService};

/// Runs one pass now and prints what changed.
pub async fn run_once(ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    if migrate_legacy_names(&ctx.store, ctx.names.as_ref()).await? {
        println!("✓ Migrated legacy names");
    }
    let report = ctx.reconciler().reconcile().await?;
    print_report(&report);
    if report.failed().is_empty() {
        Ok(())
    } else {
        Err(format!("{} server(s) failed", report.failed().len()).into())
    }
}

/// Keeps whitelists in sync until Ctrl-C.
///
/// With `every` set, a pass is also requested on that period so changes to
/// the member snapshot are picked up without an admin action. SIGHUP
/// reloads the store from disk and runs a pass.
pub async fn run_daemon(
    ctx: &Context,
    every: Option<Duration>,
) -> Result<(), Box<dyn std::error::Error>> {
    migrate_legacy_names(&ctx.store, ctx.names.as_ref()).await?;
    let service = ctx.service(ctx.config.debounce);
    let scheduler = service.scheduler();
    scheduler.trigger();
    info!(debounce = ?ctx.config.debounce, every = ?every, "daemon started");

    let mut ticker = every.map(|period| {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    let mut hangups = listen_hangup();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            signal = &mut ctrl_c => {
                if let Err(e) = signal {
                    warn!(error = %e, "cannot listen for Ctrl-C");
                }
                break;
            }
            _ = tick(&mut ticker) => {
                scheduler.trigger();
            }
            _ = hangup(&mut hangups) => {
                reload(&service).await;
            }
        }
    }

    info!("stopping, waiting for pending updates");
    scheduler.settle().await;
    scheduler.shutdown();
    println!("✓ Stopped after {} pass(es)", scheduler.passes_completed());
    Ok(())
}

/// Handles an admin reload request. Failures are logged, the daemon goes on.
async fn reload(service: &WhitelistService) -> bool {
    info!("reload requested");
    match service.reload().await {
        Ok(report) => {
            print_report(&report);
            true
        }
        Err(e) => {
            error!(error = %e, "reload failed");
            false
        }
    }
}

#[cfg(unix)]
type Hangup = tokio::signal::unix::Signal;

#[cfg(not(unix))]
type Hangup = std::convert::Infallible;

#[cfg(unix)]
fn listen_hangup() -> Option<Hangup> {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::hangup()) {
        Ok(signal) => Some(signal),
        Err(e) => {
            warn!(error = %e, "cannot listen for SIGHUP, reload disabled");
            None
        }
    }
}

#[cfg(not(unix))]
fn listen_hangup() -> Option<Hangup> {
    None
}

#[cfg(unix)]
async fn hangup(listener: &mut Option<Hangup>) {
    if let Some(signal) = listener {
        if signal.recv().await.is_some() {
            return;
        }
        *listener = None;
    }
    std::future::pending::<()>().await
}

#[cfg(not(unix))]
async fn hangup(_listener: &mut Option<Hangup>) {
    std::future::pending::<()>().await
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn print_report(report: &ReconcileReport) {
    for (id, outcome) in &report.servers {
        println!("{}", describe(id, outcome));
    }
    println!(
        "✓ Pass finished in {:.2?}: {} updated, {} failed, {} command(s)",
        report.duration,
        report.updated().len(),
        report.failed().len(),
        report.command_count()
    );
}

fn describe(id: &str, outcome: &ServerOutcome) -> String {
    match outcome {
        ServerOutcome::Unchanged => format!("  {id}: unchanged"),
        ServerOutcome::Updated {
            additions,
            removals,
            ..
        } => format!("  {id}: +{} -{}", additions.len(), removals.len()),
        ServerOutcome::Failed(message) => format!("  {id}: FAILED ({message})"),
    }
}
