//! enrichq CLI: drive the enrichment scheduler against a media server.

use enrichq::Scheduler;
use enrichq::badge::ConsoleSink;
use enrichq::config::{Config, SchedulerConfig};
use enrichq::error::Error;
use enrichq::event::EventKind;
use enrichq::model::{ItemKey, SubscriberId, Urgency};
use enrichq::telemetry::{TelemetryConfig, init_telemetry};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;

#[derive(Parser)]
#[command(name = "enrichq", about = "Demand-driven metadata enrichment")]
struct Cli {
    /// Scheduler TOML (overrides ENRICHQ_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Read relevance events from stdin and print badges as records arrive
    ///
    /// Each line is `<key> [now|hover|<ms>]`; `-<key>` drops the console
    /// subscription for a key.
    Watch,
    /// Enrich one item and print the settled record as JSON
    Show {
        /// Item key
        key: String,
        /// Give up after this many seconds
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
    },
    /// Print the effective scheduler configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if let Command::Config = cli.command {
        let scheduler = match &cli.config {
            Some(path) => SchedulerConfig::load(path)?,
            None => SchedulerConfig::default(),
        };
        println!("{scheduler:#?}");
        return Ok(());
    }

    let config = Config::from_env()?;
    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "enrichq".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let scheduler_config = match &cli.config {
        Some(path) => SchedulerConfig::load(path)?,
        None => config.scheduler()?,
    };
    let scheduler = Scheduler::connect(&config, scheduler_config)?;

    match cli.command {
        Command::Watch => cmd_watch(scheduler).await,
        Command::Show { key, timeout_secs } => {
            cmd_show(scheduler, ItemKey::new(key), Duration::from_secs(timeout_secs)).await
        }
        Command::Config => Ok(()),
    }
}

async fn cmd_watch(scheduler: Scheduler) -> anyhow::Result<()> {
    let mut control = scheduler.spawn();
    let sink = Arc::new(ConsoleSink::stdout());
    let subscriber = SubscriberId::new();
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let interrupted = loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = &mut interrupt => break true,
        };
        let Some(line) = line else { break false };
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(key) = line.strip_prefix('-') {
            scheduler.unregister(&ItemKey::new(key.trim()), subscriber);
            continue;
        }

        let mut parts = line.split_whitespace();
        let Some(key) = parts.next() else { continue };
        let urgency = match parse_urgency(parts.next(), scheduler.config()) {
            Ok(u) => u,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };
        scheduler.request(&ItemKey::new(key), subscriber, sink.clone(), urgency);
    };

    // Input closed: let outstanding work drain unless interrupted or the
    // control loop has already stopped.
    let mut finished = None;
    if !interrupted {
        tokio::select! {
            _ = wait_idle(&scheduler) => {}
            _ = &mut interrupt => {}
            joined = &mut control => finished = Some(joined),
        }
    }
    scheduler.shutdown();
    match finished {
        Some(joined) => joined??,
        None => control.await??,
    }
    Ok(())
}

async fn wait_idle(scheduler: &Scheduler) {
    while !is_idle(scheduler) {
        tokio::time::sleep(scheduler.config().tick_interval()).await;
    }
}

fn is_idle(scheduler: &Scheduler) -> bool {
    let stats = scheduler.stats();
    stats.active == 0 && stats.queue_len == 0 && stats.pending_admissions == 0
}

fn parse_urgency(word: Option<&str>, config: &SchedulerConfig) -> Result<Urgency, Error> {
    match word {
        None => Ok(Urgency::Delayed(config.visible_delay())),
        Some("now") => Ok(Urgency::Immediate),
        Some("hover") => Ok(Urgency::Delayed(config.hover_delay())),
        Some(ms) => ms
            .parse::<u64>()
            .map(|ms| Urgency::Delayed(Duration::from_millis(ms)))
            .map_err(|_| Error::Other(format!("bad urgency '{ms}': expected now, hover or ms"))),
    }
}

async fn cmd_show(scheduler: Scheduler, key: ItemKey, timeout: Duration) -> anyhow::Result<()> {
    let mut events = scheduler.subscribe_events();
    let control = scheduler.spawn();
    scheduler.notify_relevant(&key, Urgency::Immediate);

    let settled = tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(event) => match event.kind {
                    EventKind::Settled { key: k, .. } if k == key => return Ok(()),
                    EventKind::Aborted { key: k, reason } if k == key => {
                        return Err(anyhow::anyhow!("{key}: {reason}"));
                    }
                    _ => {}
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    });
    let outcome = tokio::select! {
        outcome = settled => outcome,
        _ = tokio::signal::ctrl_c() => {
            scheduler.shutdown();
            control.await??;
            anyhow::bail!("interrupted before {key} settled");
        }
    };

    scheduler.shutdown();
    control.await??;

    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(e),
        Err(_) => anyhow::bail!("{key} did not settle within {}s", timeout.as_secs()),
    }

    let record = scheduler
        .cached(&key)
        .ok_or_else(|| Error::NotFound(key.to_string()))?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urgency_words() {
        let config = SchedulerConfig::default();
        assert_eq!(
            parse_urgency(None, &config).unwrap(),
            Urgency::Delayed(config.visible_delay())
        );
        assert_eq!(parse_urgency(Some("now"), &config).unwrap(), Urgency::Immediate);
        assert_eq!(
            parse_urgency(Some("hover"), &config).unwrap(),
            Urgency::Delayed(config.hover_delay())
        );
        assert_eq!(
            parse_urgency(Some("250"), &config).unwrap(),
            Urgency::Delayed(Duration::from_millis(250))
        );
    }

    #[test]
    fn unknown_urgency_is_rejected() {
        for word in ["soon", "-5", "1.5"] {
            match parse_urgency(Some(word), &SchedulerConfig::default()) {
                Err(Error::Other(msg)) => assert!(msg.contains(word), "{msg}"),
                other => panic!("expected Other error for {word}, got {other:?}"),
            }
        }
    }
}
