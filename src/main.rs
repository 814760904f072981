mod cli;
mod ui;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::{TimeDelta, Utc};
use clap::Parser;
use tokio::runtime::Handle;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

use cli::{Cli, Command};
use transmute::repository::AuditRepository;
use transmute::simulation::Simulator;
use transmute::state_machine::EntityKind;
use transmute::sweep::SweepSettings;
use transmute::{
    DailySweep, MaterialLine, MemoryStore, NotificationHub, Repositories, SimulationRequest,
    TaskScheduler, TransmutationService, TransmuteConfig, logging,
};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

struct Seeded {
    alchemist_id: u64,
    lead_id: u64,
}

/// Populate the in-memory store with a small catalogue.
fn seed(store: &MemoryStore) -> anyhow::Result<Seeded> {
    let alchemist = store.insert_requester("Edward Elric")?;
    let lead = store.insert_material("Lead", 2.5, 40.0)?;
    store.insert_material("Philosopher's Salt", 12.0, 4.0)?;
    store.insert_material("Quicksilver", 7.75, 18.0)?;

    let now = Utc::now();
    store.insert_mission(
        "Survey the Xenotime mines",
        "OPEN",
        Some("Alphonse Elric"),
        now - TimeDelta::days(12),
    )?;
    store.insert_mission("Report to Central", "COMPLETED", None, now - TimeDelta::days(30))?;

    Ok(Seeded {
        alchemist_id: alchemist.id,
        lead_id: lead.id,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => TransmuteConfig::load_from(path)?,
        None => TransmuteConfig::load()?,
    };
    debug!(?config, "configuration loaded");

    let store = Arc::new(MemoryStore::new());
    let seeded = seed(&store)?;
    let repos = Repositories::in_memory(Arc::clone(&store));

    match cli.command {
        Command::Simulate {
            description,
            complexity,
            risk,
            catalyst,
            materials,
        } => {
            let simulator = Simulator::new(Arc::clone(&repos.materials), config.duration_bounds());
            let request = SimulationRequest {
                description,
                complexity,
                risk_level: risk,
                catalyst_quality: catalyst,
                materials,
            };
            let breakdown = simulator.simulate(&request)?;
            ui::print_breakdown(&breakdown);
        }
        Command::Demo {
            description,
            cancel,
        } => run_demo(&config, repos, &seeded, description, cancel).await?,
        Command::Sweep => {
            let sweep = DailySweep::new(&repos, SweepSettings::from_config(&config));
            let result = sweep.run_once(Utc::now());
            ui::print_sweep(&result);
            result?;
        }
        Command::Serve => {
            let sweep = Arc::new(DailySweep::new(&repos, SweepSettings::from_config(&config)));
            let handle = sweep.spawn(&Handle::current());
            tokio::signal::ctrl_c()
                .await
                .context("waiting for Ctrl-C")?;
            info!("shutting down");
            handle.stop().await;
        }
    }

    Ok(())
}

/// Submit, approve and follow one transmutation until it reaches a final status.
async fn run_demo(
    config: &TransmuteConfig,
    repos: Repositories,
    seeded: &Seeded,
    description: String,
    cancel: bool,
) -> anyhow::Result<()> {
    let hub = Arc::new(NotificationHub::new(config.notification_capacity));
    let mut events = hub.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => debug!(topic = %event.topic, payload = %event.payload, "notification"),
                Err(RecvError::Lagged(missed)) => debug!(missed, "notification listener lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let scheduler = Arc::new(TaskScheduler::new(Handle::current()));
    let service = TransmutationService::new(
        repos.clone(),
        hub,
        Arc::clone(&scheduler),
        config.duration_bounds(),
    );

    let request = SimulationRequest {
        materials: vec![MaterialLine {
            material_id: i64::try_from(seeded.lead_id)?,
            quantity: 2.0,
        }],
        ..SimulationRequest::new(description.clone())
    };
    ui::print_breakdown(&service.simulate(&request)?);

    let progress = ui::LifecycleProgress::start(&description);
    let submitted = service.submit(seeded.alchemist_id, request)?;
    progress.update(&submitted);

    let approved = service.update_status(submitted.id, "IN_PROGRESS")?;
    progress.update(&approved);
    let started = Instant::now();
    let cancel_after = Duration::from_secs(approved.estimated_duration_secs) / 2;

    let finished = loop {
        tokio::time::sleep(POLL_INTERVAL).await;
        if cancel && started.elapsed() >= cancel_after {
            progress.note("cancelling midway");
            break service.cancel(approved.id)?;
        }
        let current = service.find(approved.id)?;
        progress.update(&current);
        if current.status.is_terminal() {
            break current;
        }
    };
    progress.finish(&finished);
    scheduler.shutdown();

    let trail: Vec<_> = repos
        .audits
        .find_all()?
        .into_iter()
        .filter(|r| r.entity == EntityKind::Transmutation && r.entity_id == finished.id)
        .collect();
    ui::print_audit_trail(&trail);
    Ok(())
}
