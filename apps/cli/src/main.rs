#![deny(warnings)]

//! Headless CLI: load a catalog, run a scripted lab session on a manual
//! clock and print the resulting KPIs.

use anyhow::{Context, Result};
use chrono::Utc;
use lab_core::{add_millis, Catalog, FounderId, JobStatus, OwnerId, UpgradeTrack};
use lab_research::frontier;
use lab_runtime::{Clock, Engine, JobOptions, ManualClock, RunReport, SystemClock};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, Level};
use tracing_subscriber::EnvFilter;

struct Args {
    catalog: String,
    founder: String,
    scale: Decimal,
    hours: u32,
    save: Option<String>,
    json: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        catalog: "assets/catalog.yaml".to_string(),
        founder: "hacker".to_string(),
        scale: Decimal::ONE,
        hours: 8,
        save: None,
        json: false,
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--catalog" => args.catalog = it.next().context("--catalog needs a path")?,
            "--founder" => args.founder = it.next().context("--founder needs an id")?,
            "--scale" => {
                let raw = it.next().context("--scale needs a number")?;
                args.scale = Decimal::from_str(&raw).with_context(|| format!("bad scale {raw}"))?;
            }
            "--hours" => args.hours = it.next().and_then(|s| s.parse().ok()).unwrap_or(8),
            "--save" => args.save = it.next(),
            "--json" => args.json = true,
            _ => {}
        }
    }
    Ok(args)
}

/// Spend points, start research and fill every open slot. Returns how many
/// actions succeeded.
fn autopilot_step(engine: &Engine, owner: &OwnerId) -> Result<usize> {
    let mut started = 0;
    let rec = engine.owner(owner)?;
    for _ in 0..rec.state.upgrade_points {
        let bought = UpgradeTrack::ALL
            .into_iter()
            .find(|t| engine.purchase_upgrade(owner, *t).is_ok());
        if bought.is_none() {
            break;
        }
        started += 1;
    }
    let rec = engine.owner(owner)?;
    for node in frontier(engine.catalog(), &rec.state.unlocks) {
        match engine.start_research(owner, &node.id) {
            Ok(_) => started += 1,
            Err(e) => debug!(node = %node.id, error = %e, "research skipped"),
        }
    }
    loop {
        let mut progress = false;
        for def in engine.catalog().jobs.keys() {
            match engine.start_job(owner, def, JobOptions::default()) {
                Ok(_) => {
                    started += 1;
                    progress = true;
                }
                Err(e) => debug!(job = %def, error = %e, "job skipped"),
            }
        }
        if !progress {
            break;
        }
    }
    Ok(started)
}

fn main() -> Result<()> {
    // Logging setup
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::INFO)
        .init();

    let args = parse_args()?;
    info!(catalog = %args.catalog, founder = %args.founder, scale = %args.scale, hours = args.hours, git = env!("GIT_SHA"), "starting CLI");

    let catalog = Arc::new(Catalog::load(&args.catalog)?);
    let start = SystemClock.now();
    let clock = Arc::new(ManualClock::new(start));
    let engine = Engine::in_memory(catalog.clone(), clock.clone());
    let owner = OwnerId::new("player-1");
    engine.create_owner(owner.clone(), FounderId::new(args.founder.as_str()))?;
    engine.set_time_scale(&owner, args.scale)?;

    let end = add_millis(start, i64::from(args.hours) * 3_600_000);
    let mut totals = RunReport::default();
    let mut actions = 0;
    loop {
        actions += autopilot_step(&engine, &owner)?;
        let Some(next) = engine.scheduler().next_fire_at() else {
            break;
        };
        if next > end {
            break;
        }
        clock.set(next);
        let report = engine.run_due();
        totals.completed += report.completed;
        totals.retried += report.retried;
        totals.failed += report.failed;
    }

    let rec = engine.owner(&owner)?;
    let best = rec.artifacts.iter().map(|a| a.score).max();
    println!(
        "Catalog OK | founders: {} | jobs: {} | research: {} | build: {} ({})",
        catalog.founders.len(),
        catalog.jobs.len(),
        catalog.nodes.len(),
        env!("GIT_SHA"),
        env!("BUILD_DATE")
    );
    println!(
        "KPI | hours: {} | actions: {} | completed: {} | open: {} | level: {} | currency: {} | RP: {} | staff: {} | research: {} | artifacts: {} | best: {}",
        args.hours,
        actions,
        totals.completed,
        rec.jobs_with_status(JobStatus::InProgress).count() + rec.queued() as usize,
        rec.state.level,
        rec.state.pool.currency,
        rec.state.pool.research_points,
        rec.state.pool.staff,
        rec.state.unlocks.purchased.len(),
        rec.artifacts.len(),
        best.map(|s| s.to_string()).unwrap_or_else(|| "-".into()),
    );
    if args.json {
        println!("{}", serde_json::to_string_pretty(&engine.standings()?)?);
    }

    if let Some(url) = args.save {
        let snapshot = engine.snapshot()?;
        let rt = tokio::runtime::Runtime::new()?;
        let id = rt.block_on(async {
            let pool = persistence::init_db(&url).await?;
            let save = persistence::create_save(&pool, "cli", Some(&format!("session at {}", Utc::now()))).await?;
            persistence::save_snapshot(&pool, save, &snapshot).await?;
            anyhow::Ok(save)
        })?;
        println!("Saved snapshot to {url} (save {id})");
    }

    Ok(())
}
