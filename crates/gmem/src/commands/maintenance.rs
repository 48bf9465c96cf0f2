//! Init, TTL sweep and stats commands.

use std::sync::Arc;

use anyhow::Result;
use colored::Colorize;
use gmem_core::{spawn_ttl_sweeper, Tier};

use super::Context;

/// Create the data directory and databases
pub async fn init(ctx: &Context) -> Result<()> {
    let manager = ctx.open_manager()?;
    let stats = manager.stats(&ctx.actor).await?;
    let dir = &ctx.config.storage.data_dir;

    if ctx.json {
        return ctx.print_json(&serde_json::json!({
            "data_dir": dir,
            "audit_records": stats.audit_records,
        }));
    }
    println!("{} Memory initialized", "✓".green());
    println!("  Data: {}", dir.display());
    Ok(())
}

/// Purge expired working entries once, or every sweep interval with `--watch`
pub async fn sweep(ctx: &Context, watch: bool) -> Result<()> {
    let manager = ctx.open_manager()?;

    if watch {
        let every = ctx.config.memory.sweep_interval();
        let handle = spawn_ttl_sweeper(Arc::new(manager), ctx.actor.clone(), every);
        println!(
            "{} Sweeping every {}s, Ctrl-C to stop",
            "→".cyan(),
            every.as_secs()
        );
        tokio::signal::ctrl_c().await?;
        handle.stop();
        println!("{} Sweeper stopped", "✓".green());
        return Ok(());
    }

    let report = manager.sweep_expired(&ctx.actor).await?;
    if ctx.json {
        return ctx.print_json(&report);
    }
    println!(
        "{} Swept working memory: {} examined, {} purged",
        "✓".green(),
        report.examined,
        report.purged
    );
    Ok(())
}

pub async fn stats(ctx: &Context) -> Result<()> {
    let manager = ctx.open_manager()?;
    let stats = manager.stats(&ctx.actor).await?;

    if ctx.json {
        return ctx.print_json(&stats);
    }
    println!(
        "{:<10} {:>8} {:>11} {:>9}",
        "TIER".bold(),
        "LIVE".bold(),
        "TOMBSTONED".bold(),
        "VERSIONS".bold()
    );
    for tier in Tier::ALL {
        let counts = stats.tiers.get(&tier).copied().unwrap_or_default();
        println!(
            "{:<10} {:>8} {:>11} {:>9}",
            tier.to_string(),
            counts.live,
            counts.tombstoned,
            counts.versions
        );
    }
    println!();
    println!("Audit records: {}", stats.audit_records);
    println!("Indexed edges: {}", stats.indexed_edges);
    Ok(())
}
