//! gmem - Governed Memory CLI
//!
//! Operator surface for a SQLite-backed memory core: store and inspect
//! entities, walk the knowledge graph, read and verify the audit trail.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod cli;
mod commands;
mod config;

use cli::{Cli, Commands};
use commands::Context;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::from_default_env()
                .add_directive("gmem=info".parse()?)
                .add_directive("gmem_core=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = config::Config::load()?;
    let ctx = Context::new(config, cli.actor, cli.as_role, cli.json);

    // Execute command
    match cli.command {
        Commands::Init => commands::maintenance::init(&ctx).await,
        Commands::Remember { key, value, ttl } => {
            commands::entity::remember(&ctx, key, &value, ttl).await
        }
        Commands::StoreKnowledge {
            content,
            content_type,
            source,
            confidence,
            sensitivity,
            require_embedding,
        } => {
            commands::entity::store_knowledge(
                &ctx,
                content,
                content_type,
                source,
                confidence,
                sensitivity,
                require_embedding,
            )
            .await
        }
        Commands::Show {
            id,
            tier,
            version,
            include_tombstoned,
        } => commands::entity::show(&ctx, &id, tier, version, include_tombstoned).await,
        Commands::History { id, tier } => commands::entity::history(&ctx, &id, tier).await,
        Commands::Search {
            query,
            tier,
            fields,
            top_k,
            min_score,
        } => commands::entity::search(&ctx, query, tier, &fields, top_k, min_score).await,
        Commands::Delete { id, tier } => commands::entity::delete(&ctx, &id, tier).await,
        Commands::Relate {
            from,
            to,
            relation,
            strength,
            bidirectional,
            sensitivity,
        } => {
            commands::graph::relate(&ctx, from, to, relation, strength, bidirectional, sensitivity)
                .await
        }
        Commands::Paths {
            from,
            to,
            max_depth,
        } => commands::graph::paths(&ctx, &from, &to, max_depth).await,
        Commands::Neighbors { id } => commands::graph::neighbors(&ctx, &id).await,
        Commands::Audit(cmd) => commands::audit::execute(&ctx, cmd).await,
        Commands::Sweep { watch } => commands::maintenance::sweep(&ctx, watch).await,
        Commands::Stats => commands::maintenance::stats(&ctx).await,
        Commands::Version => {
            println!("gmem {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
