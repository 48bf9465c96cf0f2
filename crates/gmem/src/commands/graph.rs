//! Knowledge graph commands.

use anyhow::Result;
use colored::Colorize;
use gmem_core::graph::EdgeDirection;
use gmem_core::{NewRelationship, Sensitivity};

use super::Context;

pub async fn relate(
    ctx: &Context,
    from: String,
    to: String,
    relation: String,
    strength: f64,
    bidirectional: bool,
    sensitivity: Sensitivity,
) -> Result<()> {
    let manager = ctx.open_manager()?;
    let mut new = NewRelationship::new(from.clone(), to.clone(), relation.clone(), strength)
        .with_sensitivity(sensitivity);
    if bidirectional {
        new = new.bidirectional();
    }
    let id = manager.create_relationship(&ctx.actor, new).await?;

    if ctx.json {
        return ctx.print_json(&serde_json::json!({ "id": id }));
    }
    let arrow = if bidirectional { "<->" } else { "->" };
    println!("{} {} {} {} ({})", "✓".green(), from, arrow, to, relation.cyan());
    println!("  ID: {}", id);
    Ok(())
}

pub async fn paths(ctx: &Context, from: &str, to: &str, max_depth: usize) -> Result<()> {
    let manager = ctx.open_manager()?;
    let paths = manager.find_paths(&ctx.actor, from, to, max_depth).await?;

    if ctx.json {
        return ctx.print_json(&paths);
    }
    if paths.is_empty() {
        println!("{}", format!("No path within {} hops", max_depth).yellow());
        return Ok(());
    }
    for (i, path) in paths.iter().enumerate() {
        let hops: Vec<String> = path
            .nodes
            .iter()
            .map(|n| format!("{}:{}", n.tier, n.id))
            .collect();
        println!(
            "{} {} (strength {:.2})",
            format!("#{}", i + 1).bold(),
            hops.join(" -> "),
            path.total_strength
        );
    }
    Ok(())
}

pub async fn neighbors(ctx: &Context, id: &str) -> Result<()> {
    let manager = ctx.open_manager()?;
    let neighbors = manager.neighbors(&ctx.actor, id).await?;

    if ctx.json {
        return ctx.print_json(&neighbors);
    }
    if neighbors.is_empty() {
        println!("{}", "No relationships".yellow());
        return Ok(());
    }
    for n in neighbors {
        let arrow = match (n.direction, n.traversable) {
            (EdgeDirection::Outgoing, _) => "->",
            (EdgeDirection::Incoming, true) => "<->",
            (EdgeDirection::Incoming, false) => "<-",
        };
        println!(
            "  {} {}:{} {} {:.2}",
            arrow,
            n.node.tier,
            n.node.id,
            n.relation_type.cyan(),
            n.strength
        );
    }
    Ok(())
}
