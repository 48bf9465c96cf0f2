//! Entity commands: store, show, history, search, delete.

use anyhow::{bail, Result};
use colored::Colorize;
use gmem_core::{
    MemoryEntity, NewEntity, RetrieveOptions, SearchFilter, Sensitivity, Tier,
};
use serde_json::Value;

use super::Context;

/// Store a working-memory entry
pub async fn remember(ctx: &Context, key: String, value: &str, ttl: Option<u64>) -> Result<()> {
    let manager = ctx.open_manager()?;
    let ttl = ttl.unwrap_or(ctx.config.memory.working.default_ttl_seconds);
    let id = manager
        .store(&ctx.actor, NewEntity::working(key, parse_value(value), ttl))
        .await?;

    if ctx.json {
        return ctx.print_json(&serde_json::json!({ "id": id, "tier": Tier::Working }));
    }
    println!("{} Stored in {} memory", "✓".green(), "working".cyan());
    println!("  ID: {}", id);
    println!("  TTL: {} seconds", ttl);
    Ok(())
}

/// Store a semantic knowledge item
pub async fn store_knowledge(
    ctx: &Context,
    content: String,
    content_type: String,
    source: String,
    confidence: f64,
    sensitivity: Sensitivity,
    require_embedding: bool,
) -> Result<()> {
    let manager = ctx.open_manager()?;
    let mut new = NewEntity::semantic(content, content_type, source, confidence)
        .with_sensitivity(sensitivity);
    if require_embedding {
        new = new.requiring_real_embedding();
    }
    let id = manager.store(&ctx.actor, new).await?;

    if ctx.json {
        return ctx.print_json(&serde_json::json!({ "id": id, "tier": Tier::Semantic }));
    }
    println!("{} Stored in {} memory", "✓".green(), "semantic".cyan());
    println!("  ID: {}", id);
    println!("  Sensitivity: {}", sensitivity);
    Ok(())
}

pub async fn show(
    ctx: &Context,
    id: &str,
    tier: Tier,
    version: Option<u64>,
    include_tombstoned: bool,
) -> Result<()> {
    let manager = ctx.open_manager()?;
    let options = RetrieveOptions {
        include_tombstoned,
        version,
    };
    let found = manager.retrieve_with(&ctx.actor, id, tier, options).await?;

    if ctx.json {
        return ctx.print_json(&serde_json::json!({
            "entity": found.entity,
            "tombstone": found.tombstone,
        }));
    }
    print_entity(&found.entity);
    if let Some(tombstone) = found.tombstone {
        println!(
            "  {} deleted by {} at {} (version {})",
            "TOMBSTONED".red().bold(),
            tombstone.deleted_by,
            tombstone.deleted_at.format("%Y-%m-%d %H:%M:%S"),
            tombstone.version
        );
    }
    Ok(())
}

pub async fn history(ctx: &Context, id: &str, tier: Tier) -> Result<()> {
    let manager = ctx.open_manager()?;
    let versions = manager.history(&ctx.actor, id, tier).await?;

    if ctx.json {
        return ctx.print_json(&versions);
    }
    println!("{} {} ({} versions)", "History".bold(), id.cyan(), versions.len());
    for info in versions {
        let marker = if info.tombstoned {
            "tombstone".red().to_string()
        } else {
            info.checksum
                .as_deref()
                .map(|c| c.chars().take(12).collect::<String>())
                .unwrap_or_default()
                .dimmed()
                .to_string()
        };
        println!(
            "  v{:<4} {}  {}",
            info.version,
            info.written_at.format("%Y-%m-%d %H:%M:%S"),
            marker
        );
    }
    Ok(())
}

pub async fn search(
    ctx: &Context,
    query: Option<String>,
    tier: Tier,
    fields: &[String],
    top_k: Option<usize>,
    min_score: Option<f32>,
) -> Result<()> {
    let manager = ctx.open_manager()?;

    let mut filter = SearchFilter::new();
    for field in fields {
        let (name, value) = parse_field(field)?;
        filter = filter.with_field(name, value);
    }
    if let Some(query) = query {
        filter = filter.similar(query);
    }
    if let Some(top_k) = top_k {
        filter = filter.with_top_k(top_k);
    }
    if let Some(min_score) = min_score {
        filter = filter.with_min_score(min_score);
    }

    let results = manager.search(&ctx.actor, tier, filter).await?;
    if ctx.json {
        return ctx.print_json(&results);
    }
    if results.is_empty() {
        println!("{}", "No matching entities".yellow());
        return Ok(());
    }
    for hit in &results {
        if let Some(score) = hit.score {
            print!("{} ", format!("[{:.3}]", score).green());
        }
        print_entity(&hit.entity);
    }
    Ok(())
}

pub async fn delete(ctx: &Context, id: &str, tier: Tier) -> Result<()> {
    let manager = ctx.open_manager()?;
    manager.delete(&ctx.actor, id, tier).await?;

    if ctx.json {
        return ctx.print_json(&serde_json::json!({ "deleted": id, "tier": tier }));
    }
    println!("{} Deleted {} from {}", "✓".green(), id, tier.to_string().cyan());
    Ok(())
}

fn print_entity(entity: &MemoryEntity) {
    println!(
        "{} {} v{} [{}] owner={}",
        entity.tier().to_string().cyan(),
        entity.id,
        entity.version,
        entity.sensitivity,
        entity.owner
    );
    let summary = match entity.as_semantic() {
        Some(knowledge) => format!("{} ({}, {})", knowledge.content, knowledge.content_type, knowledge.source),
        None => serde_json::to_string(&entity.payload).unwrap_or_default(),
    };
    println!("  {}", summary);
}

/// JSON when it parses, plain string otherwise
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn parse_field(raw: &str) -> Result<(String, Value)> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), parse_value(value)))
        }
        _ => bail!("Invalid field filter '{}': expected key=value", raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("42"), json!(42));
        assert_eq!(parse_value("{\"a\":true}"), json!({ "a": true }));
        assert_eq!(parse_value("plain text"), json!("plain text"));
    }

    #[test]
    fn test_parse_field() {
        assert_eq!(parse_field("content_type=metric").unwrap(), ("content_type".into(), json!("metric")));
        assert_eq!(parse_field("confidence=0.5").unwrap(), ("confidence".into(), json!(0.5)));
        assert!(parse_field("=x").is_err());
        assert!(parse_field("novalue").is_err());
    }
}
