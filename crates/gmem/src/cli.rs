//! CLI argument definitions using clap derive macros.

use clap::{Args, Parser, Subcommand};
use gmem_core::{Sensitivity, Tier};

/// Governed memory administration
///
/// Every command goes through the same access checks and audit trail as
/// library callers. Commands run as the built-in `system` actor unless
/// `--actor` / `--as-role` say otherwise.
#[derive(Parser, Debug)]
#[command(name = "gmem")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Actor id recorded in the audit trail
    #[arg(long, global = true, env = "GMEM_ACTOR")]
    pub actor: Option<String>,

    /// Role to act with (admin, system, agent or a configured role)
    #[arg(long = "as-role", global = true, env = "GMEM_ROLE")]
    pub as_role: Option<String>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the databases and run migrations
    Init,

    /// Put a key/value entry into working memory
    Remember {
        key: String,

        /// JSON value (plain text is stored as a string)
        value: String,

        /// TTL in seconds (defaults to working.default_ttl_seconds)
        #[arg(long)]
        ttl: Option<u64>,
    },

    /// Store a semantic knowledge item
    StoreKnowledge {
        content: String,

        #[arg(long, default_value = "note")]
        content_type: String,

        #[arg(long, default_value = "cli")]
        source: String,

        /// Confidence within [0, 1]
        #[arg(long, default_value_t = 0.8)]
        confidence: f64,

        #[arg(long, value_parser = parse_sensitivity, default_value = "internal")]
        sensitivity: Sensitivity,

        /// Fail instead of using the fallback vector when no model answers
        #[arg(long)]
        require_embedding: bool,
    },

    /// Show an entity
    Show {
        id: String,

        #[arg(short, long, value_parser = parse_tier)]
        tier: Tier,

        /// Specific version (defaults to the latest)
        #[arg(id = "at_version", long = "at-version")]
        version: Option<u64>,

        /// Also show deleted entities (needs Delete permission)
        #[arg(long)]
        include_tombstoned: bool,
    },

    /// List an entity's versions
    History {
        id: String,

        #[arg(short, long, value_parser = parse_tier)]
        tier: Tier,
    },

    /// Similarity search over semantic memory, or field search in any tier
    Search {
        /// Similarity query (semantic tier only)
        query: Option<String>,

        #[arg(short, long, value_parser = parse_tier, default_value = "semantic")]
        tier: Tier,

        /// Exact field match, as key=value (repeatable)
        #[arg(short, long = "field")]
        fields: Vec<String>,

        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        #[arg(long)]
        min_score: Option<f32>,
    },

    /// Delete an entity (appends a tombstone)
    Delete {
        id: String,

        #[arg(short, long, value_parser = parse_tier)]
        tier: Tier,
    },

    /// Create a relationship between two stored entities
    Relate {
        from: String,
        to: String,

        #[arg(short, long, default_value = "related_to")]
        relation: String,

        #[arg(short, long, default_value_t = 0.5)]
        strength: f64,

        #[arg(long)]
        bidirectional: bool,

        #[arg(long, value_parser = parse_sensitivity, default_value = "internal")]
        sensitivity: Sensitivity,
    },

    /// Find paths between two entities
    Paths {
        from: String,
        to: String,

        #[arg(short = 'd', long, default_value_t = 3)]
        max_depth: usize,
    },

    /// Show the relationships touching an entity
    Neighbors { id: String },

    /// Audit trail
    Audit(AuditCommand),

    /// Purge expired working entries
    Sweep {
        /// Keep sweeping every working.sweep_interval_seconds until Ctrl-C
        #[arg(long)]
        watch: bool,
    },

    /// Per-tier statistics
    Stats,

    /// Show version
    Version,
}

#[derive(Args, Debug)]
pub struct AuditCommand {
    #[command(subcommand)]
    pub action: AuditAction,
}

#[derive(Subcommand, Debug)]
pub enum AuditAction {
    /// List audit records
    List {
        /// Only records for this actor id
        #[arg(long = "by")]
        by_actor: Option<String>,

        #[arg(short, long, value_parser = parse_tier)]
        tier: Option<Tier>,

        #[arg(short, long)]
        entity: Option<String>,

        /// Most recent N records
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },

    /// Verify the hash chain of the whole trail
    Verify,
}

fn parse_tier(s: &str) -> Result<Tier, String> {
    Tier::parse(&s.to_lowercase())
        .ok_or_else(|| format!("invalid tier '{}': use working, episodic, semantic or graph", s))
}

fn parse_sensitivity(s: &str) -> Result<Sensitivity, String> {
    Sensitivity::parse(&s.to_lowercase()).ok_or_else(|| {
        format!(
            "invalid sensitivity '{}': use public, internal, confidential or restricted",
            s
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_show() {
        let cli = Cli::try_parse_from(["gmem", "show", "abc", "--tier", "Episodic", "--at-version", "2"])
            .unwrap();
        match cli.command {
            Commands::Show { id, tier, version, include_tombstoned } => {
                assert_eq!(id, "abc");
                assert_eq!(tier, Tier::Episodic);
                assert_eq!(version, Some(2));
                assert!(!include_tombstoned);
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert!(Cli::try_parse_from(["gmem", "show", "abc", "--tier", "long_term"]).is_err());
    }

    #[test]
    fn test_global_actor_flags() {
        let cli = Cli::try_parse_from(["gmem", "stats", "--as-role", "agent", "--actor", "bot-7"])
            .unwrap();
        assert_eq!(cli.as_role.as_deref(), Some("agent"));
        assert_eq!(cli.actor.as_deref(), Some("bot-7"));
    }
}
