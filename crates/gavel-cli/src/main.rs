//! Gavel CLI - operator commands for the governance engine

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use gavel_core::{
    init_logging, Decision, Gavel, GavelConfig, GovernanceRequest, NewApproval, Priority, Vote,
};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "gavel")]
#[command(about = "Gavel - deliberation, voting and escalating approval chains")]
struct Cli {
    /// Configuration file path (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database directory, overrides the configuration
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run the engine: re-arm pending deadlines and wait for Ctrl-C
    Serve {
        /// Seconds between sweeps of overdue deliberation items
        #[arg(long, default_value_t = 30)]
        sweep_secs: u64,
    },
    /// Route a scored request
    Route {
        id: String,
        content: String,
        /// Impact score in [0, 1]
        #[arg(short, long)]
        score: f64,
        #[arg(short, long, default_value = "standard")]
        priority: Priority,
        #[arg(short, long, default_value = "")]
        tenant: String,
        /// Always deliberate, with this reason
        #[arg(long)]
        force: Option<String>,
    },
    /// Open an approval request
    Create {
        decision_ref: String,
        title: String,
        /// Chain id; chosen by priority and context when omitted
        #[arg(long)]
        chain: Option<String>,
        #[arg(short, long, default_value = "standard")]
        priority: Priority,
        #[arg(short, long, default_value = "")]
        tenant: String,
        #[arg(short, long, default_value = "")]
        requester: String,
        /// Context entry as KEY=VALUE, repeatable
        #[arg(long = "context", value_parser = parse_key_value)]
        context: Vec<(String, String)>,
    },
    /// Approve the current step of a request
    Approve {
        request_id: String,
        #[arg(short, long)]
        actor: String,
        #[arg(short, long)]
        rationale: Option<String>,
    },
    /// Reject a request
    Reject {
        request_id: String,
        #[arg(short, long)]
        actor: String,
        #[arg(short, long)]
        rationale: Option<String>,
    },
    /// Resolve a request through the chain's emergency override role
    Override {
        request_id: String,
        #[arg(short, long)]
        actor: String,
        /// Role held by the actor, repeatable
        #[arg(long = "role")]
        roles: Vec<String>,
        /// approve or reject
        #[arg(short, long)]
        decision: Decision,
        #[arg(short, long)]
        rationale: Option<String>,
    },
    /// Cancel a pending request
    Cancel {
        request_id: String,
        #[arg(short, long)]
        actor: String,
    },
    /// Show an approval request
    Status { request_id: String },
    /// Show decisions and escalations of an approval request
    History { request_id: String },
    /// List pending requests waiting on a role
    Inbox { role: String },
    /// Cast an agent vote on a deliberation item
    Vote {
        item_id: String,
        #[arg(short, long)]
        agent: String,
        /// approve, reject or abstain
        vote: Vote,
        #[arg(short, long, default_value = "")]
        reasoning: String,
        #[arg(long, default_value_t = 1.0)]
        confidence: f64,
    },
    /// Show a deliberation item
    Item { item_id: String },
    /// Check configuration validity
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => GavelConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => GavelConfig::default(),
    };
    if let Some(db) = cli.db {
        config.storage.db_path = Some(db);
    }
    init_logging(&config.logging.level);

    let command = match cli.command {
        Some(command) => command,
        None => {
            println!("Gavel v{} - Use --help for commands", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
    };

    if let Commands::Check = command {
        config.validate()?;
        println!("Configuration OK");
        return Ok(());
    }

    if config.storage.db_path.is_none() && !matches!(command, Commands::Serve { .. }) {
        warn!("no database configured, state will not outlive this command");
    }

    let gavel = Gavel::new(config).await?;
    let result = run(&gavel, command).await;
    gavel.shutdown()?;
    result
}

async fn run(gavel: &Gavel, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Serve { sweep_secs } => serve(gavel, sweep_secs).await?,
        Commands::Route {
            id,
            content,
            score,
            priority,
            tenant,
            force,
        } => {
            let request = GovernanceRequest::new(id, content)
                .with_priority(priority)
                .with_tenant(tenant);
            match force {
                Some(reason) => print_json(&gavel.force_deliberation(request, &reason).await?)?,
                None => print_json(&gavel.submit(request, score).await?)?,
            }
        }
        Commands::Create {
            decision_ref,
            title,
            chain,
            priority,
            tenant,
            requester,
            context,
        } => {
            let mut draft = NewApproval::new(decision_ref, title)
                .with_priority(priority)
                .with_tenant(tenant)
                .with_requester(requester);
            for (key, value) in context {
                draft = draft.with_context(key, value);
            }
            if let Some(chain) = chain {
                draft = draft.with_chain(chain);
            }
            print_json(&gavel.create_approval(draft).await?)?;
        }
        Commands::Approve {
            request_id,
            actor,
            rationale,
        } => {
            let outcome = gavel
                .approve_or_reject(&request_id, &actor, Decision::Approved, rationale.as_deref())
                .await?;
            println!("{:?}", outcome);
        }
        Commands::Reject {
            request_id,
            actor,
            rationale,
        } => {
            let outcome = gavel
                .approve_or_reject(&request_id, &actor, Decision::Rejected, rationale.as_deref())
                .await?;
            println!("{:?}", outcome);
        }
        Commands::Override {
            request_id,
            actor,
            roles,
            decision,
            rationale,
        } => {
            let outcome = gavel
                .emergency_override(&request_id, &actor, &roles, decision, rationale.as_deref())
                .await?;
            println!("{:?}", outcome);
        }
        Commands::Cancel { request_id, actor } => {
            println!("{:?}", gavel.cancel(&request_id, &actor).await?);
        }
        Commands::Status { request_id } => match gavel.approval_status(&request_id).await? {
            Some(request) => print_json(&request)?,
            None => bail!("no approval request '{}'", request_id),
        },
        Commands::History { request_id } => match gavel.approval_history(&request_id).await? {
            Some(history) => print_json(&history)?,
            None => bail!("no approval request '{}'", request_id),
        },
        Commands::Inbox { role } => print_json(&gavel.pending_for_role(&role).await?)?,
        Commands::Vote {
            item_id,
            agent,
            vote,
            reasoning,
            confidence,
        } => {
            let outcome = gavel
                .submit_vote(&item_id, &agent, vote, &reasoning, confidence)
                .await?;
            println!("{:?}", outcome);
        }
        Commands::Item { item_id } => match gavel.item_status(&item_id).await? {
            Some(item) => print_json(&item)?,
            None => bail!("no deliberation item '{}'", item_id),
        },
        Commands::Check => {}
    }
    Ok(())
}

async fn serve(gavel: &Gavel, sweep_secs: u64) -> anyhow::Result<()> {
    info!(
        armed = gavel.approvals().armed_timers(),
        "Gavel serving, press Ctrl-C to stop"
    );
    let mut sweep = tokio::time::interval(Duration::from_secs(sweep_secs.max(1)));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                return Ok(());
            }
            _ = sweep.tick() => {
                match gavel.expire_overdue_items().await {
                    Ok(expired) if !expired.is_empty() => {
                        info!(count = expired.len(), "overdue deliberation items timed out");
                    }
                    Ok(_) => {}
                    Err(err) => warn!(error = %err, "deliberation sweep failed"),
                }
            }
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}
