//! CLI binary for managing a lead pipeline stored in a JSON snapshot.

mod console;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;

use leadflow_pipeline::{
    format_duration, load_snapshot, save_snapshot, AbandonDecision, LeadPatch, MemoryRoster,
    MemoryStore, NewLead, PipelineConfig, PipelineRepository, PipelineStats, Severity,
    StoreSnapshot,
};
use leadflow_types::{
    AttemptDraft, AttemptOutcome, CardId, ContactChannel, DisqualificationReason, LeadOutcome,
    OriginChannel, PipelineCard, Representative, Stage, TaskId,
};

use crate::console::ConsoleDecision;

#[derive(Parser)]
#[command(name = "leadflow", version, about = "Lead pipeline: distribution, contact log and outcomes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Snapshot file holding leads and representatives
    #[arg(short, long, global = true, default_value = "leadflow.json")]
    data: PathBuf,

    /// Pipeline configuration (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty snapshot
    Init {
        /// Overwrite an existing snapshot
        #[arg(long)]
        force: bool,
    },

    /// Add or replace a sales representative
    RepAdd {
        id: String,

        /// Display name (defaults to the id)
        #[arg(long)]
        name: Option<String>,

        /// Lower ranks are preferred when distributing
        #[arg(long, default_value = "1")]
        rank: u32,

        #[arg(long, default_value = "20")]
        capacity: u32,

        /// Product tags this representative specializes in
        #[arg(long = "specialty")]
        specialties: Vec<String>,

        #[arg(long)]
        inactive: bool,
    },

    /// Register a new lead and assign it
    Add {
        name: String,

        #[arg(long)]
        phone: Option<String>,

        #[arg(long)]
        email: Option<String>,

        #[arg(long)]
        company: Option<String>,

        #[arg(long = "product")]
        products: Vec<String>,

        /// website, referral, event, cold_call, social_media, partner or other
        #[arg(long, default_value = "other", value_parser = parse_snake::<OriginChannel>)]
        origin: OriginChannel,

        #[arg(long)]
        origin_detail: Option<String>,

        /// Who is registering the lead
        #[arg(long, default_value = "cli")]
        by: String,
    },

    /// List cards
    List {
        /// Only cards in this stage
        #[arg(long)]
        stage: Option<Stage>,

        #[arg(long)]
        json: bool,
    },

    /// Show one card in detail
    Show {
        /// Card id or unique id prefix
        card: String,

        #[arg(long)]
        json: bool,
    },

    /// Reassign a card to another representative
    Assign { card: String, representative: String },

    /// Move a card to another stage
    Stage {
        card: String,

        /// new_lead, call_1, call_2, message, recontact or outcome
        stage: Stage,

        /// Abandon instead of prompting when entering the outcome stage
        #[arg(long)]
        no_prompt: bool,
    },

    /// Log a contact attempt
    Attempt {
        card: String,

        /// phone, whatsapp, email, sms or in_person
        #[arg(long, value_parser = parse_snake::<ContactChannel>)]
        channel: ContactChannel,

        /// success, no_answer or failure
        #[arg(long, value_parser = parse_snake::<AttemptOutcome>)]
        outcome: AttemptOutcome,

        /// RFC 3339 timestamp (defaults to now)
        #[arg(long, value_parser = parse_timestamp)]
        at: Option<DateTime<Utc>>,

        /// Representative who made the attempt (defaults to the owner)
        #[arg(long)]
        by: Option<String>,

        #[arg(long)]
        duration_secs: Option<u32>,

        #[arg(long)]
        notes: Option<String>,

        #[arg(long)]
        next_action: Option<String>,

        #[arg(long, value_parser = parse_timestamp)]
        next_due: Option<DateTime<Utc>>,
    },

    /// Resolve a card as qualified for downstream pipelines
    Qualify {
        card: String,

        #[arg(required = true)]
        pipelines: Vec<String>,
    },

    /// Resolve a card as disqualified
    Disqualify {
        card: String,

        #[arg(long)]
        reason: DisqualificationReason,

        #[arg(long)]
        detail: Option<String>,
    },

    /// Record a downstream win for a qualified card
    Win { card: String },

    /// Complete a follow-up task
    TaskComplete {
        /// Task id or unique id prefix
        task: String,
    },

    /// Cancel a follow-up task
    TaskCancel { task: String },

    /// Hand a task to another representative
    TaskRedistribute {
        task: String,

        /// Target representative (defaults to the best available)
        #[arg(long)]
        to: Option<String>,
    },

    /// Flag open tasks that are past due
    Sweep,

    /// Show pipeline statistics
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Lint every stored card
    Check,

    /// Recount representative load from the stored cards
    Reconcile,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    if let Commands::Init { force } = cli.command {
        return cmd_init(&cli.data, force).await;
    }

    let session = Session::open(&cli.data, config).await?;
    let repo = &session.repo;

    match cli.command {
        Commands::Init { .. } => unreachable!("handled above"),
        Commands::RepAdd {
            id,
            name,
            rank,
            capacity,
            specialties,
            inactive,
        } => {
            let mut rep = Representative::new(id.clone(), rank, capacity);
            if let Some(name) = name {
                rep.name = name;
            }
            for tag in specialties {
                rep = rep.with_specialty(tag);
            }
            if inactive {
                rep = rep.inactive();
            }
            session.roster.upsert(rep).await;
            session.save().await?;
            println!("Representative {id} saved");
        }
        Commands::Add {
            name,
            phone,
            email,
            company,
            products,
            origin,
            origin_detail,
            by,
        } => {
            let mut new = NewLead::new(name, by).with_origin(origin, origin_detail);
            if let Some(phone) = phone {
                new = new.with_phone(phone);
            }
            if let Some(email) = email {
                new = new.with_email(email);
            }
            if let Some(company) = company {
                new = new.with_company(company);
            }
            for product in products {
                new = new.with_product(product);
            }
            let card = repo.create(new).await?;
            session.save().await?;
            println!(
                "Created {} ({}) assigned to {}",
                card.lead.name,
                card.id(),
                card.assigned_to.as_deref().unwrap_or("nobody")
            );
        }
        Commands::List { stage, json } => {
            let mut rows = repo.list_rows().await?;
            if let Some(stage) = stage {
                rows.retain(|row| row.stage == stage);
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else if rows.is_empty() {
                println!("No cards");
            } else {
                for row in &rows {
                    let id = row.id.to_string();
                    println!(
                        "{}  {:<10} {:<12} {:<10} {:<24} {}",
                        &id[..8],
                        row.stage.label(),
                        row.qualification.as_str(),
                        row.assigned_to.as_deref().unwrap_or("-"),
                        row.name,
                        format_duration(chrono::Duration::seconds(row.secs_in_stage)),
                    );
                }
            }
        }
        Commands::Show { card, json } => {
            let id = resolve_card(repo, &card).await?;
            let card = repo.get_by_id(id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&card)?);
            } else {
                print_card(&card, repo.now());
            }
        }
        Commands::Assign {
            card,
            representative,
        } => {
            let id = resolve_card(repo, &card).await?;
            let patch = LeadPatch {
                assigned_to: Some(representative),
                ..LeadPatch::default()
            };
            let card = repo.update(id, patch, None).await?;
            session.save().await?;
            println!(
                "{} is now assigned to {}",
                card.lead.name,
                card.assigned_to.as_deref().unwrap_or("nobody")
            );
        }
        Commands::Stage {
            card,
            stage,
            no_prompt,
        } => {
            let id = resolve_card(repo, &card).await?;
            let card = if no_prompt {
                repo.change_stage_with(id, stage, &AbandonDecision).await?
            } else {
                repo.change_stage_with(id, stage, &ConsoleDecision).await?
            };
            session.save().await?;
            println!("{} is in {}", card.lead.name, card.stage.label());
        }
        Commands::Attempt {
            card,
            channel,
            outcome,
            at,
            by,
            duration_secs,
            notes,
            next_action,
            next_due,
        } => {
            let id = resolve_card(repo, &card).await?;
            let mut draft = AttemptDraft::new(channel, outcome, at.unwrap_or_else(|| repo.now()));
            draft.duration_secs = duration_secs;
            if let Some(by) = by {
                draft = draft.by(by);
            }
            if let Some(notes) = notes {
                draft = draft.with_notes(notes);
            }
            if let Some(action) = next_action {
                draft = draft.with_next_action(action, next_due);
            }
            let attempt = repo.record_attempt(id, draft).await?;
            session.save().await?;
            println!(
                "Logged {} attempt ({}) by {}",
                attempt.channel, attempt.outcome, attempt.representative
            );
        }
        Commands::Qualify { card, pipelines } => {
            let id = resolve_card(repo, &card).await?;
            let card = repo.qualify(id, pipelines).await?;
            session.save().await?;
            println!("{} qualified", card.lead.name);
        }
        Commands::Disqualify {
            card,
            reason,
            detail,
        } => {
            let id = resolve_card(repo, &card).await?;
            let card = repo.disqualify(id, reason, detail).await?;
            session.save().await?;
            println!("{} disqualified ({})", card.lead.name, reason);
        }
        Commands::Win { card } => {
            let id = resolve_card(repo, &card).await?;
            let card = repo.record_win(id).await?;
            session.save().await?;
            println!("{} won", card.lead.name);
        }
        Commands::TaskComplete { task } => {
            let id = resolve_task(repo, &task).await?;
            let task = repo.complete_task(id).await?;
            session.save().await?;
            println!("Task '{}' completed", task.title);
        }
        Commands::TaskCancel { task } => {
            let id = resolve_task(repo, &task).await?;
            let task = repo.cancel_task(id).await?;
            session.save().await?;
            println!("Task '{}' cancelled", task.title);
        }
        Commands::TaskRedistribute { task, to } => {
            let id = resolve_task(repo, &task).await?;
            let task = repo.redistribute_task(id, to).await?;
            session.save().await?;
            println!(
                "Task '{}' handed to {} ({} redistributions left)",
                task.title,
                task.assigned_to,
                task.redistributions_left()
            );
        }
        Commands::Sweep => {
            let flagged = repo.refresh_overdue_tasks().await?;
            session.save().await?;
            println!("{flagged} task(s) flagged overdue");
        }
        Commands::Stats { json } => {
            let stats = repo.statistics().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_stats(&stats);
            }
        }
        Commands::Check => {
            cmd_check(repo).await?;
        }
        Commands::Reconcile => {
            let loads = repo.reconcile_load().await?;
            session.save().await?;
            for (rep, load) in &loads {
                println!("  {rep}: {load} open lead(s)");
            }
        }
    }

    Ok(())
}

/// Repository over a snapshot loaded into memory.
struct Session {
    path: PathBuf,
    store: Arc<MemoryStore>,
    roster: Arc<MemoryRoster>,
    repo: PipelineRepository,
}

impl Session {
    async fn open(path: &Path, config: PipelineConfig) -> anyhow::Result<Self> {
        let snapshot = load_snapshot(path)
            .await?
            .ok_or_else(|| anyhow!("no snapshot at {}; run `leadflow init` first", path.display()))?;
        let (store, roster) = snapshot.restore();
        let store = Arc::new(store);
        let roster = Arc::new(roster);
        let repo = PipelineRepository::new(store.clone(), roster.clone(), config)?;
        Ok(Self {
            path: path.to_path_buf(),
            store,
            roster,
            repo,
        })
    }

    async fn save(&self) -> anyhow::Result<()> {
        let snapshot = StoreSnapshot::capture(&self.store, &self.roster, Utc::now()).await;
        save_snapshot(&snapshot, &self.path)
            .await
            .with_context(|| format!("failed to save {}", self.path.display()))
    }
}

async fn cmd_init(path: &Path, force: bool) -> anyhow::Result<()> {
    if !force && tokio::fs::try_exists(path).await? {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    save_snapshot(&StoreSnapshot::empty(Utc::now()), path).await?;
    println!("Initialized {}", path.display());
    Ok(())
}

async fn cmd_check(repo: &PipelineRepository) -> anyhow::Result<()> {
    let checks = repo.check().await?;
    if checks.iter().all(|c| c.is_clean()) {
        println!("All {} card(s) are valid", checks.len());
        return Ok(());
    }

    let mut has_error = false;
    for check in checks.iter().filter(|c| !c.is_clean()) {
        println!("{} ({})", check.name, check.id);
        if let Some(err) = &check.error {
            has_error = true;
            println!("  [ERROR] decode: {err}");
        }
        for diag in &check.diagnostics {
            let severity = match diag.severity {
                Severity::Error => {
                    has_error = true;
                    "ERROR"
                }
                Severity::Warning => "WARN",
            };
            println!("  [{}] {}: {}", severity, diag.rule, diag.message);
        }
    }

    if has_error {
        std::process::exit(1);
    }
    Ok(())
}

fn print_card(card: &PipelineCard, now: DateTime<Utc>) {
    let lead = &card.lead;
    println!("{} ({})", lead.name, card.id());
    if let Some(company) = &lead.company {
        println!("Company: {company}");
    }
    if let Some(phone) = &lead.phone {
        println!("Phone: {phone}");
    }
    if let Some(email) = &lead.email {
        println!("Email: {email}");
    }
    if !lead.products.is_empty() {
        let products: Vec<&str> = lead.products.iter().map(String::as_str).collect();
        println!("Products: {}", products.join(", "));
    }
    println!("Stage: {} ({})", card.stage.label(), card.qualification.as_str());
    println!("Owner: {}", card.assigned_to.as_deref().unwrap_or("-"));

    match &card.outcome {
        Some(LeadOutcome::Qualified {
            pipelines, won_at, ..
        }) => {
            println!("Qualified for: {}", pipelines.join(", "));
            if let Some(won_at) = won_at {
                println!("Won: {}", won_at.to_rfc3339());
            }
        }
        Some(LeadOutcome::Disqualified { reason, detail, .. }) => match detail {
            Some(detail) => println!("Disqualified: {} ({})", reason, detail),
            None => println!("Disqualified: {}", reason),
        },
        None => {}
    }

    println!("\nHistory:");
    for entry in &card.history {
        let marker = if entry.is_open() { "*" } else { " " };
        println!(
            " {} {:<10} {:<10} {}",
            marker,
            entry.stage.label(),
            entry.representative.as_deref().unwrap_or("-"),
            format_duration(entry.elapsed(now)),
        );
    }

    if !card.attempts.is_empty() {
        println!("\nAttempts:");
        for attempt in &card.attempts {
            println!(
                "  {}  {:<9} {:<9} {}",
                attempt.at.format("%Y-%m-%d %H:%M"),
                attempt.channel.as_str(),
                attempt.outcome.as_str(),
                attempt.representative
            );
        }
    }

    if !card.tasks.is_empty() {
        println!("\nTasks:");
        for task in &card.tasks {
            let id = task.id.to_string();
            println!(
                "  {}  {:<9} due {}  {} [{}]",
                &id[..8],
                task.status.as_str(),
                task.due_at.format("%Y-%m-%d %H:%M"),
                task.title,
                task.assigned_to
            );
        }
    }
}

fn print_stats(stats: &PipelineStats) {
    println!("Cards: {}", stats.total);
    for (stage, count) in &stats.by_stage {
        println!("  {:<10} {}", stage.label(), count);
    }
    println!("Contacted: {}  Won: {}", stats.contacted, stats.won);
    println!(
        "Funnel: new->contacted {:.0}%, contacted->qualified {:.0}%, qualified->won {:.0}%, overall {:.0}%",
        stats.funnel.new_to_contacted * 100.0,
        stats.funnel.contacted_to_qualified * 100.0,
        stats.funnel.qualified_to_won * 100.0,
        stats.funnel.overall * 100.0,
    );
    println!(
        "Average time in pipeline: {}",
        format_duration(chrono::Duration::seconds(stats.avg_time_in_pipeline_secs as i64))
    );
    println!(
        "Stale new leads: {}  In recontact: {}",
        stats.stale_new_leads, stats.in_recontact
    );

    if !stats.workload.is_empty() {
        println!("\nWorkload:");
        for rep in &stats.workload {
            println!(
                "  {:<12} {} total, {} qualified, {} lost",
                rep.representative, rep.total, rep.qualified, rep.lost
            );
        }
    }

    let reasons = &stats.disqualification_reasons;
    if reasons.total() > 0 {
        println!("\nDisqualification reasons:");
        for entry in &reasons.top {
            println!("  {:<20} {}", entry.reason.as_str(), entry.count);
        }
        if let Some(other) = &reasons.other {
            println!("  {:<20} {}", "other reasons", other.count);
        }
    }
}

/// Accept a full UUID or a prefix matching exactly one card.
async fn resolve_card(repo: &PipelineRepository, key: &str) -> anyhow::Result<CardId> {
    if let Ok(id) = key.parse::<uuid::Uuid>() {
        return Ok(id);
    }
    let cards = repo.get_all().await?;
    let matches: Vec<CardId> = cards
        .iter()
        .map(|c| c.id())
        .filter(|id| id.to_string().starts_with(key))
        .collect();
    single_match(matches, "card", key)
}

async fn resolve_task(repo: &PipelineRepository, key: &str) -> anyhow::Result<TaskId> {
    if let Ok(id) = key.parse::<uuid::Uuid>() {
        return Ok(id);
    }
    let cards = repo.get_all().await?;
    let matches: Vec<TaskId> = cards
        .iter()
        .flat_map(|c| c.tasks.iter().map(|t| t.id))
        .filter(|id| id.to_string().starts_with(key))
        .collect();
    single_match(matches, "task", key)
}

fn single_match<T: Copy>(matches: Vec<T>, what: &str, key: &str) -> anyhow::Result<T> {
    match matches.as_slice() {
        [id] => Ok(*id),
        [] => bail!("no {what} matches '{key}'"),
        many => bail!("'{key}' matches {} {what}s; use a longer prefix", many.len()),
    }
}

/// Parse a snake_case enum name through its serde representation.
fn parse_snake<T: DeserializeOwned>(s: &str) -> Result<T, String> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|_| format!("unknown value '{s}'"))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("invalid timestamp '{s}': {e}"))
}
