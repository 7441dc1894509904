//! Command-line front end for the pipeline coordinator
//!
//! Every subcommand prints one JSON document on stdout; logs go to stderr.
//! Failures print a structured error and exit with status 1.
//!
//! # Usage
//!
//! ```bash
//! # Seed a catalog version and open a session
//! pipeline-coord seed --version pipeline-v1 --session s1
//!
//! # Ask where to go next
//! pipeline-coord route --session s1 --scope g1 --role developer --status done
//!
//! # Custom configuration
//! PIPELINE_DB_PATH=/var/lib/pipeline.db RUST_LOG=debug pipeline-coord stats --session s1
//! ```

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use coordination::events::ReplayBuilder;
use coordination::{
    CoordinationConfig, CoordinationError, NewEvent, PipelineCoordinator, RouteRequest,
    RouteSummary, StateType, StateUpdate, StructuredError,
};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// SQLite database file (overrides PIPELINE_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Definition directory (overrides PIPELINE_DEFINITIONS_DIR)
    #[arg(long, global = true)]
    definitions_dir: Option<PathBuf>,

    /// Per-operation deadline in milliseconds (overrides PIPELINE_OP_TIMEOUT_MS)
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply pending schema migrations
    Migrate,

    /// Seed a routing definition
    Seed {
        /// Catalog version to load
        #[arg(long, conflicts_with_all = ["table", "rules"])]
        version: Option<String>,

        /// Transition table document
        #[arg(long, requires = "rules")]
        table: Option<PathBuf>,

        /// Special rules document
        #[arg(long, requires = "table")]
        rules: Option<PathBuf>,

        /// Record the seed in this session's log
        #[arg(long)]
        session: Option<String>,

        /// Generate a session id and record the seed under it
        #[arg(long, conflicts_with = "session")]
        new_session: bool,
    },

    /// Evaluate and record a routing decision
    Route {
        #[arg(long)]
        session: String,
        #[arg(long)]
        scope: Option<String>,
        #[arg(long)]
        role: String,
        #[arg(long)]
        status: String,
        #[arg(long, default_value = "normal")]
        mode: String,
        /// Report sequence; a repeated sequence returns the recorded decision
        #[arg(long)]
        sequence: Option<u64>,
    },

    /// Append an event
    Record {
        #[arg(long)]
        session: String,
        #[arg(long)]
        scope: Option<String>,
        #[arg(long)]
        event_type: String,
        /// JSON payload
        #[arg(long, default_value = "{}")]
        payload: String,
        #[arg(long, conflicts_with = "sequence")]
        key: Option<String>,
        #[arg(long)]
        sequence: Option<u64>,
    },

    /// Insert or replace a state snapshot
    UpsertState {
        #[arg(long)]
        session: String,
        #[arg(long)]
        scope_type: String,
        #[arg(long)]
        scope: Option<String>,
        #[arg(long)]
        state_type: String,
        #[arg(long, default_value = "{}")]
        payload: String,
    },

    /// Queue a pending work item for batch spawning
    Enqueue {
        #[arg(long)]
        session: String,
        #[arg(long)]
        item: String,
        #[arg(long, default_value = "{}")]
        payload: String,
    },

    /// Mark a scope sensitive
    FlagSensitive {
        #[arg(long)]
        session: String,
        #[arg(long)]
        scope: String,
        /// Clear the flag instead of setting it
        #[arg(long)]
        clear: bool,
    },

    /// Show state snapshots of a session
    State {
        #[arg(long)]
        session: String,
        #[arg(long)]
        scope_type: Option<String>,
    },

    /// Show events of a session
    Events {
        #[arg(long)]
        session: String,
        #[arg(long)]
        scope: Option<String>,
        #[arg(long)]
        event_type: Option<String>,
    },

    /// Aggregate event statistics for a session
    Stats {
        #[arg(long)]
        session: String,
    },

    /// List recorded sessions, newest first
    Sessions,

    /// Delete a session and everything recorded under it
    DeleteSession {
        #[arg(long)]
        session: String,
    },
}

fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(args) {
        Ok(output) => print_json(&output),
        Err(err) => {
            let structured = match err.downcast_ref::<CoordinationError>() {
                Some(coord_err) => coord_err.to_structured(),
                None => StructuredError::new(
                    "INVALID_INPUT",
                    format!("{err:#}"),
                    "Check the command arguments; see --help",
                ),
            };
            tracing::error!(code = %structured.code, "{}", structured.message);
            print_json(&serde_json::to_value(&structured).unwrap_or_else(|_| json!({})));
            std::process::exit(1);
        }
    }
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(_) => println!("{value}"),
    }
}

fn parse_payload(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("payload is not valid JSON: {raw}"))
}

fn run(args: Args) -> Result<Value> {
    let mut config = CoordinationConfig::from_env();
    if let Some(db) = args.db {
        config.db_path = db;
    }
    if let Some(dir) = args.definitions_dir {
        config.definitions_dir = dir;
    }
    if let Some(ms) = args.timeout_ms {
        config.op_timeout_ms = ms;
    }
    let deadline = || Some(Instant::now() + Duration::from_millis(config.op_timeout_ms));

    let coord = PipelineCoordinator::open(&config)?;

    let output = match args.command {
        Command::Migrate => {
            let report = coord.store().migrate().map_err(CoordinationError::from)?;
            serde_json::to_value(report)?
        }

        Command::Seed {
            version,
            table,
            rules,
            session,
            new_session,
        } => {
            let session = session.or_else(|| new_session.then(PipelineCoordinator::new_session_id));
            let report = match (version, table, rules, session.as_deref()) {
                (Some(version), _, _, Some(session)) => coord.start_session(session, &version)?,
                (Some(version), _, _, None) => coord.seed(&version)?,
                (None, Some(table), Some(rules), session) => {
                    let report = coord.seed_from(&table, &rules)?;
                    if let Some(session) = session {
                        coord
                            .store()
                            .ensure_session(session, Some(&report.definition_version))
                            .map_err(CoordinationError::from)?;
                    }
                    report
                }
                _ => bail!("seed needs --version, or both --table and --rules"),
            };
            json!({ "session_id": session, "seed": report })
        }

        Command::Route {
            session,
            scope,
            role,
            status,
            mode,
            sequence,
        } => {
            let mut request = RouteRequest::new(session, scope.as_deref(), role, status).with_mode(mode);
            if let Some(sequence) = sequence {
                request = request.with_sequence(sequence);
            }
            let report = coord.route_with_deadline(&request, deadline())?;
            serde_json::to_value(RouteSummary::from(&report))?
        }

        Command::Record {
            session,
            scope,
            event_type,
            payload,
            key,
            sequence,
        } => {
            let mut event = NewEvent::new(session, scope.as_deref(), event_type, parse_payload(&payload)?);
            if let Some(key) = key {
                event = event.with_idempotency_key(key);
            }
            if let Some(sequence) = sequence {
                event = event.sequenced(sequence);
            }
            serde_json::to_value(coord.record(&event, deadline())?)?
        }

        Command::UpsertState {
            session,
            scope_type,
            scope,
            state_type,
            payload,
        } => {
            let update = StateUpdate::new(
                session,
                scope_type,
                scope.as_deref(),
                StateType::from(state_type),
                parse_payload(&payload)?,
            );
            coord.upsert_state(&update, deadline())?;
            json!({ "ok": true })
        }

        Command::Enqueue {
            session,
            item,
            payload,
        } => {
            coord.enqueue_work_item(&session, &item, parse_payload(&payload)?)?;
            json!({ "ok": true, "item": item })
        }

        Command::FlagSensitive {
            session,
            scope,
            clear,
        } => serde_json::to_value(coord.flag_sensitive(&session, &scope, !clear)?)?,

        Command::State {
            session,
            scope_type,
        } => {
            let states = coord
                .store()
                .list_states(&session, scope_type.as_deref())
                .map_err(CoordinationError::from)?;
            serde_json::to_value(states)?
        }

        Command::Events {
            session,
            scope,
            event_type,
        } => {
            let mut replay = ReplayBuilder::new(coord.store().clone(), &session);
            if let Some(scope) = scope.as_deref() {
                replay = replay.scope(scope);
            }
            if let Some(event_type) = event_type.as_deref() {
                replay = replay.event_types(vec![event_type]);
            }
            serde_json::to_value(replay.collect()?)?
        }

        Command::Stats { session } => serde_json::to_value(coord.history().stats(&session)?)?,

        Command::Sessions => {
            let sessions = coord.store().list_sessions().map_err(CoordinationError::from)?;
            serde_json::to_value(sessions)?
        }

        Command::DeleteSession { session } => {
            let deleted = coord.delete_session(&session)?;
            json!({ "session_id": session, "deleted": deleted })
        }
    };

    Ok(output)
}
