use relief_sql::config::AppConfig;
use relief_sql::db::MySqlStore;
use relief_sql::execution::ExecutionResult;
use relief_sql::llm::LlmClient;
use relief_sql::security::{check_permission, classify, extract_target_table, referenced_tables, PolicyTable, RoleId};
use relief_sql::{Orchestrator, QueryOutcome, QueryRequest, SchemaDescriptor};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use itertools::Itertools;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "relief-sql")]
#[command(about = "Ask the poverty-alleviation database questions in natural language")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate, check, run and explain SQL for a question
    Ask {
        /// The question in natural language
        question: String,

        /// Role id: poor_household, enterprise, investigator or admin
        #[arg(short, long)]
        role: String,

        /// Label used when addressing the user (defaults to the role's name)
        #[arg(long)]
        role_display: Option<String>,

        /// Print the whole outcome as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run only the permission gate on a SQL statement
    Check {
        sql: String,

        #[arg(short, long)]
        role: String,
    },
    /// Print the schema given to the model
    Schema,
    /// Print which operations each role may run
    Roles,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("relief_sql=info")),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Ask { question, role, role_display, json } => {
            let config = AppConfig::from_env().context("loading configuration")?;
            info!(model = %config.llm.model, "relief-sql starting");

            let model = Arc::new(LlmClient::new(&config.llm)?);
            let store = Arc::new(
                MySqlStore::connect(&config.store)
                    .await
                    .context("connecting to the database")?,
            );
            let schema = Arc::new(SchemaDescriptor::poverty_alleviation());
            let orchestrator = Orchestrator::new(schema, &config, model, store);

            let mut request = QueryRequest::new(question, RoleId::from_id(&role));
            if let Some(label) = role_display {
                request = request.with_role_display(label);
            }
            let outcome = orchestrator.handle(request).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print_outcome(&outcome);
            }
            if outcome.is_error() {
                std::process::exit(1);
            }
        }
        Commands::Check { sql, role } => {
            let role = RoleId::from_id(&role);
            let decision = check_permission(&role, &sql);
            let references = referenced_tables(&sql);

            println!("Operation:    {}", classify(&sql));
            println!("Target table: {}", extract_target_table(&sql).unwrap_or_else(|| "-".to_string()));
            println!("Tables:       {}", references.tables.iter().join(", "));
            println!("Statements:   {}", references.statement_count);
            println!("Role:         {} ({})", role, role.display_name());
            println!("Allowed:      {}", decision.allowed);
            println!("Reason:       {}", decision.reason);
        }
        Commands::Schema => {
            print!("{}", SchemaDescriptor::poverty_alleviation().render());
        }
        Commands::Roles => {
            for role in RoleId::KNOWN.iter() {
                let ops = PolicyTable::allowed_operations(role).iter().join(", ");
                println!("{:<16} {:<16} {}", role.as_str(), role.display_name(), ops);
            }
        }
    }

    Ok(())
}

fn print_outcome(outcome: &QueryOutcome) {
    if let Some(sql) = &outcome.sql_text {
        println!("\n=== SQL ===");
        println!("{}", sql);
    }

    match &outcome.result {
        Some(ExecutionResult::Rows { rows }) => {
            println!("\n=== Result ({} rows) ===", rows.len());
            if let Some(first) = rows.first() {
                println!("{}", first.columns().join(" | "));
            }
            for row in rows {
                println!("{}", row.cells().iter().map(|(_, v)| v.display()).join(" | "));
            }
        }
        Some(result @ ExecutionResult::Affected { .. }) => {
            println!("\n=== Result ===");
            println!("{}", result.summary());
        }
        None => {}
    }

    for warning in &outcome.warnings {
        println!("warning: {}", warning);
    }

    println!("\n=== Report ===");
    println!("{}", outcome.report.body);
}
