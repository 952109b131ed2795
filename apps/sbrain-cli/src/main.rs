use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};

use sbrain_core::{config_schema_json, Config, SecondBrain, ShareScope, ToggleOutcome};

#[derive(Parser)]
#[command(name = "sbrain", version, about = "Second Brain command-line client")]
struct Cli {
    /// API root, e.g. http://localhost:3000/api/v1
    #[arg(long, env = "SBRAIN_BASE_URL", global = true)]
    base: Option<String>,
    #[command(flatten)]
    creds: Credentials,
    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Credentials {
    /// Sign in with this email before running the command
    #[arg(long, env = "SBRAIN_EMAIL", global = true)]
    email: Option<String>,
    #[arg(long, env = "SBRAIN_PASSWORD", global = true, hide_env_values = true)]
    password: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show share status for the whole brain or one piece
    Status {
        #[arg(long)]
        piece: Option<String>,
    },
    /// Flip sharing on or off
    Toggle {
        #[command(subcommand)]
        target: Target,
    },
    /// List saved content
    Contents,
    /// Show the signed-in user
    Me,
    /// Open a share link
    Shared {
        #[command(subcommand)]
        target: SharedTarget,
    },
    /// Print the config JSON schema
    Schema,
}

#[derive(Subcommand)]
enum Target {
    Brain,
    Piece { id: String },
}

#[derive(Subcommand)]
enum SharedTarget {
    Brain { hash: String },
    Piece { hash: String },
}

#[tokio::main]
async fn main() {
    sbrain_otel::init_with_default("warn");
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    if let Commands::Schema = cli.command {
        return print_json(&config_schema_json(), cli.pretty);
    }

    let mut cfg = Config::from_env().context("loading client config")?;
    if let Some(base) = cli.base {
        cfg.http.base_url = base;
    }
    let brain = SecondBrain::connect(&cfg).context("building http client")?;

    if let (Some(email), Some(password)) = (&cli.creds.email, &cli.creds.password) {
        brain
            .api
            .login(email, password)
            .await
            .with_context(|| format!("signing in as {email}"))?;
    }

    let out = match cli.command {
        Commands::Status { piece: None } => {
            serde_json::to_value(brain.api.brain_share_status().await?)?
        }
        Commands::Status { piece: Some(id) } => {
            serde_json::to_value(brain.api.piece_share_status(&id).await?)?
        }
        Commands::Toggle { target } => {
            let scope = match target {
                Target::Brain => ShareScope::Brain,
                Target::Piece { id } => ShareScope::piece(id),
            };
            // The toggle flips what is cached, so load the current status first.
            match &scope {
                ShareScope::Brain => {
                    brain.api.brain_share_status().await?;
                }
                ShareScope::Piece(id) => {
                    brain.api.piece_share_status(id).await?;
                    brain.api.user_contents().await?;
                }
            }
            let outcome = brain
                .shares
                .toggle(scope.clone())
                .await
                .with_context(|| format!("toggling sharing for {scope}"))?;
            outcome_json(&scope, outcome)
        }
        Commands::Contents => serde_json::to_value(brain.api.user_contents().await?)?,
        Commands::Me => serde_json::to_value(brain.api.me().await?)?,
        Commands::Shared {
            target: SharedTarget::Brain { hash },
        } => serde_json::to_value(brain.api.shared_brain(&hash).await?)?,
        Commands::Shared {
            target: SharedTarget::Piece { hash },
        } => serde_json::to_value(brain.api.shared_piece(&hash).await?)?,
        Commands::Schema => config_schema_json(),
    };
    print_json(&out, cli.pretty)
}

fn outcome_json(scope: &ShareScope, outcome: ToggleOutcome) -> Value {
    match outcome {
        ToggleOutcome::Committed {
            is_sharing,
            message,
        } => json!({
            "scope": scope.to_string(),
            "status": "committed",
            "isSharing": is_sharing,
            "message": message,
        }),
        ToggleOutcome::Skipped(reason) => json!({
            "scope": scope.to_string(),
            "status": "skipped",
            "reason": format!("{reason:?}"),
        }),
    }
}

fn print_json(v: &Value, pretty: bool) -> Result<()> {
    if pretty {
        println!("{}", serde_json::to_string_pretty(v)?);
    } else {
        println!("{v}");
    }
    Ok(())
}
