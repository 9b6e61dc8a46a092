use std::collections::BTreeMap;
use std::fmt::Write as _;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use session_keeper::config::StoreConfig;
use session_keeper::credentials::{key_kind, CredentialStore};

#[derive(Parser)]
#[command(name = "session-cli")]
#[command(about = "Inspect and reset a session credential database", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "./data/session/auth.db")]
    db: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List stored keys
    Keys {
        /// Only keys of this kind (e.g. "session", "pre-key")
        #[arg(short, long)]
        kind: Option<String>,
    },
    /// Show one record's metadata and payload
    Show { key: String },
    /// Count records per kind
    Stats,
    /// Remove everything except the identity record
    ClearSession,
    /// Remove every record, identity included
    Reset,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = StoreConfig {
        db_path: cli.db.clone(),
        ..StoreConfig::default()
    };
    let store = CredentialStore::open(&config)?;

    let output = match cli.command {
        Commands::Keys { kind } => {
            let keys = store.keys(kind.as_deref()).await?;
            json!({ "count": keys.len(), "keys": keys })
        }
        Commands::Show { key } => match store.get_record(&key).await? {
            Some(record) => json!({
                "key": record.key,
                "kind": record.kind(),
                "updated_at": record.updated_at,
                "size": record.value.len(),
                "value_hex": to_hex(&record.value),
            }),
            None => {
                eprintln!("Error: no record for key '{}'", key);
                store.close().await?;
                std::process::exit(1);
            }
        },
        Commands::Stats => {
            let keys = store.keys(None).await?;
            let mut by_kind: BTreeMap<&str, usize> = BTreeMap::new();
            for key in &keys {
                *by_kind.entry(key_kind(key)).or_default() += 1;
            }
            json!({ "db_path": cli.db, "records": keys.len(), "by_kind": by_kind })
        }
        Commands::ClearSession => {
            let removed = store.clear_session().await?;
            json!({ "removed": removed, "kept": ["creds"] })
        }
        Commands::Reset => {
            let removed = store.clear().await?;
            json!({ "removed": removed })
        }
    };

    store.close().await?;
    print_json(&output)?;
    Ok(())
}

fn print_json(value: &Value) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}
