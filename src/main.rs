//! atrepo CLI - Command line interface for atrepo
//!
//! Each invocation opens the store file, runs one operation and prints the
//! result as JSON on stdout. Logs go to stderr.

use atrepo::crypto::public_key_hex;
use atrepo::model::path::validate_did;
use atrepo::{Cid, Commit, Config, DiffEntry, FileStore, Keyring, RecordView, Repository, Value};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "atrepo")]
#[command(about = "A content-addressed, signed record repository")]
#[command(version)]
struct Cli {
    /// Path to the store file
    #[arg(short, long)]
    store: Option<PathBuf>,

    /// Path to the keyring file
    #[arg(short, long)]
    keyring: Option<PathBuf>,

    /// Config file (defaults to ~/.config/atrepo/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level, used when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,

    /// Output format
    #[arg(short, long, default_value = "json")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Json,
    Pretty,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new store
    Init,

    /// Generate a signing key for a DID
    Keygen {
        /// The DID to generate a key for
        did: String,
    },

    // === Record Commands ===
    /// Create a record (fails if it exists)
    Create {
        did: String,
        collection: String,
        /// Record value as JSON
        value: String,
        /// Record key (a TID is generated if omitted)
        #[arg(short, long)]
        rkey: Option<String>,
    },

    /// Get a record
    Get {
        did: String,
        collection: String,
        rkey: String,
    },

    /// Create or replace a record
    Put {
        did: String,
        collection: String,
        rkey: String,
        /// Record value as JSON
        value: String,
    },

    /// Delete a record
    Delete {
        did: String,
        collection: String,
        rkey: String,
    },

    /// List the records of a collection
    List { did: String, collection: String },

    // === Commit Commands ===
    /// Show commit history
    Log {
        did: String,
        /// Maximum number of commits to show
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Verify the signature of the current commit
    Verify { did: String },

    /// Show record changes between two commits
    Diff {
        did: String,
        /// Commit CID, "HEAD" or "HEAD~n"
        #[arg(default_value = "HEAD~1")]
        from: String,
        /// Commit CID, "HEAD" or "HEAD~n"
        #[arg(default_value = "HEAD")]
        to: String,
    },
}

/// Resolved file locations
struct Paths {
    store: PathBuf,
    keyring: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    let level = cli.log_level.clone().unwrap_or(config.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("atrepo={}", level))),
        )
        .with_writer(std::io::stderr)
        .init();

    let paths = Paths {
        store: cli.store.clone().unwrap_or(config.store_path),
        keyring: cli.keyring.clone().unwrap_or(config.keyring_path),
    };

    if let Err(err) = run(&cli, &paths) {
        // Library errors are reported as JSON like any other result
        if let Some(e) = err.downcast_ref::<atrepo::Error>() {
            output(
                &cli.format,
                &serde_json::json!({
                    "error": error_kind(e),
                    "message": e.to_string()
                }),
            )?;
            std::process::exit(1);
        }
        return Err(err);
    }

    Ok(())
}

fn run(cli: &Cli, paths: &Paths) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Init => {
            if paths.store.exists() {
                anyhow::bail!("{} already exists", paths.store.display());
            }
            let store = FileStore::create(&paths.store)?;
            store.sync()?;
            output(
                &cli.format,
                &serde_json::json!({
                    "status": "ok",
                    "message": format!("Created store at {}", paths.store.display())
                }),
            )?;
        }

        Commands::Keygen { did } => {
            validate_did(did)?;
            let keyring = Keyring::load(&paths.keyring)?;
            let public = keyring.generate(did)?;
            keyring.save()?;
            output(
                &cli.format,
                &serde_json::json!({
                    "did": did,
                    "public_key": public_key_hex(&public)
                }),
            )?;
        }

        Commands::Create {
            did,
            collection,
            value,
            rkey,
        } => {
            let repo = open_repo(paths)?;
            let value = parse_value(value)?;
            let written = repo.create_record(did, collection, rkey.as_deref(), &value)?;
            repo.flush()?;
            output(
                &cli.format,
                &serde_json::json!({
                    "uri": written.uri,
                    "cid": written.cid,
                    "commit": written.commit_cid,
                    "rev": written.commit.rev
                }),
            )?;
        }

        Commands::Get {
            did,
            collection,
            rkey,
        } => {
            let repo = open_repo(paths)?;
            let record = repo.get_record(did, collection, rkey)?;
            output(&cli.format, &record_json(&record))?;
        }

        Commands::Put {
            did,
            collection,
            rkey,
            value,
        } => {
            let repo = open_repo(paths)?;
            let value = parse_value(value)?;
            let written = repo.put_record(did, collection, rkey, &value)?;
            repo.flush()?;
            output(
                &cli.format,
                &serde_json::json!({
                    "uri": written.uri,
                    "cid": written.cid,
                    "commit": written.commit_cid,
                    "rev": written.commit.rev
                }),
            )?;
        }

        Commands::Delete {
            did,
            collection,
            rkey,
        } => {
            let repo = open_repo(paths)?;
            let (commit_cid, commit) = repo.delete_record(did, collection, rkey)?;
            repo.flush()?;
            output(
                &cli.format,
                &serde_json::json!({
                    "status": "deleted",
                    "uri": format!("at://{}/{}/{}", did, collection, rkey),
                    "commit": commit_cid,
                    "rev": commit.rev
                }),
            )?;
        }

        Commands::List { did, collection } => {
            let repo = open_repo(paths)?;
            let records = repo.list_records(did, collection)?;
            let json: Vec<_> = records.iter().map(record_json).collect();
            output(
                &cli.format,
                &serde_json::json!({
                    "records": json,
                    "count": json.len()
                }),
            )?;
        }

        Commands::Log { did, limit } => {
            let repo = open_repo(paths)?;
            let history = repo.log(did, *limit)?;
            let json: Vec<_> = history
                .iter()
                .map(|(cid, commit)| commit_json(cid, commit))
                .collect();
            output(&cli.format, &serde_json::json!({ "commits": json }))?;
        }

        Commands::Verify { did } => {
            let repo = open_repo(paths)?;
            let (cid, commit) = repo.verify_head(did)?;
            output(
                &cli.format,
                &serde_json::json!({
                    "valid": true,
                    "did": did,
                    "commit": cid,
                    "rev": commit.rev
                }),
            )?;
        }

        Commands::Diff { did, from, to } => {
            let repo = open_repo(paths)?;
            let history = repo.log(did, None)?;
            let from_cid = resolve_ref(from, &history)?;
            let to_cid = resolve_ref(to, &history)?;
            let diff = repo.diff_commits(&from_cid, &to_cid)?;

            let entries: Vec<_> = diff
                .entries
                .iter()
                .map(|e| match e {
                    DiffEntry::Added { key, new_cid } => serde_json::json!({
                        "type": "added",
                        "key": key,
                        "new": new_cid
                    }),
                    DiffEntry::Removed { key, old_cid } => serde_json::json!({
                        "type": "removed",
                        "key": key,
                        "old": old_cid
                    }),
                    DiffEntry::Modified {
                        key,
                        old_cid,
                        new_cid,
                    } => serde_json::json!({
                        "type": "modified",
                        "key": key,
                        "old": old_cid,
                        "new": new_cid
                    }),
                })
                .collect();

            output(
                &cli.format,
                &serde_json::json!({
                    "from": from_cid,
                    "to": to_cid,
                    "added": diff.added_count(),
                    "removed": diff.removed_count(),
                    "modified": diff.modified_count(),
                    "entries": entries
                }),
            )?;
        }
    }

    Ok(())
}

fn open_repo(paths: &Paths) -> anyhow::Result<Repository<FileStore>> {
    let store = FileStore::open_or_create(&paths.store)?;
    let keyring = Keyring::load(&paths.keyring)?;
    Ok(Repository::new(store, keyring))
}

fn parse_value(json: &str) -> anyhow::Result<Value> {
    let json: serde_json::Value = serde_json::from_str(json)?;
    Ok(Value::from_json(&json)?)
}

fn output(format: &OutputFormat, value: &serde_json::Value) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(value)?),
        OutputFormat::Pretty => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}

fn record_json(record: &RecordView) -> serde_json::Value {
    serde_json::json!({
        "uri": record.uri,
        "cid": record.cid,
        "value": record.value.to_json()
    })
}

fn commit_json(cid: &Cid, commit: &Commit) -> serde_json::Value {
    serde_json::json!({
        "cid": cid,
        "did": commit.did,
        "rev": commit.rev,
        "data": commit.data,
        "prev": commit.prev,
        "sig": hex::encode(&commit.sig)
    })
}

fn error_kind(err: &atrepo::Error) -> &'static str {
    use atrepo::Error::*;
    match err {
        NotFound(_) => "not_found",
        Conflict(_) => "conflict",
        Integrity(_) => "integrity",
        InvalidSignature(_) => "invalid_signature",
        Codec(_) => "codec",
        InvalidCid(_) => "invalid_cid",
        InvalidPath(_) => "invalid_path",
        InvalidValue(_) => "invalid_value",
        Locked(_) => "locked",
        MissingKey(_) => "missing_key",
        InvalidKey(_) => "invalid_key",
        _ => "internal",
    }
}

fn resolve_ref(reference: &str, log: &[(Cid, Commit)]) -> anyhow::Result<Cid> {
    if reference == "HEAD" {
        return log
            .first()
            .map(|(cid, _)| *cid)
            .ok_or_else(|| anyhow::anyhow!("No commits yet"));
    }

    if let Some(n) = reference.strip_prefix("HEAD~") {
        let n: usize = n.parse()?;
        return log
            .get(n)
            .map(|(cid, _)| *cid)
            .ok_or_else(|| anyhow::anyhow!("Not enough commits in history"));
    }

    Cid::from_str(reference).map_err(|_| anyhow::anyhow!("Invalid reference: {}", reference))
}
