use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facematch_store::{SqliteIdentityStore, StoredIdentity};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_SERVER: &str = "http://127.0.0.1:8000";

#[derive(Parser)]
#[command(name = "facematch", about = "Face-match daemon client")]
struct Cli {
    /// Base URL of facematchd
    #[arg(long, global = true, default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the daemon is up
    Health,
    /// Force a rebuild of the known-face gallery
    Reload,
    /// Recognize faces in one image
    Frame {
        /// Image file (JPEG, PNG, ...)
        image: PathBuf,
    },
    /// Best match per identity across a video clip
    Video {
        /// Video file
        file: PathBuf,
    },
    /// Manage enrolled identities in the local database
    Identities {
        /// Identity database (defaults to the daemon's)
        #[arg(long)]
        db: Option<PathBuf>,

        /// Ask the daemon to reload after a change
        #[arg(long)]
        reload: bool,

        #[command(subcommand)]
        action: IdentityAction,
    },
}

#[derive(Subcommand)]
enum IdentityAction {
    /// List enrolled identities
    List,
    /// Add or update an identity
    Add {
        id: String,
        /// Reference image path, absolute or relative to the image root
        image_path: String,
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Remove an identity
    Remove { id: String },
    /// Replace every identity with the contents of a JSON file
    Seed { file: PathBuf },
}

/// One entry of a seed file: `[{"id": "...", "name": "...", "imagePath": "..."}]`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeedIdentity {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    image_path: Option<String>,
}

impl From<SeedIdentity> for StoredIdentity {
    fn from(s: SeedIdentity) -> Self {
        StoredIdentity { id: s.id, name: s.name, image_path: s.image_path }
    }
}

fn parse_seed(text: &str) -> Result<Vec<StoredIdentity>> {
    let entries: Vec<SeedIdentity> = serde_json::from_str(text).context("parsing seed file")?;
    Ok(entries.into_iter().map(Into::into).collect())
}

fn endpoint(server: &str, path: &str) -> String {
    format!("{}/{}", server.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Same default location the daemon uses.
fn default_db_path() -> PathBuf {
    if let Ok(p) = std::env::var("FACEMATCH_DB_PATH") {
        return PathBuf::from(p);
    }
    let data = std::env::var("XDG_DATA_HOME").map(PathBuf::from).unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(home).join(".local/share")
    });
    data.join("facematch").join("identities.db")
}

async fn print_response(resp: reqwest::Response) -> Result<()> {
    let status = resp.status();
    let body: serde_json::Value = resp.json().await.context("reading response body")?;
    if !status.is_success() {
        let msg = body.get("error").and_then(|e| e.as_str()).unwrap_or("unknown error");
        bail!("{status}: {msg}");
    }
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

async fn upload(client: &reqwest::Client, url: String, field: &'static str, path: &Path) -> Result<()> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| field.to_string());
    tracing::debug!(url = %url, bytes = bytes.len(), "uploading");

    let form = Form::new().part(field, Part::bytes(bytes).file_name(file_name));
    let resp = client.post(url).multipart(form).send().await?;
    print_response(resp).await
}

fn identities(store: &SqliteIdentityStore, action: IdentityAction) -> Result<bool> {
    match action {
        IdentityAction::List => {
            let rows = store.list()?;
            if rows.is_empty() {
                println!("No identities enrolled");
            }
            for row in rows {
                println!(
                    "{}\t{}\t{}",
                    row.id,
                    row.name.as_deref().unwrap_or("-"),
                    row.image_path.as_deref().unwrap_or("-")
                );
            }
            Ok(false)
        }
        IdentityAction::Add { id, image_path, name } => {
            store.upsert(&StoredIdentity { id: id.clone(), name, image_path: Some(image_path) })?;
            println!("Saved {id}");
            Ok(true)
        }
        IdentityAction::Remove { id } => {
            if !store.remove(&id)? {
                bail!("no identity {id}");
            }
            println!("Removed {id}");
            Ok(true)
        }
        IdentityAction::Seed { file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let n = store.replace_all(&parse_seed(&text)?)?;
            println!("Seeded {n} identities");
            Ok(true)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Health => {
            let resp = client.get(endpoint(&cli.server, "health")).send().await?;
            print_response(resp).await?;
        }
        Commands::Reload => {
            let resp = client.post(endpoint(&cli.server, "reload-known-faces")).send().await?;
            print_response(resp).await?;
        }
        Commands::Frame { image } => {
            upload(&client, endpoint(&cli.server, "recognize-frame"), "frame", &image).await?;
        }
        Commands::Video { file } => {
            upload(&client, endpoint(&cli.server, "recognize"), "video", &file).await?;
        }
        Commands::Identities { db, reload, action } => {
            let db = db.unwrap_or_else(default_db_path);
            let store = SqliteIdentityStore::open(&db)
                .with_context(|| format!("opening {}", db.display()))?;
            let changed = identities(&store, action)?;
            if changed && reload {
                // best effort: the daemon also refreshes on its own TTL
                match client.post(endpoint(&cli.server, "reload-known-faces")).send().await {
                    Ok(resp) => print_response(resp).await?,
                    Err(e) => tracing::warn!(error = %e, "daemon reload failed"),
                }
            }
        }
    }

    Ok(())
}
