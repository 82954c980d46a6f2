use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use fedstream_core::config::Config;
use fedstream_core::core_authoring::AuthoringService;
use fedstream_core::core_federation::{EntityRegistry, LocalPeerClient, SyncRound, SyncWorker};
use fedstream_core::core_model::{Entity, ObjectId, OrderingKey};
use fedstream_core::core_signature::{Ed25519Verifier, Keypair};
use fedstream_core::core_store::SqlStore;
use fedstream_core::core_stream::{BroadcastNotifier, SqlStreamLog, StreamService};
use fedstream_core::logging::{init_logging_with_config, LogConfig};
use fedstream_core::metrics::init_metrics;
use fedstream_core::shutdown::{install_signal_handlers, ShutdownCoordinator};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const DEFAULT_DATABASE: &str = "fedstream.sqlite";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(name = "fedstream")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Override the configured log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    /// TOML configuration file
    #[arg(short, long, env = "FEDSTREAM_CONFIG")]
    config: Option<String>,

    /// Database file, overriding `store.database_path`
    #[arg(long)]
    db: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a default configuration file
    InitConfig { path: String },

    /// Generate an author keypair
    Keygen,

    /// Build and sign a payload
    Sign {
        /// Hex secret key
        #[arg(long, env = "FEDSTREAM_SECRET", hide_env_values = true)]
        secret: String,
        #[arg(long)]
        schema: String,
        /// JSON body
        #[arg(long, default_value = "{}")]
        body: String,
        /// Object annotated by an association
        #[arg(long)]
        target: Option<String>,
    },

    /// Author a message
    Post {
        #[arg(long)]
        payload: String,
        #[arg(long)]
        signature: String,
        /// Target stream, repeatable
        #[arg(short, long = "stream")]
        streams: Vec<String>,
    },

    /// Author an association on an existing object
    Associate {
        #[arg(long)]
        payload: String,
        #[arg(long)]
        signature: String,
        #[arg(long)]
        target: String,
    },

    /// Fetch a message or association
    Get {
        id: String,
        /// Include associations targeting the message
        #[arg(long)]
        with_associations: bool,
    },

    /// Delete a message or association
    Delete { id: String },

    /// Read a stream's backlog in the subscriber wire form
    Backlog {
        stream: String,
        /// Resume after this ordering key (`<micros>-<seq>`)
        #[arg(long)]
        after: Option<String>,
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },

    /// Create or replace a registry entity
    EntityPut {
        key: String,
        #[arg(long)]
        meta: Option<String>,
        #[arg(long)]
        role: Option<String>,
        /// Origin host; omit for a locally owned entity
        #[arg(long)]
        host: Option<String>,
    },

    /// List locally owned entities
    Entities,

    /// List entities modified after a timestamp (RFC 3339)
    Modified {
        #[arg(long)]
        since: Option<String>,
    },

    /// Pull registry changes from the configured peers until interrupted
    Sync {
        /// Peer registry database as `<host>=<path>`, repeatable
        #[arg(long = "peer-db", value_parser = parse_peer_db)]
        peer_dbs: Vec<(String, String)>,
        /// Run a single round and exit
        #[arg(long)]
        once: bool,
    },
}

/// Services wired from configuration
struct Host {
    authoring: AuthoringService,
    streams: Arc<StreamService>,
    registry: Arc<EntityRegistry>,
}

impl Host {
    fn open(config: &Config) -> Result<Self> {
        let store = SqlStore::from_config(&config.store).context("failed to open store")?;
        let log = Arc::new(SqlStreamLog::from_store(&store));
        let notifier = Arc::new(BroadcastNotifier::new(config.stream.live_capacity));
        let streams = Arc::new(StreamService::from_config(&config.stream, log, notifier));

        let store = Arc::new(store);
        let authoring = AuthoringService::new(
            store.clone(),
            Arc::new(Ed25519Verifier::new()),
            streams.clone(),
        )
        .with_config(&config.authoring);
        let registry = Arc::new(EntityRegistry::new(store, config.federation.host.clone()));

        Ok(Host {
            authoring,
            streams,
            registry,
        })
    }
}

fn parse_peer_db(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((host, path)) if !host.is_empty() && !path.is_empty() => {
            Ok((host.to_string(), path.to_string()))
        }
        _ => Err(format!("expected <host>=<path>, got {}", raw)),
    }
}

fn round_json(round: &SyncRound) -> Result<Value> {
    let failures: Vec<Value> = round
        .failures
        .iter()
        .map(|(peer, e)| json!({ "peer": peer, "error": e.to_string() }))
        .collect();
    Ok(json!({
        "reports": serde_json::to_value(&round.reports)?,
        "failures": failures,
    }))
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(expand(path))
            .with_context(|| format!("failed to load config {}", path))?,
        None => Config::from_env()?,
    };

    if let Some(db) = &args.db {
        config.store.database_path = Some(expand(db));
    }
    if config.store.database_path.is_none() {
        config.store.database_path = Some(PathBuf::from(DEFAULT_DATABASE));
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if args.json_logs {
        config.logging.json_format = true;
    }

    config.validate()?;
    Ok(config)
}

/// Payload text exactly as it will be signed and submitted
fn build_payload(keys: &Keypair, schema: &str, body: &str, target: Option<&str>) -> Result<String> {
    let body: Value = serde_json::from_str(body).context("--body must be JSON")?;
    let mut payload = json!({
        "signer": keys.signer_id(),
        "schema": schema,
        "signedAt": Utc::now().to_rfc3339(),
        "body": body,
    });
    if let Some(target) = target {
        payload["target"] = Value::String(target.to_string());
    }
    Ok(serde_json::to_string(&payload)?)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn execute(command: Command, config: &Config) -> Result<Value> {
    let output = match command {
        Command::InitConfig { path } => {
            let path = expand(&path);
            Config::default().save_to_file(&path)?;
            json!({ "written": path })
        }
        Command::Keygen => {
            let keys = Keypair::generate();
            json!({ "signer": keys.signer_id(), "secret": keys.secret_hex() })
        }
        Command::Sign {
            secret,
            schema,
            body,
            target,
        } => {
            let keys = Keypair::from_secret_hex(&secret)?;
            let payload = build_payload(&keys, &schema, &body, target.as_deref())?;
            let signature = keys.sign_hex(payload.as_bytes());
            json!({ "payload": payload, "signature": signature })
        }
        Command::Post {
            payload,
            signature,
            streams,
        } => {
            let host = Host::open(config)?;
            let authored = host
                .authoring
                .post_message(&payload, &signature, &streams)
                .await?;
            serde_json::to_value(authored)?
        }
        Command::Associate {
            payload,
            signature,
            target,
        } => {
            let host = Host::open(config)?;
            let authored = host
                .authoring
                .post_association(&payload, &signature, &ObjectId::new(target))
                .await?;
            serde_json::to_value(authored)?
        }
        Command::Get {
            id,
            with_associations,
        } => {
            let host = Host::open(config)?;
            let id = ObjectId::new(id);
            if with_associations {
                serde_json::to_value(host.authoring.get_message_with_associations(&id).await?)?
            } else {
                serde_json::to_value(host.authoring.get(&id).await?)?
            }
        }
        Command::Delete { id } => {
            let host = Host::open(config)?;
            serde_json::to_value(host.authoring.delete(&ObjectId::new(id)).await?)?
        }
        Command::Backlog {
            stream,
            after,
            limit,
        } => {
            let host = Host::open(config)?;
            let after = after
                .map(|key| key.parse::<OrderingKey>().map_err(|e| anyhow!(e)))
                .transpose()?;
            let mut cursor = host.streams.backlog(&stream, after);
            let mut events = Vec::new();
            while events.len() < limit {
                let page = cursor.next_page().await?;
                if page.is_empty() {
                    break;
                }
                events.extend(page);
            }
            events.truncate(limit);

            let next = events.last().map(|e| e.key.to_string());
            let wire: Vec<Value> = events
                .iter()
                .map(|e| serde_json::to_value(e.to_wire()))
                .collect::<Result<_, _>>()?;
            json!({ "events": wire, "next": next })
        }
        Command::EntityPut {
            key,
            meta,
            role,
            host: origin,
        } => {
            let host = Host::open(config)?;
            let mut entity = Entity::local(key);
            if let Some(meta) = meta {
                entity = entity.with_meta(serde_json::from_str(&meta).context("--meta must be JSON")?);
            }
            if let Some(role) = role {
                entity = entity.with_role(role);
            }
            if let Some(origin) = origin {
                entity = entity.with_host(origin);
            }
            serde_json::to_value(host.registry.upsert(&entity).await?)?
        }
        Command::Entities => {
            let host = Host::open(config)?;
            serde_json::to_value(host.registry.get_list().await?)?
        }
        Command::Modified { since } => {
            let host = Host::open(config)?;
            let since = match since {
                Some(raw) => DateTime::parse_from_rfc3339(&raw)
                    .with_context(|| format!("invalid --since {}", raw))?
                    .with_timezone(&Utc),
                None => DateTime::<Utc>::default(),
            };
            serde_json::to_value(host.registry.list_modified(since).await?)?
        }
        Command::Sync { peer_dbs, once } => {
            let host = Host::open(config)?;
            let client = Arc::new(LocalPeerClient::new());
            for (peer, path) in peer_dbs {
                if !config.federation.peers.contains(&peer) {
                    warn!(peer = %peer, "Peer database given for a host that is not a configured peer");
                }
                let store = SqlStore::open(expand(&path), config.store.pool_size)
                    .with_context(|| format!("failed to open registry for {}", peer))?;
                client
                    .register(Arc::new(EntityRegistry::new(Arc::new(store), peer)))
                    .await;
            }

            let worker = Arc::new(SyncWorker::from_config(
                &config.federation,
                host.registry.clone(),
                client,
            ));
            if once {
                round_json(&worker.sync_all().await)?
            } else {
                let coordinator = Arc::new(ShutdownCoordinator::new(SHUTDOWN_GRACE));
                install_signal_handlers(coordinator.clone())
                    .context("failed to install signal handlers")?;
                worker.clone().run(coordinator.listener()).await;
                json!({ "stopped": true, "peers": worker.peers() })
            }
        }
    };
    Ok(output)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    // validate() has already checked the level
    init_logging_with_config(LogConfig::try_from(&config.logging)?)?;
    if config.metrics.enabled {
        init_metrics();
    }

    debug!(database = ?config.store.database_path, "fedstream CLI started");
    let output = execute(args.command, &config).await?;
    print_json(&output)?;
    info!("fedstream CLI finished");

    Ok(())
}
