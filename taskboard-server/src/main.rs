//! Task board server: REST and realtime gateway over one store.
//!
//! Configuration comes from `TASKBOARD_*` variables (see
//! [`ServerConfig::from_lookup`]) plus two seed tables:
//!
//! - `TASKBOARD_TOKENS`: `token=user-uuid,...`
//! - `TASKBOARD_PROJECTS`: `project-uuid=owner-uuid[+member-uuid...],...`
//!
//! `RUST_LOG` controls verbosity.

use log::{error, info, warn};
use std::error::Error;
use std::sync::Arc;
use taskboard_collab::access::{CredentialVerifier, StaticTokenVerifier, StoreAccessGate};
use taskboard_collab::broadcast::RoomManager;
use taskboard_collab::http::{self, AppState};
use taskboard_collab::mutator::TransactionalMutator;
use taskboard_collab::server::{RealtimeGateway, ServerConfig};
use taskboard_collab::storage::{MemoryStore, PositionStore, RocksStore, StoreConfig};
use taskboard_core::{Project, UserId};
use uuid::Uuid;

type BoxError = Box<dyn Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    env_logger::init();

    info!("Starting task board server...");

    let config = ServerConfig::from_env()?;
    let store = open_store(&config)?;

    let tokens = std::env::var("TASKBOARD_TOKENS").unwrap_or_default();
    let verifier = StaticTokenVerifier::parse(&tokens)?;
    if verifier.is_empty() {
        warn!("TASKBOARD_TOKENS is empty; every connection will be rejected");
    } else {
        info!("Loaded {} access tokens", verifier.len());
    }

    let projects = std::env::var("TASKBOARD_PROJECTS").unwrap_or_default();
    for project in parse_projects(&projects)? {
        info!(
            "Seeding project {} (owner {}, {} members)",
            project.id,
            project.owner_id,
            project.member_ids.len()
        );
        store.put_project(&project)?;
    }

    let gate = Arc::new(StoreAccessGate::new(store.clone()));
    let mutator = Arc::new(TransactionalMutator::with_config(
        store,
        gate,
        config.mutator_config(),
    ));
    let rooms = Arc::new(RoomManager::new(config.broadcast_capacity));
    let verifier: Arc<dyn CredentialVerifier> = Arc::new(verifier);

    let state = AppState::new(
        mutator.clone(),
        rooms.clone(),
        verifier.clone(),
        config.broadcast_http_mutations,
    );
    let http_addr = config.http_bind_addr.clone();
    let gateway = RealtimeGateway::new(config, mutator, rooms, verifier);

    tokio::select! {
        result = gateway.run() => {
            if let Err(e) = result {
                error!("Realtime gateway stopped: {e}");
                return Err(e);
            }
        }
        result = http::serve(&http_addr, state) => {
            if let Err(e) = result {
                error!("REST surface stopped: {e}");
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    Ok(())
}

fn open_store(config: &ServerConfig) -> Result<Arc<dyn PositionStore>, BoxError> {
    match &config.storage_path {
        Some(path) => {
            let store = RocksStore::open(StoreConfig {
                path: path.clone(),
                ..StoreConfig::default()
            })?;
            info!("Opened RocksDB store at {}", path.display());
            Ok(Arc::new(store))
        }
        None => {
            warn!("No TASKBOARD_STORAGE_PATH set; board state lives in memory only");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Parse `project=owner+member+...` entries separated by commas.
fn parse_projects(table: &str) -> Result<Vec<Project>, String> {
    table
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| -> Result<Project, String> {
            let (id, people) = entry
                .split_once('=')
                .ok_or_else(|| format!("expected project=owner, got '{entry}'"))?;
            let id: Uuid = parse_id(id)?;
            let mut people = people.split('+').map(parse_id);
            let owner: UserId = people
                .next()
                .ok_or_else(|| format!("project {id} has no owner"))??;
            let members = people.collect::<Result<Vec<UserId>, String>>()?;

            let mut project = Project::new(format!("project-{id}"), owner).with_members(members);
            project.id = id;
            Ok(project)
        })
        .collect()
}

fn parse_id(raw: &str) -> Result<Uuid, String> {
    raw.trim()
        .parse()
        .map_err(|e| format!("bad id '{}': {e}", raw.trim()))
}
