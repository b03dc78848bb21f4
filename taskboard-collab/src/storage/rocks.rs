//! RocksDB-backed position store.
//!
//! Column families:
//! - `projects`     — Project records (bincode), keyed by project id
//! - `columns`      — Column records (bincode), keyed by column id
//! - `tasks`        — Task records (bincode), keyed by task id
//! - `column_index` — `<project_id:16><column_id:16>` → empty, prefix-scanned
//! - `task_index`   — `<column_id:16><task_id:16>` → empty, prefix-scanned
//! - `scopes`       — `<tag:1><scope_id:16>` → version (u64 big-endian)
//!
//! Every commit is one `WriteBatch`, so records, parent indexes and scope
//! versions move together. Commits are serialized by an in-process lock
//! that also covers the version check.
//!
//! Reference: Kleppmann — DDIA, Chapter 3 (LSM Trees, SSTables)

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    Direction, IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use taskboard_core::{Column, ColumnId, Project, ProjectId, Task, TaskId};
use uuid::Uuid;

use super::{sort_by_position, MutationBatch, PositionStore, ScopeKey, StoreError, WriteOp};

const CF_PROJECTS: &str = "projects";
const CF_COLUMNS: &str = "columns";
const CF_TASKS: &str = "tasks";
const CF_COLUMN_INDEX: &str = "column_index";
const CF_TASK_INDEX: &str = "task_index";
const CF_SCOPES: &str = "scopes";

const COLUMN_FAMILIES: &[&str] = &[
    CF_PROJECTS,
    CF_COLUMNS,
    CF_TASKS,
    CF_COLUMN_INDEX,
    CF_TASK_INDEX,
    CF_SCOPES,
];

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// fsync on every commit (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 512)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 16MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("taskboard_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 512,
            write_buffer_size: 16 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Small caches for tests.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
        }
    }
}

pub struct RocksStore {
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
    /// Serializes version checks with the batch write
    commit_lock: Mutex<()>,
}

impl RocksStore {
    /// Open the store, creating the database and column families if needed.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.increase_parallelism(num_cpus());

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        log::info!("Opened position store at {}", config.path.display());

        Ok(Self {
            db,
            config,
            commit_lock: Mutex::new(()),
        })
    }

    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);

        opts.set_compression_type(DBCompressionType::Lz4);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            CF_COLUMN_INDEX | CF_TASK_INDEX => {
                // Scanned by parent id
                opts.set_prefix_extractor(rocksdb::SliceTransform::create_fixed_prefix(16));
                opts.set_compression_type(DBCompressionType::None);
            }
            CF_SCOPES => {
                // Tiny values, point lookups on every mutation
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
                opts.set_compression_type(DBCompressionType::None);
            }
            _ => {
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
        }

        opts
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Flush memtables to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    // ─── Reads ────────────────────────────────────────────────────────

    fn get<T: DeserializeOwned>(&self, cf_name: &str, id: Uuid) -> Result<Option<T>, StoreError> {
        let cf = self.cf(cf_name)?;
        match self.db.get_cf(cf, id.as_bytes())? {
            Some(bytes) => decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Child ids listed under `parent` in an index family.
    fn children(&self, index_cf: &str, parent: Uuid) -> Result<Vec<Uuid>, StoreError> {
        let cf = self.cf(index_cf)?;
        let prefix = parent.as_bytes();
        let mut ids = Vec::new();

        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward));
        for item in iter {
            let (key, _) = item?;
            if key.len() < 32 || &key[..16] != prefix {
                break;
            }
            let child = Uuid::from_slice(&key[16..32])
                .map_err(|e| StoreError::Deserialization(e.to_string()))?;
            ids.push(child);
        }
        Ok(ids)
    }

    fn read_version(&self, scope: ScopeKey) -> Result<u64, StoreError> {
        let cf = self.cf(CF_SCOPES)?;
        match self.db.get_cf(cf, scope.to_key())? {
            Some(bytes) if bytes.len() == 8 => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&bytes);
                Ok(u64::from_be_bytes(buf))
            }
            Some(_) => Err(StoreError::Deserialization(format!(
                "corrupt version for {scope}"
            ))),
            None => Ok(0),
        }
    }

    // ─── Writes ───────────────────────────────────────────────────────

    /// Translate one op into batch entries, keeping parent indexes in step.
    ///
    /// Index maintenance reads the committed record, so a batch must not
    /// touch the same record twice.
    fn stage(&self, batch: &mut WriteBatch, op: WriteOp) -> Result<(), StoreError> {
        match op {
            WriteOp::PutProject(project) => {
                batch.put_cf(self.cf(CF_PROJECTS)?, project.id.as_bytes(), encode(&project)?);
            }
            WriteOp::DeleteProject(id) => {
                batch.delete_cf(self.cf(CF_PROJECTS)?, id.as_bytes());
            }
            WriteOp::PutColumn(column) => {
                batch.put_cf(self.cf(CF_COLUMNS)?, column.id.as_bytes(), encode(&column)?);
                batch.put_cf(
                    self.cf(CF_COLUMN_INDEX)?,
                    index_key(column.project_id, column.id),
                    b"",
                );
            }
            WriteOp::DeleteColumn(id) => {
                if let Some(column) = self.get::<Column>(CF_COLUMNS, id)? {
                    batch.delete_cf(self.cf(CF_COLUMN_INDEX)?, index_key(column.project_id, id));
                }
                batch.delete_cf(self.cf(CF_COLUMNS)?, id.as_bytes());
            }
            WriteOp::PutTask(task) => {
                let index_cf = self.cf(CF_TASK_INDEX)?;
                if let Some(previous) = self.get::<Task>(CF_TASKS, task.id)? {
                    if previous.column_id != task.column_id {
                        batch.delete_cf(index_cf, index_key(previous.column_id, task.id));
                    }
                }
                batch.put_cf(self.cf(CF_TASKS)?, task.id.as_bytes(), encode(&task)?);
                batch.put_cf(index_cf, index_key(task.column_id, task.id), b"");
            }
            WriteOp::DeleteTask(id) => {
                if let Some(task) = self.get::<Task>(CF_TASKS, id)? {
                    batch.delete_cf(self.cf(CF_TASK_INDEX)?, index_key(task.column_id, id));
                }
                batch.delete_cf(self.cf(CF_TASKS)?, id.as_bytes());
            }
            WriteOp::BumpScope(scope) => {
                let next = self.read_version(scope)? + 1;
                batch.put_cf(self.cf(CF_SCOPES)?, scope.to_key(), next.to_be_bytes());
            }
        }
        Ok(())
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;
        Ok(())
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("Column family '{name}' not found")))
    }
}

impl PositionStore for RocksStore {
    fn supports_transactions(&self) -> bool {
        true
    }

    fn project(&self, id: ProjectId) -> Result<Option<Project>, StoreError> {
        self.get(CF_PROJECTS, id)
    }

    fn column(&self, id: ColumnId) -> Result<Option<Column>, StoreError> {
        self.get(CF_COLUMNS, id)
    }

    fn task(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        self.get(CF_TASKS, id)
    }

    fn columns_in(&self, project: ProjectId) -> Result<Vec<Column>, StoreError> {
        let mut columns = Vec::new();
        for id in self.children(CF_COLUMN_INDEX, project)? {
            if let Some(column) = self.column(id)? {
                columns.push(column);
            }
        }
        sort_by_position(&mut columns);
        Ok(columns)
    }

    fn tasks_in(&self, column: ColumnId) -> Result<Vec<Task>, StoreError> {
        let mut tasks = Vec::new();
        for id in self.children(CF_TASK_INDEX, column)? {
            if let Some(task) = self.task(id)? {
                tasks.push(task);
            }
        }
        sort_by_position(&mut tasks);
        Ok(tasks)
    }

    fn scope_version(&self, scope: ScopeKey) -> Result<u64, StoreError> {
        self.read_version(scope)
    }

    fn commit(&self, batch: &MutationBatch) -> Result<(), StoreError> {
        let _guard = self.commit_lock.lock().map_err(|_| StoreError::Poisoned)?;

        for (scope, expected) in batch.expectations() {
            let found = self.read_version(*scope)?;
            if found != *expected {
                return Err(StoreError::Conflict {
                    scope: *scope,
                    expected: *expected,
                    found,
                });
            }
        }

        let mut write_batch = WriteBatch::default();
        for op in batch.sequence() {
            self.stage(&mut write_batch, op)?;
        }
        self.write(write_batch)
    }

    fn apply(&self, op: WriteOp) -> Result<(), StoreError> {
        let _guard = self.commit_lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut write_batch = WriteBatch::default();
        self.stage(&mut write_batch, op)?;
        self.write(write_batch)
    }
}

fn index_key(parent: Uuid, child: Uuid) -> [u8; 32] {
    let mut key = [0u8; 32];
    key[..16].copy_from_slice(parent.as_bytes());
    key[16..].copy_from_slice(child.as_bytes());
    key
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| StoreError::Deserialization(e.to_string()))?;
    Ok(value)
}

fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}
