//! Main Store struct tying all components together.

use crate::error::{Result, StoreError};
use crate::migration::{MigrationReport, Migrator};
use crate::model::Model;
use crate::query::{Collection, Query, RowQuery};
use crate::schema::{knit, Registry};
use crate::seed;
use crate::storage::{BatchLog, ChangeSet, Database, StorageOp};
use crate::subscriptions::{Event, LiveQuery, SubscriptionId, SubscriptionManager, DEFAULT_BUFFER};
use crate::transaction::{WriteCoordinator, Writer};
use crate::types::{Clock, RowId, StoreStats, SystemClock};
use crossbeam_channel::{unbounded, Receiver, Sender};
use fs2::FileExt;
use parking_lot::RwLock;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Directory holding the store.
    pub path: PathBuf,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// Wipe the database file before opening. Schema and data start fresh.
    pub reset_on_init: bool,

    /// fsync after every committed batch.
    pub sync_on_commit: bool,

    /// Snapshots buffered per live query before it is dropped.
    /// Default: 64
    pub subscription_buffer: usize,

    /// Insert sample projects when the store has never held any.
    pub seed_sample_data: bool,
}

impl StoreConfig {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./knit-store"),
            create_if_missing: true,
            reset_on_init: false,
            sync_on_commit: true,
            subscription_buffer: DEFAULT_BUFFER,
            seed_sample_data: false,
        }
    }
}

/// Byte counts around a compaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompactionSummary {
    pub bytes_before: u64,
    pub bytes_after: u64,
}

/// Magic bytes for store manifest.
const STORE_MAGIC: &[u8; 4] = b"KST\0";

/// Current store format version.
const STORE_VERSION: u8 = 1;

const DATABASE_FILE: &str = "knit.db";

/// State shared with the notifier thread and live query handles.
pub(crate) struct Shared {
    pub(crate) registry: Registry,
    pub(crate) db: RwLock<Database>,
    pub(crate) log: BatchLog,
    pub(crate) subscriptions: SubscriptionManager,
    coordinator: WriteCoordinator,
    clock: Arc<dyn Clock>,
}

impl Shared {
    /// Register a live query with its current result as the first snapshot.
    pub(crate) fn subscribe(&self, query: &RowQuery) -> Result<(SubscriptionId, Receiver<Event>)> {
        // Hold the read lock across both steps so no commit falls in between.
        let db = self.db.read();
        let initial = query.execute(&self.registry.schema, &db, None)?;
        Ok(self.subscriptions.subscribe(query, initial))
    }
}

/// The knitting project store.
///
/// Provides a unified interface for:
/// - Migrating the database file at open
/// - Reading and querying records
/// - Atomic write transactions
/// - Live queries
pub struct Store {
    /// Store configuration.
    config: StoreConfig,

    /// Lock file for exclusive access.
    _lock_file: File,

    shared: Arc<Shared>,

    /// What the migration engine did at open.
    migration: MigrationReport,

    /// Commit notices for the notifier thread. Taken on drop to stop it.
    notices: Option<Sender<ChangeSet>>,
    notifier: Option<JoinHandle<()>>,
}

impl Store {
    /// Open an existing store or create a new one.
    pub fn open_or_create(config: StoreConfig) -> Result<Self> {
        Self::open_with(config, knit::registry()?, Arc::new(SystemClock))
    }

    /// Create a new store.
    pub fn create(config: StoreConfig) -> Result<Self> {
        Self::prepare_dir(&config.path)?;
        Self::start(config, knit::registry()?, Arc::new(SystemClock))
    }

    /// Open an existing store.
    pub fn open(config: StoreConfig) -> Result<Self> {
        Self::verify_manifest(&config.path)?;
        Self::start(config, knit::registry()?, Arc::new(SystemClock))
    }

    /// Open or create with an explicit schema registry and clock.
    pub fn open_with(config: StoreConfig, registry: Registry, clock: Arc<dyn Clock>) -> Result<Self> {
        if config.path.join("MANIFEST").exists() {
            Self::verify_manifest(&config.path)?;
        } else if config.create_if_missing {
            Self::prepare_dir(&config.path)?;
        } else {
            return Err(StoreError::NotInitialized);
        }
        Self::start(config, registry, clock)
    }

    fn prepare_dir(path: &Path) -> Result<()> {
        fs::create_dir_all(path)?;
        Self::write_manifest(path)
    }

    fn start(config: StoreConfig, registry: Registry, clock: Arc<dyn Clock>) -> Result<Self> {
        let lock_file = Self::acquire_lock(&config.path)?;

        let db_path = config.path.join(DATABASE_FILE);
        let leftover = db_path.with_extension("compact");
        if leftover.exists() {
            warn!(path = %leftover.display(), "removing unfinished compaction");
            fs::remove_file(&leftover)?;
        }
        if config.reset_on_init && db_path.exists() {
            warn!(path = %db_path.display(), "reset requested, discarding database");
            fs::remove_file(&db_path)?;
        }

        let (log, frames) = BatchLog::open(&db_path, config.sync_on_commit)?;
        let mut db = Database::replay(&frames);

        // Nothing else may touch the data until this succeeds.
        let migration = Migrator::new(&registry)
            .migrate(&mut db, &log)
            .map_err(|e| match e {
                StoreError::Io(_) | StoreError::Migration(_) => e,
                other => StoreError::Migration(other.to_string()),
            })?;

        let shared = Arc::new(Shared {
            registry,
            db: RwLock::new(db),
            log,
            subscriptions: SubscriptionManager::new(config.subscription_buffer),
            coordinator: WriteCoordinator::new(),
            clock,
        });

        let (notices, receiver) = unbounded();
        let notifier = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("knit-store-notifier".into())
                .spawn(move || run_notifier(shared, receiver))?
        };

        let store = Self {
            config,
            _lock_file: lock_file,
            shared,
            migration,
            notices: Some(notices),
            notifier: Some(notifier),
        };

        if store.config.seed_sample_data {
            seed::seed_if_empty(&store)?;
        }

        info!(
            path = %store.config.path.display(),
            version = store.schema_version(),
            frames = store.shared.log.frame_count(),
            "store opened"
        );
        Ok(store)
    }

    // --- Reads ---

    /// Point lookup. Soft-deleted rows are reported as not found.
    pub fn find<T: Model>(&self, id: &RowId) -> Result<T> {
        self.shared.registry.schema.table(T::TABLE)?;
        let db = self.shared.db.read();
        match db.get(T::TABLE, id) {
            Some(row) if !row.deleted => T::from_row(row),
            _ => Err(StoreError::not_found(T::TABLE, id)),
        }
    }

    pub(crate) fn find_including_deleted<T: Model>(&self, id: &RowId) -> Result<T> {
        self.shared.registry.schema.table(T::TABLE)?;
        let db = self.shared.db.read();
        db.get(T::TABLE, id)
            .ok_or_else(|| StoreError::not_found(T::TABLE, id))
            .and_then(T::from_row)
    }

    pub fn fetch<T: Model>(&self, query: &Query<T>) -> Result<Collection<T>> {
        let rows = {
            let db = self.shared.db.read();
            query.rows().execute(&self.shared.registry.schema, &db, None)?
        };
        Collection::from_rows(&rows)
    }

    /// First result of a query, if any.
    pub fn find_by<T: Model>(&self, query: &Query<T>) -> Result<Option<T>> {
        Ok(self.fetch(&query.clone().limit(1))?.into_iter().next())
    }

    pub fn count<T: Model>(&self, query: &Query<T>) -> Result<usize> {
        let db = self.shared.db.read();
        Ok(query
            .rows()
            .execute(&self.shared.registry.schema, &db, None)?
            .len())
    }

    /// Subscribe to a query. The first snapshot is ready immediately.
    pub fn observe<T: Model>(&self, query: &Query<T>) -> Result<LiveQuery<T>> {
        let (id, receiver) = self.shared.subscribe(query.rows())?;
        Ok(LiveQuery::new(
            id,
            query.clone(),
            receiver,
            Arc::downgrade(&self.shared),
        ))
    }

    // --- Writes ---

    /// Run `f` as one atomic transaction.
    ///
    /// Everything `f` does through the [`Writer`] is committed together when
    /// it returns `Ok`, and discarded when it returns `Err`. Transactions run
    /// one at a time in arrival order.
    pub fn write<R>(&self, f: impl FnOnce(&mut Writer<'_>) -> Result<R>) -> Result<R> {
        let _ticket = self.shared.coordinator.acquire()?;

        let (result, ops) = {
            let db = self.shared.db.read();
            let mut writer = Writer::new(&self.shared.registry.schema, &db, self.shared.clock.as_ref());
            let result = f(&mut writer)?;
            (result, writer.into_ops())
        };

        self.commit(ops)?;
        Ok(result)
    }

    /// Persist, apply and announce a batch. Caller holds the write ticket.
    fn commit(&self, ops: Vec<StorageOp>) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }

        // Writers are serialized by the ticket; only `apply` needs the write lock.
        self.shared.db.read().check(&ops)?;
        let seq = self.shared.log.append(&ops)?;
        let changes = {
            let mut changes = self.shared.db.write().apply(&ops);
            changes.seq = seq;
            changes
        };

        debug!(seq = changes.seq, ops = ops.len(), rows = changes.rows.len(), "committed batch");
        if let Some(notices) = &self.notices {
            // The notifier only stops once the store is dropped.
            let _ = notices.send(changes);
        }
        Ok(())
    }

    // --- Maintenance ---

    /// Permanently remove every soft-deleted row, with cascades.
    pub fn purge_deleted(&self) -> Result<usize> {
        let _ticket = self.shared.coordinator.acquire()?;

        let (count, ops) = {
            let db = self.shared.db.read();
            let deleted: Vec<(String, RowId)> = db
                .tables()
                .flat_map(|table| {
                    table
                        .rows()
                        .filter(|row| row.deleted)
                        .map(move |row| (table.schema().name.clone(), row.id.clone()))
                })
                .collect();

            let mut writer = Writer::new(&self.shared.registry.schema, &db, self.shared.clock.as_ref());
            let mut count = 0;
            for (table, id) in &deleted {
                count += writer.destroy_row(table, id)?;
            }
            (count, writer.into_ops())
        };

        self.commit(ops)?;
        info!(purged = count, "purged deleted rows");
        Ok(count)
    }

    /// Rewrite the database file as a single snapshot frame.
    pub fn compact(&self) -> Result<CompactionSummary> {
        let _ticket = self.shared.coordinator.acquire()?;
        let db = self.shared.db.read();

        let bytes_before = self.shared.log.size();
        self.shared.log.rewrite(&db.snapshot_ops())?;
        let bytes_after = self.shared.log.size();

        info!(bytes_before, bytes_after, "compacted database file");
        Ok(CompactionSummary {
            bytes_before,
            bytes_after,
        })
    }

    // --- Store Operations ---

    /// Schema version of the open database.
    pub fn schema_version(&self) -> u32 {
        self.shared
            .db
            .read()
            .version()
            .unwrap_or(self.shared.registry.schema.version)
    }

    pub(crate) fn is_seeded(&self) -> bool {
        self.shared.db.read().is_seeded()
    }

    pub fn migration_report(&self) -> &MigrationReport {
        &self.migration
    }

    pub fn registry(&self) -> &Registry {
        &self.shared.registry
    }

    /// Get store statistics.
    pub fn stats(&self) -> StoreStats {
        let db = self.shared.db.read();
        let mut stats = StoreStats {
            schema_version: db.version().unwrap_or_default(),
            frame_count: self.shared.log.frame_count(),
            file_size_bytes: self.shared.log.size(),
            ..Default::default()
        };
        for table in db.tables() {
            stats.table_count += 1;
            for row in table.rows() {
                stats.row_count += 1;
                if row.deleted {
                    stats.deleted_row_count += 1;
                }
            }
        }
        stats
    }

    /// Live query count, mainly for tests.
    pub fn subscription_count(&self) -> usize {
        self.shared.subscriptions.subscription_count()
    }

    /// Sync all data to disk.
    pub fn sync(&self) -> Result<()> {
        self.shared.log.sync()
    }

    /// Get the store path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    // --- Private Helpers ---

    fn write_manifest(path: &Path) -> Result<()> {
        use std::io::Write;

        let manifest_path = path.join("MANIFEST");
        let mut file = File::create(manifest_path)?;

        file.write_all(STORE_MAGIC)?;
        file.write_all(&[STORE_VERSION])?;
        file.sync_all()?;

        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        use std::io::Read;

        let manifest_path = path.join("MANIFEST");
        let mut file = File::open(manifest_path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StoreError::NotInitialized,
            _ => StoreError::Io(e),
        })?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != STORE_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid store magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != STORE_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported store version: {}",
                version[0]
            )));
        }

        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_path = path.join("LOCK");
        let lock_file = File::create(lock_path)?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked)?;

        Ok(lock_file)
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        // Let the notifier drain pending commits, then close live queries.
        self.notices.take();
        if let Some(handle) = self.notifier.take() {
            let _ = handle.join();
        }
        self.shared.subscriptions.close();
        // Best-effort sync on drop
        let _ = self.shared.log.sync();
    }
}

/// Deliver commits to live queries, strictly in commit order.
fn run_notifier(shared: Arc<Shared>, notices: Receiver<ChangeSet>) {
    for changes in notices.iter() {
        let db = shared.db.read();
        shared
            .subscriptions
            .publish(&shared.registry.schema, &db, &changes);
    }
    debug!("notifier stopped");
}
