//! Catalogs and their commit path.
//!
//! A [`Catalog`] publishes immutable [`CatalogState`] snapshots through an
//! `ArcSwap`. Readers load the current snapshot without locking and keep it
//! as long as they like. Writers build a new snapshot in a
//! [`CatalogTransaction`] and publish it under the commit lock, one version
//! per commit.
//!
//! Once a catalog is alive, every commit is appended to the catalog WAL
//! before it is published. A checkpoint writes the snapshot files and starts
//! a fresh WAL file.

mod persistence;
mod sequence;
mod state;
mod transaction;

pub use persistence::STORAGE_PROTOCOL_VERSION;
pub use sequence::PrimaryKeySequences;
pub use state::CatalogState;
pub use transaction::CatalogTransaction;

use crate::data::{CatalogMutation, EntityMutation};
use crate::dir::remove_file_if_exists;
use crate::error::{CoreError, CoreResult};
use crate::types::{CatalogVersion, TransactionId};
use crate::wal::{LogFileRecordReference, TransactionRecord, WalManager};
use arc_swap::ArcSwap;
use catalogdb_storage::{FileBackend, InMemoryBackend, StorageBackend};
use parking_lot::Mutex;
use persistence::{LoadedSnapshot, SnapshotMeta};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifecycle phase of a catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CatalogMode {
    /// Being populated by a single session; commits skip the WAL.
    WarmingUp,
    /// Serving traffic; every commit goes through the WAL.
    Alive,
}

/// Settings a catalog takes from the engine configuration.
#[derive(Debug, Clone, Copy)]
pub struct CatalogOptions {
    /// Fsync the WAL after every append.
    pub sync_on_commit: bool,
    /// WAL size after which a commit triggers a checkpoint.
    pub checkpoint_wal_size: u64,
    /// Open existing files without write access.
    pub read_only: bool,
}

impl Default for CatalogOptions {
    fn default() -> Self {
        Self {
            sync_on_commit: true,
            checkpoint_wal_size: 16 * 1024 * 1024,
            read_only: false,
        }
    }
}

#[derive(Debug)]
struct CatalogStorage {
    directory: PathBuf,
    wal: WalManager,
    wal_reference: LogFileRecordReference,
}

/// State guarded by the commit lock.
#[derive(Debug)]
struct CatalogWriter {
    storage: Option<CatalogStorage>,
    mode: CatalogMode,
}

/// A named catalog: entity collections, schema and the commit protocol.
#[derive(Debug)]
pub struct Catalog {
    name: String,
    state: ArcSwap<CatalogState>,
    sequences: Arc<PrimaryKeySequences>,
    writer: Mutex<CatalogWriter>,
    alive: AtomicBool,
    read_only: AtomicBool,
    terminated: AtomicBool,
    last_transaction_id: AtomicU64,
    warmup_writer: Mutex<Option<Uuid>>,
    options: CatalogOptions,
}

fn open_wal(
    directory: &Path,
    name: &str,
    reference: LogFileRecordReference,
    options: &CatalogOptions,
) -> CoreResult<WalManager> {
    let path = directory.join(reference.file_name(name));
    let backend: Box<dyn StorageBackend> = if options.read_only {
        if path.exists() {
            Box::new(FileBackend::open_read_only(&path)?)
        } else {
            Box::new(InMemoryBackend::new())
        }
    } else {
        Box::new(FileBackend::open(&path)?)
    };
    Ok(WalManager::new(backend, options.sync_on_commit))
}

impl Catalog {
    /// Creates an empty catalog in warm-up mode.
    ///
    /// With a directory, the empty snapshot and the first WAL file are
    /// written right away; without one the catalog lives in memory only.
    ///
    /// # Errors
    ///
    /// I/O errors while writing the initial snapshot.
    pub fn create(name: &str, directory: Option<PathBuf>, options: CatalogOptions) -> CoreResult<Self> {
        let catalog = Self::from_state(
            CatalogState::new(name),
            PrimaryKeySequences::default(),
            CatalogMode::WarmingUp,
            TransactionId::new(0),
            directory,
            options,
        )?;
        info!(catalog = name, "catalog created");
        Ok(catalog)
    }

    fn from_state(
        state: CatalogState,
        sequences: PrimaryKeySequences,
        mode: CatalogMode,
        last_transaction_id: TransactionId,
        directory: Option<PathBuf>,
        options: CatalogOptions,
    ) -> CoreResult<Self> {
        let name = state.name().to_string();
        let storage = match directory {
            Some(directory) => {
                let wal_reference = LogFileRecordReference::new(0);
                persistence::write_snapshot(
                    &directory,
                    &state,
                    &SnapshotMeta {
                        mode,
                        sequences: sequences.snapshot(),
                        last_transaction_id,
                        wal: wal_reference,
                    },
                )?;
                let wal_path = directory.join(wal_reference.file_name(&name));
                remove_file_if_exists(&wal_path)?;
                let wal = open_wal(&directory, &name, wal_reference, &options)?;
                Some(CatalogStorage {
                    directory,
                    wal,
                    wal_reference,
                })
            }
            None => None,
        };
        Ok(Self::assemble(state, sequences, mode, last_transaction_id, storage, options))
    }

    fn assemble(
        state: CatalogState,
        sequences: PrimaryKeySequences,
        mode: CatalogMode,
        last_transaction_id: TransactionId,
        storage: Option<CatalogStorage>,
        options: CatalogOptions,
    ) -> Self {
        Self {
            name: state.name().to_string(),
            state: ArcSwap::from_pointee(state),
            sequences: Arc::new(sequences),
            writer: Mutex::new(CatalogWriter { storage, mode }),
            alive: AtomicBool::new(mode == CatalogMode::Alive),
            read_only: AtomicBool::new(options.read_only),
            terminated: AtomicBool::new(false),
            last_transaction_id: AtomicU64::new(last_transaction_id.as_u64()),
            warmup_writer: Mutex::new(None),
            options,
        }
    }

    /// Loads catalog `name` from `directory`: the last checkpoint, then every
    /// newer transaction of the WAL.
    ///
    /// A torn record at the end of the WAL is cut off.
    ///
    /// # Errors
    ///
    /// Unreadable header or collection files, digest mismatches, WAL
    /// corruption and records that no longer apply.
    pub fn load(name: &str, directory: &Path, options: CatalogOptions) -> CoreResult<Self> {
        let LoadedSnapshot { mut state, meta } = persistence::read_snapshot(directory)?;
        if state.name() != name {
            return Err(CoreError::invalid_format(format!(
                "header names catalog `{}`",
                state.name()
            )));
        }
        let sequences = PrimaryKeySequences::new(meta.sequences);
        let mut last_transaction_id = meta.last_transaction_id;
        let wal = open_wal(directory, name, meta.wal, &options)?;

        let mut replayed = 0usize;
        let end = {
            let mut records = wal.iter_from::<TransactionRecord>(meta.wal.start())?;
            for item in records.by_ref() {
                let (_, record) = item?;
                if record.catalog_version <= state.version() {
                    continue;
                }
                for mutation in &record.mutations {
                    if let CatalogMutation::Entity(EntityMutation::Upsert(upsert)) = mutation {
                        if let Some(primary_key) = upsert.primary_key {
                            sequences.observe(&upsert.entity_type, primary_key);
                        }
                    }
                    state.apply(mutation)?;
                }
                state.set_version(record.catalog_version);
                last_transaction_id = last_transaction_id.max(record.transaction_id);
                replayed += 1;
            }
            records.offset()
        };
        let size = wal.size()?;
        if end < size && !options.read_only {
            warn!(catalog = name, offset = end, size, "truncating torn WAL tail");
            wal.truncate(end)?;
        }

        info!(
            catalog = name,
            version = state.version().as_u64(),
            replayed,
            "catalog loaded"
        );
        Ok(Self::assemble(
            state,
            sequences,
            meta.mode,
            last_transaction_id,
            Some(CatalogStorage {
                directory: directory.to_path_buf(),
                wal,
                wal_reference: meta.wal,
            }),
            options,
        ))
    }

    /// Catalog name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current version.
    #[must_use]
    pub fn version(&self) -> CatalogVersion {
        self.state.load().version()
    }

    /// The current snapshot. It stays valid and unchanged for as long as it is held.
    #[must_use]
    pub fn snapshot(&self) -> Arc<CatalogState> {
        self.state.load_full()
    }

    /// Lifecycle phase.
    #[must_use]
    pub fn mode(&self) -> CatalogMode {
        if self.alive.load(Ordering::Acquire) {
            CatalogMode::Alive
        } else {
            CatalogMode::WarmingUp
        }
    }

    /// Returns `true` while the catalog is being populated.
    #[must_use]
    pub fn is_warming_up(&self) -> bool {
        self.mode() == CatalogMode::WarmingUp
    }

    /// Returns `true` when writes are rejected.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }

    /// Directory of the catalog files; `None` for in-memory catalogs.
    #[must_use]
    pub fn directory(&self) -> Option<PathBuf> {
        self.writer.lock().storage.as_ref().map(|s| s.directory.clone())
    }

    /// The primary key sequences shared by the catalog's transactions.
    #[must_use]
    pub fn sequences(&self) -> &Arc<PrimaryKeySequences> {
        &self.sequences
    }

    pub(crate) fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::Release);
    }

    /// Marks the instance as superseded after a rename, replace or delete.
    pub(crate) fn terminate(&self) {
        self.terminated.store(true, Ordering::Release);
    }

    fn ensure_writable(&self) -> CoreResult<()> {
        if self.terminated.load(Ordering::Acquire) {
            return Err(CoreError::CatalogNotFound {
                name: self.name.clone(),
            });
        }
        if self.is_read_only() {
            return Err(CoreError::read_only(format!("catalog `{}`", self.name)));
        }
        Ok(())
    }

    /// Starts a transaction on the current snapshot.
    ///
    /// # Errors
    ///
    /// [`CoreError::ReadOnly`] for read-only catalogs.
    pub fn begin_transaction(&self) -> CoreResult<CatalogTransaction> {
        self.begin_transaction_at(&self.snapshot())
    }

    /// Starts a transaction on `base`, a snapshot of this catalog.
    pub fn begin_transaction_at(&self, base: &CatalogState) -> CoreResult<CatalogTransaction> {
        self.ensure_writable()?;
        let id = TransactionId::new(self.last_transaction_id.fetch_add(1, Ordering::SeqCst) + 1);
        Ok(CatalogTransaction::new(id, base, Arc::clone(&self.sequences)))
    }

    /// Publishes a transaction as the next version and returns that version.
    ///
    /// When another transaction committed after `transaction` began, its
    /// mutations are re-applied onto the latest snapshot first; a conflict
    /// there fails the commit and nothing is published. An empty transaction
    /// publishes nothing and returns the current version.
    ///
    /// # Errors
    ///
    /// Read-only catalogs, rebase conflicts and WAL write failures.
    pub fn commit(&self, transaction: CatalogTransaction) -> CoreResult<CatalogVersion> {
        self.ensure_writable()?;
        let (transaction_id, base_version, working, mutations) = transaction.into_parts();
        if mutations.is_empty() {
            return Ok(self.version());
        }

        let mut writer = self.writer.lock();
        // a rename or replace may have frozen the catalog while we waited
        self.ensure_writable()?;
        let current = self.state.load_full();
        let mut next = if current.version() == base_version {
            working
        } else {
            debug!(
                catalog = %self.name,
                base = base_version.as_u64(),
                current = current.version().as_u64(),
                "rebasing transaction"
            );
            let mut rebased = CatalogState::clone(&current);
            for mutation in &mutations {
                rebased.apply(mutation)?;
            }
            rebased
        };
        let version = current.version().next();
        next.set_version(version);

        let mutation_count = mutations.len();
        let alive = writer.mode == CatalogMode::Alive;
        if alive {
            if let Some(storage) = writer.storage.as_ref() {
                storage.wal.append(&TransactionRecord {
                    transaction_id,
                    catalog_version: version,
                    mutations,
                })?;
            }
        }
        self.state.store(Arc::new(next));
        debug!(
            catalog = %self.name,
            version = version.as_u64(),
            mutations = mutation_count,
            "committed"
        );

        if alive {
            let over_limit = match writer.storage.as_ref() {
                Some(storage) => storage.wal.size()? > self.options.checkpoint_wal_size,
                None => false,
            };
            // the commit is durable and published; a failed checkpoint only leaves a longer WAL
            if over_limit {
                if let Err(e) = self.checkpoint(&mut writer) {
                    warn!(catalog = %self.name, version = version.as_u64(), error = %e, "checkpoint after commit failed");
                }
            }
        }
        Ok(version)
    }

    /// Runs `f` in a transaction and commits it when `f` succeeds.
    ///
    /// ```
    /// use catalogdb_core::{Catalog, CatalogOptions, EntitySchema, UpsertEntity};
    ///
    /// let catalog = Catalog::create("shop", None, CatalogOptions::default()).unwrap();
    /// let pk = catalog
    ///     .update(|txn| {
    ///         txn.update_entity_schema(EntitySchema::new("BRAND"))?;
    ///         Ok(txn.upsert_entity(UpsertEntity::new("BRAND"))?.primary_key)
    ///     })
    ///     .unwrap();
    /// assert_eq!(catalog.snapshot().entity_count("BRAND").unwrap(), 1);
    /// assert_eq!(pk, 1);
    /// ```
    pub fn update<T, F>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut CatalogTransaction) -> CoreResult<T>,
    {
        let mut transaction = self.begin_transaction()?;
        let result = f(&mut transaction)?;
        self.commit(transaction)?;
        Ok(result)
    }

    /// Switches a warming-up catalog to alive and checkpoints it.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidOperation`] when the catalog is already alive.
    pub fn go_live(&self) -> CoreResult<()> {
        self.ensure_writable()?;
        let mut writer = self.writer.lock();
        if writer.mode == CatalogMode::Alive {
            return Err(CoreError::invalid_operation(format!(
                "catalog `{}` is already alive",
                self.name
            )));
        }
        writer.mode = CatalogMode::Alive;
        self.alive.store(true, Ordering::Release);
        self.checkpoint(&mut writer)?;
        info!(catalog = %self.name, version = self.version().as_u64(), "catalog is alive");
        Ok(())
    }

    /// Writes a checkpoint of the current snapshot.
    pub fn flush(&self) -> CoreResult<()> {
        if self.is_read_only() || self.terminated.load(Ordering::Acquire) {
            return Ok(());
        }
        let mut writer = self.writer.lock();
        self.checkpoint(&mut writer)
    }

    fn checkpoint(&self, writer: &mut CatalogWriter) -> CoreResult<()> {
        let mode = writer.mode;
        let Some(storage) = writer.storage.as_mut() else {
            return Ok(());
        };
        let state = self.state.load_full();
        let next_wal = storage.wal_reference.next_file();
        persistence::write_snapshot(
            &storage.directory,
            &state,
            &SnapshotMeta {
                mode,
                sequences: self.sequences.snapshot(),
                last_transaction_id: TransactionId::new(self.last_transaction_id.load(Ordering::SeqCst)),
                wal: next_wal,
            },
        )?;

        let wal = open_wal(&storage.directory, &self.name, next_wal, &self.options)?;
        let previous = std::mem::replace(&mut storage.wal, wal);
        drop(previous);
        remove_file_if_exists(&storage.directory.join(storage.wal_reference.file_name(&self.name)))?;
        storage.wal_reference = next_wal;
        info!(
            catalog = %self.name,
            version = state.version().as_u64(),
            wal = %next_wal,
            "checkpoint written"
        );
        Ok(())
    }

    /// A copy of this catalog under `name`, one version ahead, written to
    /// `directory`. Used for rename and replace.
    ///
    /// The source stops accepting commits once the copy exists, so nothing
    /// acknowledged on it can miss the copy. [`Catalog::thaw`] undoes that
    /// when the rename or replace is abandoned.
    pub(crate) fn fork(&self, name: &str, directory: Option<PathBuf>) -> CoreResult<Self> {
        let writer = self.writer.lock();
        self.ensure_writable()?;
        let current = self.state.load_full();
        let mut state = CatalogState::clone(&current);
        state.rename(name);
        state.set_version(current.version().next());
        let forked = Self::from_state(
            state,
            PrimaryKeySequences::new(self.sequences.snapshot()),
            writer.mode,
            TransactionId::new(self.last_transaction_id.load(Ordering::SeqCst)),
            directory,
            self.options,
        )?;
        self.terminated.store(true, Ordering::Release);
        Ok(forked)
    }

    /// Stops accepting commits; a commit in progress finishes first.
    pub(crate) fn freeze(&self) {
        let _writer = self.writer.lock();
        self.terminated.store(true, Ordering::Release);
    }

    /// Accepts commits again after [`Catalog::fork`] or [`Catalog::freeze`]
    /// when the operation they prepared failed.
    pub(crate) fn thaw(&self) {
        self.terminated.store(false, Ordering::Release);
    }

    /// Registers `session` as the single writer of a warming-up catalog.
    pub(crate) fn claim_warmup_writer(&self, session: Uuid) -> CoreResult<()> {
        if !self.is_warming_up() {
            return Ok(());
        }
        let mut writer = self.warmup_writer.lock();
        match *writer {
            Some(current) if current != session => Err(CoreError::CatalogWarmingUp {
                catalog: self.name.clone(),
            }),
            _ => {
                *writer = Some(session);
                Ok(())
            }
        }
    }

    pub(crate) fn release_warmup_writer(&self, session: Uuid) {
        let mut writer = self.warmup_writer.lock();
        if *writer == Some(session) {
            *writer = None;
        }
    }

    /// Fails while a session is populating the warming-up catalog.
    pub(crate) fn ensure_no_warmup_writer(&self) -> CoreResult<()> {
        if self.is_warming_up() && self.warmup_writer.lock().is_some() {
            return Err(CoreError::CatalogWarmingUp {
                catalog: self.name.clone(),
            });
        }
        Ok(())
    }
}
