//! The engine: catalog registry, lifecycle operations and sessions.

mod state;

pub use state::{
    CatalogContract, EngineState, ExpandedEngineState, ExpandedEngineStateBuilder,
    ENGINE_STORAGE_PROTOCOL_VERSION,
};

use crate::catalog::{Catalog, CatalogOptions, CatalogState, CatalogTransaction};
use crate::config::EngineConfig;
use crate::dir::{
    remove_dir_if_exists, remove_file_if_exists, replace_dir, write_atomic, StorageDir, ENGINE_WAL_PREFIX,
};
use crate::error::{CoreError, CoreResult};
use crate::session::{Session, SessionRegistry, SessionSweeper};
use crate::wal::{EngineOperation, EngineRecord, LogFileRecordReference, WalManager};
use arc_swap::ArcSwap;
use catalogdb_codec::{from_cbor, to_cbor};
use catalogdb_storage::{FileBackend, InMemoryBackend, StorageBackend};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Longest accepted catalog name.
pub const MAX_CATALOG_NAME_LENGTH: usize = 255;

/// Checks that `name` can be used as a catalog name and directory name.
///
/// Names are non-empty, at most [`MAX_CATALOG_NAME_LENGTH`] bytes, made of
/// ASCII letters, digits, `_` and `-`, and not `LOCK`.
pub fn validate_catalog_name(name: &str) -> CoreResult<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_CATALOG_NAME_LENGTH
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        && name != "LOCK";
    if valid {
        Ok(())
    } else {
        Err(CoreError::invalid_operation(format!(
            "`{name}` is not a valid catalog name"
        )))
    }
}

/// Engine WAL and the directory it lives in, guarded by the lifecycle lock.
#[derive(Debug)]
struct EngineWriter {
    dir: Option<StorageDir>,
    wal: WalManager,
    wal_reference: LogFileRecordReference,
    read_only: bool,
}

impl EngineWriter {
    fn open_wal(
        dir: Option<&StorageDir>,
        reference: LogFileRecordReference,
        read_only: bool,
    ) -> CoreResult<WalManager> {
        let backend: Box<dyn StorageBackend> = match dir {
            Some(dir) => {
                let path = dir.engine_wal_path(&reference.file_name(ENGINE_WAL_PREFIX));
                if !read_only {
                    Box::new(FileBackend::open(&path)?)
                } else if path.exists() {
                    Box::new(FileBackend::open_read_only(&path)?)
                } else {
                    Box::new(InMemoryBackend::new())
                }
            }
            None => Box::new(InMemoryBackend::new()),
        };
        // lifecycle records are rare, always sync them
        Ok(WalManager::new(backend, true))
    }

    fn persist(&self, state: &EngineState) -> CoreResult<()> {
        match &self.dir {
            Some(dir) if !self.read_only => write_atomic(&dir.engine_state_path(), &to_cbor(state)?),
            _ => Ok(()),
        }
    }

    /// Persists `state` against a fresh WAL file and drops the previous one.
    fn rotate(&mut self, state: &EngineState) -> CoreResult<EngineState> {
        if self.read_only {
            return Ok(state.clone());
        }
        let next = self.wal_reference.next_file();
        let rotated = state.engine_state(next, state.version);
        self.persist(&rotated)?;
        let wal = Self::open_wal(self.dir.as_ref(), next, false)?;
        drop(std::mem::replace(&mut self.wal, wal));
        if let Some(dir) = &self.dir {
            remove_file_if_exists(&dir.engine_wal_path(&self.wal_reference.file_name(ENGINE_WAL_PREFIX)))?;
        }
        debug!(wal = %next, "engine WAL rotated");
        self.wal_reference = next;
        Ok(rotated)
    }
}

/// An embedded catalog database.
///
/// The engine owns every catalog of its storage directory, tracks them in an
/// [`ExpandedEngineState`] that is replaced whole on each lifecycle
/// operation, and hands out [`Session`]s.
///
/// ```
/// use catalogdb_core::{Engine, EntitySchema, UpsertEntity};
///
/// let engine = Engine::open_in_memory().unwrap();
/// engine.define_catalog("shop").unwrap();
/// engine
///     .update_catalog("shop", |txn| {
///         txn.update_entity_schema(EntitySchema::new("BRAND"))?;
///         txn.upsert_entity(UpsertEntity::new("BRAND"))
///     })
///     .unwrap();
///
/// let session = engine.create_read_only_session("shop").unwrap();
/// assert_eq!(session.query(|s| s.entity_count("BRAND")).unwrap().unwrap(), 1);
/// ```
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    path: Option<PathBuf>,
    state: ArcSwap<ExpandedEngineState>,
    writer: Mutex<EngineWriter>,
    sessions: Arc<SessionRegistry>,
    sweeper: SessionSweeper,
    is_open: RwLock<bool>,
}

impl Engine {
    /// Opens the engine stored in `config.storage_directory`.
    ///
    /// Recovery runs in this order:
    /// 1. read `engine.state` and replay newer engine WAL records
    /// 2. finish interrupted catalog replacements and remove directories of
    ///    catalogs that are no longer registered
    /// 3. load active catalogs; one that fails to load is kept as
    ///    [`CatalogContract::Corrupted`] and does not stop the engine
    /// 4. start a fresh engine WAL file
    ///
    /// # Errors
    ///
    /// Lock contention, an unreadable engine state or engine WAL, and I/O
    /// errors.
    pub fn open(config: EngineConfig) -> CoreResult<Self> {
        let dir = StorageDir::open(&config.storage_directory, config.create_if_missing, config.read_only)?;
        let state_path = dir.engine_state_path();
        let mut state = if state_path.exists() {
            let state: EngineState = from_cbor(&fs::read(&state_path)?)?;
            if state.storage_protocol_version != ENGINE_STORAGE_PROTOCOL_VERSION {
                return Err(CoreError::invalid_format(format!(
                    "unsupported engine storage protocol version {}",
                    state.storage_protocol_version
                )));
            }
            state
        } else {
            EngineState::default()
        };

        let reference = state
            .wal_file_reference
            .unwrap_or(LogFileRecordReference::new(0));
        let wal = EngineWriter::open_wal(Some(&dir), reference, config.read_only)?;
        let mut replaced = BTreeSet::new();
        let mut replayed = 0usize;
        let end = {
            let mut records = wal.iter_from::<EngineRecord>(reference.start())?;
            for item in records.by_ref() {
                let (_, record) = item?;
                if record.engine_version <= state.version {
                    continue;
                }
                if let EngineOperation::ReplaceCatalog { replaced: name, .. } = &record.operation {
                    replaced.insert(name.clone());
                }
                state = state.apply(&record.operation, record.engine_version);
                replayed += 1;
            }
            records.offset()
        };
        if !config.read_only {
            let size = wal.size()?;
            if end < size {
                warn!(offset = end, size, "truncating torn engine WAL tail");
                wal.truncate(end)?;
            }
            Self::clean_directories(&dir, &state, &replaced)?;
        }

        let options = catalog_options(&config);
        let contracts: Vec<CatalogContract> = state
            .catalog_names()
            .iter()
            .map(|name| load_contract(&dir, &state, name, options))
            .collect();

        let mut writer = EngineWriter {
            dir: Some(dir),
            wal,
            wal_reference: reference,
            read_only: config.read_only,
        };
        let state = writer.rotate(&state)?;
        info!(
            path = %config.storage_directory.display(),
            version = state.version.as_u64(),
            catalogs = contracts.len(),
            replayed,
            read_only = config.read_only,
            "engine started"
        );
        let path = Some(config.storage_directory.clone());
        Self::start(config, path, ExpandedEngineState::create(state, contracts), writer)
    }

    /// Opens a volatile engine that never touches disk.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_in_memory_with_config(EngineConfig::default())
    }

    /// Opens a volatile engine; only the session and commit settings of
    /// `config` apply.
    pub fn open_in_memory_with_config(config: EngineConfig) -> CoreResult<Self> {
        let reference = LogFileRecordReference::new(0);
        let writer = EngineWriter {
            dir: None,
            wal: EngineWriter::open_wal(None, reference, false)?,
            wal_reference: reference,
            read_only: config.read_only,
        };
        info!("in-memory engine started");
        Self::start(config, None, ExpandedEngineState::default(), writer)
    }

    fn start(
        config: EngineConfig,
        path: Option<PathBuf>,
        state: ExpandedEngineState,
        writer: EngineWriter,
    ) -> CoreResult<Self> {
        let sessions = Arc::new(SessionRegistry::default());
        let sweeper = SessionSweeper::spawn(
            Arc::clone(&sessions),
            config.session_inactivity_timeout,
            config.session_sweep_interval,
        )?;
        Ok(Self {
            config,
            path,
            state: ArcSwap::from_pointee(state),
            writer: Mutex::new(writer),
            sessions,
            sweeper,
            is_open: RwLock::new(true),
        })
    }

    /// Finishes catalog replacements whose record was replayed and removes
    /// every directory that does not belong to a registered catalog.
    fn clean_directories(dir: &StorageDir, state: &EngineState, replaced: &BTreeSet<String>) -> CoreResult<()> {
        for name in replaced {
            let staged = dir.replacement_path(name);
            if staged.is_dir() && state.contains(name) {
                warn!(catalog = %name, "finishing interrupted catalog replacement");
                replace_dir(&staged, &dir.catalog_path(name))?;
            }
        }
        for name in dir.subdirectories()? {
            if !state.contains(&name) {
                warn!(directory = %name, "removing directory of unregistered catalog");
                remove_dir_if_exists(&dir.path().join(&name))?;
            }
        }
        Ok(())
    }

    // ========================================================================
    // State
    // ========================================================================

    /// Engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Storage directory; `None` for in-memory engines.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns `true` until [`close`](Self::close) is called.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    /// Returns `true` when the engine was opened read-only.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.config.read_only
    }

    /// The current registry snapshot.
    #[must_use]
    pub fn engine_state(&self) -> Arc<ExpandedEngineState> {
        self.state.load_full()
    }

    /// Every registered catalog name, loaded or not, sorted.
    #[must_use]
    pub fn catalog_names(&self) -> Vec<String> {
        self.state.load().catalog_names()
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CoreError::EngineClosed)
        }
    }

    fn ensure_writable(&self) -> CoreResult<()> {
        self.ensure_open()?;
        if self.config.read_only {
            return Err(CoreError::read_only("engine"));
        }
        Ok(())
    }

    fn contract(state: &ExpandedEngineState, name: &str) -> CoreResult<CatalogContract> {
        match state.get_catalog(name) {
            Some(contract) => Ok(contract.clone()),
            None if state.engine_state().contains(name) => Ok(CatalogContract::Inactive {
                name: name.to_string(),
            }),
            None => Err(CoreError::CatalogNotFound {
                name: name.to_string(),
            }),
        }
    }

    /// The loaded catalog `name`.
    ///
    /// # Errors
    ///
    /// [`CoreError::CatalogNotFound`], [`CoreError::CatalogInactive`] or
    /// [`CoreError::CatalogCorrupted`].
    pub fn catalog(&self, name: &str) -> CoreResult<Arc<Catalog>> {
        self.ensure_open()?;
        Self::contract(&self.state.load(), name)?.catalog().cloned()
    }

    /// Runs `f` against the current snapshot of catalog `name`.
    pub fn query_catalog<T>(&self, name: &str, f: impl FnOnce(&CatalogState) -> T) -> CoreResult<T> {
        let catalog = self.catalog(name)?;
        Ok(f(&catalog.snapshot()))
    }

    /// Runs `f` in a transaction on catalog `name` and commits it when `f`
    /// succeeds.
    ///
    /// # Errors
    ///
    /// Read-only engine or catalog, [`CoreError::CatalogWarmingUp`] while a
    /// session populates the catalog, and whatever `f` or the commit fail with.
    pub fn update_catalog<T, F>(&self, name: &str, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut CatalogTransaction) -> CoreResult<T>,
    {
        self.ensure_writable()?;
        let catalog = self.catalog(name)?;
        let writer = Uuid::new_v4();
        catalog.claim_warmup_writer(writer)?;
        let result = catalog.update(f);
        catalog.release_warmup_writer(writer);
        result
    }

    // ========================================================================
    // Catalog lifecycle
    // ========================================================================

    /// Appends `operation` to the engine WAL, then publishes the state staged
    /// by `stage` as the next engine version.
    fn transition<F>(&self, writer: &mut EngineWriter, operation: EngineOperation, stage: F) -> CoreResult<()>
    where
        F: FnOnce(ExpandedEngineStateBuilder) -> CoreResult<ExpandedEngineStateBuilder>,
    {
        let current = self.state.load_full();
        let version = current.version().next();
        let start = writer.wal.size()?;
        writer.wal.append(&EngineRecord {
            engine_version: version,
            operation: operation.clone(),
        })?;
        let staged = writer.wal.size().and_then(|end| {
            let next = stage(current.builder())?
                .with_version(version)
                .with_wal_file_reference(writer.wal_reference.at(end))
                .build();
            writer.persist(next.engine_state())?;
            Ok(next)
        });
        let next = match staged {
            Ok(next) => next,
            Err(e) => {
                // the caller sees a failure, so recovery must not replay the record
                if let Err(truncate) = writer.wal.truncate(start) {
                    warn!(operation = %operation, error = %truncate, "failed to roll back engine WAL record");
                }
                return Err(e);
            }
        };
        self.state.store(Arc::new(next));
        debug!(operation = %operation, version = version.as_u64(), "engine state changed");
        Ok(())
    }

    fn catalog_directory(writer: &EngineWriter, name: &str) -> CoreResult<Option<PathBuf>> {
        match &writer.dir {
            Some(dir) => {
                let path = dir.catalog_path(name);
                remove_dir_if_exists(&path)?;
                Ok(Some(path))
            }
            None => Ok(None),
        }
    }

    /// Creates an empty catalog in warm-up mode.
    ///
    /// # Errors
    ///
    /// Invalid names, [`CoreError::CatalogAlreadyExists`] and a read-only engine.
    pub fn define_catalog(&self, name: &str) -> CoreResult<Arc<Catalog>> {
        self.ensure_writable()?;
        validate_catalog_name(name)?;
        let mut writer = self.writer.lock();
        if self.state.load().engine_state().contains(name) {
            return Err(CoreError::CatalogAlreadyExists {
                name: name.to_string(),
            });
        }

        let directory = Self::catalog_directory(&writer, name)?;
        let catalog = Arc::new(Catalog::create(name, directory, catalog_options(&self.config))?);
        let contract = CatalogContract::Live(Arc::clone(&catalog));
        self.transition(
            &mut writer,
            EngineOperation::DefineCatalog {
                name: name.to_string(),
            },
            |builder| Ok(builder.with_catalog(contract)),
        )?;
        info!(catalog = name, "catalog defined");
        Ok(catalog)
    }

    /// Removes a catalog with all its files.
    ///
    /// Corrupted and inactive catalogs can be deleted too.
    pub fn delete_catalog(&self, name: &str) -> CoreResult<()> {
        self.ensure_writable()?;
        let mut writer = self.writer.lock();
        let contract = Self::contract(&self.state.load(), name)?;
        if let CatalogContract::Live(catalog) = &contract {
            catalog.ensure_no_warmup_writer()?;
        }

        self.transition(
            &mut writer,
            EngineOperation::DeleteCatalog {
                name: name.to_string(),
            },
            |builder| Ok(builder.without_catalog(name)),
        )?;
        if let CatalogContract::Live(catalog) = &contract {
            catalog.terminate();
        }
        if let Some(dir) = &writer.dir {
            remove_dir_if_exists(&dir.catalog_path(name))?;
        }
        info!(catalog = name, "catalog deleted");
        Ok(())
    }

    /// Renames a catalog. The renamed catalog is one version ahead and keeps
    /// all its indices; the files under the old name are removed.
    ///
    /// # Errors
    ///
    /// Unknown or unusable source, an existing target, a catalog that is
    /// warming up with an open session, and read-only engine or catalog.
    pub fn rename_catalog(&self, from: &str, to: &str) -> CoreResult<Arc<Catalog>> {
        self.ensure_writable()?;
        validate_catalog_name(to)?;
        let mut writer = self.writer.lock();
        let state = self.state.load_full();
        let catalog = Self::contract(&state, from)?.catalog()?.clone();
        if state.engine_state().contains(to) {
            return Err(CoreError::CatalogAlreadyExists { name: to.to_string() });
        }
        catalog.ensure_no_warmup_writer()?;

        let directory = Self::catalog_directory(&writer, to)?;
        let renamed = Arc::new(catalog.fork(to, directory)?);
        let contract = CatalogContract::Live(Arc::clone(&renamed));
        let read_only = state.is_read_only(from);
        let result = self.transition(
            &mut writer,
            EngineOperation::RenameCatalog {
                from: from.to_string(),
                to: to.to_string(),
            },
            |builder| {
                let builder = builder.without_catalog(from).with_catalog(contract);
                Ok(if read_only {
                    builder.with_read_only_catalog(to)
                } else {
                    builder
                })
            },
        );
        if let Err(e) = result {
            catalog.thaw();
            return Err(e);
        }
        if let Some(dir) = &writer.dir {
            remove_dir_if_exists(&dir.catalog_path(from))?;
        }
        info!(from, to, version = renamed.version().as_u64(), "catalog renamed");
        Ok(renamed)
    }

    /// Moves catalog `replaced_by` over `replaced`: the contents of
    /// `replaced_by` become available under the name `replaced`, one version
    /// ahead, and both previous catalogs disappear.
    pub fn replace_catalog(&self, replaced_by: &str, replaced: &str) -> CoreResult<Arc<Catalog>> {
        self.ensure_writable()?;
        if replaced_by == replaced {
            return Err(CoreError::invalid_operation(format!(
                "catalog `{replaced}` cannot replace itself"
            )));
        }
        let mut writer = self.writer.lock();
        let state = self.state.load_full();
        let source = Self::contract(&state, replaced_by)?.catalog()?.clone();
        let target = Self::contract(&state, replaced)?;
        source.ensure_no_warmup_writer()?;
        if let CatalogContract::Live(catalog) = &target {
            catalog.ensure_no_warmup_writer()?;
        }

        let options = catalog_options(&self.config);
        let paths = writer
            .dir
            .as_ref()
            .map(|dir| (dir.replacement_path(replaced), dir.catalog_path(replaced)));
        let replacement = match &paths {
            Some((staged, _)) => {
                remove_dir_if_exists(staged)?;
                // written fully before the record, reopened from its final place after
                drop(source.fork(replaced, Some(staged.clone()))?);
                None
            }
            None => Some(source.fork(replaced, None)?),
        };
        if let CatalogContract::Live(catalog) = &target {
            catalog.freeze();
        }
        let thaw = || {
            source.thaw();
            if let CatalogContract::Live(catalog) = &target {
                catalog.thaw();
            }
        };

        let mut published = None;
        let result = self.transition(
            &mut writer,
            EngineOperation::ReplaceCatalog {
                replaced_by: replaced_by.to_string(),
                replaced: replaced.to_string(),
            },
            |builder| {
                let catalog = match (replacement, paths) {
                    (Some(catalog), _) => catalog,
                    (None, Some((staged, path))) => {
                        replace_dir(&staged, &path)?;
                        Catalog::load(replaced, &path, options)?
                    }
                    (None, None) => {
                        return Err(CoreError::invalid_operation("replacement catalog is missing"))
                    }
                };
                let catalog = Arc::new(catalog);
                published = Some(Arc::clone(&catalog));
                Ok(builder
                    .without_catalog(replaced_by)
                    .without_catalog(replaced)
                    .with_catalog(CatalogContract::Live(catalog)))
            },
        );
        if let Err(e) = result {
            thaw();
            return Err(e);
        }
        if let Some(dir) = &writer.dir {
            remove_dir_if_exists(&dir.catalog_path(replaced_by))?;
        }
        let catalog = published.ok_or_else(|| CoreError::invalid_operation("replacement catalog is missing"))?;
        info!(replaced_by, replaced, version = catalog.version().as_u64(), "catalog replaced");
        Ok(catalog)
    }

    /// Switches a catalog between read-only and read-write. Setting the
    /// current flag again changes nothing.
    pub fn set_catalog_read_only(&self, name: &str, read_only: bool) -> CoreResult<()> {
        self.ensure_writable()?;
        let mut writer = self.writer.lock();
        let state = self.state.load_full();
        let contract = Self::contract(&state, name)?;
        if let CatalogContract::Corrupted { .. } = contract {
            contract.catalog()?;
        }
        if state.is_read_only(name) == read_only {
            return Ok(());
        }

        self.transition(
            &mut writer,
            EngineOperation::SetReadOnly {
                name: name.to_string(),
                read_only,
            },
            |builder| {
                Ok(if read_only {
                    builder.with_read_only_catalog(name)
                } else {
                    builder.without_read_only_catalog(name)
                })
            },
        )?;
        if let CatalogContract::Live(catalog) = &contract {
            catalog.set_read_only(read_only);
        }
        info!(catalog = name, read_only, "catalog read-only flag changed");
        Ok(())
    }

    /// Loads an inactive catalog.
    ///
    /// # Errors
    ///
    /// [`CoreError::CatalogCorrupted`] when its files cannot be loaded; the
    /// catalog then stays inactive.
    pub fn activate_catalog(&self, name: &str) -> CoreResult<Arc<Catalog>> {
        self.ensure_writable()?;
        let mut writer = self.writer.lock();
        let state = self.state.load_full();
        if !state.engine_state().is_inactive(name) {
            return Self::contract(&state, name)?.catalog().cloned();
        }

        let catalog = match &writer.dir {
            Some(dir) => Catalog::load(name, &dir.catalog_path(name), catalog_options(&self.config))
                .map_err(|e| CoreError::catalog_corrupted(name, e.to_string()))?,
            None => {
                return Err(CoreError::CatalogInactive {
                    name: name.to_string(),
                })
            }
        };
        if state.is_read_only(name) {
            catalog.set_read_only(true);
        }
        let catalog = Arc::new(catalog);
        let contract = CatalogContract::Live(Arc::clone(&catalog));
        self.transition(
            &mut writer,
            EngineOperation::ActivateCatalog {
                name: name.to_string(),
            },
            |builder| Ok(builder.with_catalog(contract)),
        )?;
        info!(catalog = name, "catalog activated");
        Ok(catalog)
    }

    /// Checkpoints and unloads a catalog, keeping its files.
    pub fn deactivate_catalog(&self, name: &str) -> CoreResult<()> {
        self.ensure_writable()?;
        let mut writer = self.writer.lock();
        let state = self.state.load_full();
        if writer.dir.is_none() {
            return Err(CoreError::invalid_operation(
                "catalogs of an in-memory engine cannot be deactivated",
            ));
        }
        let contract = Self::contract(&state, name)?;
        if state.engine_state().is_inactive(name) {
            return Ok(());
        }
        if let CatalogContract::Live(catalog) = &contract {
            catalog.ensure_no_warmup_writer()?;
            catalog.flush()?;
        }

        self.transition(
            &mut writer,
            EngineOperation::DeactivateCatalog {
                name: name.to_string(),
            },
            |builder| {
                Ok(builder.with_catalog(CatalogContract::Inactive {
                    name: name.to_string(),
                }))
            },
        )?;
        if let CatalogContract::Live(catalog) = &contract {
            catalog.terminate();
        }
        info!(catalog = name, "catalog deactivated");
        Ok(())
    }

    /// Ends the warm-up of a catalog; from now on its commits go through the WAL.
    pub fn go_live(&self, name: &str) -> CoreResult<()> {
        self.ensure_writable()?;
        let mut writer = self.writer.lock();
        let catalog = Self::contract(&self.state.load(), name)?.catalog()?.clone();
        catalog.ensure_no_warmup_writer()?;
        catalog.go_live()?;
        self.transition(
            &mut writer,
            EngineOperation::GoLive {
                name: name.to_string(),
            },
            Ok,
        )
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    /// Opens a session that reads the current snapshot of catalog `name`.
    pub fn create_read_only_session(&self, name: &str) -> CoreResult<Arc<Session>> {
        let catalog = self.catalog(name)?;
        let session = Arc::new(Session::new(catalog, false));
        self.sessions.insert(Arc::clone(&session));
        Ok(session)
    }

    /// Opens a session that may write to catalog `name`.
    ///
    /// # Errors
    ///
    /// Read-only engine or catalog, and [`CoreError::CatalogWarmingUp`] when
    /// another session already populates the catalog.
    pub fn create_read_write_session(&self, name: &str) -> CoreResult<Arc<Session>> {
        self.ensure_writable()?;
        let catalog = self.catalog(name)?;
        if catalog.is_read_only() {
            return Err(CoreError::read_only(format!("catalog `{name}`")));
        }
        let session = Arc::new(Session::new(Arc::clone(&catalog), true));
        catalog.claim_warmup_writer(session.id())?;
        self.sessions.insert(Arc::clone(&session));
        Ok(session)
    }

    /// An open session by id.
    #[must_use]
    pub fn session(&self, id: Uuid) -> Option<Arc<Session>> {
        self.sessions.get(id).filter(|s| !s.is_closed())
    }

    /// Number of sessions not yet collected by the sweep.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Closes the engine: stops the sweep thread, closes every session,
    /// checkpoints loaded catalogs and starts a fresh engine WAL file.
    ///
    /// Further calls fail with [`CoreError::EngineClosed`]. Closing twice is
    /// a no-op.
    pub fn close(&self) -> CoreResult<()> {
        let mut is_open = self.is_open.write();
        if !*is_open {
            return Ok(());
        }
        *is_open = false;
        drop(is_open);

        self.sweeper.stop();
        self.sessions.close_all();

        let mut writer = self.writer.lock();
        let state = self.state.load_full();
        let mut result = Ok(());
        for contract in state.catalogs() {
            if let CatalogContract::Live(catalog) = contract {
                if let Err(err) = catalog.flush() {
                    warn!(catalog = catalog.name(), error = %err, "checkpoint on close failed");
                    if result.is_ok() {
                        result = Err(err);
                    }
                }
            }
        }
        let rotated = writer.rotate(state.engine_state())?;
        self.state
            .store(Arc::new(ExpandedEngineState::create(rotated, state.catalogs().cloned())));
        info!("engine stopped");
        result
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn catalog_options(config: &EngineConfig) -> CatalogOptions {
    CatalogOptions {
        sync_on_commit: config.sync_on_commit,
        checkpoint_wal_size: config.checkpoint_wal_size,
        read_only: config.read_only,
    }
}

fn load_contract(dir: &StorageDir, state: &EngineState, name: &str, options: CatalogOptions) -> CatalogContract {
    if !state.is_active(name) {
        return CatalogContract::Inactive {
            name: name.to_string(),
        };
    }
    let path = dir.catalog_path(name);
    let loaded = if path.is_dir() {
        Catalog::load(name, &path, options)
    } else {
        Err(CoreError::invalid_format(format!(
            "catalog directory {} is missing",
            path.display()
        )))
    };
    match loaded {
        Ok(catalog) => {
            if state.is_read_only(name) {
                catalog.set_read_only(true);
            }
            CatalogContract::Live(Arc::new(catalog))
        }
        Err(err) => {
            warn!(catalog = name, error = %err, "catalog is corrupted");
            CatalogContract::Corrupted {
                name: name.to_string(),
                cause: err.to_string(),
            }
        }
    }
}
