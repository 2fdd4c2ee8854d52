//! Engine-wide catalog registry.
//!
//! [`EngineState`] is the persisted registry: which catalogs exist, which
//! are loaded and which are read-only. [`ExpandedEngineState`] pairs it with
//! the resolved catalog instances. Both are immutable; every transition
//! builds a new value that the engine swaps in whole.

use crate::catalog::Catalog;
use crate::error::{CoreError, CoreResult};
use crate::types::EngineVersion;
use crate::wal::{EngineOperation, LogFileRecordReference};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Layout version of the persisted engine state.
pub const ENGINE_STORAGE_PROTOCOL_VERSION: u32 = 1;

fn insert_sorted(names: &mut Vec<String>, name: &str) {
    if let Err(position) = names.binary_search_by(|n| n.as_str().cmp(name)) {
        names.insert(position, name.to_string());
    }
}

fn remove_sorted(names: &mut Vec<String>, name: &str) {
    if let Ok(position) = names.binary_search_by(|n| n.as_str().cmp(name)) {
        names.remove(position);
    }
}

fn contains_sorted(names: &[String], name: &str) -> bool {
    names.binary_search_by(|n| n.as_str().cmp(name)).is_ok()
}

/// Persisted registry of the catalogs known to an engine.
///
/// Name lists are kept sorted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineState {
    /// Layout version.
    pub storage_protocol_version: u32,
    /// Incremented once per engine-level change.
    pub version: EngineVersion,
    /// Catalogs loaded at start-up.
    pub active_catalogs: Vec<String>,
    /// Catalogs kept on disk but not loaded.
    pub inactive_catalogs: Vec<String>,
    /// Catalogs rejecting writes.
    pub read_only_catalogs: Vec<String>,
    /// Engine WAL position up to which this state is complete.
    pub wal_file_reference: Option<LogFileRecordReference>,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            storage_protocol_version: ENGINE_STORAGE_PROTOCOL_VERSION,
            version: EngineVersion::default(),
            active_catalogs: Vec::new(),
            inactive_catalogs: Vec::new(),
            read_only_catalogs: Vec::new(),
            wal_file_reference: None,
        }
    }
}

impl EngineState {
    /// Same catalogs with a new WAL reference and version.
    #[must_use]
    pub fn engine_state(&self, wal_file_reference: LogFileRecordReference, version: EngineVersion) -> Self {
        Self {
            version,
            wal_file_reference: Some(wal_file_reference),
            ..self.clone()
        }
    }

    /// Active and inactive catalog names, sorted.
    #[must_use]
    pub fn catalog_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .active_catalogs
            .iter()
            .chain(&self.inactive_catalogs)
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Returns `true` when `name` is registered, active or not.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.is_active(name) || self.is_inactive(name)
    }

    /// Returns `true` when `name` is loaded at start-up.
    #[must_use]
    pub fn is_active(&self, name: &str) -> bool {
        contains_sorted(&self.active_catalogs, name)
    }

    /// Returns `true` when `name` stays on disk only.
    #[must_use]
    pub fn is_inactive(&self, name: &str) -> bool {
        contains_sorted(&self.inactive_catalogs, name)
    }

    /// Returns `true` when `name` rejects writes.
    #[must_use]
    pub fn is_read_only(&self, name: &str) -> bool {
        contains_sorted(&self.read_only_catalogs, name)
    }

    fn remove(&mut self, name: &str) {
        remove_sorted(&mut self.active_catalogs, name);
        remove_sorted(&mut self.inactive_catalogs, name);
        remove_sorted(&mut self.read_only_catalogs, name);
    }

    fn rename(&mut self, from: &str, to: &str) {
        let active = self.is_active(from);
        let read_only = self.is_read_only(from);
        self.remove(from);
        self.remove(to);
        if active {
            insert_sorted(&mut self.active_catalogs, to);
        } else {
            insert_sorted(&mut self.inactive_catalogs, to);
        }
        if read_only {
            insert_sorted(&mut self.read_only_catalogs, to);
        }
    }

    /// The state after `operation`, at `version`.
    ///
    /// Used to replay engine WAL records written after the state was last
    /// persisted; touches nothing but the registry.
    #[must_use]
    pub fn apply(&self, operation: &EngineOperation, version: EngineVersion) -> Self {
        let mut next = self.clone();
        next.version = version;
        match operation {
            EngineOperation::DefineCatalog { name } | EngineOperation::ActivateCatalog { name } => {
                remove_sorted(&mut next.inactive_catalogs, name);
                insert_sorted(&mut next.active_catalogs, name);
            }
            EngineOperation::DeactivateCatalog { name } => {
                remove_sorted(&mut next.active_catalogs, name);
                insert_sorted(&mut next.inactive_catalogs, name);
            }
            EngineOperation::DeleteCatalog { name } => next.remove(name),
            EngineOperation::RenameCatalog { from, to } => next.rename(from, to),
            EngineOperation::ReplaceCatalog { replaced_by, replaced } => next.rename(replaced_by, replaced),
            EngineOperation::SetReadOnly { name, read_only } => {
                if *read_only {
                    insert_sorted(&mut next.read_only_catalogs, name);
                } else {
                    remove_sorted(&mut next.read_only_catalogs, name);
                }
            }
            EngineOperation::GoLive { .. } => {}
        }
        next
    }
}

/// Resolved instance behind a catalog name.
#[derive(Debug, Clone)]
pub enum CatalogContract {
    /// A loaded catalog.
    Live(Arc<Catalog>),
    /// Registered but not loaded.
    Inactive {
        /// Catalog name.
        name: String,
    },
    /// Failed to load; kept so the name stays listed.
    Corrupted {
        /// Catalog name.
        name: String,
        /// Why loading failed.
        cause: String,
    },
}

impl CatalogContract {
    /// Catalog name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Live(catalog) => catalog.name(),
            Self::Inactive { name } | Self::Corrupted { name, .. } => name,
        }
    }

    /// Returns `true` for a loaded catalog.
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live(_))
    }

    /// Returns `true` for a catalog that failed to load.
    #[must_use]
    pub fn is_corrupted(&self) -> bool {
        matches!(self, Self::Corrupted { .. })
    }

    /// The loaded catalog.
    ///
    /// # Errors
    ///
    /// [`CoreError::CatalogCorrupted`] or [`CoreError::CatalogInactive`].
    pub fn catalog(&self) -> CoreResult<&Arc<Catalog>> {
        match self {
            Self::Live(catalog) => Ok(catalog),
            Self::Inactive { name } => Err(CoreError::CatalogInactive { name: name.clone() }),
            Self::Corrupted { name, cause } => Err(CoreError::catalog_corrupted(name.clone(), cause.clone())),
        }
    }
}

/// An [`EngineState`] with its catalog names resolved to instances.
#[derive(Debug, Clone, Default)]
pub struct ExpandedEngineState {
    state: EngineState,
    catalogs: BTreeMap<String, CatalogContract>,
}

impl ExpandedEngineState {
    /// Pairs `state` with `catalogs`.
    ///
    /// Names listed in `state` without an instance resolve to `None`.
    pub fn create(state: EngineState, catalogs: impl IntoIterator<Item = CatalogContract>) -> Self {
        Self {
            state,
            catalogs: catalogs
                .into_iter()
                .map(|c| (c.name().to_string(), c))
                .collect(),
        }
    }

    /// The registry.
    #[must_use]
    pub fn engine_state(&self) -> &EngineState {
        &self.state
    }

    /// Registry version.
    #[must_use]
    pub fn version(&self) -> EngineVersion {
        self.state.version
    }

    /// Engine WAL position the registry is complete up to.
    #[must_use]
    pub fn wal_file_reference(&self) -> Option<LogFileRecordReference> {
        self.state.wal_file_reference
    }

    /// Instance behind `name`.
    #[must_use]
    pub fn get_catalog(&self, name: &str) -> Option<&CatalogContract> {
        self.catalogs.get(name)
    }

    /// Every resolved instance, in name order.
    pub fn catalogs(&self) -> impl Iterator<Item = &CatalogContract> {
        self.catalogs.values()
    }

    /// Registered catalog names, sorted.
    #[must_use]
    pub fn catalog_names(&self) -> Vec<String> {
        self.state.catalog_names()
    }

    /// Returns `true` when `name` rejects writes.
    #[must_use]
    pub fn is_read_only(&self, name: &str) -> bool {
        self.state.is_read_only(name)
    }

    /// Replaces or inserts the instance behind a name, same version.
    ///
    /// Activation is left alone: a name not registered yet is recorded as
    /// inactive, and promoting it takes [`ExpandedEngineStateBuilder::with_catalog`].
    #[must_use]
    pub fn with_updated_catalog_instance(&self, contract: CatalogContract) -> Self {
        let mut next = self.clone();
        let name = contract.name().to_string();
        if !next.state.contains(&name) {
            insert_sorted(&mut next.state.inactive_catalogs, &name);
        }
        next.catalogs.insert(name, contract);
        next
    }

    /// Starts staging a transition from this state.
    #[must_use]
    pub fn builder(&self) -> ExpandedEngineStateBuilder {
        ExpandedEngineStateBuilder {
            base: self.clone(),
            version: None,
            wal_file_reference: None,
            pending: Vec::new(),
        }
    }
}

#[derive(Debug)]
enum PendingOperation {
    WithCatalog(CatalogContract),
    WithoutCatalog(String),
    WithReadOnly(String),
    WithoutReadOnly(String),
}

/// Stages several registry changes and commits them as one version.
///
/// ```
/// use catalogdb_core::{CatalogContract, ExpandedEngineState};
///
/// let base = ExpandedEngineState::default();
/// let next = base
///     .builder()
///     .with_catalog(CatalogContract::Inactive { name: "a".into() })
///     .with_catalog(CatalogContract::Inactive { name: "b".into() })
///     .with_read_only_catalog("a")
///     .build();
/// assert_eq!(next.version().as_u64(), base.version().as_u64() + 1);
/// assert_eq!(next.catalog_names(), vec!["a", "b"]);
/// ```
#[derive(Debug)]
pub struct ExpandedEngineStateBuilder {
    base: ExpandedEngineState,
    version: Option<EngineVersion>,
    wal_file_reference: Option<LogFileRecordReference>,
    pending: Vec<PendingOperation>,
}

impl ExpandedEngineStateBuilder {
    /// Uses `version` instead of the next version.
    #[must_use]
    pub fn with_version(mut self, version: EngineVersion) -> Self {
        self.version = Some(version);
        self
    }

    /// Records a new engine WAL position.
    #[must_use]
    pub fn with_wal_file_reference(mut self, reference: LogFileRecordReference) -> Self {
        self.wal_file_reference = Some(reference);
        self
    }

    /// Registers an instance. Loaded catalogs become active, anything else
    /// inactive.
    #[must_use]
    pub fn with_catalog(mut self, contract: CatalogContract) -> Self {
        self.pending.push(PendingOperation::WithCatalog(contract));
        self
    }

    /// Unregisters a name and its instance.
    #[must_use]
    pub fn without_catalog(mut self, name: &str) -> Self {
        self.pending.push(PendingOperation::WithoutCatalog(name.to_string()));
        self
    }

    /// Marks a catalog read-only.
    #[must_use]
    pub fn with_read_only_catalog(mut self, name: &str) -> Self {
        self.pending.push(PendingOperation::WithReadOnly(name.to_string()));
        self
    }

    /// Clears the read-only mark of a catalog.
    #[must_use]
    pub fn without_read_only_catalog(mut self, name: &str) -> Self {
        self.pending.push(PendingOperation::WithoutReadOnly(name.to_string()));
        self
    }

    /// Applies the staged changes in order and bumps the version once.
    ///
    /// Without staged changes or an explicit version the version stays.
    #[must_use]
    pub fn build(self) -> ExpandedEngineState {
        let ExpandedEngineState { mut state, mut catalogs } = self.base;
        let staged = !self.pending.is_empty();
        for operation in self.pending {
            match operation {
                PendingOperation::WithCatalog(contract) => {
                    let name = contract.name().to_string();
                    if contract.is_live() {
                        remove_sorted(&mut state.inactive_catalogs, &name);
                        insert_sorted(&mut state.active_catalogs, &name);
                    } else {
                        remove_sorted(&mut state.active_catalogs, &name);
                        insert_sorted(&mut state.inactive_catalogs, &name);
                    }
                    catalogs.insert(name, contract);
                }
                PendingOperation::WithoutCatalog(name) => {
                    state.remove(&name);
                    catalogs.remove(&name);
                }
                PendingOperation::WithReadOnly(name) => insert_sorted(&mut state.read_only_catalogs, &name),
                PendingOperation::WithoutReadOnly(name) => remove_sorted(&mut state.read_only_catalogs, &name),
            }
        }
        state.version = match self.version {
            Some(version) => version,
            None if staged => state.version.next(),
            None => state.version,
        };
        if let Some(reference) = self.wal_file_reference {
            state.wal_file_reference = Some(reference);
        }
        ExpandedEngineState { state, catalogs }
    }
}
