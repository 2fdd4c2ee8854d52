//! Client sessions.
//!
//! A [`Session`] pins the catalog snapshot current when it was opened and
//! reads from it until it commits. A read-write session stages its writes in
//! a [`CatalogTransaction`] begun on that snapshot, so it sees its own
//! changes but nothing committed by others in the meantime.
//!
//! Sessions idle longer than the engine's inactivity timeout are expired by
//! the sweep thread; a session is never expired while one of its calls is
//! running.

mod registry;
mod sweeper;

pub(crate) use registry::SessionRegistry;
pub(crate) use sweeper::SessionSweeper;

use crate::catalog::{Catalog, CatalogState, CatalogTransaction};
use crate::data::{Entity, UpsertEntity};
use crate::error::{CoreError, CoreResult};
use crate::schema::EntitySchema;
use crate::types::{CatalogVersion, PrimaryKey};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug)]
struct Activity {
    last: Instant,
    in_flight: usize,
    closed: bool,
}

#[derive(Debug)]
struct SessionInner {
    snapshot: Arc<CatalogState>,
    transaction: Option<CatalogTransaction>,
}

/// A client's view of one catalog.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    catalog: Arc<Catalog>,
    read_write: bool,
    inner: Mutex<SessionInner>,
    activity: Mutex<Activity>,
}

/// Marks a call in flight; the session counts as active until it drops.
struct ActivityGuard<'a> {
    session: &'a Session,
}

impl Drop for ActivityGuard<'_> {
    fn drop(&mut self) {
        let mut activity = self.session.activity.lock();
        activity.in_flight -= 1;
        activity.last = Instant::now();
    }
}

impl Session {
    pub(crate) fn new(catalog: Arc<Catalog>, read_write: bool) -> Self {
        let snapshot = catalog.snapshot();
        let session = Self {
            id: Uuid::new_v4(),
            catalog,
            read_write,
            inner: Mutex::new(SessionInner {
                snapshot,
                transaction: None,
            }),
            activity: Mutex::new(Activity {
                last: Instant::now(),
                in_flight: 0,
                closed: false,
            }),
        };
        info!(
            session = %session.id,
            catalog = session.catalog.name(),
            read_write,
            "session opened"
        );
        session
    }

    /// Session id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Name of the catalog the session works on.
    #[must_use]
    pub fn catalog_name(&self) -> &str {
        self.catalog.name()
    }

    /// Returns `true` for sessions that may write.
    #[must_use]
    pub fn is_read_write(&self) -> bool {
        self.read_write
    }

    /// Returns `true` once the session was closed or expired.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.activity.lock().closed
    }

    /// Time since the last call finished.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.activity.lock().last.elapsed()
    }

    fn enter(&self) -> CoreResult<ActivityGuard<'_>> {
        let mut activity = self.activity.lock();
        if activity.closed {
            return Err(CoreError::SessionClosed { id: self.id });
        }
        activity.in_flight += 1;
        activity.last = Instant::now();
        Ok(ActivityGuard { session: self })
    }

    /// Catalog version the session reads.
    pub fn catalog_version(&self) -> CoreResult<CatalogVersion> {
        let _guard = self.enter()?;
        Ok(self.inner.lock().snapshot.version())
    }

    /// The pinned snapshot, without the session's uncommitted changes.
    pub fn snapshot(&self) -> CoreResult<Arc<CatalogState>> {
        let _guard = self.enter()?;
        Ok(Arc::clone(&self.inner.lock().snapshot))
    }

    /// Runs `f` against what the session sees: the pinned snapshot plus its
    /// own uncommitted changes.
    pub fn query<T>(&self, f: impl FnOnce(&CatalogState) -> T) -> CoreResult<T> {
        let _guard = self.enter()?;
        let inner = self.inner.lock();
        Ok(match &inner.transaction {
            Some(transaction) => f(transaction.state()),
            None => f(&inner.snapshot),
        })
    }

    /// Entity `primary_key` of `entity_type` as the session sees it.
    pub fn get_entity(&self, entity_type: &str, primary_key: PrimaryKey) -> CoreResult<Option<Arc<Entity>>> {
        self.query(|state| state.get_entity(entity_type, primary_key))?
    }

    fn write<T>(&self, f: impl FnOnce(&mut CatalogTransaction) -> CoreResult<T>) -> CoreResult<T> {
        let _guard = self.enter()?;
        if !self.read_write {
            return Err(CoreError::read_only(format!("session {}", self.id)));
        }
        let mut inner = self.inner.lock();
        let mut transaction = match inner.transaction.take() {
            Some(transaction) => transaction,
            None => self.catalog.begin_transaction_at(&inner.snapshot)?,
        };
        let result = f(&mut transaction);
        inner.transaction = Some(transaction);
        result
    }

    /// Creates or updates an entity in the session's transaction.
    pub fn upsert_entity(&self, upsert: UpsertEntity) -> CoreResult<Arc<Entity>> {
        self.write(|txn| txn.upsert_entity(upsert))
    }

    /// Removes an entity in the session's transaction.
    pub fn delete_entity(&self, entity_type: &str, primary_key: PrimaryKey) -> CoreResult<bool> {
        self.write(|txn| txn.delete_entity(entity_type, primary_key))
    }

    /// Removes an entity with its hierarchy descendants in the session's
    /// transaction.
    pub fn delete_entity_and_its_hierarchy(
        &self,
        entity_type: &str,
        primary_key: PrimaryKey,
    ) -> CoreResult<Vec<PrimaryKey>> {
        self.write(|txn| txn.delete_entity_and_its_hierarchy(entity_type, primary_key))
    }

    /// Creates or replaces an entity schema in the session's transaction.
    pub fn update_entity_schema(&self, schema: EntitySchema) -> CoreResult<EntitySchema> {
        self.write(|txn| txn.update_entity_schema(schema))
    }

    /// Removes an entity type in the session's transaction.
    pub fn remove_entity_schema(&self, entity_type: &str) -> CoreResult<()> {
        self.write(|txn| txn.remove_entity_schema(entity_type))
    }

    /// Returns `true` while changes wait for commit.
    pub fn has_pending_changes(&self) -> CoreResult<bool> {
        let _guard = self.enter()?;
        Ok(self
            .inner
            .lock()
            .transaction
            .as_ref()
            .is_some_and(|t| !t.is_empty()))
    }

    /// Commits the pending changes and moves the session to the latest
    /// catalog version.
    ///
    /// A transaction that fails to commit is discarded and the session keeps
    /// its previous snapshot.
    pub fn commit(&self) -> CoreResult<CatalogVersion> {
        let _guard = self.enter()?;
        let mut inner = self.inner.lock();
        let Some(transaction) = inner.transaction.take() else {
            return Ok(inner.snapshot.version());
        };
        let version = self.catalog.commit(transaction)?;
        inner.snapshot = self.catalog.snapshot();
        debug!(session = %self.id, version = version.as_u64(), "session committed");
        Ok(version)
    }

    /// Discards the pending changes.
    pub fn rollback(&self) -> CoreResult<()> {
        let _guard = self.enter()?;
        self.inner.lock().transaction = None;
        Ok(())
    }

    /// Commits pending changes and closes the session. Closing twice is a
    /// no-op.
    pub fn close(&self) -> CoreResult<()> {
        {
            let mut activity = self.activity.lock();
            if activity.closed {
                return Ok(());
            }
            activity.closed = true;
        }
        let transaction = self.inner.lock().transaction.take();
        let result = match transaction {
            Some(transaction) => self.catalog.commit(transaction).map(|_| ()),
            None => Ok(()),
        };
        self.catalog.release_warmup_writer(self.id);
        info!(session = %self.id, catalog = self.catalog.name(), "session closed");
        result
    }

    /// Closes the session without committing when it has been idle for
    /// `timeout` and no call is running. Returns `true` when it expired.
    pub(crate) fn expire_if_idle(&self, timeout: Duration, now: Instant) -> bool {
        {
            let mut activity = self.activity.lock();
            if activity.closed
                || activity.in_flight > 0
                || now.saturating_duration_since(activity.last) < timeout
            {
                return false;
            }
            activity.closed = true;
        }
        self.inner.lock().transaction = None;
        self.catalog.release_warmup_writer(self.id);
        info!(session = %self.id, catalog = self.catalog.name(), "session expired");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogOptions;
    use crate::schema::{AttributeSchema, AttributeType};

    fn catalog() -> Arc<Catalog> {
        let catalog = Catalog::create("shop", None, CatalogOptions::default()).unwrap();
        catalog
            .update(|txn| {
                txn.update_entity_schema(
                    EntitySchema::new("PRODUCT")
                        .with_attribute(AttributeSchema::new("code", AttributeType::String).unique()),
                )
            })
            .unwrap();
        Arc::new(catalog)
    }

    fn product(code: &str) -> UpsertEntity {
        UpsertEntity::new("PRODUCT").attribute("code", code)
    }

    #[test]
    fn session_sees_own_writes_but_not_others() {
        let catalog = catalog();
        let reader = Session::new(Arc::clone(&catalog), false);
        let writer = Session::new(Arc::clone(&catalog), true);

        let entity = writer.upsert_entity(product("A")).unwrap();
        assert!(writer.get_entity("PRODUCT", entity.primary_key).unwrap().is_some());
        assert!(reader.get_entity("PRODUCT", entity.primary_key).unwrap().is_none());
        assert!(writer.has_pending_changes().unwrap());

        let version = writer.commit().unwrap();
        assert_eq!(writer.catalog_version().unwrap(), version);
        assert!(reader.get_entity("PRODUCT", entity.primary_key).unwrap().is_none());
        assert!(Session::new(catalog, false)
            .get_entity("PRODUCT", entity.primary_key)
            .unwrap()
            .is_some());
    }

    #[test]
    fn read_only_session_rejects_writes() {
        let session = Session::new(catalog(), false);
        assert!(matches!(
            session.upsert_entity(product("A")),
            Err(CoreError::ReadOnly { .. })
        ));
    }

    #[test]
    fn rollback_discards_changes() {
        let catalog = catalog();
        let session = Session::new(Arc::clone(&catalog), true);
        session.upsert_entity(product("A")).unwrap();
        session.rollback().unwrap();
        assert_eq!(session.query(|s| s.entity_count("PRODUCT")).unwrap().unwrap(), 0);
        let version = catalog.version();
        assert_eq!(session.commit().unwrap(), version);
    }

    #[test]
    fn close_commits_and_rejects_further_calls() {
        let catalog = catalog();
        let session = Session::new(Arc::clone(&catalog), true);
        session.upsert_entity(product("A")).unwrap();
        session.close().unwrap();
        session.close().unwrap();

        assert_eq!(catalog.snapshot().entity_count("PRODUCT").unwrap(), 1);
        assert!(matches!(session.snapshot(), Err(CoreError::SessionClosed { .. })));
    }

    #[test]
    fn idle_session_expires_without_committing() {
        let catalog = catalog();
        let session = Session::new(Arc::clone(&catalog), true);
        session.upsert_entity(product("A")).unwrap();

        let now = Instant::now();
        assert!(!session.expire_if_idle(Duration::from_secs(60), now));
        assert!(session.expire_if_idle(Duration::ZERO, now + Duration::from_millis(1)));
        assert!(session.is_closed());
        assert_eq!(catalog.snapshot().entity_count("PRODUCT").unwrap(), 0);
    }

    #[test]
    fn running_call_blocks_expiry() {
        let session = Session::new(catalog(), false);
        let guard = session.enter().unwrap();
        let later = Instant::now() + Duration::from_secs(3600);
        assert!(!session.expire_if_idle(Duration::ZERO, later));
        drop(guard);
        assert!(session.expire_if_idle(Duration::ZERO, later));
    }

    #[test]
    fn failed_commit_keeps_snapshot() {
        let catalog = catalog();
        let first = Session::new(Arc::clone(&catalog), true);
        let second = Session::new(Arc::clone(&catalog), true);
        first.upsert_entity(product("A")).unwrap();
        second.upsert_entity(product("A")).unwrap();
        first.commit().unwrap();

        let pinned = second.catalog_version().unwrap();
        assert!(second.commit().is_err());
        assert_eq!(second.catalog_version().unwrap(), pinned);
        assert!(!second.has_pending_changes().unwrap());
    }
}
