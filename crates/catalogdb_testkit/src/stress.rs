//! Stress tests for CatalogDB.
//!
//! Writers insert products through read-write sessions of a live catalog
//! while a reader keeps sampling snapshots.

use crate::fixtures::PRODUCT;
use catalogdb_core::{CatalogVersion, CoreResult, Engine, PrimaryKey, UpsertEntity};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of concurrent writer threads.
    pub threads: usize,
    /// Products inserted by each writer, one commit per product.
    pub inserts_per_thread: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            inserts_per_thread: 250,
        }
    }
}

/// Outcome of [`stress_concurrent_inserts`].
#[derive(Debug, Clone, Default)]
pub struct StressReport {
    /// Primary key and commit version of every insert.
    pub commits: Vec<(PrimaryKey, CatalogVersion)>,
    /// Version and visible products of every snapshot the reader took.
    pub observations: Vec<(CatalogVersion, BTreeSet<PrimaryKey>)>,
    /// Wall time of the run.
    pub duration: Duration,
}

impl StressReport {
    /// Commits per second.
    pub fn commits_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.commits.len() as f64 / secs
        } else {
            0.0
        }
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Commits: {}", self.commits.len());
        println!("Snapshots observed: {}", self.observations.len());
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} commits/sec", self.commits_per_second());
    }
}

/// Inserts products into live catalog `catalog` from `config.threads`
/// threads while one reader samples snapshots until the writers finish.
///
/// # Errors
///
/// The first session or commit failure of any writer.
pub fn stress_concurrent_inserts(engine: &Engine, catalog: &str, config: &StressConfig) -> CoreResult<StressReport> {
    let start = Instant::now();
    let done = Arc::new(AtomicBool::new(false));
    let handle = engine.catalog(catalog)?;

    thread::scope(|scope| {
        let reader = {
            let done = Arc::clone(&done);
            let handle = Arc::clone(&handle);
            scope.spawn(move || {
                let mut observations = Vec::new();
                while !done.load(Ordering::Acquire) {
                    let snapshot = handle.snapshot();
                    let visible = snapshot
                        .collection(PRODUCT)
                        .map(|c| c.entities().map(|e| e.primary_key).collect())
                        .unwrap_or_default();
                    observations.push((snapshot.version(), visible));
                    thread::yield_now();
                }
                observations
            })
        };

        let writers: Vec<_> = (0..config.threads)
            .map(|t| {
                scope.spawn(move || -> CoreResult<Vec<(PrimaryKey, CatalogVersion)>> {
                    let session = engine.create_read_write_session(catalog)?;
                    let mut commits = Vec::with_capacity(config.inserts_per_thread);
                    for i in 0..config.inserts_per_thread {
                        let product = session
                            .upsert_entity(UpsertEntity::new(PRODUCT).attribute("code", format!("T{t}-{i}")))?;
                        let version = session.commit()?;
                        commits.push((product.primary_key, version));
                    }
                    session.close()?;
                    Ok(commits)
                })
            })
            .collect();

        let mut report = StressReport::default();
        let mut failure = None;
        for writer in writers {
            match writer.join() {
                Ok(Ok(commits)) => report.commits.extend(commits),
                Ok(Err(e)) => failure = failure.or(Some(e)),
                Err(panic) => std::panic::resume_unwind(panic),
            }
        }
        done.store(true, Ordering::Release);
        match reader.join() {
            Ok(observations) => report.observations = observations,
            Err(panic) => std::panic::resume_unwind(panic),
        }
        report.duration = start.elapsed();
        match failure {
            Some(e) => Err(e),
            None => Ok(report),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{define_live_shop, init_tracing, TestEngine};

    fn small() -> StressConfig {
        StressConfig {
            threads: 4,
            inserts_per_thread: 50,
        }
    }

    #[test]
    fn concurrent_inserts_get_distinct_dense_keys() {
        init_tracing();
        let engine = TestEngine::memory();
        define_live_shop(&engine, "shop").unwrap();
        let config = small();

        let report = stress_concurrent_inserts(&engine, "shop", &config).unwrap();

        let total = config.threads * config.inserts_per_thread;
        let keys: BTreeSet<PrimaryKey> = report.commits.iter().map(|(pk, _)| *pk).collect();
        assert_eq!(keys.len(), total);
        assert_eq!(keys, (1..=total as PrimaryKey).collect());

        let versions: BTreeSet<CatalogVersion> = report.commits.iter().map(|(_, v)| *v).collect();
        assert_eq!(versions.len(), total, "every commit publishes its own version");
        assert_eq!(
            engine.query_catalog("shop", |s| s.entity_count(PRODUCT)).unwrap().unwrap(),
            total
        );
    }

    #[test]
    fn snapshots_show_exactly_the_commits_up_to_their_version() {
        let engine = TestEngine::memory();
        define_live_shop(&engine, "shop").unwrap();

        let report = stress_concurrent_inserts(&engine, "shop", &small()).unwrap();

        for (version, visible) in &report.observations {
            let expected: BTreeSet<PrimaryKey> = report
                .commits
                .iter()
                .filter(|(_, committed)| committed <= version)
                .map(|(pk, _)| *pk)
                .collect();
            assert_eq!(visible, &expected, "snapshot at {version:?}");
        }
    }

    #[test]
    fn file_engine_keeps_every_insert_across_reopen() {
        let engine = TestEngine::file();
        define_live_shop(&engine, "shop").unwrap();
        let config = StressConfig {
            threads: 2,
            inserts_per_thread: 25,
        };

        let report = stress_concurrent_inserts(&engine, "shop", &config).unwrap();
        let last = report.commits.iter().map(|(_, v)| *v).max().unwrap();

        let engine = engine.reopen();
        let catalog = engine.catalog("shop").unwrap();
        assert_eq!(catalog.version(), last);
        assert_eq!(catalog.snapshot().entity_count(PRODUCT).unwrap(), 50);
    }
}
