//! Cross-process mutual exclusion through the coordinator: a second run
//! against a locked output root backs off, and a stale lock left by a dead
//! process is reclaimed without manual cleanup.

use std::fs;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use repocolumn::ingest::{
    errors::ReadError, BatchFetch, InMemoryObjectSource, IngestConfig, IngestionCoordinator,
    ObjectIdStream, ObjectKind, ObjectSource, OidBytes, RunOutcome,
};

/// Pairs a flag with its condvar for simple cross-thread rendezvous.
#[derive(Default)]
struct Flag {
    state: Mutex<bool>,
    cond: Condvar,
}

impl Flag {
    fn raise(&self) {
        *self.state.lock().unwrap() = true;
        self.cond.notify_all();
    }

    fn wait(&self) {
        let mut raised = self.state.lock().unwrap();
        while !*raised {
            raised = self.cond.wait(raised).unwrap();
        }
    }
}

/// Source whose history read parks until released, pinning a coordinator
/// inside its locked section at a deterministic point.
struct GatedSource {
    inner: InMemoryObjectSource,
    entered: Arc<Flag>,
    release: Arc<Flag>,
}

impl ObjectSource for GatedSource {
    fn history_sequence(&self) -> Result<u64, ReadError> {
        self.entered.raise();
        self.release.wait();
        self.inner.history_sequence()
    }

    fn head_object_id(&self) -> Result<OidBytes, ReadError> {
        self.inner.head_object_id()
    }

    fn changed_object_ids(&self, since: u64) -> Result<ObjectIdStream, ReadError> {
        self.inner.changed_object_ids(since)
    }

    fn open_batch_channel(&self) -> Result<Box<dyn BatchFetch + Send>, ReadError> {
        self.inner.open_batch_channel()
    }
}

fn one_commit_source() -> InMemoryObjectSource {
    let source = InMemoryObjectSource::new();
    source.push_history(
        1,
        OidBytes::sha1([0xc1; 20]),
        vec![repocolumn::ingest::source::test_object(
            0x01,
            ObjectKind::Commit,
            b"commit",
        )],
    );
    source
}

fn config() -> IngestConfig {
    IngestConfig {
        concurrency: 2,
        ..IngestConfig::default()
    }
}

#[test]
fn concurrent_run_against_locked_root_backs_off() {
    let dir = tempfile::tempdir().unwrap();
    let entered = Arc::new(Flag::default());
    let release = Arc::new(Flag::default());
    let gated = GatedSource {
        inner: one_commit_source(),
        entered: Arc::clone(&entered),
        release: Arc::clone(&release),
    };
    let store_a = repocolumn::ingest::InMemoryDedupStore::new();
    let store_b = repocolumn::ingest::InMemoryDedupStore::new();

    std::thread::scope(|scope| {
        let holder = scope.spawn(|| {
            let coordinator = IngestionCoordinator::new(&gated, &store_a, dir.path(), config());
            coordinator.run()
        });

        // The holder has the lock and is parked past acquisition.
        entered.wait();
        let lock_file = dir.path().join("ingest.lock");
        let deadline = Instant::now() + Duration::from_secs(5);
        while !lock_file.exists() {
            assert!(Instant::now() < deadline, "lock file never appeared");
            std::thread::sleep(Duration::from_millis(5));
        }

        let contender_source = one_commit_source();
        let contender =
            IngestionCoordinator::new(&contender_source, &store_b, dir.path(), config());
        assert!(matches!(contender.run().unwrap(), RunOutcome::LockBusy));

        release.raise();
        let outcome = holder.join().unwrap().unwrap();
        assert!(matches!(outcome, RunOutcome::Completed(_)));
    });

    // With the holder done, a run against its store sees the checkpoint it
    // wrote and short-circuits.
    let contender_source = one_commit_source();
    let contender = IngestionCoordinator::new(&contender_source, &store_a, dir.path(), config());
    assert!(matches!(contender.run().unwrap(), RunOutcome::NoChange));
    assert!(!dir.path().join("ingest.lock").exists());
}

#[test]
fn stale_lock_from_dead_process_is_reclaimed_by_the_next_run() {
    let dir = tempfile::tempdir().unwrap();
    // A pid above the kernel pid_max never refers to a live process.
    fs::write(dir.path().join("ingest.lock"), "3999999999 1700000000\n").unwrap();

    let source = one_commit_source();
    let store = repocolumn::ingest::InMemoryDedupStore::new();
    let coordinator = IngestionCoordinator::new(&source, &store, dir.path(), config());

    assert!(matches!(
        coordinator.run().unwrap(),
        RunOutcome::Completed(_)
    ));
    assert!(!dir.path().join("ingest.lock").exists());
}
