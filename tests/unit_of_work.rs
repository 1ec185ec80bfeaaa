//! End-to-end behavior of units of work over a file-backed database.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use txscope::database::{
    BeginBehavior, CoordinatorSettings, DataSource, ErrorKind, ExecutionContext, Member,
    MemberRepository, NestingPolicy, PoolSettings, PooledConnection, ProviderError, SchemaManager,
    SqlitePool, TransactionCoordinator,
};
use txscope::{BalancePolicy, ConnectionProvider, DataAccessError, ErrorTranslator};
use txscope::SqliteErrorTranslator;

/// Provider wrapper that counts acquires and releases
struct CountingProvider {
    inner: SqlitePool,
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl CountingProvider {
    fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl ConnectionProvider for CountingProvider {
    fn acquire(&self, ctx: &ExecutionContext) -> Result<PooledConnection, ProviderError> {
        let conn = self.inner.acquire(ctx)?;
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(conn)
    }

    fn release(&self, conn: PooledConnection) {
        self.released.fetch_add(1, Ordering::SeqCst);
        self.inner.release(conn);
    }
}

/// Translator wrapper that counts translations
struct CountingTranslator {
    inner: SqliteErrorTranslator,
    calls: AtomicUsize,
}

impl CountingTranslator {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ErrorTranslator for CountingTranslator {
    fn translate(&self, operation: &str, statement: &str, error: rusqlite::Error) -> DataAccessError {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.translate(operation, statement, error)
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    provider: Arc<CountingProvider>,
    translator: Arc<CountingTranslator>,
    source: DataSource,
    members: MemberRepository,
    tx: TransactionCoordinator,
}

fn harness_with(pool: PoolSettings, coordinator: CoordinatorSettings) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("uow.sqlite3");

    let provider = Arc::new(CountingProvider {
        inner: SqlitePool::new(&path, pool),
        acquired: AtomicUsize::new(0),
        released: AtomicUsize::new(0),
    });
    let translator = Arc::new(CountingTranslator {
        inner: SqliteErrorTranslator::new(),
        calls: AtomicUsize::new(0),
    });

    {
        let ctx = ExecutionContext::new();
        let conn = provider.inner.acquire(&ctx).unwrap();
        SchemaManager::new(&conn).migrate().unwrap();
        provider.inner.release(conn);
    }

    let source = DataSource::new(provider.clone(), translator.clone());
    let members = MemberRepository::new(source.clone(), BalancePolicy::Unconstrained);
    let tx = TransactionCoordinator::new(source.clone(), coordinator);

    Harness {
        _dir: dir,
        provider,
        translator,
        source,
        members,
        tx,
    }
}

fn harness() -> Harness {
    harness_with(PoolSettings::default(), CoordinatorSettings::default())
}

#[test]
fn autonomous_operations_lease_and_release_one_connection_each() {
    let h = harness();
    let ctx = ExecutionContext::new();

    h.members.create(&ctx, &Member::new("memberA", 10000)).unwrap();
    assert_eq!(h.provider.acquired(), 1);
    assert_eq!(h.provider.released(), 1);

    h.members.read_by_key(&ctx, "memberA").unwrap();
    h.members.update_balance(&ctx, "memberA", 5).unwrap();
    h.members.delete(&ctx, "memberA").unwrap();
    assert_eq!(h.provider.acquired(), 4);
    assert_eq!(h.provider.released(), 4);
    assert!(h.source.registry().is_empty());
}

#[test]
fn operations_inside_unit_of_work_share_the_bound_connection() {
    let h = harness();
    let ctx = ExecutionContext::new();

    let uow = h.tx.begin(&ctx).unwrap();
    let bound = h.source.registry().lookup(ctx.id()).unwrap();

    h.members.create(&ctx, &Member::new("memberA", 10000)).unwrap();
    h.members.update_balance(&ctx, "memberA", 8000).unwrap();
    h.members.read_by_key(&ctx, "memberA").unwrap();

    assert_eq!(h.provider.acquired(), 1);
    assert_eq!(h.provider.released(), 0);
    assert!(h.source.registry().lookup(ctx.id()).unwrap().same_as(&bound));

    uow.commit().unwrap();
    assert_eq!(h.provider.released(), 1);
    assert!(bound.is_released());
}

#[test]
fn bindings_never_leak_between_concurrent_contexts() {
    let h = harness_with(
        PoolSettings::default(),
        CoordinatorSettings {
            begin_behavior: BeginBehavior::Deferred,
            ..Default::default()
        },
    );
    let seed = ExecutionContext::new();
    h.members.create(&seed, &Member::new("memberA", 1)).unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let tx = h.tx.clone();
            let members = h.members.clone();
            let source = h.source.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let ctx = ExecutionContext::new();
                let uow = tx.begin(&ctx).unwrap();
                members.read_by_key(&ctx, "memberA").unwrap();
                let mine = source.registry().lookup(ctx.id()).unwrap();

                barrier.wait();
                assert_eq!(source.registry().len(), 2);
                assert!(source.registry().lookup(ctx.id()).unwrap().same_as(&mine));
                barrier.wait();

                uow.commit().unwrap();
                mine
            })
        })
        .collect();

    let bound: Vec<_> = handles.into_iter().map(|t| t.join().unwrap()).collect();
    assert!(!bound[0].same_as(&bound[1]));
    assert!(h.source.registry().is_empty());
    assert_eq!(h.provider.acquired(), h.provider.released());
}

#[test]
fn failed_unit_of_work_leaves_no_trace() {
    let h = harness();
    let ctx = ExecutionContext::new();
    h.members.create(&ctx, &Member::new("memberA", 10000)).unwrap();

    let result = h.tx.execute(&ctx, |_uow| -> Result<(), DataAccessError> {
        h.members.create(&ctx, &Member::new("memberB", 10000))?;
        h.members.update_balance(&ctx, "memberA", 0)?;
        // duplicate key aborts the unit of work
        h.members.create(&ctx, &Member::new("memberA", 1))?;
        Ok(())
    });
    assert_eq!(result.unwrap_err().kind(), ErrorKind::ConstraintViolation);

    let other = ExecutionContext::new();
    assert_eq!(h.members.read_by_key(&other, "memberA").unwrap().money, 10000);
    assert!(h.members.read_by_key(&other, "memberB").unwrap_err().is_not_found());
    assert!(h.source.registry().is_empty());
    assert_eq!(h.provider.acquired(), h.provider.released());
}

#[test]
fn committed_writes_are_visible_to_other_contexts() {
    let h = harness();
    let writer = ExecutionContext::new();
    let reader = ExecutionContext::new();

    let uow = h.tx.begin(&writer).unwrap();
    h.members.create(&writer, &Member::new("memberA", 7)).unwrap();
    assert!(h.members.read_by_key(&reader, "memberA").unwrap_err().is_not_found());
    uow.commit().unwrap();

    assert_eq!(h.members.read_by_key(&reader, "memberA").unwrap().money, 7);
}

#[test]
fn constraint_violations_classify_the_same_way_every_time() {
    let h = harness();
    let ctx = ExecutionContext::new();
    h.members.create(&ctx, &Member::new("memberA", 1)).unwrap();

    for attempt in 1..=3 {
        let err = h.members.create(&ctx, &Member::new("memberA", 2)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConstraintViolation);
        assert_eq!(err.operation(), "create");
        assert!(!err.is_retryable());
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(h.translator.calls(), attempt);
    }
}

#[test]
fn not_found_bypasses_the_translator() {
    let h = harness();
    let ctx = ExecutionContext::new();

    let err = h.members.read_by_key(&ctx, "nobody").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(std::error::Error::source(&err).is_none());
    assert_eq!(h.translator.calls(), 0);
}

#[test]
fn every_acquired_connection_is_released_once() {
    let h = harness();
    let ctx = ExecutionContext::new();

    h.members.create(&ctx, &Member::new("memberA", 1)).unwrap();
    let _ = h.members.create(&ctx, &Member::new("memberA", 1));
    let _ = h.members.read_by_key(&ctx, "nobody");

    let uow = h.tx.begin(&ctx).unwrap();
    let _ = h.members.create(&ctx, &Member::new("memberA", 1));
    uow.rollback().unwrap();

    {
        let _dropped = h.tx.begin(&ctx).unwrap();
    }

    let _ = h.tx.execute(&ctx, |_uow| h.members.read_by_key(&ctx, "nobody"));

    assert_eq!(h.provider.acquired(), 6);
    assert_eq!(h.provider.released(), 6);
    assert!(h.source.registry().is_empty());
}

#[test]
fn nested_begin_is_rejected_by_default() {
    let h = harness();
    let ctx = ExecutionContext::new();

    let uow = h.tx.begin(&ctx).unwrap();
    let err = h.tx.begin(&ctx).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProgrammingUsage);
    assert_eq!(h.provider.acquired(), 1);

    uow.commit().unwrap();
}

#[test]
fn joined_unit_of_work_rolls_back_as_a_whole() {
    let h = harness_with(
        PoolSettings::default(),
        CoordinatorSettings {
            nesting: NestingPolicy::Join,
            ..Default::default()
        },
    );
    let ctx = ExecutionContext::new();

    let result = h.tx.execute(&ctx, |_outer| -> Result<(), DataAccessError> {
        h.members.create(&ctx, &Member::new("memberA", 1))?;
        let inner: Result<(), DataAccessError> = h.tx.execute(&ctx, |inner| {
            assert!(inner.is_joined());
            h.members.create(&ctx, &Member::new("memberA", 2))?;
            Ok(())
        });
        assert_eq!(inner.unwrap_err().kind(), ErrorKind::ConstraintViolation);
        Ok(())
    });

    assert_eq!(result.unwrap_err().kind(), ErrorKind::UnexpectedRollback);
    assert!(h.members.read_by_key(&ctx, "memberA").unwrap_err().is_not_found());
    assert_eq!(h.provider.acquired(), h.provider.released());
}

#[test]
fn cancelled_context_never_reaches_the_provider() {
    let h = harness();
    let ctx = ExecutionContext::with_timeout(Duration::ZERO);

    let err = h.members.read_by_key(&ctx, "memberA").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    let err = h.tx.begin(&ctx).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);

    assert_eq!(h.provider.acquired(), 0);
    assert!(h.source.registry().is_empty());
}

#[test]
fn exhausted_pool_is_a_retryable_error() {
    let h = harness_with(
        PoolSettings {
            max_size: 1,
            acquire_timeout: Duration::from_millis(50),
            ..Default::default()
        },
        CoordinatorSettings::default(),
    );
    let holder = ExecutionContext::new();
    let uow = h.tx.begin(&holder).unwrap();

    let other = ExecutionContext::new();
    let err = h.members.read_by_key(&other, "memberA").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransientConnectivity);
    assert!(err.is_retryable());

    uow.commit().unwrap();
    assert!(h.members.read_by_key(&other, "memberA").unwrap_err().is_not_found());
}

#[test]
fn leftover_joined_handle_cannot_touch_the_next_unit_of_work() {
    let h = harness_with(
        PoolSettings::default(),
        CoordinatorSettings {
            nesting: NestingPolicy::Join,
            ..Default::default()
        },
    );
    let ctx = ExecutionContext::new();

    let outer = h.tx.begin(&ctx).unwrap();
    h.members.create(&ctx, &Member::new("memberA", 1)).unwrap();
    let leftover = h.tx.begin(&ctx).unwrap();
    assert_eq!(outer.commit().unwrap_err().kind(), ErrorKind::ProgrammingUsage);
    assert!(h.members.read_by_key(&ctx, "memberA").unwrap_err().is_not_found());

    let next = h.tx.begin(&ctx).unwrap();
    h.members.create(&ctx, &Member::new("memberB", 2)).unwrap();
    drop(leftover);
    next.commit().unwrap();

    assert_eq!(h.members.read_by_key(&ctx, "memberB").unwrap().money, 2);
    assert!(h.source.registry().is_empty());
    assert_eq!(h.provider.acquired(), h.provider.released());
}
