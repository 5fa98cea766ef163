use std::sync::Arc;
use std::time::Duration;

use queue_manager::{FsStorage, MemoryStorage, Operation, QueueManager, Storage};
use queue_manager_test::{self as test, CallCounter, TestFailure};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Release {
    version: String,
    downloads: u64,
}

fn fetch_release(
    counter: &CallCounter,
    downloads: u64,
    delay: Duration,
) -> Option<Operation<Release, TestFailure>> {
    let counter = counter.clone();
    Some(Operation::new(move || {
        counter.hit();
        test::resolve_after(
            delay,
            Release {
                version: "1.2.0".into(),
                downloads,
            },
        )
    }))
}

/// A value resolved by one manager is restored by a fresh manager using the same directory,
/// without running any operation.
#[tokio::test]
async fn test_restores_after_restart() {
    test::setup();
    let storage_dir = test::tempdir();

    let counter = CallCounter::new();
    {
        let storage = Arc::new(FsStorage::new(storage_dir.path()).unwrap());
        let manager = QueueManager::with_storage(storage);
        let release = manager
            .request(
                "release:latest",
                fetch_release(&counter, 0, Duration::from_millis(50)),
            )
            .await
            .unwrap();
        assert_eq!(release.downloads, 0);
    }
    assert_eq!(counter.count(), 1);

    let storage = Arc::new(FsStorage::new(storage_dir.path()).unwrap());
    let manager = QueueManager::<Release, TestFailure>::with_storage(storage);

    let peeked = manager.peek("release:latest").unwrap().unwrap();
    assert_eq!(peeked.version, "1.2.0");
    assert_eq!(peeked.downloads, 0);

    let requested = manager
        .request(
            "release:latest",
            fetch_release(&counter, 99, Duration::from_millis(50)),
        )
        .await
        .unwrap();
    assert_eq!(requested, peeked);
    assert_eq!(counter.count(), 1);
}

/// Managers sharing a storage backend pick up each other's values, but never each other's
/// in-flight runs.
#[tokio::test]
async fn test_shared_memory_storage() {
    test::setup();
    tokio::time::pause();

    let storage = Arc::new(MemoryStorage::new());
    let first = QueueManager::with_storage(storage.clone() as Arc<dyn Storage>);
    let second = QueueManager::with_storage(storage.clone() as Arc<dyn Storage>);

    let counter = CallCounter::new();
    let (a, b) = futures::join!(
        first.request(
            "release:latest",
            fetch_release(&counter, 1, Duration::from_millis(50)),
        ),
        second.request(
            "release:latest",
            fetch_release(&counter, 2, Duration::from_millis(80)),
        ),
    );
    assert_eq!(a.unwrap().downloads, 1);
    assert_eq!(b.unwrap().downloads, 2);
    assert_eq!(counter.count(), 2);

    // last write wins in the shared backend
    let third = QueueManager::<Release, TestFailure>::with_storage(storage);
    assert_eq!(third.peek("release:latest").unwrap().unwrap().downloads, 2);

    // while the managers keep serving their own value from memory
    assert_eq!(first.peek("release:latest").unwrap().unwrap().downloads, 1);
}
