use std::fs;

use queue_manager::{Config, Operation, QueueManager, StorageConfig};
use queue_manager_test::{self as test, TestFailure};

#[tokio::test]
async fn test_manager_from_config_file() {
    test::setup();
    let dir = test::tempdir();

    let storage_path = dir.path().join("values");
    let config_path = dir.path().join("config.yml");
    fs::write(
        &config_path,
        format!(
            "logging:\n  level: trace\nstorage:\n  type: filesystem\n  path: {}\n",
            storage_path.display()
        ),
    )
    .unwrap();

    let config = Config::get(Some(&config_path)).unwrap();
    assert_eq!(
        config.storage,
        StorageConfig::Filesystem {
            path: storage_path.clone()
        }
    );

    let manager = QueueManager::<String, TestFailure>::from_config(&config.storage).unwrap();
    let greeting = manager
        .request(
            "greeting",
            Some(Operation::new(|| async { Ok("hello".to_owned()) })),
        )
        .await
        .unwrap();
    assert_eq!(greeting, "hello");
    assert!(storage_path.is_dir());

    let restored = QueueManager::<String, TestFailure>::from_config(&config.storage).unwrap();
    assert_eq!(restored.peek("greeting").unwrap().as_deref(), Some("hello"));
}

#[test]
fn test_missing_config_file() {
    let dir = test::tempdir();
    assert!(Config::get(Some(&dir.path().join("nope.yml"))).is_err());
}
