//! Unit tests for the worker registry under concurrent mutation

use distort_core::coordinator::{ConnectionId, WorkerInfo, WorkerRegistry};
use distort_core::protocol::WorkerClass;
use distort_core::DistortError;
use std::sync::Arc;
use std::thread;

fn worker(conn: u64, class: WorkerClass) -> WorkerInfo {
    WorkerInfo::new("10.0.0.1", 7000 + conn as u16, class, ConnectionId(conn))
}

#[test]
fn test_lookup_routes_by_extension() {
    let registry = WorkerRegistry::new(8);
    registry.register(worker(1, WorkerClass::Text)).unwrap();
    registry.register(worker(2, WorkerClass::Media)).unwrap();

    assert_eq!(registry.lookup_by_file_extension("notes.txt").unwrap().connection, ConnectionId(1));
    assert_eq!(registry.lookup_by_file_extension("photo.JPG").unwrap().connection, ConnectionId(2));
    assert_eq!(registry.lookup_by_file_extension("song.wav").unwrap().port, 7002);

    assert!(matches!(
        registry.lookup_by_file_extension("archive.zip"),
        Err(DistortError::InvalidMediaType { .. })
    ));
    assert!(matches!(
        registry.lookup_by_file_extension("no_extension"),
        Err(DistortError::InvalidMediaType { .. })
    ));
}

#[test]
fn test_removed_primary_is_not_replaced() {
    let registry = WorkerRegistry::new(8);
    assert!(registry.register(worker(1, WorkerClass::Media)).unwrap());
    assert!(!registry.register(worker(2, WorkerClass::Media)).unwrap());

    let removed = registry.unregister_by_connection(ConnectionId(1)).unwrap();
    assert_eq!(removed.len(), 1);
    assert_eq!(registry.len(), 1);

    assert!(registry.primary(WorkerClass::Media).is_none());
    assert!(matches!(
        registry.lookup_by_file_extension("photo.png"),
        Err(DistortError::RegistryMiss { .. })
    ));

    // a fresh registration claims the vacant slot
    assert!(registry.register(worker(3, WorkerClass::Media)).unwrap());
    assert_eq!(registry.primary(WorkerClass::Media).unwrap().connection, ConnectionId(3));
}

#[test]
fn test_unregister_unknown_connection() {
    let registry = WorkerRegistry::new(2);
    registry.register(worker(1, WorkerClass::Text)).unwrap();

    assert!(matches!(
        registry.unregister_by_connection(ConnectionId(9)),
        Err(DistortError::WorkerNotRegistered { connection: 9 })
    ));
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_capacity_is_enforced() {
    let registry = WorkerRegistry::new(2);
    registry.register(worker(1, WorkerClass::Text)).unwrap();
    registry.register(worker(2, WorkerClass::Text)).unwrap();

    assert!(matches!(
        registry.register(worker(3, WorkerClass::Media)),
        Err(DistortError::RegistryFull { capacity: 2 })
    ));
    assert!(registry.primary(WorkerClass::Media).is_none());
}

#[test]
fn test_concurrent_register_and_unregister() {
    let registry = Arc::new(WorkerRegistry::new(1024));
    let threads = 8;
    let per_thread = 50u64;

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let registry = registry.clone();
            thread::spawn(move || {
                for i in 0..per_thread {
                    let conn = t * per_thread + i;
                    let class = if conn % 2 == 0 { WorkerClass::Text } else { WorkerClass::Media };
                    registry.register(worker(conn, class)).unwrap();
                    // odd indices leave again straight away
                    if i % 2 == 1 {
                        registry.unregister_by_connection(ConnectionId(conn)).unwrap();
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(registry.len(), (threads * per_thread / 2) as usize);
    for w in registry.workers() {
        assert_eq!(w.connection.0 % 2, 0);
    }
    // the TEXT primary never left; every MEDIA worker did
    assert!(registry.lookup_by_file_extension("a.txt").is_ok());
    assert!(matches!(
        registry.lookup_by_file_extension("a.wav"),
        Err(DistortError::RegistryMiss { .. })
    ));
}
