mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use kical::{Config, Database, Driver, Error, Registry, SetOptions, StorageType};

const CONCURRENCY: usize = 16;

#[test]
fn concurrent_opens_share_one_bucket() {
    common::setup_logger();
    let registry = Arc::new(Registry::new(Config::new().temporary(true)));
    let barrier = Arc::new(Barrier::new(CONCURRENCY));

    let threads: Vec<_> = (0..CONCURRENCY)
        .map(|tn| {
            let registry = registry.clone();
            let barrier = barrier.clone();
            thread::Builder::new()
                .name(format!("opener {}", tn))
                .spawn(move || {
                    barrier.wait();
                    let bucket = registry.bucket("shared").unwrap();
                    bucket
                        .set(&tn.to_be_bytes(), b"seen", SetOptions::default())
                        .unwrap();
                })
                .expect("should be able to spawn thread")
        })
        .collect();

    for thread in threads {
        thread.join().unwrap();
    }

    assert_eq!(registry.bucket_names(), vec!["shared".to_string()]);
    assert_eq!(registry.open_bucket("shared").unwrap().len(), CONCURRENCY);
}

#[test]
fn racing_initializers_have_one_winner() {
    common::setup_logger();
    let db = common::temporary_db();
    let barrier = Arc::new(Barrier::new(CONCURRENCY));

    let threads: Vec<_> = (0..CONCURRENCY)
        .map(|tn| {
            let db = db.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                let st = if tn % 2 == 0 { StorageType::Kv } else { StorageType::Column };
                db.create_table("contested", st).map(|table| table.storage_type())
            })
        })
        .collect();

    let results: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();

    let winners = results
        .iter()
        .filter(|r| !matches!(r, Err(Error::AlreadyInitialized)))
        .count();
    assert_eq!(winners, 1);

    // whichever model won is the one every later open sees
    let resolved = db.table("contested").map(|t| t.storage_type());
    let winner = results
        .into_iter()
        .find(|r| !matches!(r, Err(Error::AlreadyInitialized)))
        .unwrap();
    assert_eq!(resolved, winner);
}

#[test]
fn buckets_are_locked_per_process() {
    common::setup_logger();
    let dir = tempdir::TempDir::new("buckets_are_locked").unwrap();
    let config = Config::new().path(dir.path());

    let first = Database::open(config.clone()).unwrap();
    first.create_table("t", StorageType::Kv).unwrap();

    // a second registry over the same directory cannot take the lock
    let registry = Arc::new(Registry::new(config.clone()));
    let second = Database::new(registry.clone(), config);
    assert!(matches!(second.table("t"), Err(Error::Io(_))));

    // the refused open is not cached
    assert!(registry.bucket_names().is_empty());

    drop(first);
    let table = second.table("t").unwrap();
    assert!(table.is_kv());
    assert_eq!(registry.bucket_names(), vec!["t".to_string()]);
}
