//! Multi-threaded behaviour of the gate, secure buffers and the vault.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use strongbox::crypto::Argon2Params;
use strongbox::errors::StrongboxError;
use strongbox::memory::SecureBuffer;
use strongbox::vault::{ExportOptions, Secret, SecretKind, SecretValue, SecretVault};

#[test]
fn concurrent_add_of_same_name_has_one_winner() {
    let vault = SecretVault::new();
    let start = Barrier::new(2);

    let results: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = ["first", "second"]
            .into_iter()
            .map(|value| {
                let vault = &vault;
                let start = &start;
                s.spawn(move || {
                    start.wait();
                    vault.add(Secret::text("a", value).unwrap())
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let wins = results.iter().filter(|r| r.is_ok()).count();
    let collisions = results
        .iter()
        .filter(|r| matches!(r, Err(StrongboxError::SecretAlreadyExists(_))))
        .count();
    assert_eq!((wins, collisions), (1, 1));
    assert_eq!(vault.len().unwrap(), 1);
}

#[test]
fn readers_and_writers_interleave_safely() {
    let vault = SecretVault::new();
    for i in 0..16 {
        vault.add(Secret::text(&format!("seed-{i}"), "v").unwrap()).unwrap();
    }

    thread::scope(|s| {
        for t in 0..4 {
            let vault = &vault;
            s.spawn(move || {
                for i in 0..25 {
                    let name = format!("t{t}-{i}");
                    vault.set(Secret::text(&name, "x").unwrap()).unwrap();
                    assert!(vault.contains(&name).unwrap());
                }
            });
        }
        for _ in 0..4 {
            let vault = &vault;
            s.spawn(move || {
                for i in 0..100 {
                    let name = format!("seed-{}", i % 16);
                    assert_eq!(vault.get(&name).unwrap().reveal_string().unwrap().as_str(), "v");
                }
            });
        }
    });

    assert_eq!(vault.len().unwrap(), 16 + 4 * 25);
}

#[test]
fn lazy_producer_runs_once_under_contention() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let vault = SecretVault::new();
    vault
        .add_lazy("slow", SecretKind::Text, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(10));
            Ok(SecretValue::text("made"))
        })
        .unwrap();

    thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                let secret = vault.get("slow").unwrap();
                assert_eq!(secret.reveal_string().unwrap().as_str(), "made");
            });
        }
    });

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn secure_buffer_serializes_access_across_threads() {
    let buffer = SecureBuffer::from_slice(&[0u8; 8]).unwrap();

    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..25 {
                    buffer
                        .with_access_mut(|bytes| {
                            let n = u64::from_le_bytes(<[u8; 8]>::try_from(&bytes[..]).unwrap());
                            bytes.copy_from_slice(&(n + 1).to_le_bytes());
                        })
                        .unwrap();
                }
            });
        }
    });

    let total = buffer
        .with_access(|bytes| u64::from_le_bytes(bytes.try_into().unwrap()))
        .unwrap();
    assert_eq!(total, 100);
    assert_eq!(buffer.access_count(), 101);
}

#[test]
fn export_during_writes_captures_a_consistent_snapshot() {
    const WRITES: usize = 40;
    let vault = SecretVault::new();
    let options = ExportOptions {
        argon2: Argon2Params::minimum(),
        ..ExportOptions::default()
    };

    let bundles = thread::scope(|s| {
        s.spawn(|| {
            // Each write adds `k<i>` then bumps `count` to `i`, one at a time.
            for i in 1..=WRITES {
                vault.add(Secret::text(&format!("k{i}"), &i.to_string()).unwrap()).unwrap();
                vault.set(Secret::text("count", &i.to_string()).unwrap()).unwrap();
            }
        });

        let exporter = s.spawn(|| {
            (0..4)
                .map(|_| vault.export(b"pw", &options).unwrap())
                .collect::<Vec<_>>()
        });
        exporter.join().unwrap()
    });

    for bundle in bundles {
        let restored = bundle.import(b"pw").unwrap();
        let count = match restored.get("count") {
            Ok(secret) => secret.reveal_string().unwrap().parse::<usize>().unwrap(),
            Err(StrongboxError::SecretNotFound(_)) => 0,
            Err(e) => panic!("unexpected error {e}"),
        };

        // Keys form a gap-free prefix; `count` lags by at most the one
        // write that was between its two steps.
        let keys = restored.len().unwrap() - usize::from(count > 0);
        assert!(keys == count || keys == count + 1, "keys {keys}, count {count}");
        for i in 1..=keys {
            let value = restored.get(&format!("k{i}")).unwrap().reveal_string().unwrap();
            assert_eq!(value.as_str(), i.to_string());
        }
    }

    assert_eq!(vault.len().unwrap(), WRITES + 1);
}
