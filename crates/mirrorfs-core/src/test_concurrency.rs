// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use crate::testing::Fixture;
use crate::{CreateRequest, CreationDisposition, ErrorCode, FileContext, HandleId};

const WORKERS: usize = 8;

#[test]
fn test_disjoint_writes_through_one_handle_all_land() {
    let fx = Fixture::new();
    let ctx = fx.open("\\blocks.bin", CreationDisposition::CreateNew);
    const BLOCK: usize = 4096;

    thread::scope(|s| {
        for worker in 0..WORKERS {
            let fx = &fx;
            s.spawn(move || {
                let block = vec![worker as u8 + 1; BLOCK];
                let offset = (worker * BLOCK) as u64;
                assert_eq!(fx.fs.write_file("\\blocks.bin", &block, offset, &ctx), Ok(BLOCK));
            });
        }
    });

    let contents = fx.read_all("\\blocks.bin", &ctx);
    assert_eq!(contents.len(), WORKERS * BLOCK);
    for (worker, chunk) in contents.chunks(BLOCK).enumerate() {
        assert!(chunk.iter().all(|&b| b == worker as u8 + 1), "block {worker} torn");
    }
    fx.release("\\blocks.bin", ctx);
    assert_eq!(fx.fs.open_handles(), 0);
    assert_eq!(fx.fs.locked_paths(), 0);
}

#[test]
fn test_readers_never_observe_a_partial_write() {
    let fx = Fixture::new();
    const LEN: usize = 64 * 1024;
    fx.seed("\\page.bin", &vec![b'A'; LEN]);
    let writer = fx.open("\\page.bin", CreationDisposition::OpenExisting);
    let reader = fx.open("\\page.bin", CreationDisposition::OpenExisting);

    thread::scope(|s| {
        let fx = &fx;
        s.spawn(move || {
            for round in 0..50 {
                let fill = if round % 2 == 0 { b'B' } else { b'A' };
                fx.write("\\page.bin", &vec![fill; LEN], 0, &writer);
            }
        });
        for _ in 0..3 {
            s.spawn(move || {
                let mut buf = vec![0u8; LEN];
                for _ in 0..50 {
                    assert_eq!(fx.fs.read_file("\\page.bin", &mut buf, 0, &reader), Ok(LEN));
                    let first = buf[0];
                    assert!(buf.iter().all(|&b| b == first), "read saw a torn page");
                }
            });
        }
    });

    fx.release("\\page.bin", writer);
    fx.release("\\page.bin", reader);
}

#[test]
fn test_racing_create_new_has_exactly_one_winner() {
    let fx = Fixture::new();
    let winners = AtomicUsize::new(0);

    thread::scope(|s| {
        for _ in 0..WORKERS {
            let (fx, winners) = (&fx, &winners);
            s.spawn(move || {
                let request = CreateRequest::new(CreationDisposition::CreateNew);
                let (outcome, ctx) = fx.create("\\race.txt", request);
                match outcome.status {
                    ErrorCode::SUCCESS => {
                        winners.fetch_add(1, Ordering::SeqCst);
                        fx.release("\\race.txt", ctx);
                    }
                    status => {
                        assert_eq!(status, ErrorCode::FILE_EXISTS);
                        assert!(ctx.handle.is_none());
                    }
                }
            });
        }
    });

    assert_eq!(winners.load(Ordering::SeqCst), 1);
    assert_eq!(fx.fs.open_handles(), 0);
}

#[test]
fn test_racing_directory_creation_has_exactly_one_winner() {
    let fx = Fixture::new();
    let winners = AtomicUsize::new(0);

    thread::scope(|s| {
        for _ in 0..WORKERS {
            let (fx, winners) = (&fx, &winners);
            s.spawn(move || {
                let request = CreateRequest::directory(CreationDisposition::CreateNew);
                let (outcome, ctx) = fx.create("\\made", request);
                if outcome.status == ErrorCode::SUCCESS {
                    winners.fetch_add(1, Ordering::SeqCst);
                } else {
                    assert_eq!(outcome.status, ErrorCode::FILE_EXISTS);
                }
                fx.release("\\made", ctx);
            });
        }
    });

    assert_eq!(winners.load(Ordering::SeqCst), 1);
    assert!(fx.host("\\made").is_dir());
}

#[test]
fn test_information_during_moves_sees_whole_files() {
    let fx = Fixture::new();
    fx.seed("\\left.txt", b"0123456789");
    let mover = FileContext {
        handle: HandleId(1),
        ..FileContext::default()
    };

    thread::scope(|s| {
        let fx = &fx;
        s.spawn(move || {
            for _ in 0..100 {
                assert_eq!(fx.fs.move_file("\\left.txt", "\\right.txt", false, &mover), Ok(()));
                assert_eq!(fx.fs.move_file("\\right.txt", "\\left.txt", false, &mover), Ok(()));
            }
        });
        for name in ["\\left.txt", "\\right.txt"] {
            s.spawn(move || {
                for _ in 0..200 {
                    match fx.fs.get_file_information(name, &mover) {
                        Ok(info) => assert_eq!(info.file_size, 10),
                        Err(status) => assert_eq!(status, ErrorCode::FILE_NOT_FOUND),
                    }
                }
            });
        }
    });

    assert!(fx.host("\\left.txt").exists());
    assert!(!fx.host("\\right.txt").exists());
    assert_eq!(fx.fs.locked_paths(), 0);
}

#[test]
fn test_crossing_renames_do_not_deadlock() {
    let fx = Fixture::new();
    fx.seed("\\p", b"p");
    let ctx = FileContext {
        handle: HandleId(1),
        ..FileContext::default()
    };

    thread::scope(|s| {
        let fx = &fx;
        for (from, to) in [("\\p", "\\q"), ("\\q", "\\p")] {
            s.spawn(move || {
                for _ in 0..200 {
                    match fx.fs.move_file(from, to, true, &ctx) {
                        Ok(()) => {}
                        Err(status) => assert_eq!(status, ErrorCode::FILE_NOT_FOUND),
                    }
                }
            });
        }
    });

    assert_ne!(fx.host("\\p").exists(), fx.host("\\q").exists());
    assert_eq!(fx.fs.locked_paths(), 0);
}

#[test]
fn test_delete_on_close_races_with_readers() {
    let fx = Fixture::new();
    fx.seed("\\doomed.txt", b"short lived");

    thread::scope(|s| {
        let fx = &fx;
        s.spawn(move || {
            let mut ctx = fx.open("\\doomed.txt", CreationDisposition::OpenExisting);
            assert_eq!(fx.fs.delete_file("\\doomed.txt", &ctx), Ok(()));
            ctx.delete_on_close = true;
            fx.release("\\doomed.txt", ctx);
        });
        for _ in 0..4 {
            s.spawn(move || {
                let ctx = FileContext {
                    handle: HandleId(u64::MAX),
                    ..FileContext::default()
                };
                let mut buf = [0u8; 32];
                for _ in 0..50 {
                    match fx.fs.read_file("\\doomed.txt", &mut buf, 0, &ctx) {
                        Ok(n) => assert_eq!(&buf[..n], b"short lived"),
                        Err(status) => assert_eq!(status, ErrorCode::FILE_NOT_FOUND),
                    }
                }
            });
        }
    });

    assert!(!fx.host("\\doomed.txt").exists());
    assert_eq!(fx.fs.open_handles(), 0);
    assert_eq!(fx.fs.locked_paths(), 0);
}
