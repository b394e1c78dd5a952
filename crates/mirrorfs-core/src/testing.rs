// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Test-only fixtures for driving a provider over a scratch mirror root.

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use crate::attributes::{AttributeStore, MemoryStore};
use crate::config::MirrorConfig;
use crate::create::{CreateOutcome, CreateRequest};
use crate::dispatcher::MirrorFs;
use crate::status::ErrorCode;
use crate::types::{CreationDisposition, FileContext};

pub struct Fixture {
    pub dir: TempDir,
    pub fs: Arc<MirrorFs>,
    pub store: Arc<MemoryStore>,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let config = MirrorConfig::new(dir.path());
        let fs = MirrorFs::with_attribute_store(&config, store.clone() as Arc<dyn AttributeStore>)
            .expect("failed to build provider");
        Self {
            dir,
            fs: Arc::new(fs),
            store,
        }
    }

    /// Host path of a driver path such as `\a\b.txt`.
    pub fn host(&self, path: &str) -> PathBuf {
        let mut host = self.fs.root().to_path_buf();
        for part in path.split('\\').filter(|p| !p.is_empty()) {
            host.push(part);
        }
        host
    }

    pub fn create(&self, path: &str, request: CreateRequest) -> (CreateOutcome, FileContext) {
        let mut ctx = FileContext::for_process(1);
        let outcome = self.fs.create_file(path, &request, &mut ctx);
        (outcome, ctx)
    }

    /// Open an existing or new file read/write and return its context.
    pub fn open(&self, path: &str, disposition: CreationDisposition) -> FileContext {
        let (outcome, ctx) = self.create(path, CreateRequest::new(disposition));
        assert!(outcome.is_success(), "open {path}: {}", outcome.status);
        ctx
    }

    pub fn open_dir(&self, path: &str, disposition: CreationDisposition) -> FileContext {
        let (outcome, ctx) = self.create(path, CreateRequest::directory(disposition));
        assert!(outcome.is_success(), "open dir {path}: {}", outcome.status);
        ctx
    }

    /// Seed a file directly on the host.
    pub fn seed(&self, path: &str, contents: &[u8]) {
        let host = self.host(path);
        if let Some(parent) = host.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(host, contents).unwrap();
    }

    pub fn release(&self, path: &str, mut ctx: FileContext) {
        self.fs.cleanup(path, &mut ctx);
        self.fs.close_file(path, &mut ctx);
    }

    pub fn write(&self, path: &str, data: &[u8], offset: u64, ctx: &FileContext) {
        assert_eq!(self.fs.write_file(path, data, offset, ctx), Ok(data.len()));
    }

    pub fn read_all(&self, path: &str, ctx: &FileContext) -> Vec<u8> {
        let mut buf = vec![0u8; 64 * 1024];
        let n = self.fs.read_file(path, &mut buf, 0, ctx).unwrap();
        buf.truncate(n);
        buf
    }

    pub fn list(&self, path: &str) -> Vec<String> {
        let ctx = self.open_dir(path, CreationDisposition::OpenExisting);
        let mut names = Vec::new();
        assert_eq!(
            self.fs.find_files(path, &ctx, &mut |entry| names.push(entry.file_name)),
            Ok(())
        );
        self.release(path, ctx);
        names.sort();
        names
    }
}

pub fn expect_status(outcome: &CreateOutcome, status: ErrorCode) {
    assert_eq!(outcome.status, status, "expected {status}, got {}", outcome.status);
}
