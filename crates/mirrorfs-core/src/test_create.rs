// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use std::fs;

use crate::testing::{expect_status, Fixture};
use crate::{
    AccessMask, CreateOptions, CreateRequest, CreationDisposition, ErrorCode, FileAttributes,
    FileContext, HandleId,
};

const DISPOSITIONS: [CreationDisposition; 5] = [
    CreationDisposition::CreateNew,
    CreationDisposition::CreateAlways,
    CreationDisposition::OpenExisting,
    CreationDisposition::OpenAlways,
    CreationDisposition::TruncateExisting,
];

#[test]
fn test_create_new_twice_fails_the_second_time() {
    let fx = Fixture::new();
    let (first, ctx) = fx.create("\\new.txt", CreateRequest::new(CreationDisposition::CreateNew));
    expect_status(&first, ErrorCode::SUCCESS);
    assert!(!first.handle.is_none());
    assert_eq!(ctx.handle, first.handle);

    let (second, ctx2) = fx.create("\\new.txt", CreateRequest::new(CreationDisposition::CreateNew));
    expect_status(&second, ErrorCode::FILE_EXISTS);
    assert!(second.handle.is_none());
    assert!(ctx2.handle.is_none());
    fx.release("\\new.txt", ctx);
}

#[test]
fn test_create_new_directory_twice_fails_the_second_time() {
    let fx = Fixture::new();
    let (first, ctx) = fx.create("\\d", CreateRequest::directory(CreationDisposition::CreateNew));
    expect_status(&first, ErrorCode::SUCCESS);
    assert!(first.is_directory && ctx.is_directory);
    assert!(fx.host("\\d").is_dir());

    let (second, _) = fx.create("\\d", CreateRequest::directory(CreationDisposition::CreateNew));
    expect_status(&second, ErrorCode::FILE_EXISTS);
    fx.release("\\d", ctx);
}

#[test]
fn test_file_opened_as_directory_always_mismatches() {
    let fx = Fixture::new();
    fx.seed("\\plain.txt", b"data");
    for disposition in DISPOSITIONS {
        let (outcome, ctx) = fx.create("\\plain.txt", CreateRequest::directory(disposition));
        expect_status(&outcome, ErrorCode::DIRECTORY);
        assert!(ctx.handle.is_none(), "{disposition:?}");
    }
    assert_eq!(fs::read(fx.host("\\plain.txt")).unwrap(), b"data");
    assert_eq!(fx.fs.open_handles(), 0);
}

#[test]
fn test_directory_hint_from_context_also_mismatches() {
    let fx = Fixture::new();
    fx.seed("\\plain.txt", b"data");
    let mut ctx = FileContext {
        is_directory: true,
        ..FileContext::default()
    };
    let request = CreateRequest::new(CreationDisposition::OpenExisting)
        .with_options(CreateOptions::empty());
    let outcome = fx.fs.create_file("\\plain.txt", &request, &mut ctx);
    expect_status(&outcome, ErrorCode::DIRECTORY);
}

#[test]
fn test_directory_opened_as_non_directory_file_is_invalid() {
    let fx = Fixture::new();
    fs::create_dir(fx.host("\\dir")).unwrap();
    let (outcome, _) = fx.create("\\dir", CreateRequest::new(CreationDisposition::OpenExisting));
    expect_status(&outcome, ErrorCode::INVALID_DATA);
}

#[test]
fn test_existing_directory_opens_without_a_directory_flag() {
    let fx = Fixture::new();
    fs::create_dir(fx.host("\\dir")).unwrap();
    let request = CreateRequest::new(CreationDisposition::OpenExisting)
        .with_options(CreateOptions::empty());
    let (outcome, ctx) = fx.create("\\dir", request);
    expect_status(&outcome, ErrorCode::SUCCESS);
    assert!(ctx.is_directory);
    fx.release("\\dir", ctx);
}

#[test]
fn test_conflicting_directory_options_are_rejected() {
    let fx = Fixture::new();
    let request = CreateRequest::new(CreationDisposition::CreateNew)
        .with_options(CreateOptions::DIRECTORY_FILE | CreateOptions::NON_DIRECTORY_FILE);
    let (outcome, _) = fx.create("\\x", request);
    expect_status(&outcome, ErrorCode::INVALID_PARAMETER);
    assert!(!fx.host("\\x").exists());
}

#[test]
fn test_open_always_creates_then_reports_already_exists() {
    let fx = Fixture::new();
    let (created, ctx) = fx.create("\\oa.txt", CreateRequest::new(CreationDisposition::OpenAlways));
    expect_status(&created, ErrorCode::SUCCESS);
    assert!(created.is_success());
    fx.write("\\oa.txt", b"keep me", 0, &ctx);
    fx.release("\\oa.txt", ctx);

    let (opened, ctx) = fx.create("\\oa.txt", CreateRequest::new(CreationDisposition::OpenAlways));
    expect_status(&opened, ErrorCode::ALREADY_EXISTS);
    assert!(opened.is_success());
    assert_eq!(fx.read_all("\\oa.txt", &ctx), b"keep me");
    fx.release("\\oa.txt", ctx);
}

#[test]
fn test_open_always_on_existing_directory_reports_already_exists() {
    let fx = Fixture::new();
    fs::create_dir(fx.host("\\dir")).unwrap();
    let (outcome, ctx) =
        fx.create("\\dir", CreateRequest::directory(CreationDisposition::OpenAlways));
    expect_status(&outcome, ErrorCode::ALREADY_EXISTS);
    assert!(ctx.is_directory);
    fx.release("\\dir", ctx);
}

#[test]
fn test_create_always_truncates_and_reports_already_exists() {
    let fx = Fixture::new();
    fx.seed("\\ca.txt", b"old contents");
    let (outcome, ctx) =
        fx.create("\\ca.txt", CreateRequest::new(CreationDisposition::CreateAlways));
    expect_status(&outcome, ErrorCode::ALREADY_EXISTS);
    assert!(fx.read_all("\\ca.txt", &ctx).is_empty());
    fx.release("\\ca.txt", ctx);
}

#[test]
fn test_truncate_existing_requires_the_target() {
    let fx = Fixture::new();
    let (missing, _) = fx.create(
        "\\none.txt",
        CreateRequest::new(CreationDisposition::TruncateExisting),
    );
    expect_status(&missing, ErrorCode::FILE_NOT_FOUND);

    fx.seed("\\t.txt", b"12345");
    let (outcome, ctx) = fx.create(
        "\\t.txt",
        CreateRequest::new(CreationDisposition::TruncateExisting),
    );
    expect_status(&outcome, ErrorCode::SUCCESS);
    assert_eq!(fs::metadata(fx.host("\\t.txt")).unwrap().len(), 0);
    fx.release("\\t.txt", ctx);
}

#[test]
fn test_open_existing_missing_file_and_missing_parent() {
    let fx = Fixture::new();
    let (outcome, _) = fx.create("\\absent", CreateRequest::new(CreationDisposition::OpenExisting));
    expect_status(&outcome, ErrorCode::FILE_NOT_FOUND);

    let (outcome, _) = fx.create(
        "\\no\\such\\dir.txt",
        CreateRequest::new(CreationDisposition::CreateNew),
    );
    expect_status(&outcome, ErrorCode::PATH_NOT_FOUND);
}

#[test]
fn test_create_always_refuses_to_overwrite_hidden_file() {
    let fx = Fixture::new();
    let ctx = fx.open("\\secret.txt", CreationDisposition::CreateNew);
    fx.write("\\secret.txt", b"hidden data", 0, &ctx);
    assert_eq!(
        fx.fs.set_file_attributes("\\secret.txt", FileAttributes::HIDDEN.bits(), &ctx),
        Ok(())
    );
    fx.release("\\secret.txt", ctx);

    let request = CreateRequest::new(CreationDisposition::CreateAlways)
        .with_attributes(FileAttributes::NORMAL);
    let (outcome, _) = fx.create("\\secret.txt", request);
    expect_status(&outcome, ErrorCode::ACCESS_DENIED);
    assert_eq!(fs::read(fx.host("\\secret.txt")).unwrap(), b"hidden data");

    let request = CreateRequest::new(CreationDisposition::TruncateExisting)
        .with_attributes(FileAttributes::ARCHIVE);
    let (outcome, _) = fx.create("\\secret.txt", request);
    expect_status(&outcome, ErrorCode::ACCESS_DENIED);

    // Declaring the flag allows the overwrite.
    let request = CreateRequest::new(CreationDisposition::CreateAlways)
        .with_attributes(FileAttributes::HIDDEN);
    let (outcome, ctx) = fx.create("\\secret.txt", request);
    expect_status(&outcome, ErrorCode::ALREADY_EXISTS);
    assert!(fs::read(fx.host("\\secret.txt")).unwrap().is_empty());
    let info = fx.fs.get_file_information("\\secret.txt", &ctx).unwrap();
    assert_eq!(info.attributes, FileAttributes::HIDDEN);
    fx.release("\\secret.txt", ctx);
}

#[test]
fn test_system_file_is_protected_and_open_is_not() {
    let fx = Fixture::new();
    let request = CreateRequest::new(CreationDisposition::CreateNew)
        .with_attributes(FileAttributes::SYSTEM);
    let (outcome, ctx) = fx.create("\\sys.bin", request);
    expect_status(&outcome, ErrorCode::SUCCESS);
    fx.write("\\sys.bin", b"boot", 0, &ctx);
    fx.release("\\sys.bin", ctx);

    let (outcome, _) =
        fx.create("\\sys.bin", CreateRequest::new(CreationDisposition::CreateAlways));
    expect_status(&outcome, ErrorCode::ACCESS_DENIED);

    // Plain opens of a system file are fine.
    let (outcome, ctx) =
        fx.create("\\sys.bin", CreateRequest::new(CreationDisposition::OpenExisting));
    expect_status(&outcome, ErrorCode::SUCCESS);
    assert_eq!(fx.read_all("\\sys.bin", &ctx), b"boot");
    fx.release("\\sys.bin", ctx);
}

#[test]
fn test_read_only_file_cannot_be_opened_delete_on_close() {
    let fx = Fixture::new();
    let ctx = fx.open("\\ro.txt", CreationDisposition::CreateNew);
    assert_eq!(
        fx.fs.set_file_attributes("\\ro.txt", FileAttributes::READONLY.bits(), &ctx),
        Ok(())
    );
    fx.release("\\ro.txt", ctx);

    let request = CreateRequest::new(CreationDisposition::OpenExisting)
        .with_access(AccessMask::GENERIC_READ | AccessMask::DELETE)
        .with_options(CreateOptions::NON_DIRECTORY_FILE | CreateOptions::DELETE_ON_CLOSE);
    let (outcome, _) = fx.create("\\ro.txt", request);
    expect_status(&outcome, ErrorCode::FILE_READ_ONLY);
    assert!(fx.host("\\ro.txt").exists());
}

fn seed_read_only(fx: &Fixture, path: &str, contents: &[u8]) {
    fx.seed(path, contents);
    let ctx = fx.open(path, CreationDisposition::OpenExisting);
    assert_eq!(
        fx.fs.set_file_attributes(path, FileAttributes::READONLY.bits(), &ctx),
        Ok(())
    );
    fx.release(path, ctx);
}

#[test]
fn test_read_only_file_refuses_overwrite() {
    let fx = Fixture::new();
    seed_read_only(&fx, "\\keep.txt", b"keep");

    let overwrite = CreateRequest::new(CreationDisposition::CreateAlways)
        .with_attributes(FileAttributes::READONLY);
    let (outcome, ctx) = fx.create("\\keep.txt", overwrite);
    expect_status(&outcome, ErrorCode::ACCESS_DENIED);
    assert!(ctx.handle.is_none());

    let (outcome, _) =
        fx.create("\\keep.txt", CreateRequest::new(CreationDisposition::TruncateExisting));
    expect_status(&outcome, ErrorCode::ACCESS_DENIED);

    assert_eq!(fs::read(fx.host("\\keep.txt")).unwrap(), b"keep");
    assert_eq!(fx.fs.open_handles(), 0);
}

#[test]
fn test_read_only_file_refuses_write_access() {
    let fx = Fixture::new();
    seed_read_only(&fx, "\\keep.txt", b"keep");

    let writer = CreateRequest::new(CreationDisposition::OpenExisting)
        .with_access(AccessMask::GENERIC_WRITE);
    let (outcome, ctx) = fx.create("\\keep.txt", writer);
    expect_status(&outcome, ErrorCode::ACCESS_DENIED);
    assert_eq!(fx.fs.write_file("\\keep.txt", b"XX", 0, &ctx), Err(ErrorCode::INVALID_HANDLE));

    let reader = CreateRequest::new(CreationDisposition::OpenExisting)
        .with_access(AccessMask::GENERIC_READ);
    let (outcome, ctx) = fx.create("\\keep.txt", reader);
    expect_status(&outcome, ErrorCode::SUCCESS);
    assert_eq!(fx.read_all("\\keep.txt", &ctx), b"keep");
    assert_eq!(fx.fs.write_file("\\keep.txt", b"XX", 0, &ctx), Err(ErrorCode::ACCESS_DENIED));
    fx.release("\\keep.txt", ctx);
    assert_eq!(fs::read(fx.host("\\keep.txt")).unwrap(), b"keep");

    // Clearing the flag makes the file writable again.
    let (outcome, ctx) = fx.create(
        "\\keep.txt",
        CreateRequest::new(CreationDisposition::OpenExisting).with_access(AccessMask::GENERIC_READ),
    );
    expect_status(&outcome, ErrorCode::SUCCESS);
    assert_eq!(
        fx.fs.set_file_attributes("\\keep.txt", FileAttributes::NORMAL.bits(), &ctx),
        Ok(())
    );
    fx.release("\\keep.txt", ctx);
    let ctx = fx.open("\\keep.txt", CreationDisposition::OpenExisting);
    fx.write("\\keep.txt", b"XX", 0, &ctx);
    fx.release("\\keep.txt", ctx);
    assert_eq!(fs::read(fx.host("\\keep.txt")).unwrap(), b"XXep");
}

#[test]
fn test_delete_on_close_option_removes_file_at_cleanup() {
    let fx = Fixture::new();
    let request = CreateRequest::new(CreationDisposition::CreateNew)
        .with_options(CreateOptions::NON_DIRECTORY_FILE | CreateOptions::DELETE_ON_CLOSE);
    let (outcome, ctx) = fx.create("\\scratch.tmp", request);
    expect_status(&outcome, ErrorCode::SUCCESS);
    assert!(ctx.delete_on_close);
    assert!(fx.host("\\scratch.tmp").exists());

    fx.release("\\scratch.tmp", ctx);
    assert!(!fx.host("\\scratch.tmp").exists());
    assert_eq!(fx.fs.open_handles(), 0);
}

#[test]
fn test_requested_attributes_are_applied_on_creation() {
    let fx = Fixture::new();
    let request = CreateRequest::new(CreationDisposition::CreateNew)
        .with_attributes(FileAttributes::HIDDEN | FileAttributes::ARCHIVE);
    let (outcome, ctx) = fx.create("\\h.txt", request);
    expect_status(&outcome, ErrorCode::SUCCESS);
    let info = fx.fs.get_file_information("\\h.txt", &ctx).unwrap();
    assert_eq!(info.attributes, FileAttributes::HIDDEN | FileAttributes::ARCHIVE);
    fx.release("\\h.txt", ctx);

    // Opening an existing file leaves its attributes alone.
    let request = CreateRequest::new(CreationDisposition::OpenExisting)
        .with_attributes(FileAttributes::NORMAL);
    let (_, ctx) = fx.create("\\h.txt", request);
    let info = fx.fs.get_file_information("\\h.txt", &ctx).unwrap();
    assert_eq!(info.attributes, FileAttributes::HIDDEN | FileAttributes::ARCHIVE);
    fx.release("\\h.txt", ctx);
}

#[test]
fn test_sparse_attribute_is_recorded() {
    let fx = Fixture::new();
    let request = CreateRequest::new(CreationDisposition::CreateNew)
        .with_attributes(FileAttributes::SPARSE_FILE);
    let (outcome, ctx) = fx.create("\\sparse.img", request);
    expect_status(&outcome, ErrorCode::SUCCESS);
    let info = fx.fs.get_file_information("\\sparse.img", &ctx).unwrap();
    assert!(info.attributes.contains(FileAttributes::SPARSE_FILE));
    fx.release("\\sparse.img", ctx);
}

#[test]
fn test_bad_pathnames_are_rejected_before_any_work() {
    let fx = Fixture::new();
    for bad in ["\\..\\escape.txt", "\\a\\..\\..\\b", "\\star*.txt"] {
        let (outcome, ctx) = fx.create(bad, CreateRequest::new(CreationDisposition::CreateAlways));
        expect_status(&outcome, ErrorCode::BAD_PATHNAME);
        assert_eq!(ctx.handle, HandleId::NONE);
    }
    assert_eq!(fx.fs.open_handles(), 0);
}

#[test]
fn test_symlink_target_cannot_be_accessed() {
    let fx = Fixture::new();
    fx.seed("\\real.txt", b"x");
    std::os::unix::fs::symlink(fx.host("\\real.txt"), fx.host("\\link.txt")).unwrap();
    let (outcome, _) =
        fx.create("\\link.txt", CreateRequest::new(CreationDisposition::OpenExisting));
    expect_status(&outcome, ErrorCode::CANT_ACCESS_FILE);
}

#[test]
fn test_corrupt_attributes_degrade_to_restricted_handle() {
    let fx = Fixture::new();
    fx.seed("\\broken.dat", b"payload");
    crate::AttributeStore::store(fx.store.as_ref(), &fx.host("\\broken.dat"), b"\xff").unwrap();

    let (outcome, ctx) =
        fx.create("\\broken.dat", CreateRequest::new(CreationDisposition::OpenExisting));
    expect_status(&outcome, ErrorCode::FILE_CORRUPT);
    assert!(!outcome.is_success());
    assert!(!ctx.handle.is_none());

    // Metadata stays reachable; data does not.
    let info = fx.fs.get_file_information("\\broken.dat", &ctx).unwrap();
    assert_eq!(info.file_size, 7);
    assert_eq!(info.attributes, FileAttributes::NORMAL);
    let mut buf = [0u8; 7];
    assert_eq!(
        fx.fs.read_file("\\broken.dat", &mut buf, 0, &ctx),
        Err(ErrorCode::FILE_CORRUPT)
    );
    assert_eq!(
        fx.fs.write_file("\\broken.dat", b"x", 0, &ctx),
        Err(ErrorCode::FILE_CORRUPT)
    );
    fx.release("\\broken.dat", ctx);
    assert_eq!(fx.fs.open_handles(), 0);
}

#[test]
fn test_read_access_does_not_grant_write() {
    let fx = Fixture::new();
    fx.seed("\\r.txt", b"read me");
    let request = CreateRequest::new(CreationDisposition::OpenExisting)
        .with_access(AccessMask::GENERIC_READ);
    let (outcome, ctx) = fx.create("\\r.txt", request);
    expect_status(&outcome, ErrorCode::SUCCESS);
    assert_eq!(fx.read_all("\\r.txt", &ctx), b"read me");
    assert_eq!(
        fx.fs.write_file("\\r.txt", b"nope", 0, &ctx),
        Err(ErrorCode::ACCESS_DENIED)
    );
    fx.release("\\r.txt", ctx);
}

#[test]
fn test_kernel_create_request_round_trip_through_provider() {
    let fx = Fixture::new();
    // FILE_OPEN_IF with GENERIC_READ|GENERIC_WRITE, non-directory.
    let request = CreateRequest::from_kernel(0xC000_0000, 0x80, 0x7, 3, 0x40).unwrap();
    let (outcome, ctx) = fx.create("\\k.txt", request);
    expect_status(&outcome, ErrorCode::SUCCESS);
    fx.write("\\k.txt", b"kernel", 0, &ctx);
    fx.release("\\k.txt", ctx);
    assert_eq!(fs::read(fx.host("\\k.txt")).unwrap(), b"kernel");
}
