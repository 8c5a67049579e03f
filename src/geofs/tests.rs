//! Volume-level behaviour: scenarios across files, views, branches,
//! quotas, permissions and persistence.

use core::ops::ControlFlow;

use super::record::{ContentHeader, RefRecord, ViewRecord, CONTENT_HEADER_SIZE, REF_RECORD_SIZE, VIEW_V1_SIZE};
use super::*;
use crate::drivers::RamDisk;
use crate::mm::HeapPages;
use crate::platform::{BlockDevice, SECTOR_SIZE};

fn volume() -> Volume<HeapPages> {
    Volume::create(HeapPages::new(), VolumeConfig::new(16, 16, 4)).unwrap()
}

fn read(vol: &Volume<HeapPages>, path: &str) -> Vec<u8> {
    vol.file_contents(path).unwrap().to_vec()
}

fn names(vol: &Volume<HeapPages>, dir: &str) -> Vec<String> {
    vol.children(dir).unwrap().into_iter().map(|e| e.name).collect()
}

/// Bytes LZ4 cannot shrink.
fn noise(seed: u8, len: usize) -> Vec<u8> {
    let mut x = 0x9E37_79B9_7F4A_7C15u64 ^ u64::from(seed);
    (0..len)
        .map(|_| {
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            (x >> 24) as u8
        })
        .collect()
}

/// Write `bytes` to consecutive sectors, zero-padding the last one.
fn put(disk: &mut RamDisk, lba: u64, bytes: &[u8]) {
    for (i, chunk) in bytes.chunks(SECTOR_SIZE).enumerate() {
        let mut sector = [0u8; SECTOR_SIZE];
        sector[..chunk.len()].copy_from_slice(chunk);
        disk.write_sector(0, lba + i as u64, &sector).unwrap();
    }
}

/// Writes, a layer, a hide: leaves view 2 current.
fn populate_time_travel(vol: &mut Volume<HeapPages>) {
    vol.file_write("/hello.txt", b"Hello from PhantomOS GeoFS!").unwrap();
    assert_eq!(vol.view_create(Some("Test Layer")), Ok(ViewId(1)));
    vol.file_write("/test.txt", b"GeoFS works!").unwrap();
    vol.view_hide("/test.txt").unwrap();
}

fn check_time_travel(vol: &mut Volume<HeapPages>) {
    assert_eq!(vol.view_current(), ViewId(2));
    assert!(!vol.exists("/test.txt"));
    assert_eq!(read(vol, "/hello.txt"), b"Hello from PhantomOS GeoFS!");

    vol.view_switch(ViewId(1)).unwrap();
    assert!(vol.exists("/test.txt"));
    assert_eq!(read(vol, "/test.txt"), b"GeoFS works!");

    vol.view_switch(ViewId(2)).unwrap();
    assert!(!vol.exists("/test.txt"));
    assert_eq!(vol.file_contents("/test.txt"), Err(GeoError::NotFound));
}

// ----------------------------------------------------------------------
// Scenarios
// ----------------------------------------------------------------------

#[test]
fn test_write_read_hide_time_travel() {
    let mut vol = Volume::create(HeapPages::new(), VolumeConfig::default()).unwrap();
    let mut buf = [0u8; 64];
    vol.file_write("/hello.txt", b"Hello from PhantomOS GeoFS!").unwrap();
    assert_eq!(vol.file_read("/hello.txt", &mut buf), Ok(27));
    assert_eq!(&buf[..27], b"Hello from PhantomOS GeoFS!");

    assert_eq!(vol.view_create(Some("Test Layer")), Ok(ViewId(1)));
    vol.file_write("/test.txt", b"GeoFS works!").unwrap();
    vol.view_hide("/test.txt").unwrap();
    check_time_travel(&mut vol);
}

#[test]
fn test_dedup() {
    let mut vol = volume();
    let h = vol.content_store(b"ABC").unwrap();
    assert_eq!(vol.stats().total_content_bytes, (3 + CONTENT_HEADER_SIZE) as u64);
    assert_eq!(vol.stats().dedup_hits, 0);

    assert_eq!(vol.content_store(b"ABC"), Ok(h));
    assert_eq!(vol.stats().total_content_bytes, (3 + CONTENT_HEADER_SIZE) as u64);
    assert_eq!(vol.stats().dedup_hits, 1);
    assert_eq!(vol.content_count(), 1);

    let mut small = [0u8; 2];
    assert_eq!(vol.content_read(&h, &mut small), Ok(3));
    assert_eq!(&small, b"AB");
    assert_eq!(vol.content_size(&h), Ok(3));
    assert_eq!(vol.content(&ContentHash::of(b"nope")), Err(GeoError::NotFound));
}

#[test]
fn test_compressed_content_round_trip() {
    let mut vol = volume();
    let text = b"the quick brown fox jumps over the lazy dog\n".repeat(50);
    let raw = noise(1, 512);
    vol.file_write("/fox.txt", &text).unwrap();
    vol.file_write("/tiny", &text[..COMPRESS_MIN_SIZE - 1]).unwrap();
    vol.file_write("/noise", &raw).unwrap();
    vol.file_write("/copy.txt", &text).unwrap();

    let s = vol.stats();
    assert_eq!((s.compressed_count, s.dedup_hits), (1, 1));
    assert!(s.compressed_bytes > text.len() as u64 / 2);
    assert_eq!(s.content_used, s.total_content_bytes);
    assert_eq!(
        s.total_content_bytes + s.compressed_bytes,
        (text.len() + COMPRESS_MIN_SIZE - 1 + raw.len() + 3 * CONTENT_HEADER_SIZE) as u64
    );

    assert_eq!(read(&vol, "/fox.txt"), text);
    assert_eq!(vol.file_stat("/fox.txt").unwrap().size, text.len() as u64);
    let mut buf = [0u8; 9];
    assert_eq!(vol.file_read("/fox.txt", &mut buf), Ok(text.len()));
    assert_eq!(&buf, b"the quick");
    assert_eq!(vol.file_grep("/", "lazy dog", false, |_| ControlFlow::Continue(())), Ok(101));

    let mut disk = RamDisk::new(1, 256);
    vol.save(&mut disk, 0, 0).unwrap();
    let loaded = Volume::load(HeapPages::new(), &mut disk, 0, 0).unwrap();
    let l = loaded.stats();
    assert_eq!(
        (l.compressed_count, l.compressed_bytes, l.total_content_bytes, l.content_used),
        (s.compressed_count, s.compressed_bytes, s.total_content_bytes, s.content_used)
    );
    assert_eq!(read(&loaded, "/fox.txt"), text);
    assert_eq!(read(&loaded, "/noise"), raw);
    assert_eq!(read(&loaded, "/tiny"), &text[..COMPRESS_MIN_SIZE - 1]);
    assert_eq!(loaded.file_stat("/copy.txt").unwrap().size, text.len() as u64);
}

#[test]
fn test_quota_charges_stored_size() {
    let mut vol = volume();
    vol.quota_set(QuotaTarget::Volume, Quota { max_content_bytes: 512, ..Quota::UNLIMITED })
        .unwrap();
    vol.set_context(AccessContext::user(3, 3));
    vol.file_write("/zeros", &[0u8; 4096]).unwrap();
    assert!(vol.stats().total_content_bytes < 512);
    assert_eq!(vol.file_write("/noise", &noise(2, 512)), Err(GeoError::QuotaExceeded));
    assert_eq!(read(&vol, "/zeros"), [0u8; 4096]);
}

#[test]
fn test_branch_merge_without_conflict() {
    let mut vol = volume();
    vol.file_write("/a", b"1").unwrap();
    let feature = vol.branch_create("feature").unwrap();
    assert_eq!(feature, BranchId(1));
    assert_eq!(vol.branch_info(feature).unwrap().base, vol.view_current());

    vol.branch_switch(feature).unwrap();
    vol.file_write("/b", b"2").unwrap();
    vol.branch_switch(BranchId::MAIN).unwrap();
    vol.file_write("/c", b"3").unwrap();

    let report = vol.branch_merge(feature, "m").unwrap();
    assert_eq!(report.conflict_count(), 0);
    assert_eq!(report.applied, 1);
    assert_eq!(vol.view_current(), report.view);
    assert_eq!(vol.branch_info(BranchId::MAIN).unwrap().head, report.view);
    assert_eq!(vol.view_info(report.view).unwrap().label, "m");
    for p in ["/a", "/b", "/c"] {
        assert!(vol.exists(p), "{} missing after merge", p);
    }
}

#[test]
fn test_merge_conflict_keeps_our_side() {
    let mut vol = volume();
    vol.file_write("/x", b"v0").unwrap();
    let other = vol.branch_create("other").unwrap();
    vol.file_write("/x", b"mainV").unwrap();
    vol.branch_switch(other).unwrap();
    vol.file_write("/x", b"otherV").unwrap();
    vol.branch_switch(BranchId::MAIN).unwrap();

    let report = vol.branch_merge(other, "m").unwrap();
    assert_eq!(report.conflict_count(), 1);
    assert_eq!(report.applied, 0);
    let c = &report.conflicts[0];
    assert_eq!(c.path, "/x");
    assert_eq!(c.ours, ContentHash::of(b"mainV"));
    assert_eq!(c.theirs, ContentHash::of(b"otherV"));
    assert_eq!(read(&vol, "/x"), b"mainV");
}

#[test]
fn test_save_load_round_trip() {
    let mut vol = volume();
    populate_time_travel(&mut vol);
    let mut disk = RamDisk::new(1, 4096);
    let sectors = vol.save(&mut disk, 0, 2048).unwrap();
    assert_eq!(disk.writes(), sectors);

    let mut loaded = Volume::load(HeapPages::new(), &mut disk, 0, 2048).unwrap();
    assert_eq!(loaded.views(), vol.views());
    assert_eq!(loaded.branches(), vol.branches());
    assert_eq!(loaded.content_count(), vol.content_count());
    let (a, b) = (loaded.stats(), vol.stats());
    assert_eq!(
        (a.total_content_bytes, a.total_refs, a.total_views, a.content_used, a.ref_used, a.view_used),
        (b.total_content_bytes, b.total_refs, b.total_views, b.content_used, b.ref_used, b.view_used)
    );
    assert_eq!(loaded.context(), AccessContext::kernel());
    check_time_travel(&mut loaded);
}

// ----------------------------------------------------------------------
// Views and branches
// ----------------------------------------------------------------------

#[test]
fn test_new_volume_has_genesis_and_main() {
    let vol = volume();
    let views = vol.views();
    assert_eq!(views.len(), 1);
    assert_eq!((views[0].id, views[0].parent, views[0].label.as_str()), (ViewId(0), ViewId(0), GENESIS_LABEL));
    let branches = vol.branches();
    assert_eq!(branches.len(), 1);
    assert_eq!(branches[0].name, MAIN_BRANCH_NAME);
    assert_eq!(vol.stats().total_branches, 1);
    assert_eq!(vol.stats().total_views, 1);
}

#[test]
fn test_view_create_default_label_and_no_switch() {
    let mut vol = volume();
    let v = vol.view_create(None).unwrap();
    assert_eq!(vol.view_info(v).unwrap().label, "View 1");
    assert_eq!(vol.view_current(), ViewId::GENESIS);
    assert_eq!(vol.view_switch(ViewId(42)), Err(GeoError::InvalidArgument));

    let mut seen = Vec::new();
    assert_eq!(vol.view_list(|v| {
        seen.push(v.id);
        ControlFlow::Continue(())
    }), 2);
    assert_eq!(seen, [ViewId(0), ViewId(1)]);
}

#[test]
fn test_implicit_commit_keeps_fork_point_immutable() {
    let mut vol = volume();
    vol.file_write("/a", b"a").unwrap();
    let feature = vol.branch_create("feature").unwrap();

    vol.file_write("/c", b"c").unwrap();
    let auto = vol.view_current();
    assert_ne!(auto, ViewId::GENESIS);
    assert_eq!(vol.view_info(auto).unwrap().label, AUTO_LABEL);
    assert_eq!(vol.branch_info(BranchId::MAIN).unwrap().head, auto);

    vol.branch_switch(feature).unwrap();
    assert_eq!(vol.view_current(), ViewId::GENESIS);
    assert!(vol.exists("/a"));
    assert!(!vol.exists("/c"));
}

#[test]
fn test_view_diff() {
    let mut vol = volume();
    vol.file_write("/a", b"a").unwrap();
    vol.file_write("/b", b"b").unwrap();
    vol.view_hide("/a").unwrap();
    vol.file_write("/b", b"B").unwrap();
    vol.file_write("/c", b"c").unwrap();

    let mut diff = Vec::new();
    let n = vol
        .view_diff(ViewId(0), ViewId(1), |d| {
            diff.push((d.path.clone(), d.kind));
            ControlFlow::Continue(())
        })
        .unwrap();
    assert_eq!(n, 3);
    assert_eq!(
        diff,
        [
            ("/a".to_string(), ChangeKind::Hidden),
            ("/b".to_string(), ChangeKind::Modified),
            ("/c".to_string(), ChangeKind::Added),
        ]
    );
    assert_eq!(vol.view_diff(ViewId(0), ViewId(9), |_| ControlFlow::Continue(())), Err(GeoError::InvalidArgument));
}

#[test]
fn test_branch_diff_reports_source_changes_only() {
    let mut vol = volume();
    vol.file_write("/a", b"1").unwrap();
    let feature = vol.branch_create("feature").unwrap();
    vol.branch_switch(feature).unwrap();
    vol.file_write("/b", b"2").unwrap();
    vol.branch_switch_name("main").unwrap();
    vol.file_write("/c", b"3").unwrap();

    let mut diff = Vec::new();
    vol.branch_diff(BranchId::MAIN, feature, |d| {
        diff.push((d.path.clone(), d.kind, d.content));
        ControlFlow::Continue(())
    })
    .unwrap();
    assert_eq!(diff, [("/b".to_string(), ChangeKind::Added, ContentHash::of(b"2"))]);
    assert_eq!(vol.branch_diff(BranchId::MAIN, BranchId(7), |_| ControlFlow::Continue(())), Err(GeoError::NotFound));
}

#[test]
fn test_merge_applies_source_hide_without_destroying_history() {
    let mut vol = volume();
    vol.file_write("/x", b"keep me").unwrap();
    let f = vol.branch_create("f").unwrap();
    vol.branch_switch(f).unwrap();
    vol.view_hide("/x").unwrap();
    vol.branch_switch(BranchId::MAIN).unwrap();
    assert!(vol.exists("/x"));

    let report = vol.branch_merge(f, "").unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(vol.view_info(report.view).unwrap().label, "Merge f");
    assert!(!vol.exists("/x"));

    vol.view_switch(ViewId::GENESIS).unwrap();
    assert_eq!(read(&vol, "/x"), b"keep me");
}

#[test]
fn test_branch_errors() {
    let mut vol = volume();
    assert_eq!(vol.branch_create(""), Err(GeoError::InvalidArgument));
    assert_eq!(vol.branch_create(&"n".repeat(64)), Err(GeoError::InvalidArgument));
    assert_eq!(vol.branch_create("a\0b"), Err(GeoError::InvalidArgument));
    assert!(vol.branch_create(&"n".repeat(63)).is_ok());
    assert_eq!(vol.branch_create("main"), Err(GeoError::AlreadyExists));

    assert_eq!(vol.branch_switch(BranchId(99)), Err(GeoError::NotFound));
    assert_eq!(vol.branch_switch_name("nope"), Err(GeoError::NotFound));
    assert_eq!(vol.branch_merge(BranchId(99), "m").unwrap_err(), GeoError::NotFound);
    assert_eq!(vol.branch_merge(BranchId::MAIN, "m").unwrap_err(), GeoError::InvalidArgument);
    assert_eq!(vol.branch_list(|_| ControlFlow::Break(())), 1);
}

// ----------------------------------------------------------------------
// Files
// ----------------------------------------------------------------------

#[test]
fn test_directory_listing() {
    let mut vol = volume();
    vol.mkdir("/docs").unwrap();
    vol.file_write("/docs/a.txt", b"aaa").unwrap();
    vol.file_write("/docs/sub/b.txt", b"bb").unwrap();
    vol.file_write("/top", b"t").unwrap();

    let root = vol.children("/").unwrap();
    assert_eq!(names(&vol, "/"), ["docs", "top"]);
    assert!(root[0].is_dir());
    assert_eq!(root[1].size, 1);

    let docs = vol.children("/docs").unwrap();
    assert_eq!((docs[0].name.as_str(), docs[0].size), ("a.txt", 3));
    assert_eq!((docs[1].name.as_str(), docs[1].file_type), ("sub", FileType::Directory));

    assert_eq!(vol.ref_list("/top", |_| ControlFlow::Continue(())), Err(GeoError::NotADirectory));
    assert_eq!(vol.ref_list("/", |_| ControlFlow::Break(())), Ok(1));
    assert_eq!(vol.children("relative"), Err(GeoError::InvalidArgument));
    assert!(vol.children("/nope").unwrap().is_empty());

    let mut walk = Vec::new();
    let n = vol
        .ref_list_recursive("/", 0, |e, depth| {
            walk.push((e.path.clone(), depth));
            ControlFlow::Continue(())
        })
        .unwrap();
    assert_eq!(n, 5);
    assert_eq!(
        walk,
        [
            ("/docs".to_string(), 0),
            ("/docs/a.txt".to_string(), 1),
            ("/docs/sub".to_string(), 1),
            ("/docs/sub/b.txt".to_string(), 2),
            ("/top".to_string(), 0),
        ]
    );
    assert_eq!(vol.ref_list_recursive("/", 1, |_, _| ControlFlow::Continue(())), Ok(2));

    vol.view_hide("/docs/a.txt").unwrap();
    assert_eq!(names(&vol, "/docs"), ["sub"]);
}

#[test]
fn test_directory_is_decided_by_file_type() {
    let mut vol = volume();
    vol.file_write("/fake", DIR_MARKER).unwrap();
    let st = vol.file_stat("/fake").unwrap();
    assert_eq!((st.file_type, st.size), (FileType::File, DIR_MARKER.len() as u64));
    assert_eq!(vol.file_write("/fake/x", b"x"), Err(GeoError::NotADirectory));

    vol.mkdir("/real").unwrap();
    assert!(vol.file_stat("/real").unwrap().is_dir());
    assert_eq!(vol.file_stat("/real").unwrap().size, 0);
    assert_eq!(vol.file_contents("/real"), Err(GeoError::IsADirectory));
    assert_eq!(vol.file_write("/real", b"x"), Err(GeoError::IsADirectory));
    assert_eq!(vol.mkdir("/real"), Err(GeoError::AlreadyExists));
    vol.file_write("/real/inside", b"ok").unwrap();
    assert_eq!(read(&vol, "/fake"), DIR_MARKER);
}

#[test]
fn test_invalid_paths() {
    let mut vol = volume();
    let long = format!("/{}", "a".repeat(MAX_PATH));
    let long_name = format!("/{}", "n".repeat(MAX_NAME));
    for bad in ["", "/", "relative", "/a//b", "/a/../b", "/a/./b", "/nul\0", long.as_str(), long_name.as_str()] {
        assert_eq!(vol.file_write(bad, b"x"), Err(GeoError::InvalidArgument), "{:?}", bad);
    }
    assert!(!vol.exists("relative"));
    assert_eq!(vol.ref_create("/h", &ContentHash::of(b"never stored")), Err(GeoError::NotFound));
}

#[test]
fn test_ref_create_and_resolve() {
    let mut vol = volume();
    let h = vol.content_store(b"payload").unwrap();
    vol.ref_create("/p", &h).unwrap();
    assert_eq!(vol.ref_resolve("/p"), Ok(h));
    assert_eq!(vol.ref_resolve("/q"), Err(GeoError::NotFound));
    assert!(vol.stats().total_lookups > 0);
}

#[test]
fn test_append_keeps_old_content() {
    let mut vol = volume();
    vol.file_write("/log", b"one").unwrap();
    vol.view_create(Some("before")).unwrap();
    vol.file_append("/log", b" two").unwrap();
    assert_eq!(read(&vol, "/log"), b"one two");
    assert_eq!(vol.content_count(), 2);

    vol.file_append("/fresh", b"x").unwrap();
    assert_eq!(read(&vol, "/fresh"), b"x");
    vol.mkdir("/dir").unwrap();
    assert_eq!(vol.file_append("/dir", b"x"), Err(GeoError::IsADirectory));
}

#[test]
fn test_rename_moves_and_hides() {
    let mut vol = volume();
    vol.file_write("/a", b"x").unwrap();
    vol.file_rename("/a", "/b").unwrap();
    assert!(!vol.exists("/a"));
    assert_eq!(read(&vol, "/b"), b"x");

    vol.file_write("/c", b"y").unwrap();
    assert_eq!(vol.file_rename("/b", "/c"), Err(GeoError::AlreadyExists));
    assert_eq!(vol.file_rename("/missing", "/z"), Err(GeoError::NotFound));

    vol.mkdir("/d").unwrap();
    vol.file_write("/d/f", b"z").unwrap();
    vol.file_rename("/d", "/e").unwrap();
    assert!(!vol.exists("/d") && !vol.exists("/d/f"));
    assert!(vol.file_stat("/e").unwrap().is_dir());
    assert_eq!(read(&vol, "/e/f"), b"z");
    assert_eq!(vol.file_rename("/e", "/e/sub"), Err(GeoError::InvalidArgument));
}

#[test]
fn test_copy_and_link_share_content() {
    let mut vol = volume();
    vol.file_write("/orig", b"shared").unwrap();
    let blocks = vol.content_count();

    vol.file_copy("/orig", "/dup").unwrap();
    assert_eq!(vol.content_count(), blocks);
    assert_eq!(read(&vol, "/dup"), b"shared");
    assert_eq!(vol.file_stat("/orig").unwrap().links, 2);
    assert_eq!(vol.file_copy("/orig", "/dup"), Err(GeoError::AlreadyExists));

    vol.file_link("/orig", "/hl").unwrap();
    assert_eq!(vol.file_stat("/hl").unwrap().links, 3);
    assert_eq!(vol.file_link("/nope", "/x"), Err(GeoError::NotFound));
}

#[test]
fn test_symlinks() {
    let mut vol = volume();
    vol.file_write("/target", b"data").unwrap();
    vol.file_symlink("/target", "/link").unwrap();
    assert_eq!(read(&vol, "/link"), b"data");
    assert_eq!(vol.file_readlink("/link").unwrap(), "/target");
    let st = vol.file_stat("/link").unwrap();
    assert_eq!((st.file_type, st.links), (FileType::Symlink, 1));
    assert_eq!(vol.file_readlink("/target"), Err(GeoError::InvalidArgument));
    assert_eq!(vol.file_symlink("/x", "/link"), Err(GeoError::AlreadyExists));

    vol.file_symlink("/l2", "/l1").unwrap();
    vol.file_symlink("/l1", "/l2").unwrap();
    assert_eq!(vol.ref_resolve("/l1"), Err(GeoError::SymlinkLoop));

    vol.file_symlink("/nowhere", "/dangling").unwrap();
    assert_eq!(vol.file_contents("/dangling"), Err(GeoError::NotFound));

    vol.file_write("/link", b"now a file").unwrap();
    assert_eq!(vol.file_stat("/link").unwrap().file_type, FileType::File);
    assert_eq!(read(&vol, "/target"), b"data");
}

#[test]
fn test_find_and_grep() {
    let mut vol = volume();
    vol.file_write("/src/main.rs", b"fn main() {\n    println!(\"Hello\");\n}\n").unwrap();
    vol.file_write("/src/lib.rs", b"pub mod hello;\n").unwrap();
    vol.file_write("/README.md", b"hello world\n").unwrap();
    vol.file_write("/blob", &[0xff, 0xfe, b'h']).unwrap();

    let mut found = Vec::new();
    let n = vol
        .file_find("/", "MAIN", |p| {
            found.push(p.to_string());
            ControlFlow::Continue(())
        })
        .unwrap();
    assert_eq!(n, 1);
    assert_eq!(found, ["/src/main.rs"]);

    let mut hits = Vec::new();
    let n = vol
        .file_grep("/", "hello", true, |m| {
            hits.push((m.path.to_string(), m.line_number));
            ControlFlow::Continue(())
        })
        .unwrap();
    assert_eq!(n, 3);
    assert_eq!(
        hits,
        [
            ("/README.md".to_string(), 1),
            ("/src/lib.rs".to_string(), 1),
            ("/src/main.rs".to_string(), 2),
        ]
    );
    assert_eq!(vol.file_grep("/", "Hello", false, |_| ControlFlow::Continue(())), Ok(1));
    assert_eq!(vol.file_grep("/src", "world", true, |_| ControlFlow::Continue(())), Ok(0));
    assert_eq!(vol.file_grep("/", "", true, |_| ControlFlow::Continue(())), Ok(0));
}

#[test]
fn test_find_filtered() {
    let mut vol = volume();
    vol.file_write("/logs/boot.log", &[b'x'; 300]).unwrap();
    vol.file_write("/logs/small.log", b"tiny").unwrap();
    vol.file_write("/home/user.log", &[b'y'; 120]).unwrap();
    vol.file_chown("/home/user.log", 1000).unwrap();
    vol.file_symlink("/logs/boot.log", "/latest.log").unwrap();

    let find = |vol: &Volume<HeapPages>, pattern: &str, filter: FindFilter| {
        let mut found = Vec::new();
        let n = vol
            .file_find_filtered("/", pattern, &filter, |m| {
                found.push((m.path.to_string(), m.size));
                ControlFlow::Continue(())
            })
            .unwrap();
        assert_eq!(n, found.len());
        found
    };

    let big = FindFilter { min_size: Some(100), ..FindFilter::default() };
    assert_eq!(
        find(&vol, ".LOG", big),
        [("/home/user.log".to_string(), 120), ("/logs/boot.log".to_string(), 300)]
    );

    let files_only = FindFilter {
        max_size: Some(200),
        file_type: Some(FileType::File),
        ..FindFilter::default()
    };
    assert_eq!(
        find(&vol, "log", files_only),
        [("/home/user.log".to_string(), 120), ("/logs/small.log".to_string(), 4)]
    );

    let links = FindFilter { file_type: Some(FileType::Symlink), ..FindFilter::default() };
    assert_eq!(find(&vol, "", links), [("/latest.log".to_string(), 14)]);

    let owned = FindFilter { owner: Some(1000), ..FindFilter::default() };
    assert_eq!(find(&vol, "", owned), [("/home/user.log".to_string(), 120)]);

    // Stops early but still counts the match that broke.
    let n = vol
        .file_find_filtered("/logs", "", &FindFilter::default(), |_| ControlFlow::Break(()))
        .unwrap();
    assert_eq!(n, 1);
}

#[test]
fn test_export_import() {
    let mut vol = volume();
    let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
    vol.file_write("/blob", &data).unwrap();

    let mut disk = RamDisk::new(1, 64);
    assert_eq!(vol.file_export("/blob", &mut disk, 0, 10), Ok(2));
    vol.file_import("/copy", &mut disk, 0, 10, data.len()).unwrap();
    assert_eq!(read(&vol, "/copy"), data);
    assert_eq!(vol.file_stat("/copy").unwrap().content, ContentHash::of(&data));
    assert_eq!(vol.file_export("/nope", &mut disk, 0, 0), Err(GeoError::NotFound));
    assert_eq!(vol.file_import("/x", &mut disk, 0, 63, 1024), Err(GeoError::Io));
}

// ----------------------------------------------------------------------
// Permissions and quotas
// ----------------------------------------------------------------------

#[test]
fn test_permissions() {
    let mut vol = volume();
    vol.file_write("/secret", b"s").unwrap();
    vol.set_context(AccessContext::user(1000, 1000));

    assert_eq!(vol.file_contents("/secret"), Err(GeoError::PermissionDenied));
    assert_eq!(vol.file_write("/secret", b"x"), Err(GeoError::PermissionDenied));
    assert_eq!(vol.file_chmod("/secret", Permissions::all()), Err(GeoError::PermissionDenied));
    assert_eq!(vol.view_hide("/secret"), Err(GeoError::PermissionDenied));

    vol.file_write("/mine", b"m").unwrap();
    assert_eq!(vol.file_stat("/mine").unwrap().owner, 1000);
    vol.file_chmod("/mine", Permissions::READ).unwrap();
    assert_eq!(vol.file_write("/mine", b"x"), Err(GeoError::PermissionDenied));
    assert_eq!(read(&vol, "/mine"), b"m");
    assert_eq!(vol.file_chown("/mine", 5), Err(GeoError::PermissionDenied));

    assert_eq!(vol.quota_set(QuotaTarget::Volume, Quota::UNLIMITED), Err(GeoError::PermissionDenied));
    let b = vol.branch_create("user-branch").unwrap();
    assert_eq!(vol.branch_merge(b, "m").unwrap_err(), GeoError::PermissionDenied);

    vol.set_context(AccessContext::user(1000, 1000).with_caps(Capabilities::FS_ADMIN));
    assert_eq!(read(&vol, "/secret"), b"s");
    vol.file_chown("/mine", 5).unwrap();
    assert_eq!(vol.file_stat("/mine").unwrap().owner, 5);
}

#[test]
fn test_quota_atomicity() {
    let mut vol = volume();
    vol.quota_set(QuotaTarget::Branch(BranchId::MAIN), Quota { max_refs: 1, ..Quota::UNLIMITED })
        .unwrap();
    vol.set_context(AccessContext::user(7, 7));
    vol.file_write("/one", b"1").unwrap();

    let usage = vol.quota_usage(QuotaTarget::Branch(BranchId::MAIN));
    let before = vol.stats();
    assert_eq!(vol.file_write("/two", b"2"), Err(GeoError::QuotaExceeded));
    let after = vol.stats();
    assert_eq!(vol.quota_usage(QuotaTarget::Branch(BranchId::MAIN)), usage);
    assert_eq!(
        (before.total_refs, before.content_used, before.ref_used, before.view_used),
        (after.total_refs, after.content_used, after.ref_used, after.view_used)
    );
    assert!(!vol.exists("/two"));

    // The kernel is not subject to quotas.
    vol.set_context(AccessContext::kernel());
    vol.file_write("/two", b"2").unwrap();
}

#[test]
fn test_volume_quota_applies_without_branch_quota() {
    let mut vol = volume();
    let side = vol.branch_create("side").unwrap();
    let used = vol.quota_usage(QuotaTarget::Volume).content_bytes;
    vol.quota_set(QuotaTarget::Volume, Quota { max_content_bytes: used + 100, ..Quota::UNLIMITED })
        .unwrap();
    assert_eq!(vol.quota_get(QuotaTarget::Volume).unwrap().max_content_bytes, used + 100);
    assert_eq!(vol.quota_get(QuotaTarget::Branch(side)), Err(GeoError::NotFound));
    assert_eq!(vol.quota_set(QuotaTarget::Branch(BranchId(9)), Quota::UNLIMITED), Err(GeoError::NotFound));

    vol.branch_switch(side).unwrap();
    vol.set_context(AccessContext::user(3, 3));
    assert_eq!(vol.file_write("/big", &noise(7, 200)), Err(GeoError::QuotaExceeded));
    vol.file_write("/small", b"fits").unwrap();
    assert_eq!(vol.quota_usage(QuotaTarget::Branch(side)).refs, 1);
}

// ----------------------------------------------------------------------
// Memory
// ----------------------------------------------------------------------

#[test]
fn test_out_of_memory() {
    assert!(matches!(
        Volume::create(HeapPages::with_limit(2), VolumeConfig::new(16, 16, 4)),
        Err(GeoError::OutOfMemory)
    ));

    let mut vol = Volume::create(HeapPages::with_limit(3), VolumeConfig::new(1, 1, 1)).unwrap();
    assert_eq!(vol.file_write("/big", &noise(1, 8000)), Err(GeoError::OutOfMemory));
    assert_eq!(vol.stats().total_refs, 0);
    assert_eq!(vol.stats().content_used, 0);
    vol.file_write("/small", b"ok").unwrap();
}

#[test]
fn test_regions_grow_across_segments() {
    let mut vol = Volume::create(HeapPages::new(), VolumeConfig::new(1, 1, 1)).unwrap();
    for i in 0..20u8 {
        vol.file_write(&format!("/f{}", i), &noise(i, 1000)).unwrap();
    }
    assert_eq!(vol.stats().compressed_count, 0);
    let mut disk = RamDisk::new(1, 1024);
    vol.save(&mut disk, 0, 0).unwrap();
    let loaded = Volume::load(HeapPages::new(), &mut disk, 0, 0).unwrap();
    for i in 0..20u8 {
        let path = format!("/f{}", i);
        assert_eq!(read(&vol, &path), noise(i, 1000));
        assert_eq!(read(&loaded, &path), noise(i, 1000));
    }
}

// ----------------------------------------------------------------------
// Persistence
// ----------------------------------------------------------------------

#[test]
fn test_round_trip_branches_and_quotas() {
    let mut vol = volume();
    vol.file_write("/a", b"1").unwrap();
    let f = vol.branch_create("feature").unwrap();
    vol.branch_switch(f).unwrap();
    vol.file_write("/b", b"2").unwrap();
    vol.quota_set(QuotaTarget::Branch(f), Quota { max_refs: 50, ..Quota::UNLIMITED }).unwrap();

    let mut disk = RamDisk::new(1, 256);
    vol.save(&mut disk, 0, 0).unwrap();
    let mut loaded = Volume::load(HeapPages::new(), &mut disk, 0, 0).unwrap();

    assert_eq!(loaded.branch_current(), f);
    assert_eq!(loaded.view_current(), vol.view_current());
    assert_eq!(loaded.branches(), vol.branches());
    assert_eq!(loaded.quota_get(QuotaTarget::Branch(f)), vol.quota_get(QuotaTarget::Branch(f)));
    for t in [QuotaTarget::Volume, QuotaTarget::Branch(f), QuotaTarget::Branch(BranchId::MAIN)] {
        assert_eq!(loaded.quota_usage(t), vol.quota_usage(t));
    }
    for p in ["/a", "/b", "/missing"] {
        assert_eq!(loaded.ref_resolve(p), vol.ref_resolve(p));
    }

    // New ids continue after the loaded ones.
    let v = loaded.view_create(None).unwrap();
    assert_eq!(v.0, vol.views().len() as u64);
    assert_eq!(loaded.branch_create("next"), Ok(BranchId(2)));
}

#[test]
fn test_load_rejects_damage() {
    let mut vol = volume();
    vol.file_write("/f", b"important").unwrap();
    let mut disk = RamDisk::new(1, 64);
    vol.save(&mut disk, 0, 0).unwrap();
    let pristine = disk.drive(0).unwrap().to_vec();

    // Payload byte inside the content region.
    disk.drive_mut(0).unwrap()[SECTOR_SIZE + CONTENT_HEADER_SIZE + 2] ^= 0x55;
    assert!(matches!(Volume::load(HeapPages::new(), &mut disk, 0, 0), Err(GeoError::Corrupt)));

    disk.drive_mut(0).unwrap().copy_from_slice(&pristine);
    disk.drive_mut(0).unwrap()[8] = 9;
    assert!(matches!(Volume::load(HeapPages::new(), &mut disk, 0, 0), Err(GeoError::UnsupportedVersion)));

    disk.drive_mut(0).unwrap().copy_from_slice(&pristine);
    disk.drive_mut(0).unwrap()[0] ^= 1;
    assert!(matches!(Volume::load(HeapPages::new(), &mut disk, 0, 0), Err(GeoError::Corrupt)));

    // ref_start no longer follows the content region.
    disk.drive_mut(0).unwrap().copy_from_slice(&pristine);
    disk.drive_mut(0).unwrap()[120] += 1;
    assert!(matches!(Volume::load(HeapPages::new(), &mut disk, 0, 0), Err(GeoError::Corrupt)));

    // Packed layout that claims an absurd content region.
    disk.drive_mut(0).unwrap().copy_from_slice(&pristine);
    let raw: [u8; SECTOR_SIZE] = pristine[..SECTOR_SIZE].try_into().unwrap();
    let mut sb = Superblock::decode(&raw).unwrap();
    sb.content_used = u64::MAX;
    sb.content_sectors = u64::MAX.div_ceil(SECTOR_SIZE as u64);
    sb.ref_start = sb.content_start + sb.content_sectors;
    sb.view_start = sb.ref_start + sb.ref_sectors;
    disk.write_sector(0, 0, &sb.encode()).unwrap();
    assert!(matches!(Volume::load(HeapPages::new(), &mut disk, 0, 0), Err(GeoError::Corrupt)));

    disk.drive_mut(0).unwrap().copy_from_slice(&pristine);
    disk.fail_at(Some(1));
    assert!(matches!(Volume::load(HeapPages::new(), &mut disk, 0, 0), Err(GeoError::Io)));
    disk.fail_at(None);
    assert!(Volume::load(HeapPages::new(), &mut disk, 0, 0).is_ok());
}

#[test]
fn test_save_to_small_device() {
    let mut vol = volume();
    vol.file_write("/f", b"hello").unwrap();
    let mut disk = RamDisk::new(1, 2);
    assert_eq!(vol.save(&mut disk, 0, 0), Err(GeoError::VolumeFull));
}

#[test]
fn test_load_legacy_image() {
    let data = b"legacy";
    let hash = ContentHash::of(data);

    let mut content = vec![0u8; CONTENT_HEADER_SIZE];
    ContentHeader {
        flags: 0,
        size: data.len() as u64,
        hash,
        original_size: 0,
    }
    .encode(&mut content);
    content.extend_from_slice(data);

    let mut refs = vec![0u8; REF_RECORD_SIZE];
    RefRecord {
        hidden: false,
        path_hash: ContentHash::of(b"/old.txt"),
        content: hash,
        view: ViewId(0),
        created: 5,
        file_type: FileType::File,
        permissions: Permissions::DEFAULT,
        owner: 0,
        path: "/old.txt",
    }
    .encode(&mut refs);

    let mut views = vec![0u8; 2 * VIEW_V1_SIZE];
    for (i, label) in ["Genesis", "Layer"].into_iter().enumerate() {
        let rec = ViewRecord { id: ViewId(i as u64), parent: ViewId(0), branch: None, created: 1, label };
        rec.encode(&mut views[i * VIEW_V1_SIZE..]);
    }

    let sb = Superblock {
        version: 1,
        current_view: ViewId(1),
        next_view: 2,
        content_used: content.len() as u64,
        ref_used: refs.len() as u64,
        view_used: views.len() as u64,
        content_start: 1,
        content_sectors: 1,
        ref_start: 2,
        ref_sectors: 2,
        view_start: 4,
        view_sectors: 1,
        ..Superblock::default()
    };
    let mut disk = RamDisk::new(1, 16);
    put(&mut disk, 0, &sb.encode());
    put(&mut disk, 1, &content);
    put(&mut disk, 2, &refs);
    put(&mut disk, 4, &views);

    let mut vol = Volume::load(HeapPages::new(), &mut disk, 0, 0).unwrap();
    let branches = vol.branches();
    assert_eq!(branches.len(), 1);
    assert_eq!((branches[0].id, branches[0].head), (BranchId::MAIN, ViewId(1)));
    assert!(vol.views().iter().all(|v| v.branch == BranchId::MAIN));
    assert_eq!(read(&vol, "/old.txt"), b"legacy");

    vol.file_write("/new.txt", b"new").unwrap();
    assert_eq!(vol.view_create(None), Ok(ViewId(2)));
}
