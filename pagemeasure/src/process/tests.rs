use super::*;
use crate::{scan_container_with_root, ContainerProcesses, PageRecord, ScanOptions};
use std::fs;
use std::os::unix::fs::FileExt;
use std::path::Path;

fn check_unwrap<T>(prc: &Process, val: ProcResult<T>) -> Option<T> {
    match val {
        Ok(t) => Some(t),
        Err(ProcError::PermissionDenied(_)) if !rustix::process::geteuid().is_root() => {
            // we are not root, and so a permission denied error is OK
            None
        }
        Err(ProcError::ProcessNotFound(ctx)) => {
            // a common reason for this error is that the process isn't running anymore
            if prc.is_alive() {
                panic!("{:?} not found", ctx)
            }
            None
        }
        Err(err) => panic!("check_unwrap error for {} {:?}", prc.pid, err),
    }
}

/// Writes a pagemap table with the given (page index, raw entry) pairs; every other entry is 0.
fn write_table(path: &Path, entries: &[(u64, u64)]) {
    let len = entries.iter().map(|(idx, _)| idx + 1).max().unwrap_or(0);
    let mut buf = vec![0u8; (len * 8) as usize];
    for (idx, value) in entries {
        let off = (idx * 8) as usize;
        buf[off..off + 8].copy_from_slice(&value.to_le_bytes());
    }
    fs::write(path, buf).unwrap();
}

const EXAMPLE_MAPS: &str = "00400000-00401000 r-xp 00000000 00:00 0 /bin/example
00600000-00601000 rw-p 00000000 00:00 0 /bin/example
";

/// Lays out `<tmp>/<pid>/maps` and `<tmp>/<pid>/pagemap`.
fn fake_proc(tmp: &Path, pid: i32, maps: &str, entries: &[(u64, u64)]) -> PathBuf {
    let root = tmp.join(pid.to_string());
    fs::create_dir_all(&root).unwrap();
    fs::write(root.join("maps"), maps).unwrap();
    write_table(&root.join("pagemap"), entries);
    root
}

#[test]
fn test_translate_example_process() {
    let tmp = tempfile::tempdir().unwrap();
    let root = fake_proc(tmp.path(), 4242, EXAMPLE_MAPS, &[(0x400, 0x8000000000000005)]);

    let prc = Process::new_with_root(root).unwrap();
    assert_eq!(prc.pid(), 4242);

    let regions = prc.maps().unwrap();
    let exec = crate::select_executable(&regions);
    assert_eq!(exec.len(), 1);

    let mut pagemap = prc.pagemap().unwrap().with_page_size(4096).unwrap();
    let pages: Vec<PageTranslation> = pagemap.walk(&exec[0]).map(|p| p.unwrap()).collect();

    // the walk includes the page at the region's end, which lies past the table
    assert_eq!(
        pages,
        vec![
            PageTranslation {
                virtual_address: 0x400000,
                frame_number: 5,
                physical_address: 0x5000,
                resident: true,
            },
            PageTranslation::not_resident(0x401000),
        ]
    );
    let resident: Vec<&PageTranslation> = pages.iter().filter(|p| p.resident).collect();
    assert_eq!(resident.len(), 1);
}

#[test]
fn test_walk_range_bounds() {
    let tmp = tempfile::tempdir().unwrap();
    let root = fake_proc(tmp.path(), 78, EXAMPLE_MAPS, &[(0x400, (1 << 63) | 1)]);
    let prc = Process::new_with_root(root).unwrap();
    let mut pagemap = prc.pagemap().unwrap().with_page_size(4096).unwrap();

    // an unaligned start is walked from its page
    let walk = pagemap.walk_range(0x400123, 0x402000);
    assert_eq!(walk.remaining(), 3);
    let addrs: Vec<u64> = walk.map(|p| p.unwrap().virtual_address).collect();
    assert_eq!(addrs, vec![0x400000, 0x401000, 0x402000]);

    let walk = pagemap.walk_range(0x400000, 0x400000);
    assert_eq!(walk.size_hint(), (1, Some(1)));
    assert_eq!(walk.count(), 1);

    // the last page of the address space does not overflow the walk
    let walk = pagemap.walk_range(u64::MAX - 0xfff, u64::MAX);
    assert_eq!(walk.count(), 1);
}

#[test]
fn test_translate_keeps_page_offset() {
    let tmp = tempfile::tempdir().unwrap();
    let root = fake_proc(tmp.path(), 77, EXAMPLE_MAPS, &[(0x400, (1 << 63) | 0x1234)]);
    let prc = Process::new_with_root(root).unwrap();
    let mut pagemap = prc.pagemap().unwrap().with_page_size(4096).unwrap();

    for k in [0u64, 1, 0x80, 0xabc, 0xfff] {
        let t = pagemap.translate(0x400000 + k).unwrap();
        assert!(t.resident);
        assert_eq!(t.virtual_address, 0x400000 + k);
        assert_eq!(t.physical_address, 0x1234 * 4096 + k);
    }

    // past the end of the table
    let t = pagemap.translate(0x600000).unwrap();
    assert!(!t.resident);
    assert_eq!(t.physical(), None);
}

#[test]
fn test_walk_continues_past_not_resident_pages() {
    let tmp = tempfile::tempdir().unwrap();
    let maps = "00010000-00014000 r-xp 00000000 00:00 0 /bin/four\n";
    // page 0x11 is absent, pages 0x13 and 0x14 lie past the end of the table
    let entries = [(0x10, (1 << 63) | 1), (0x11, 1 << 62), (0x12, (1 << 63) | 3)];
    let root = fake_proc(tmp.path(), 99, maps, &entries);
    let prc = Process::new_with_root(root).unwrap();

    let regions = prc.maps().unwrap();
    let mut pagemap = prc.pagemap().unwrap().with_page_size(4096).unwrap();
    let walk = pagemap.walk(&regions.0[0]);
    assert_eq!(walk.size_hint(), (5, Some(5)));

    let pages: Vec<PageTranslation> = walk.map(|p| p.unwrap()).collect();
    let addrs: Vec<u64> = pages.iter().map(|p| p.virtual_address).collect();
    assert_eq!(addrs, vec![0x10000, 0x11000, 0x12000, 0x13000, 0x14000]);
    let resident: Vec<bool> = pages.iter().map(|p| p.resident).collect();
    assert_eq!(resident, vec![true, false, true, false, false]);
    assert_eq!(pages[2].physical(), Some(0x3000));
}

#[test]
fn test_scan_process_gone_before_table_read() {
    let tmp = tempfile::tempdir().unwrap();
    let root = fake_proc(tmp.path(), 4242, EXAMPLE_MAPS, &[]);
    fs::remove_file(root.join("pagemap")).unwrap();

    let prc = Process::new_with_root(root).unwrap();
    let err = prc.scan(&ScanOptions::new().page_size(4096)).unwrap_err();
    match err {
        ProcError::ProcessNotFound(ctx) => {
            assert_eq!(ctx.pid, Some(4242));
            assert_eq!(ctx.virtual_address, Some(0x400000));
        }
        x => panic!("Unexpected return value: {:?}", x),
    }
}

#[test]
fn test_process_gone_after_open() {
    let tmp = tempfile::tempdir().unwrap();
    let root = fake_proc(tmp.path(), 4242, EXAMPLE_MAPS, &[(0x400, 0x8000000000000005)]);

    let prc = Process::new_with_root(root.clone()).unwrap();
    assert!(prc.is_alive());
    fs::remove_dir_all(&root).unwrap();
    assert!(!prc.is_alive());

    match prc.maps() {
        Err(ProcError::ProcessNotFound(ctx)) => assert_eq!(ctx.pid, Some(4242)),
        x => panic!("Unexpected return value: {:?}", x),
    }
    assert!(matches!(
        prc.scan(&ScanOptions::new()),
        Err(ProcError::ProcessNotFound(_))
    ));
}

#[test]
fn test_missing_process_root() {
    let tmp = tempfile::tempdir().unwrap();
    match Process::new_with_root(tmp.path().join("31337")) {
        Err(ProcError::ProcessNotFound(ctx)) => {
            assert_eq!(ctx.pid, Some(31337));
            assert!(ctx.path.is_some());
        }
        x => panic!("Unexpected return value: {:?}", x),
    }
}

#[test]
fn test_maps_with_non_utf8_path() {
    let tmp = tempfile::tempdir().unwrap();
    let root = fake_proc(tmp.path(), 4242, "", &[]);
    let mut maps = b"00400000-00401000 r-xp 00000000 00:00 0 /bin/example\n".to_vec();
    maps.extend_from_slice(b"7f0000000000-7f0000001000 r-xp 00000000 fd:01 7 /tmp/caf\xe9.so\n");
    maps.extend_from_slice(b"00600000-00601000 rw-p 00000000 00:00 0 /bin/example\n");
    fs::write(root.join("maps"), maps).unwrap();

    let prc = Process::new_with_root(root).unwrap();
    let regions = prc.maps().unwrap();
    assert_eq!(regions.len(), 3);
    assert_eq!(crate::select_executable(&regions).len(), 2);
}

#[test]
fn test_page_size_is_checked() {
    let tmp = tempfile::tempdir().unwrap();
    let root = fake_proc(tmp.path(), 5, EXAMPLE_MAPS, &[]);
    let prc = Process::new_with_root(root).unwrap();

    assert!(prc.pagemap().unwrap().with_page_size(3000).is_err());
    assert!(matches!(
        prc.scan(&ScanOptions::new().page_size(0)),
        Err(ProcError::Other(_))
    ));

    // a page this large is refused before anything is allocated for it
    fs::File::create(tmp.path().join("5").join("mem")).unwrap();
    assert!(prc.mem().unwrap().with_page_size(1 << 40).is_err());
    assert!(matches!(
        prc.scan(&ScanOptions::new().page_size(1 << 40).digest_pages(true)),
        Err(ProcError::Other(_))
    ));
}

#[test]
fn test_scan_without_code_region() {
    let tmp = tempfile::tempdir().unwrap();
    let maps = "00600000-00601000 rw-p 00000000 00:00 0 /bin/example\n";
    let root = fake_proc(tmp.path(), 12, maps, &[]);
    let prc = Process::new_with_root(root).unwrap();

    let scan = prc.scan(&ScanOptions::new().page_size(4096)).unwrap();
    assert_eq!(scan.pid, 12);
    assert!(scan.regions.is_empty());
    assert_eq!(scan.resident_pages(), 0);
}

#[test]
fn test_scan_all_executable() {
    let tmp = tempfile::tempdir().unwrap();
    let maps = "00400000-00401000 r-xp 00000000 00:00 0 /bin/example
00500000-00502000 rwxp 00000000 00:00 0
ffffffffff600000-ffffffffff601000 --xp 00000000 00:00 0 [vsyscall]
";
    let root = fake_proc(
        tmp.path(),
        13,
        maps,
        &[(0x400, (1 << 63) | 8), (0x500, (1 << 63) | 9)],
    );
    let prc = Process::new_with_root(root).unwrap();

    let scan = prc.scan(&ScanOptions::new().page_size(4096)).unwrap();
    assert_eq!(scan.regions.len(), 1);
    assert_eq!(scan.resident_pages(), 1);

    let scan = prc
        .scan(&ScanOptions::new().page_size(4096).all_executable(true))
        .unwrap();
    let starts: Vec<u64> = scan.regions.iter().map(|r| r.region.start).collect();
    assert_eq!(starts, vec![0x400000, 0x500000]);
    assert_eq!(scan.regions[1].pages.len(), 3);
    assert!(scan.regions[1].pages[0].is_resident());
    assert!(matches!(
        scan.regions[1].pages[1],
        PageRecord::NotResident { virtual_address: 0x501000 }
    ));
    assert_eq!(scan.resident_pages(), 2);
}

#[test]
fn test_scan_with_digests() {
    let tmp = tempfile::tempdir().unwrap();
    let maps = "00400000-00402000 r-xp 00000000 00:00 0 /bin/example\n";
    let root = fake_proc(tmp.path(), 21, maps, &[(0x400, (1 << 63) | 5)]);

    // sparse stand-in for /proc/<pid>/mem, readable at the virtual address
    let code: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
    let mem = fs::File::create(root.join("mem")).unwrap();
    mem.set_len(0x402000).unwrap();
    mem.write_all_at(&code, 0x400000).unwrap();

    let prc = Process::new_with_root(root).unwrap();
    let scan = prc
        .scan(&ScanOptions::new().page_size(4096).digest_pages(true))
        .unwrap();

    let pages = &scan.regions[0].pages;
    assert_eq!(pages.len(), 3);
    match &pages[0] {
        PageRecord::Resident { translation, digest } => {
            assert_eq!(translation.physical_address, 0x5000);
            assert_eq!(digest.unwrap(), PageDigest::compute(0x400000, &code));
        }
        x => panic!("Unexpected record: {:?}", x),
    }
    assert!(matches!(pages[1], PageRecord::NotResident { .. }));
    assert!(matches!(pages[2], PageRecord::NotResident { virtual_address: 0x402000 }));

    let reader = prc.mem().unwrap().with_page_size(4096).unwrap();
    assert_eq!(reader.read_page(0x400123).unwrap(), code);
    assert_eq!(reader.digest(0x400fff).unwrap().virtual_address, 0x400000);
}

#[test]
fn test_scan_records_unreadable_pages() {
    let tmp = tempfile::tempdir().unwrap();
    let maps = "00400000-00402000 r-xp 00000000 00:00 0 /bin/example\n";
    let entries = [(0x400, (1 << 63) | 5), (0x401, (1 << 63) | 6)];
    let root = fake_proc(tmp.path(), 22, maps, &entries);

    // the mem stand-in only covers the first page
    let mem = fs::File::create(root.join("mem")).unwrap();
    mem.set_len(0x401000).unwrap();

    let prc = Process::new_with_root(root).unwrap();
    let scan = prc
        .scan(&ScanOptions::new().page_size(4096).digest_pages(true))
        .unwrap();

    let region = &scan.regions[0];
    assert_eq!(region.pages.len(), 3);
    assert!(region.pages[0].is_resident());
    let failed: Vec<u64> = region.failed().map(|p| p.virtual_address()).collect();
    assert_eq!(failed, vec![0x401000]);
}

#[test]
fn test_scan_container_with_root() {
    struct Listed;

    impl ContainerProcesses for Listed {
        fn list_container_processes(&self, _container_id: &str) -> ProcResult<Vec<i32>> {
            Ok(vec![4242, 4243])
        }
    }

    let tmp = tempfile::tempdir().unwrap();
    fake_proc(tmp.path(), 4242, EXAMPLE_MAPS, &[(0x400, 0x8000000000000005)]);

    let options = ScanOptions::new().page_size(4096);
    let results = scan_container_with_root(&Listed, "c0ffee", tmp.path(), &options).unwrap();
    assert_eq!(results.len(), 2);

    let (pid, scan) = &results[0];
    assert_eq!(*pid, 4242);
    let scan = scan.as_ref().unwrap();
    let resident: Vec<&PageTranslation> = scan.regions[0].resident().collect();
    assert_eq!(resident.len(), 1);
    assert_eq!(resident[0].physical_address, 0x5000);

    let (pid, scan) = &results[1];
    assert_eq!(*pid, 4243);
    assert!(matches!(scan, Err(ProcError::ProcessNotFound(_))));
}

#[test]
fn test_proc_maps() {
    let myself = Process::myself().unwrap();
    let maps = myself.maps().unwrap();
    for map in &maps {
        println!("{:?}", map);
    }
    assert!(crate::first_code_region(&maps).is_some());
}

#[test]
fn test_proc_pagemap() {
    let myself = Process::myself().unwrap();
    let maps = myself.maps().unwrap();

    // the page holding the code running this test is resident
    let here = test_proc_pagemap as fn() as usize as u64;
    let region = maps.find(here).unwrap();
    assert!(region.is_executable());

    let Some(mut pagemap) = check_unwrap(&myself, myself.pagemap()) else {
        return;
    };
    if let Some(t) = check_unwrap(&myself, pagemap.translate(here)) {
        println!("{:?}", t);
        assert!(t.resident);
        assert_eq!(t.physical_address % crate::page_size(), here % crate::page_size());
    }

    let mut count = 0;
    for page in pagemap.walk(region) {
        if check_unwrap(&myself, page).is_some() {
            count += 1;
        }
    }
    // the walk includes the page at the region's end
    assert!(count <= region.pages(crate::page_size()) as usize + 1);
}

#[test]
fn test_proc_mem() {
    let myself = Process::myself().unwrap();
    let maps = myself.maps().unwrap();
    let code = crate::first_code_region(&maps).unwrap();

    let Some(mem) = check_unwrap(&myself, myself.mem()) else {
        return;
    };
    if let Some(page) = check_unwrap(&myself, mem.read_page(code.start)) {
        assert_eq!(page.len() as u64, crate::page_size());
        let a = mem.digest(code.start).unwrap();
        let b = mem.digest(code.start).unwrap();
        assert_eq!(a, b);
    }
}

#[test]
fn test_self_scan() {
    let myself = Process::myself().unwrap();
    if let Some(scan) = check_unwrap(&myself, myself.scan(&ScanOptions::new())) {
        assert_eq!(scan.regions.len(), 1);
        assert!(scan.resident_pages() > 0);
    }
}

/// Test that reading through a dead process maps to ProcError::ProcessNotFound
#[test]
fn test_esrch() {
    let mut command = std::process::Command::new("sleep")
        .arg("10000")
        .spawn()
        .expect("Failed to start sleep");
    let p = Process::new(command.id() as i32).expect("Failed to create Process");
    command.kill().expect("Failed to kill sleep");
    command.wait().expect("Failed to wait for sleep");

    let e = p.maps().unwrap_err();
    println!("{:?}", e);
    assert!(matches!(e, ProcError::ProcessNotFound(_)));

    let e = p.scan(&ScanOptions::new()).unwrap_err();
    assert!(matches!(e, ProcError::ProcessNotFound(_)));
}
