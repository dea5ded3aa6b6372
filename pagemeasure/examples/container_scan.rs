//
// Print where the code pages of every process of a docker container live in physical memory
//
// usage: container_scan <container-id> [--digest] [--all]
//
// Reading frame numbers requires CAP_SYS_ADMIN, otherwise every physical address is reported
// with a zero frame number.  Set RUST_LOG=debug for details about skipped pages.
//

use pagemeasure::{scan_container, DockerTop, PageRecord, ScanOptions};

fn main() {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let container_id = match args.next() {
        Some(id) => id,
        None => {
            eprintln!("usage: container_scan <container-id> [--digest] [--all]");
            std::process::exit(2);
        }
    };

    let mut options = ScanOptions::new();
    for arg in args {
        match arg.as_str() {
            "--digest" => options = options.digest_pages(true),
            "--all" => options = options.all_executable(true),
            other => {
                eprintln!("unknown option {}", other);
                std::process::exit(2);
            }
        }
    }

    if !rustix::process::geteuid().is_root() {
        println!("WARNING: frame numbers read as zero without CAP_SYS_ADMIN, re-run with sudo");
    }

    let results = match scan_container(&DockerTop::new(), &container_id, &options) {
        Ok(results) => results,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    for (pid, scan) in results {
        let scan = match scan {
            Ok(scan) => scan,
            Err(e) => {
                println!("pid {}: {}", pid, e);
                continue;
            }
        };

        for region in &scan.regions {
            println!("pid {}: {}", pid, region.region.raw_line);
            for page in &region.pages {
                match page {
                    PageRecord::Resident { translation, digest } => {
                        print!(
                            "  virt_mem: 0x{:x}, pfn: 0x{:x}, phys_addr: 0x{:x}",
                            translation.virtual_address,
                            translation.frame_number,
                            translation.physical_address
                        );
                        match digest {
                            Some(d) => println!(", sha256: {}", d.to_hex()),
                            None => println!(),
                        }
                    }
                    PageRecord::NotResident { virtual_address } => {
                        println!("  virt_mem: 0x{:x}, not resident", virtual_address)
                    }
                    PageRecord::Failed { virtual_address, error } => {
                        println!("  virt_mem: 0x{:x}, {}", virtual_address, error)
                    }
                }
            }
        }
        println!("pid {}: {} resident page(s)", pid, scan.resident_pages());
    }
}
