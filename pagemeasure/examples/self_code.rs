// Print the physical location of every page of this program's code region

use pagemeasure::process::Process;

fn main() {
    let me = Process::myself().expect("Unable to load myself!");
    let regions = me.maps().unwrap();
    let code = match pagemeasure::first_code_region(&regions) {
        Some(code) => code,
        None => return,
    };
    println!("code region {}", code.raw_line);

    let mut pagemap = me.pagemap().unwrap();
    for page in pagemap.walk(&code) {
        match page {
            Ok(t) if t.resident => {
                println!("0x{:x} -> 0x{:x}", t.virtual_address, t.physical_address)
            }
            Ok(t) => println!("0x{:x} not resident", t.virtual_address),
            Err(e) => println!("{}", e),
        }
    }
}
