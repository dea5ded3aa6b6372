fn main() {
    // pagemap and pid directories only exist on these kernels
    #[cfg(not(any(target_os = "android", target_os = "linux")))]
    compile_error!(concat!(
        "Building pagemeasure for an unsupported platform. ",
        "Currently only linux and android are supported"
    ))
}
