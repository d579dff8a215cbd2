/// Page size assumed when converting `/proc/self/statm` page counts to bytes.
/// Not queried from the system; figures are approximate on kernels with
/// larger pages.
pub const PAGE_SIZE: u64 = 4096;

/// Resident set size of the current process in bytes, where available.
pub fn resident_memory() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        if let Ok(content) = std::fs::read_to_string("/proc/self/statm") {
            return rss_from_statm(&content);
        }
    }

    None
}

/// Second statm field (resident pages) in bytes.
fn rss_from_statm(content: &str) -> Option<u64> {
    let pages = content.split_whitespace().nth(1)?.parse::<u64>().ok()?;
    Some(pages * PAGE_SIZE)
}

/// Log a memory snapshot at debug level.
pub fn log_memory(phase: &str) {
    if let Some(bytes) = resident_memory() {
        log::debug!(
            "memory after {phase}: {:.1} MiB (assuming {} KiB pages)",
            bytes as f64 / (1024.0 * 1024.0),
            PAGE_SIZE / 1024
        );
    }
}
