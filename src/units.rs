//! Byte-size helpers for configuration values and log output.

const BYTES_PER_KIB: u64 = 1024;
const BYTES_PER_MIB: u64 = BYTES_PER_KIB * 1024;
const BYTES_PER_GIB: u64 = BYTES_PER_MIB * 1024;

/// Converts kibibytes to bytes.
pub const fn kib(n: u64) -> u64 {
    n * BYTES_PER_KIB
}

/// Converts mebibytes to bytes.
pub const fn mib(n: u64) -> u64 {
    n * BYTES_PER_MIB
}

/// Converts gibibytes to bytes.
pub const fn gib(n: u64) -> u64 {
    n * BYTES_PER_GIB
}

/// Formats a byte count as a human-readable string.
///
/// Values of one KiB and above are rendered with two decimal places and the
/// appropriate unit suffix; smaller values are rendered as plain bytes.
pub fn format_size(bytes: u64) -> String {
    if bytes < BYTES_PER_KIB {
        format!("{} B", bytes)
    } else if bytes < BYTES_PER_MIB {
        format!("{:.2} KiB", bytes as f64 / BYTES_PER_KIB as f64)
    } else if bytes < BYTES_PER_GIB {
        format!("{:.2} MiB", bytes as f64 / BYTES_PER_MIB as f64)
    } else {
        format!("{:.2} GiB", bytes as f64 / BYTES_PER_GIB as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_constructors() {
        assert_eq!(kib(1), 1024);
        assert_eq!(mib(2), 2 * 1024 * 1024);
        assert_eq!(gib(1), 1024 * 1024 * 1024);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1024), "1.00 KiB");
        assert_eq!(format_size(1536), "1.50 KiB");
        assert_eq!(format_size(2 * 1024 * 1024), "2.00 MiB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.00 GiB");
    }
}
