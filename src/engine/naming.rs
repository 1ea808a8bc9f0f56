//! Partition device naming.
//!
//! The kernel names partitions `<disk>N` unless the disk name itself ends in a
//! digit (`nvme0n1`, `mmcblk0`, `loop0`), in which case a `p` separates the
//! two: `<disk>pN`. The planner derives names with `partition_path`; the
//! direct-boot installer reverses them with `split_partition_path`.

/// Returns true if partitions of `disk` take a `p` separator.
pub fn uses_p_separator(disk: &str) -> bool {
    disk.ends_with(|c: char| c.is_ascii_digit())
}

/// Generate a partition device path from a disk path and partition number.
pub fn partition_path(disk: &str, number: u32) -> String {
    if uses_p_separator(disk) {
        format!("{disk}p{number}")
    } else {
        format!("{disk}{number}")
    }
}

/// Split a partition device path into its disk and partition number.
///
/// Returns `None` if the path has no trailing partition number.
pub fn split_partition_path(partition: &str) -> Option<(String, u32)> {
    let stem = partition.trim_end_matches(|c: char| c.is_ascii_digit());
    let number: u32 = partition[stem.len()..].parse().ok()?;

    let disk = match stem.strip_suffix('p') {
        Some(base) if uses_p_separator(base) => base,
        _ => stem,
    };

    if disk.is_empty() || disk.ends_with('/') {
        return None;
    }

    Some((disk.to_string(), number))
}
