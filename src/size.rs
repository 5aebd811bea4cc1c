/*============================================================
  Project: appleloops
  Module: appleloops::size
  ------------------------------------------------------------
  Purpose:
    Render byte counts as human-readable strings for summaries
    and log entries.

  Security / Safety Notes:
    Pure formatting; no I/O performed in this module.

  Dependencies:
    None beyond std.

  Operational Scope:
    Display only. Totals are always summed as integers before
    they reach this module.

  Revision History:
    2026-10-18 CW  Introduced binary unit formatter.
  ------------------------------------------------------------
  Principles Observed:
    - Sizes stay u64 until display
    - Units stop at terabytes
============================================================*/

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Format a byte count using 1024-based units, stopping at TB.
pub fn bytes2hr(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut index = 0usize;
    while value >= 1024.0 && index < UNITS.len() - 1 {
        value /= 1024.0;
        index += 1;
    }

    let mut rendered = format!("{value:.2}");
    if let Some(stripped) = rendered.strip_suffix(".00") {
        rendered = stripped.to_string();
    } else if rendered.ends_with('0') {
        rendered = rendered.trim_end_matches('0').to_string();
    }

    format!("{rendered} {}", UNITS[index])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_reference_values() {
        assert_eq!(bytes2hr(0), "0 B");
        assert_eq!(bytes2hr(1023), "1023 B");
        assert_eq!(bytes2hr(1024), "1 KB");
        assert_eq!(bytes2hr(1536), "1.5 KB");
        assert_eq!(bytes2hr(1_099_511_627_776), "1 TB");
    }

    #[test]
    fn keeps_two_decimals_when_significant() {
        // 1.25 MB
        assert_eq!(bytes2hr(1_310_720), "1.25 MB");
    }

    #[test]
    fn never_reduces_beyond_terabytes() {
        let five_pb = 5 * 1024u64.pow(5);
        assert_eq!(bytes2hr(five_pb), "5120 TB");
    }
}
