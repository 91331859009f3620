//! Administrative surface: per-interface enablement and the counters report.
//!
//! The CLI front end is a collaborator; this module only produces the data
//! and the rendered report.

use crate::stats::StatsSnapshot;

/// Per-interface state, indexed by interface handle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IfaceState {
    pub enabled: bool,
    pub pass: u64,
    pub drop: u64,
    pub redirect: u64,
}

/// Render the counters report: totals, drop rate, and one row per enabled
/// interface.
pub fn format_show(snapshot: &StatsSnapshot, interfaces: &[IfaceState]) -> String {
    let total = snapshot.pkts_processed + snapshot.pkts_invalid;
    let drops = snapshot.pkts_dropped + snapshot.pkts_invalid;
    let drop_rate = if total == 0 { 0.0 } else { drops as f64 * 100.0 / total as f64 };

    let mut out = String::new();
    out.push_str("Packet classifier statistics:\n");
    out.push_str(&format!("  total packets: {total}\n"));
    out.push_str(&format!("  total drops:   {drops}\n"));
    out.push_str(&format!("  total bytes:   {}\n", snapshot.bytes_total));
    out.push_str(&format!("  drop rate:     {drop_rate:.1}%\n"));

    for (if_index, iface) in interfaces.iter().enumerate() {
        if !iface.enabled {
            continue;
        }
        out.push_str(&format!(
            "  if {if_index}: pass {} drop {} redirect {}\n",
            iface.pass, iface.drop, iface.redirect
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_show_totals_and_rate() {
        let snapshot = StatsSnapshot {
            pkts_processed: 98,
            pkts_invalid: 2,
            pkts_dropped: 23,
            bytes_total: 6400,
            ..Default::default()
        };
        let interfaces = [
            IfaceState { enabled: true, pass: 70, drop: 25, redirect: 5 },
            IfaceState::default(), // disabled: not shown
        ];

        let report = format_show(&snapshot, &interfaces);
        assert!(report.contains("total packets: 100"));
        assert!(report.contains("total drops:   25"));
        assert!(report.contains("total bytes:   6400"));
        assert!(report.contains("drop rate:     25.0%"));
        assert!(report.contains("if 0: pass 70 drop 25 redirect 5"));
        assert!(!report.contains("if 1:"));
    }

    #[test]
    fn test_show_handles_zero_traffic() {
        let report = format_show(&StatsSnapshot::default(), &[]);
        assert!(report.contains("drop rate:     0.0%"));
    }
}
