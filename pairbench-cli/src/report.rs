//! Run Report
//!
//! The supervisor is the central collector: it gathers every rank's result
//! before printing, so per-rank lines come out in ascending rank order no
//! matter how the processes were scheduled. Output is human-readable console
//! text, not a machine format.

use crate::config::BenchConfig;
use pairbench_core::stats::RegionTotal;

/// One rank's collected result.
#[derive(Debug, Clone, Copy)]
pub struct RankResult {
    /// Reporting rank.
    pub rank: usize,
    /// The rank's accumulated region total.
    pub total: RegionTotal,
}

/// Render the full run report.
///
/// A configuration summary line, the mode line, then two lines per
/// measuring rank: the region statistics and the throughput. Sender ranks
/// record nothing and get no lines, matching the original tool.
pub fn render_report(config: &BenchConfig, ref_hz: f64, results: &[RankResult]) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "processes: {:<10} / msgs: {:>10} / delay after: {}\n",
        config.num_procs, config.num_msgs, config.delay_after
    ));
    output.push_str(&format!("core: {:>3}\n", config.core));
    output.push_str(config.mode.label());
    output.push('\n');

    for result in results {
        if result.total.is_empty() {
            continue;
        }
        output.push_str(&format!(
            "[{:02}] samples: {} / total ticks: {} / avg: {:.1} ticks ({:.1} ns)\n",
            result.rank,
            result.total.transfers(),
            result.total.corrected_ticks(),
            result.total.avg_ticks(),
            result.total.avg_latency_ns(ref_hz),
        ));
        output.push_str(&format!(
            "[{:02}] Throughput (core): {:.1} CS/s\n",
            result.rank,
            result.total.throughput(ref_hz),
        ));
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairbench_core::protocol::Mode;
    use pairbench_core::RunOutcome;

    fn config(mode: Mode) -> BenchConfig {
        BenchConfig {
            num_procs: 4,
            num_msgs: 1000,
            delay_after: 0,
            core: 0,
            core_offset: 2,
            mode,
            ref_ghz: Some(1.0),
        }
    }

    fn result(rank: usize, transfers: u64, ticks: u64) -> RankResult {
        let mut total = RegionTotal::new();
        total.record(&RunOutcome {
            transfers,
            corrected_ticks: ticks,
        });
        RankResult { rank, total }
    }

    #[test]
    fn test_report_header_and_mode() {
        let text = render_report(&config(Mode::Oneway), 1e9, &[]);
        assert!(text.starts_with("processes: 4"));
        assert!(text.contains(&format!("/ msgs: {:>10} /", 1000)));
        assert!(text.contains("core:   0\n"));
        assert!(text.contains("ONEWAY\n"));
        assert!(!text.contains("ROUNDTRIP"));
    }

    #[test]
    fn test_roundtrip_mode_line() {
        let text = render_report(&config(Mode::Roundtrip), 1e9, &[]);
        assert!(text.contains("ROUNDTRIP\n"));
    }

    #[test]
    fn test_rank_lines_ascend_and_skip_senders() {
        let results = vec![
            result(0, 1000, 2_000_000),
            result(1, 0, 0),
            result(2, 1000, 4_000_000),
            result(3, 0, 0),
        ];
        let text = render_report(&config(Mode::Oneway), 1e9, &results);

        let rank0 = text.find("[00] Throughput").expect("rank 0 line");
        let rank2 = text.find("[02] Throughput").expect("rank 2 line");
        assert!(rank0 < rank2, "lines must ascend by rank");
        assert!(!text.contains("[01]"));
        assert!(!text.contains("[03]"));
    }

    #[test]
    fn test_throughput_line_format() {
        // 1000 transfers over 2e6 ticks at 1 GHz = 2 ms -> 500000 CS/s.
        let text = render_report(&config(Mode::Oneway), 1e9, &[result(0, 1000, 2_000_000)]);
        assert!(text.contains("[00] Throughput (core): 500000.0 CS/s"));
    }

    #[test]
    fn test_stats_line_reports_per_transfer_latency() {
        // 2000 ticks/transfer at 1 GHz = 2000 ns.
        let text = render_report(&config(Mode::Oneway), 1e9, &[result(0, 1000, 2_000_000)]);
        assert!(text.contains("samples: 1000"));
        assert!(text.contains("avg: 2000.0 ticks (2000.0 ns)"));
    }
}
