// Counter-delta rate derivation.
//
// Each device's collector owns one RateWindow; no other task touches it.
// The first observation seeds the window and yields zero rates, as does
// any counter reset (negative delta) or a gap longer than an hour.

use chrono::{DateTime, Duration, Utc};

use firewatch_api::types::InterfaceCounters;

/// A gap this long between ticks invalidates the window; the next sample
/// re-seeds and reports zero rates.
const MAX_WINDOW_GAP: Duration = Duration::hours(1);

/// Derived per-second rates for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rates {
    pub inbound_mbps: f64,
    pub outbound_mbps: f64,
    pub total_mbps: f64,
    pub inbound_pps: f64,
    pub outbound_pps: f64,
    pub total_pps: f64,
}

#[derive(Debug, Clone, Copy)]
struct Observation {
    ibytes: u64,
    obytes: u64,
    ipackets: u64,
    opackets: u64,
    at: DateTime<Utc>,
}

/// Per-device rate window. Single-writer: owned by the device's collector.
#[derive(Debug, Default)]
pub struct RateWindow {
    previous: Option<Observation>,
}

impl RateWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the current counters, returning derived rates and replacing
    /// the window.
    pub fn advance(&mut self, counters: &InterfaceCounters, at: DateTime<Utc>) -> Rates {
        let current = Observation {
            ibytes: counters.ibytes,
            obytes: counters.obytes,
            ipackets: counters.ipackets,
            opackets: counters.opackets,
            at,
        };

        let rates = match self.previous {
            Some(prev) if at > prev.at && at - prev.at <= MAX_WINDOW_GAP => {
                let elapsed = (at - prev.at).num_milliseconds() as f64 / 1000.0;
                // Negative deltas mean the counter reset; clamp to zero.
                let d_ibytes = current.ibytes.saturating_sub(prev.ibytes) as f64;
                let d_obytes = current.obytes.saturating_sub(prev.obytes) as f64;
                let d_ipkts = current.ipackets.saturating_sub(prev.ipackets) as f64;
                let d_opkts = current.opackets.saturating_sub(prev.opackets) as f64;

                let inbound_mbps = d_ibytes * 8.0 / elapsed / 1_000_000.0;
                let outbound_mbps = d_obytes * 8.0 / elapsed / 1_000_000.0;
                let inbound_pps = d_ipkts / elapsed;
                let outbound_pps = d_opkts / elapsed;

                Rates {
                    inbound_mbps,
                    outbound_mbps,
                    total_mbps: inbound_mbps + outbound_mbps,
                    inbound_pps,
                    outbound_pps,
                    total_pps: inbound_pps + outbound_pps,
                }
            }
            // First observation, stale window, or non-monotonic clock:
            // seed and report zero.
            _ => Rates::default(),
        };

        self.previous = Some(current);
        rates
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn counters(ibytes: u64, obytes: u64, ipackets: u64, opackets: u64) -> InterfaceCounters {
        InterfaceCounters {
            name: "ethernet1/12".into(),
            ibytes,
            obytes,
            ipackets,
            opackets,
            ierrors: 0,
            idrops: 0,
        }
    }

    fn approx(a: f64, b: f64) {
        assert!((a - b).abs() < 0.01, "expected {b}, got {a}");
    }

    #[test]
    fn first_poll_seeds_second_poll_rates() {
        let mut window = RateWindow::new();
        let t0 = Utc::now();

        let first = window.advance(&counters(1_000_000, 500_000, 1000, 500), t0);
        assert_eq!(first, Rates::default());

        let second = window.advance(
            &counters(1_500_000, 625_000, 1600, 650),
            t0 + Duration::seconds(5),
        );
        approx(second.inbound_mbps, 0.80);
        approx(second.outbound_mbps, 0.20);
        approx(second.total_mbps, 1.00);
        approx(second.inbound_pps, 120.0);
        approx(second.outbound_pps, 30.0);
        approx(second.total_pps, 150.0);
    }

    #[test]
    fn counter_reset_reports_zero_and_reseeds() {
        let mut window = RateWindow::new();
        let t0 = Utc::now();

        window.advance(&counters(10_000_000, 10_000_000, 1000, 1000), t0);
        let rates = window.advance(
            &counters(500_000, 400_000, 50, 40),
            t0 + Duration::seconds(5),
        );

        approx(rates.inbound_mbps, 0.0);
        approx(rates.outbound_mbps, 0.0);

        // The window now holds the post-reset counters.
        let next = window.advance(
            &counters(1_125_000, 400_000, 100, 40),
            t0 + Duration::seconds(10),
        );
        approx(next.inbound_mbps, 1.0);
        approx(next.inbound_pps, 10.0);
    }

    #[test]
    fn total_is_sum_of_directions() {
        let mut window = RateWindow::new();
        let t0 = Utc::now();
        window.advance(&counters(0, 0, 0, 0), t0);
        let rates = window.advance(
            &counters(2_500_000, 1_250_000, 700, 300),
            t0 + Duration::seconds(10),
        );
        approx(rates.total_mbps, rates.inbound_mbps + rates.outbound_mbps);
        approx(rates.total_pps, 100.0);
    }

    #[test]
    fn hour_gap_reseeds_window() {
        let mut window = RateWindow::new();
        let t0 = Utc::now();

        window.advance(&counters(1_000_000, 500_000, 1000, 500), t0);
        let rates = window.advance(
            &counters(900_000_000, 500_000_000, 90_000, 50_000),
            t0 + Duration::hours(2),
        );
        assert_eq!(rates, Rates::default());
    }

    #[test]
    fn non_monotonic_clock_reseeds() {
        let mut window = RateWindow::new();
        let t0 = Utc::now();

        window.advance(&counters(1_000_000, 500_000, 1000, 500), t0);
        let rates = window.advance(
            &counters(2_000_000, 600_000, 2000, 600),
            t0 - Duration::seconds(5),
        );
        assert_eq!(rates, Rates::default());
    }
}
