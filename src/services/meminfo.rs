//! Memory-pressure gate.
//!
//! Launches are refused when available memory drops below the configured
//! floor or swap use climbs above the ceiling. The gate is a trait so
//! tests can force either verdict.

use log::warn;

pub trait MemoryGate: Send + Sync {
    /// A zero `min_available_kb` disables the check entirely.
    fn is_sufficient(&self, min_available_kb: u64, max_swap_used_kb: u64) -> bool;
}

/// Gate backed by `/proc/meminfo`.
pub struct ProcMemoryGate;

impl MemoryGate for ProcMemoryGate {
    fn is_sufficient(&self, min_available_kb: u64, max_swap_used_kb: u64) -> bool {
        if min_available_kb == 0 {
            return true;
        }
        match std::fs::read_to_string("/proc/meminfo") {
            Ok(content) => match parse_meminfo(&content) {
                Some(snapshot) => snapshot.sufficient(min_available_kb, max_swap_used_kb),
                None => true,
            },
            Err(err) => {
                warn!("could not read /proc/meminfo: {err}");
                true
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct MemSnapshot {
    pub available_kb: u64,
    pub swap_total_kb: u64,
    pub swap_free_kb: u64,
}

impl MemSnapshot {
    pub(crate) fn sufficient(&self, min_available_kb: u64, max_swap_used_kb: u64) -> bool {
        if self.available_kb < min_available_kb {
            return false;
        }
        if max_swap_used_kb == 0 {
            return true;
        }
        self.swap_total_kb.saturating_sub(self.swap_free_kb) <= max_swap_used_kb
    }
}

pub(crate) fn parse_meminfo(content: &str) -> Option<MemSnapshot> {
    let mut snapshot = MemSnapshot::default();
    let mut seen_available = false;

    for line in content.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let value = rest
            .trim()
            .split_whitespace()
            .next()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        match key {
            "MemAvailable" => {
                snapshot.available_kb = value;
                seen_available = true;
            }
            "SwapTotal" => snapshot.swap_total_kb = value,
            "SwapFree" => snapshot.swap_free_kb = value,
            _ => {}
        }
    }

    seen_available.then_some(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEMINFO: &str = "\
MemTotal:       16281804 kB
MemFree:          514604 kB
MemAvailable:    8046508 kB
SwapTotal:       2097148 kB
SwapFree:        1048574 kB
";

    #[test]
    fn parses_the_relevant_fields() {
        let snapshot = parse_meminfo(MEMINFO).unwrap();
        assert_eq!(snapshot.available_kb, 8_046_508);
        assert_eq!(snapshot.swap_total_kb, 2_097_148);
        assert_eq!(snapshot.swap_free_kb, 1_048_574);
    }

    #[test]
    fn verdicts() {
        let snapshot = parse_meminfo(MEMINFO).unwrap();
        assert!(snapshot.sufficient(300 * 1024, 2 * 1024 * 1024));
        assert!(!snapshot.sufficient(16 * 1024 * 1024, 0));
        // swap used is ~1 GiB here
        assert!(!snapshot.sufficient(300 * 1024, 512 * 1024));
        assert!(snapshot.sufficient(300 * 1024, 0));
    }

    #[test]
    fn missing_mem_available_disables_the_gate() {
        assert_eq!(parse_meminfo("MemTotal: 1 kB\n"), None);
    }
}
