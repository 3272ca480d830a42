//! Integer MicroUSD arithmetic. No floating point on the hot path (§4.6).

use thiserror::Error;

/// USD × 10^6, the only unit the ledger does arithmetic in.
pub const MICRO_PER_USD: f64 = 1_000_000.0;

/// `2^53 - 1`, the largest integer a float can represent exactly.
pub const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MicroUsdError {
    #[error("usd amount is negative")]
    Negative,
    #[error("usd * 1e6 exceeds the safe integer bound")]
    Overflow,
}

/// Convert a floating-point USD amount to an integer MicroUSD count using
/// banker's rounding (round-half-to-even) at 6 decimal places. Rejects
/// negative amounts and amounts whose scaled value would exceed
/// `2^53 - 1`.
pub fn usd_to_micro(usd: f64) -> Result<u64, MicroUsdError> {
    if usd < 0.0 {
        return Err(MicroUsdError::Negative);
    }
    let scaled = usd * MICRO_PER_USD;
    if scaled > MAX_SAFE_INTEGER {
        return Err(MicroUsdError::Overflow);
    }
    Ok(round_half_to_even(scaled))
}

pub fn micro_to_usd(micro: u64) -> f64 {
    micro as f64 / MICRO_PER_USD
}

fn round_half_to_even(x: f64) -> u64 {
    let floor = x.floor();
    let diff = x - floor;
    let floor_i = floor as u64;
    if diff < 0.5 {
        floor_i
    } else if diff > 0.5 {
        floor_i + 1
    } else if floor_i % 2 == 0 {
        floor_i
    } else {
        floor_i + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_values_round_trip() {
        assert_eq!(usd_to_micro(1.5).unwrap(), 1_500_000);
        assert_eq!(usd_to_micro(0.0).unwrap(), 0);
    }

    #[test]
    fn banker_rounding_rounds_half_to_even() {
        // 1.0000005 * 1e6 = 1000000.5 -> rounds to even (1000000)
        assert_eq!(usd_to_micro(1.0000005).unwrap(), 1_000_000);
        // 1.0000015 * 1e6 = 1000001.5 -> rounds to even (1000002)
        assert_eq!(usd_to_micro(1.0000015).unwrap(), 1_000_002);
    }

    #[test]
    fn negative_and_overflow_are_rejected() {
        assert_eq!(usd_to_micro(-1.0), Err(MicroUsdError::Negative));
        assert_eq!(usd_to_micro(1e30), Err(MicroUsdError::Overflow));
    }

    #[test]
    fn rounding_bound_over_a_batch_stays_within_entry_count() {
        let amounts = [0.1_f64, 0.2, 0.3, 1.0 / 3.0, 99.999_999_4];
        let v1_total: f64 = amounts.iter().sum();
        let v2_total: u64 = amounts.iter().map(|a| usd_to_micro(*a).unwrap()).sum();
        let expected = round_half_to_even(v1_total * MICRO_PER_USD);
        let drift = (v2_total as i64 - expected as i64).unsigned_abs();
        assert!(drift <= amounts.len() as u64);
    }
}
