//! Amount Normalisation
//!
//! All swap accounting runs in a 1e-8 reference unit (the satoshi). Token
//! amounts with other precisions are converted with wide integers; floats
//! never touch amounts.

/// Reference precision of the internal unit
pub const REFERENCE_DECIMALS: u32 = 8;

/// Satoshis per whole coin
pub const SATS_PER_COIN: u64 = 100_000_000;

/// Convert an amount in reference units (1e-8) into token base units with
/// the given number of decimals. Truncates when the token is coarser than
/// the reference unit.
pub fn format_token_amount(amount: u64, decimals: u32) -> u128 {
    let amount = amount as u128;
    if decimals >= REFERENCE_DECIMALS {
        amount * 10u128.pow(decimals - REFERENCE_DECIMALS)
    } else {
        amount / 10u128.pow(REFERENCE_DECIMALS - decimals)
    }
}

/// Convert an amount in token base units with the given number of decimals
/// into reference units (1e-8). Truncates when the token is finer than the
/// reference unit.
pub fn normalize_token_amount(amount: u128, decimals: u32) -> u64 {
    let normalized = if decimals >= REFERENCE_DECIMALS {
        amount / 10u128.pow(decimals - REFERENCE_DECIMALS)
    } else {
        amount * 10u128.pow(REFERENCE_DECIMALS - decimals)
    };
    normalized as u64
}

/// Render satoshis as a decimal coin string, e.g. 1_230_000 -> "0.01230000"
pub fn sats_to_coin_string(sats: u64) -> String {
    format!("{}.{:08}", sats / SATS_PER_COIN, sats % SATS_PER_COIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_expands_fine_tokens() {
        // 18-decimal token: 1 sat of reference = 1e10 base units
        assert_eq!(format_token_amount(1, 18), 10_000_000_000);
        assert_eq!(format_token_amount(21_000_000, 18), 210_000_000_000_000_000);
    }

    #[test]
    fn test_format_truncates_coarse_tokens() {
        // 6-decimal token: reference amounts below 100 vanish
        assert_eq!(format_token_amount(99, 6), 0);
        assert_eq!(format_token_amount(150, 6), 1);
        assert_eq!(format_token_amount(1_000_000, 6), 10_000);
    }

    #[test]
    fn test_identity_at_reference_precision() {
        for amount in [0u64, 1, 546, 100_000_000, u64::MAX] {
            assert_eq!(format_token_amount(amount, 8), amount as u128);
            assert_eq!(normalize_token_amount(amount as u128, 8), amount);
        }
    }

    #[test]
    fn test_round_trip_within_truncation() {
        for decimals in [6u32, 8, 18] {
            for amount in [0u64, 1, 99, 100, 12_345_678, 100_000_000, 987_654_321] {
                let round_tripped =
                    normalize_token_amount(format_token_amount(amount, decimals), decimals);
                if decimals >= REFERENCE_DECIMALS {
                    assert_eq!(round_tripped, amount, "decimals={}", decimals);
                } else {
                    // Truncated to the token's precision, never above the input
                    let step = 10u64.pow(REFERENCE_DECIMALS - decimals);
                    assert_eq!(round_tripped, amount - amount % step);
                }
            }
        }
    }

    #[test]
    fn test_coin_string() {
        assert_eq!(sats_to_coin_string(0), "0.00000000");
        assert_eq!(sats_to_coin_string(1), "0.00000001");
        assert_eq!(sats_to_coin_string(123_456_789), "1.23456789");
    }
}
