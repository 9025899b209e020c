use alloy_primitives::{
    U256,
    utils::parse_ether,
};

pub const NATIVE_DECIMALS: u32 = 18;
pub const DEFAULT_COMMISSION_RATE: u64 = 10;

/// 0.01 MON in wei.
pub const MIN_WAGER_WEI: u64 = 10_000_000_000_000_000;
/// 1 MON in wei.
pub const MAX_WAGER_WEI: u64 = 1_000_000_000_000_000_000;
/// Step of the wager input, same as the lower bound.
pub const WAGER_STEP_WEI: u64 = MIN_WAGER_WEI;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum WagerError {
    #[error("wager '{0}' is not a valid amount")]
    Unparsable(String),
    #[error("wager must be a positive amount")]
    NotPositive,
    #[error("wager must be between 0.01 and 1 MON")]
    OutOfRange,
}

/// Decimal MON amount to wei. `parse_ether` wraps negative input around, so
/// the sign is checked here.
fn parse_mon(raw: &str) -> Result<U256, WagerError> {
    let trimmed = raw.trim();
    if trimmed.starts_with('-') {
        return Err(WagerError::NotPositive);
    }
    parse_ether(trimmed).map_err(|_| WagerError::Unparsable(trimmed.to_string()))
}

/// Parses a decimal wager (in MON) into wei and checks the playable bounds.
pub fn parse_wager(raw: &str) -> Result<U256, WagerError> {
    let wei = parse_mon(raw)?;
    if wei.is_zero() {
        return Err(WagerError::NotPositive);
    }
    if wei < U256::from(MIN_WAGER_WEI) || wei > U256::from(MAX_WAGER_WEI) {
        return Err(WagerError::OutOfRange);
    }
    Ok(wei)
}

/// wager × (100 + rate) / 100 with floor division on wei.
pub fn total_with_commission(wager: U256, commission_rate: u64) -> U256 {
    wager.saturating_mul(U256::from(100u64 + commission_rate)) / U256::from(100u64)
}

/// Formats a wei amount with a fixed number of decimals, truncating the rest.
pub fn format_fixed(wei: U256, decimal_places: u32) -> String {
    let places = decimal_places.min(NATIVE_DECIMALS);
    let one_unit = U256::from(10u64).pow(U256::from(NATIVE_DECIMALS));
    let whole = wei / one_unit;
    if places == 0 {
        return whole.to_string();
    }
    let scale = U256::from(10u64).pow(U256::from(NATIVE_DECIMALS - places));
    let fractional = (wei % one_unit) / scale;
    format!(
        "{}.{:0>width$}",
        whole,
        fractional.to_string(),
        width = places as usize
    )
}

/// Balances and the prize pool are shown with 4 decimals.
pub fn format_balance(wei: U256) -> String {
    format_fixed(wei, 4)
}

/// "Total with commission" as shown next to the wager input. Anything that is
/// not a non-negative decimal renders as `0.00`.
pub fn display_total(raw_wager: &str, commission_rate: u64) -> String {
    match parse_mon(raw_wager) {
        Ok(wei) => format_fixed(total_with_commission(wei, commission_rate), 5),
        Err(_) => String::from("0.00"),
    }
}

/// Steps the wager input by `steps` increments of 0.01, clamped to the bounds.
pub fn step_wager(raw: &str, steps: i64) -> String {
    let current = parse_mon(raw).unwrap_or(U256::from(MIN_WAGER_WEI));
    let step = U256::from(WAGER_STEP_WEI).saturating_mul(U256::from(steps.unsigned_abs()));
    let next = if steps >= 0 {
        current.saturating_add(step)
    } else {
        current.saturating_sub(step)
    };
    let clamped = next.clamp(U256::from(MIN_WAGER_WEI), U256::from(MAX_WAGER_WEI));
    format_fixed(clamped, 2)
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use proptest::prelude::*;

    fn mon(raw: &str) -> U256 {
        parse_ether(raw).unwrap()
    }

    #[test]
    fn display_total__one_hundredth_at_ten_percent() {
        assert_eq!(display_total("0.01", 10), "0.01100");
    }

    #[test]
    fn display_total__falls_back_for_garbage() {
        assert_eq!(display_total("abc", 10), "0.00");
        assert_eq!(display_total("", 10), "0.00");
    }

    #[test]
    fn display_total__negative_wager_renders_zero() {
        assert_eq!(display_total("-0.5", 10), "0.00");
        assert_eq!(display_total(" -1", 10), "0.00");
    }

    #[test]
    fn parse_wager__negative_is_not_positive() {
        assert_eq!(parse_wager("-0.5"), Err(WagerError::NotPositive));
        assert_eq!(step_wager("-0.5", 1), "0.02");
    }

    #[test]
    fn total_with_commission__one_mon_at_ten_percent() {
        assert_eq!(total_with_commission(mon("1"), 10), mon("1.1"));
    }

    #[test]
    fn parse_wager__accepts_bounds() {
        assert_eq!(parse_wager("0.01"), Ok(U256::from(MIN_WAGER_WEI)));
        assert_eq!(parse_wager(" 1 "), Ok(U256::from(MAX_WAGER_WEI)));
    }

    #[test]
    fn parse_wager__refuses_zero_garbage_and_out_of_range() {
        assert_eq!(parse_wager("0"), Err(WagerError::NotPositive));
        assert_eq!(
            parse_wager("heads"),
            Err(WagerError::Unparsable("heads".to_string()))
        );
        assert_eq!(parse_wager("0.001"), Err(WagerError::OutOfRange));
        assert_eq!(parse_wager("1.5"), Err(WagerError::OutOfRange));
    }

    #[test]
    fn format_fixed__truncates_instead_of_rounding() {
        assert_eq!(format_fixed(mon("1.99999"), 4), "1.9999");
        assert_eq!(format_fixed(mon("12"), 4), "12.0000");
        assert_eq!(format_fixed(mon("0.0005"), 4), "0.0005");
        assert_eq!(format_fixed(mon("3.7"), 0), "3");
    }

    #[test]
    fn step_wager__clamps_to_bounds() {
        assert_eq!(step_wager("0.01", -1), "0.01");
        assert_eq!(step_wager("0.01", 1), "0.02");
        assert_eq!(step_wager("0.99", 5), "1.00");
        assert_eq!(step_wager("oops", 1), "0.02");
    }

    proptest! {
        #[test]
        fn total_with_commission__matches_reference(
            wei in 1u128..=1_000_000_000_000_000_000u128,
            rate in 0u64..=100,
        ) {
            let expected = wei * (100 + rate as u128) / 100;
            let actual = total_with_commission(U256::from(wei), rate);
            prop_assert_eq!(actual, U256::from(expected));
            prop_assert!(actual >= U256::from(wei));
        }
    }
}
