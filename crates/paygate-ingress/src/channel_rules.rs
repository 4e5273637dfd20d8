//! Channel rules: the hard gate on amount and time of day.
//!
//! Checks run in a fixed order and the first failure wins:
//!
//! 1. Channel enabled
//! 2. Time window (may cross midnight; `00:00:00`-`00:00:00` is all day)
//! 3. Fixed-amount list, then the `[min, max]` range
//! 4. Random surcharge, followed by a final range re-check. A surcharge
//!    that would leave the amount at or below zero is dropped.
//!
//! The surcharge is applied after the list/range checks so that the list
//! is always matched against the amount the merchant asked for.

use chrono::NaiveTime;
use paygate_types::{Channel, PaygateError, Result};
use rand::Rng;

/// Amount the order will actually be created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelAmount {
    /// Caller-supplied amount, kept as `notify_money`.
    pub requested: i64,
    /// After surcharge.
    pub money: i64,
}

/// Run every channel rule against `amount` at wall-clock `now`.
///
/// # Errors
/// `ChannelDisabled`, `ChannelOutsideWindow` or `AmountOutOfRange`.
pub fn check_channel<R: Rng + ?Sized>(
    channel: &Channel,
    amount: i64,
    now: NaiveTime,
    rng: &mut R,
) -> Result<ChannelAmount> {
    if !channel.enabled {
        return Err(PaygateError::ChannelDisabled);
    }
    check_window(&channel.start_time, &channel.end_time, now)?;
    check_amount(channel, amount)?;

    let mut money = amount + surcharge(channel.float_min_money, channel.float_max_money, rng);
    if money <= 0 {
        // A negative surcharge never zeroes an order out; charge what was asked.
        money = amount;
    }
    check_range(channel.min_money, channel.max_money, money)?;

    Ok(ChannelAmount {
        requested: amount,
        money,
    })
}

/// Reject `now` outside `[start, end]`. A window with `start > end`
/// crosses midnight. Unparsable bounds skip the check.
///
/// # Errors
/// `ChannelOutsideWindow`.
pub fn check_window(start: &str, end: &str, now: NaiveTime) -> Result<()> {
    if start == "00:00:00" && end == "00:00:00" {
        return Ok(());
    }
    let (Ok(s), Ok(e)) = (
        NaiveTime::parse_from_str(start, "%H:%M:%S"),
        NaiveTime::parse_from_str(end, "%H:%M:%S"),
    ) else {
        return Ok(());
    };

    let outside = if s < e {
        now < s || now > e
    } else if s > e {
        now < s && now > e
    } else {
        false
    };

    if outside {
        Err(PaygateError::ChannelOutsideWindow {
            start: start.to_string(),
            end: end.to_string(),
        })
    } else {
        Ok(())
    }
}

fn check_amount(channel: &Channel, amount: i64) -> Result<()> {
    if channel.settled && !channel.moneys.is_empty() && !channel.moneys.contains(&amount) {
        return Err(PaygateError::AmountOutOfRange { amount });
    }
    check_range(channel.min_money, channel.max_money, amount)
}

/// `[min, max]` with 0 meaning unbounded on that side.
fn check_range(min: i64, max: i64, amount: i64) -> Result<()> {
    if (min > 0 && amount < min) || (max > 0 && amount > max) {
        Err(PaygateError::AmountOutOfRange { amount })
    } else {
        Ok(())
    }
}

/// `float_min + rand(0..=float_max - float_min)`, or `float_min` alone when
/// the range is empty. Zero when neither bound is set.
pub fn surcharge<R: Rng + ?Sized>(float_min: i64, float_max: i64, rng: &mut R) -> i64 {
    if float_min <= 0 && float_max <= 0 {
        return 0;
    }
    if float_max > float_min {
        float_min + rng.gen_range(0..=float_max - float_min)
    } else {
        float_min
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paygate_types::PluginId;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn at(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn in_range_admitted() {
        let mut ch = Channel::dummy(1, PluginId(1));
        ch.min_money = 1000;
        ch.max_money = 50_000;
        let amt = check_channel(&ch, 10_000, at(12, 0, 0), &mut rng()).unwrap();
        assert_eq!(amt.money, 10_000);
        assert_eq!(amt.requested, 10_000);
    }

    #[test]
    fn disabled_channel_rejected() {
        let mut ch = Channel::dummy(1, PluginId(1));
        ch.enabled = false;
        let err = check_channel(&ch, 100, at(12, 0, 0), &mut rng()).unwrap_err();
        assert_eq!(err.code(), 7306);
    }

    #[test]
    fn window_crossing_midnight() {
        assert!(check_window("22:00:00", "06:00:00", at(23, 30, 0)).is_ok());
        assert!(check_window("22:00:00", "06:00:00", at(5, 59, 59)).is_ok());
        let err = check_window("22:00:00", "06:00:00", at(10, 0, 0)).unwrap_err();
        assert_eq!(err.code(), 7309);
        assert!(err.to_string().contains("22:00:00-06:00:00"));
    }

    #[test]
    fn same_day_window() {
        assert!(check_window("09:00:00", "18:00:00", at(9, 0, 0)).is_ok());
        assert!(check_window("09:00:00", "18:00:00", at(18, 0, 0)).is_ok());
        assert!(check_window("09:00:00", "18:00:00", at(8, 59, 59)).is_err());
        assert!(check_window("09:00:00", "18:00:00", at(18, 0, 1)).is_err());
    }

    #[test]
    fn all_day_and_garbage_windows_skip() {
        assert!(check_window("00:00:00", "00:00:00", at(3, 0, 0)).is_ok());
        assert!(check_window("9am", "18:00:00", at(3, 0, 0)).is_ok());
    }

    #[test]
    fn fixed_list_enforced() {
        let mut ch = Channel::dummy(1, PluginId(1));
        ch.settled = true;
        ch.moneys = vec![5000, 10_000];
        assert!(check_channel(&ch, 10_000, at(12, 0, 0), &mut rng()).is_ok());
        let err = check_channel(&ch, 9999, at(12, 0, 0), &mut rng()).unwrap_err();
        assert!(matches!(err, PaygateError::AmountOutOfRange { amount: 9999 }));
    }

    #[test]
    fn out_of_range_rejected() {
        let mut ch = Channel::dummy(1, PluginId(1));
        ch.min_money = 1000;
        assert!(check_channel(&ch, 999, at(12, 0, 0), &mut rng()).is_err());
        // max 0 = unbounded
        assert!(check_channel(&ch, 10_000_000, at(12, 0, 0), &mut rng()).is_ok());
    }

    #[test]
    fn surcharge_within_bounds() {
        let mut r = rng();
        for _ in 0..100 {
            let s = surcharge(1, 99, &mut r);
            assert!((1..=99).contains(&s), "{s}");
        }
        assert_eq!(surcharge(0, 0, &mut r), 0);
        assert_eq!(surcharge(5, 5, &mut r), 5);
        assert_eq!(surcharge(5, 2, &mut r), 5);
    }

    #[test]
    fn surcharge_rechecks_range() {
        let mut ch = Channel::dummy(1, PluginId(1));
        ch.max_money = 10_000;
        ch.float_min_money = 1;
        ch.float_max_money = 1;
        // 10000 passes the first check but the surcharge pushes it over
        let err = check_channel(&ch, 10_000, at(12, 0, 0), &mut rng()).unwrap_err();
        assert!(matches!(err, PaygateError::AmountOutOfRange { amount: 10_001 }));

        let amt = check_channel(&ch, 9_000, at(12, 0, 0), &mut rng()).unwrap();
        assert_eq!(amt.money, 9_001);
        assert_eq!(amt.requested, 9_000);
    }

    #[test]
    fn non_positive_surcharge_falls_back_to_request() {
        let mut ch = Channel::dummy(1, PluginId(1));
        ch.float_min_money = -100_000;
        ch.float_max_money = 1;
        let mut fell_back = 0;
        for seed in 0..20 {
            let amt =
                check_channel(&ch, 10, at(12, 0, 0), &mut StdRng::seed_from_u64(seed)).unwrap();
            assert!(amt.money > 0);
            assert!(amt.money <= 11);
            if amt.money == 10 {
                fell_back += 1;
            }
        }
        assert!(fell_back > 0);
    }
}
