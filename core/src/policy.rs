//! Purchase-frequency policy evaluation.
//!
//! Pure — no I/O. The same function backs the fast user-facing pre-check
//! and the authoritative check inside the purchase transaction; a single
//! implementation keeps the two call sites from drifting apart.

use crate::clock::PolicyCalendar;
use crate::config::PurchaseLimit;
use crate::error::{LedgerError, LimitReason};
use crate::types::{BundleId, UserId};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// One row per (user, bundle): created on the first successful purchase,
/// updated on every later one, never deleted.
#[derive(Debug, Clone, Serialize)]
pub struct PurchaseRecord {
    pub user_id:           UserId,
    pub bundle_id:         BundleId,
    pub count:             i64,
    pub first_purchase_at: DateTime<Utc>,
    pub last_purchase_at:  DateTime<Utc>,
    #[serde(skip)]
    pub version:           i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PolicyDecision {
    pub allowed:           bool,
    pub reason:            Option<LimitReason>,
    pub next_available_at: Option<DateTime<Utc>>,
}

impl PolicyDecision {
    fn allow() -> Self {
        Self { allowed: true, reason: None, next_available_at: None }
    }

    fn deny(reason: LimitReason, next_available_at: Option<DateTime<Utc>>) -> Self {
        Self { allowed: false, reason: Some(reason), next_available_at }
    }

    pub fn into_error(self) -> LedgerError {
        LedgerError::LimitExceeded {
            reason:            self.reason.unwrap_or(LimitReason::AlreadyPurchased),
            next_available_at: self.next_available_at,
        }
    }
}

/// Decide whether a bundle under `limit` may be purchased at `now`, given
/// the prior purchase history for this (user, bundle).
pub fn evaluate(
    limit: PurchaseLimit,
    record: Option<&PurchaseRecord>,
    now: DateTime<Utc>,
    calendar: &PolicyCalendar,
) -> PolicyDecision {
    let record = match record {
        Some(record) if record.count > 0 => record,
        _ => return PolicyDecision::allow(),
    };

    match limit {
        PurchaseLimit::None => PolicyDecision::allow(),

        // Lifetime limit: a record existing at all is a permanent denial.
        PurchaseLimit::Once => PolicyDecision::deny(LimitReason::AlreadyPurchased, None),

        PurchaseLimit::Monthly => {
            if calendar.month_key(record.last_purchase_at) < calendar.month_key(now) {
                PolicyDecision::allow()
            } else {
                PolicyDecision::deny(
                    LimitReason::MonthlyLimitReached,
                    Some(calendar.start_of_next_month(now)),
                )
            }
        }

        PurchaseLimit::Weekly => {
            if calendar.iso_week_key(record.last_purchase_at) < calendar.iso_week_key(now) {
                PolicyDecision::allow()
            } else {
                PolicyDecision::deny(
                    LimitReason::WeeklyLimitReached,
                    Some(calendar.start_of_next_iso_week(now)),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn calendar() -> PolicyCalendar {
        PolicyCalendar::from_offset_minutes(480).unwrap()
    }

    fn record_at(t: DateTime<Utc>) -> PurchaseRecord {
        PurchaseRecord {
            user_id:           "u1".into(),
            bundle_id:         "b1".into(),
            count:             1,
            first_purchase_at: t,
            last_purchase_at:  t,
            version:           0,
        }
    }

    #[test]
    fn no_history_always_allows() {
        let now = Utc.with_ymd_and_hms(2025, 6, 9, 4, 0, 0).unwrap();
        for limit in [
            PurchaseLimit::None,
            PurchaseLimit::Once,
            PurchaseLimit::Weekly,
            PurchaseLimit::Monthly,
        ] {
            assert!(evaluate(limit, None, now, &calendar()).allowed);
        }
    }

    #[test]
    fn once_is_a_permanent_denial() {
        let bought = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2025, 6, 9, 4, 0, 0).unwrap();
        let record = record_at(bought);
        let decision = evaluate(PurchaseLimit::Once, Some(&record), now, &calendar());
        assert!(!decision.allowed);
        assert_eq!(decision.reason, Some(LimitReason::AlreadyPurchased));
        assert!(decision.next_available_at.is_none());
    }

    #[test]
    fn weekly_denies_within_same_iso_week() {
        // Monday 2025-06-09 and Wednesday 2025-06-11 share an ISO week.
        let monday = Utc.with_ymd_and_hms(2025, 6, 9, 4, 0, 0).unwrap();
        let wednesday = Utc.with_ymd_and_hms(2025, 6, 11, 4, 0, 0).unwrap();
        let record = record_at(monday);
        let decision = evaluate(PurchaseLimit::Weekly, Some(&record), wednesday, &calendar());
        assert!(!decision.allowed);
        assert_eq!(decision.reason, Some(LimitReason::WeeklyLimitReached));
        // Next Monday 00:00 UTC+8 == Sunday 15th 16:00 UTC.
        assert_eq!(
            decision.next_available_at,
            Some(Utc.with_ymd_and_hms(2025, 6, 15, 16, 0, 0).unwrap())
        );
    }

    #[test]
    fn weekly_allows_next_monday() {
        let monday = Utc.with_ymd_and_hms(2025, 6, 9, 4, 0, 0).unwrap();
        let next_monday = Utc.with_ymd_and_hms(2025, 6, 16, 4, 0, 0).unwrap();
        let record = record_at(monday);
        assert!(evaluate(PurchaseLimit::Weekly, Some(&record), next_monday, &calendar()).allowed);
    }

    #[test]
    fn monthly_uses_the_configured_timezone() {
        // 2025-03-31T20:00 UTC is April 1st in UTC+8, so a purchase made in
        // March is already in a prior month there.
        let march = Utc.with_ymd_and_hms(2025, 3, 15, 0, 0, 0).unwrap();
        let boundary = Utc.with_ymd_and_hms(2025, 3, 31, 20, 0, 0).unwrap();
        let record = record_at(march);
        assert!(evaluate(PurchaseLimit::Monthly, Some(&record), boundary, &calendar()).allowed);
    }

    #[test]
    fn monthly_denies_within_same_month() {
        let early = Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2025, 6, 20, 0, 0, 0).unwrap();
        let record = record_at(early);
        let decision = evaluate(PurchaseLimit::Monthly, Some(&record), later, &calendar());
        assert!(!decision.allowed);
        assert_eq!(decision.reason, Some(LimitReason::MonthlyLimitReached));
        // July 1st 00:00 UTC+8 == June 30th 16:00 UTC.
        assert_eq!(
            decision.next_available_at,
            Some(Utc.with_ymd_and_hms(2025, 6, 30, 16, 0, 0).unwrap())
        );
    }
}
