//! Vacation-day bookkeeping.
//!
//! Pure arithmetic over [`VacationBalance`] counters. Nothing here refuses to
//! drive a counter negative; [`VacationLedger::check_capacity`] is offered to
//! callers who validate a leave request before it is submitted.

pub mod form;

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::user::{LeaveType, VacationBalance};

pub use form::{FormFieldExtractor, KeywordFormFieldExtractor, LeavePeriod};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("requested {requested} days but only {remaining} vacation days remain")]
    InsufficientBalance { requested: i32, remaining: i32 },
    #[error("requested {requested} on-demand days but only {remaining} remain of the annual cap {cap}")]
    OnDemandCapExceeded { requested: i32, remaining: i32, cap: i32 },
}

/// What a ledger call changed, for logging and audit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerAdjustment {
    pub leave_type: LeaveType,
    pub days: i32,
    pub vacation_days_used: i32,
    pub on_demand_vacation_days_used: i32,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct VacationLedger;

impl VacationLedger {
    /// Counts Monday..Friday dates in `[start, end]`; zero when the range is inverted.
    pub fn business_days_inclusive(start: NaiveDate, end: NaiveDate) -> i32 {
        if start > end {
            return 0;
        }
        start
            .iter_days()
            .take_while(|day| *day <= end)
            .filter(|day| !matches!(day.weekday(), Weekday::Sat | Weekday::Sun))
            .count()
            .try_into()
            .unwrap_or(i32::MAX)
    }

    /// Debits approved leave. Returns `None` for leave types this ledger does not track.
    pub fn apply_leave(
        balance: &mut VacationBalance,
        leave_type: LeaveType,
        days: i32,
    ) -> Option<LedgerAdjustment> {
        match leave_type {
            LeaveType::Annual => {
                balance.vacation_days_used += days;
            }
            LeaveType::OnDemand => {
                balance.on_demand_vacation_days_used += days;
                balance.vacation_days_used += days;
            }
            LeaveType::Circumstantial | LeaveType::Sick | LeaveType::Unpaid => return None,
        }
        Some(Self::adjustment(balance, leave_type, days))
    }

    /// Credits cancelled leave back. No floor at zero.
    pub fn reverse_leave(
        balance: &mut VacationBalance,
        leave_type: LeaveType,
        days: i32,
    ) -> Option<LedgerAdjustment> {
        match leave_type {
            LeaveType::Annual => {
                balance.vacation_days_used -= days;
            }
            LeaveType::OnDemand => {
                balance.on_demand_vacation_days_used -= days;
                balance.vacation_days_used -= days;
            }
            LeaveType::Circumstantial | LeaveType::Sick | LeaveType::Unpaid => return None,
        }
        Some(Self::adjustment(balance, leave_type, -days))
    }

    pub fn remaining_days(balance: &VacationBalance) -> i32 {
        balance.annual_vacation_days + balance.carried_over_vacation_days
            - balance.vacation_days_used
    }

    pub fn check_capacity(
        balance: &VacationBalance,
        leave_type: LeaveType,
        days: i32,
        on_demand_annual_cap: i32,
    ) -> Result<(), LedgerError> {
        if !matches!(leave_type, LeaveType::Annual | LeaveType::OnDemand) {
            return Ok(());
        }

        let remaining = Self::remaining_days(balance);
        if days > remaining {
            return Err(LedgerError::InsufficientBalance { requested: days, remaining });
        }

        if leave_type == LeaveType::OnDemand {
            let remaining = on_demand_annual_cap - balance.on_demand_vacation_days_used;
            if days > remaining {
                return Err(LedgerError::OnDemandCapExceeded {
                    requested: days,
                    remaining,
                    cap: on_demand_annual_cap,
                });
            }
        }

        Ok(())
    }

    fn adjustment(balance: &VacationBalance, leave_type: LeaveType, days: i32) -> LedgerAdjustment {
        LedgerAdjustment {
            leave_type,
            days,
            vacation_days_used: balance.vacation_days_used,
            on_demand_vacation_days_used: balance.on_demand_vacation_days_used,
        }
    }
}
