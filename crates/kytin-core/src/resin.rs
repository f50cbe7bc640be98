//! The Resin tank: consumable quota with a daily cap
//!
//! Resin is the fuel for metered operations. Every heartbeat burns Resin from
//! a lifetime balance, and no more than `daily_limit` units can burn between
//! two calls to [`ResinTank::reset_daily`]. Resets are driven from outside;
//! the tank never looks at the clock to decide when a day ends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metering state for Resin consumption
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResinTank {
    /// Remaining consumable units
    balance: u64,
    /// Total units ever consumed
    lifetime_burned: u64,
    /// Maximum units per day window
    daily_limit: u64,
    /// Units consumed since the last reset
    daily_consumed: u64,
    /// When the daily window was last zeroed
    last_reset: DateTime<Utc>,
}

/// Point-in-time copy of the tank counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResinSnapshot {
    pub balance: u64,
    pub lifetime_burned: u64,
    pub daily_limit: u64,
    pub daily_consumed: u64,
    pub daily_remaining: u64,
    pub last_reset: DateTime<Utc>,
}

impl ResinTank {
    /// Create a tank with a fixed initial balance and a fresh daily window
    pub fn new(balance: u64, daily_limit: u64) -> Self {
        Self {
            balance,
            lifetime_burned: 0,
            daily_limit,
            daily_consumed: 0,
            last_reset: Utc::now(),
        }
    }

    /// Whether `amount` could be consumed right now
    pub fn can_consume(&self, amount: u64) -> bool {
        if self.balance < amount {
            return false;
        }
        match self.daily_consumed.checked_add(amount) {
            Some(total) => total <= self.daily_limit,
            None => false,
        }
    }

    /// Check both limits and deduct `amount`. Returns false, leaving the tank
    /// untouched, when either limit would be exceeded.
    pub fn consume(&mut self, amount: u64) -> bool {
        if !self.can_consume(amount) {
            return false;
        }

        self.balance -= amount;
        self.daily_consumed += amount;
        self.lifetime_burned = self.lifetime_burned.saturating_add(amount);
        true
    }

    /// Zero the daily window
    pub fn reset_daily(&mut self) {
        self.daily_consumed = 0;
        self.last_reset = Utc::now();
    }

    pub fn is_empty(&self) -> bool {
        self.balance == 0
    }

    pub fn balance(&self) -> u64 {
        self.balance
    }

    pub fn lifetime_burned(&self) -> u64 {
        self.lifetime_burned
    }

    pub fn daily_limit(&self) -> u64 {
        self.daily_limit
    }

    pub fn daily_consumed(&self) -> u64 {
        self.daily_consumed
    }

    pub fn daily_remaining(&self) -> u64 {
        self.daily_limit.saturating_sub(self.daily_consumed)
    }

    pub fn last_reset(&self) -> DateTime<Utc> {
        self.last_reset
    }

    pub fn snapshot(&self) -> ResinSnapshot {
        ResinSnapshot {
            balance: self.balance,
            lifetime_burned: self.lifetime_burned,
            daily_limit: self.daily_limit,
            daily_consumed: self.daily_consumed,
            daily_remaining: self.daily_remaining(),
            last_reset: self.last_reset,
        }
    }
}

impl Default for ResinTank {
    fn default() -> Self {
        Self::new(crate::INITIAL_RESIN_BALANCE, crate::DEFAULT_RESIN_DAILY_LIMIT)
    }
}
