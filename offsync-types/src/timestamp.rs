//! Hybrid Logical Clock implementation for last-writer-wins ordering.
//!
//! Combines physical time with a logical counter to ensure:
//! - Monotonicity (a device never issues a timestamp lower than one it issued
//!   or observed before)
//! - Causality (a local edit made after applying a server record is stamped
//!   later than that record)
//! - Bounded drift from physical time
//!
//! Wall-clock skew between devices is still possible; the clock only removes
//! backwards steps on a single device.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// A Hybrid Logical Clock timestamp.
///
/// Consists of:
/// - `wall_time`: Milliseconds since Unix epoch (physical component)
/// - `logical`: Logical counter for events at the same wall time
///
/// Based on the HLC algorithm from "Logical Physical Clocks" (Kulkarni et al.).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HybridTimestamp {
    /// Physical time component (milliseconds since Unix epoch).
    wall_time: u64,
    /// Logical counter for ordering events at the same wall time.
    logical: u32,
}

/// Current wall time in milliseconds. A clock set before 1970 reads as zero.
fn wall_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

impl HybridTimestamp {
    /// The lowest timestamp. Used as the "no checkpoint" sentinel.
    pub const ZERO: Self = Self::new(0, 0);

    /// Creates a new timestamp at the current time.
    #[must_use]
    pub fn now() -> Self {
        Self::from_millis(wall_clock_ms())
    }

    /// Creates a timestamp from components.
    #[must_use]
    pub const fn new(wall_time: u64, logical: u32) -> Self {
        Self { wall_time, logical }
    }

    /// Creates a timestamp at the given wall time with a zero counter.
    #[must_use]
    pub const fn from_millis(wall_time: u64) -> Self {
        Self::new(wall_time, 0)
    }

    /// Returns the wall time component.
    #[must_use]
    pub const fn wall_time(&self) -> u64 {
        self.wall_time
    }

    /// Returns the logical counter.
    #[must_use]
    pub const fn logical(&self) -> u32 {
        self.logical
    }

    /// Generates the next timestamp, ensuring monotonicity.
    #[must_use]
    pub fn tick(&self) -> Self {
        self.tick_at(wall_clock_ms())
    }

    /// Generates the next timestamp given the current wall time.
    #[must_use]
    pub fn tick_at(&self, now: u64) -> Self {
        if now > self.wall_time {
            Self::new(now, 0)
        } else {
            Self::new(self.wall_time, self.logical.saturating_add(1))
        }
    }

    /// Updates this clock based on a received timestamp.
    ///
    /// The result is greater than both the current clock and the received
    /// timestamp.
    #[must_use]
    pub fn receive(&self, other: &Self) -> Self {
        self.receive_at(other, wall_clock_ms())
    }

    /// Same as [`receive`](Self::receive) with an explicit wall time.
    #[must_use]
    pub fn receive_at(&self, other: &Self, now: u64) -> Self {
        let max_wall = now.max(self.wall_time).max(other.wall_time);

        let logical = if max_wall == self.wall_time && max_wall == other.wall_time {
            self.logical.max(other.logical).saturating_add(1)
        } else if max_wall == self.wall_time {
            self.logical.saturating_add(1)
        } else if max_wall == other.wall_time {
            other.logical.saturating_add(1)
        } else {
            0
        };

        Self::new(max_wall, logical)
    }

    /// Returns true if this timestamp is strictly before the other.
    #[must_use]
    pub fn is_before(&self, other: &Self) -> bool {
        self < other
    }

    /// Returns true if this timestamp is strictly after the other.
    #[must_use]
    pub fn is_after(&self, other: &Self) -> bool {
        self > other
    }
}

impl Default for HybridTimestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl PartialOrd for HybridTimestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HybridTimestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.wall_time.cmp(&other.wall_time) {
            Ordering::Equal => self.logical.cmp(&other.logical),
            other => other,
        }
    }
}

/// Text form is `<wall_time>.<logical>`; used for checkpoints in query strings.
impl fmt::Display for HybridTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.wall_time, self.logical)
    }
}

impl FromStr for HybridTimestamp {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || crate::Error::InvalidTimestamp(s.to_string());
        let (wall, logical) = match s.split_once('.') {
            Some((wall, logical)) => (wall, logical),
            None => (s, "0"),
        };
        let wall_time = wall.parse::<u64>().map_err(|_| invalid())?;
        let logical = logical.parse::<u32>().map_err(|_| invalid())?;
        Ok(Self::new(wall_time, logical))
    }
}

/// A shared, thread-safe hybrid clock.
///
/// Every local timestamp comes from [`HybridClock::now`]; every timestamp
/// received from the server is fed to [`HybridClock::observe`].
#[derive(Debug)]
pub struct HybridClock {
    last: Mutex<HybridTimestamp>,
}

impl HybridClock {
    /// Creates a clock starting at the current wall time.
    pub fn new() -> Self {
        Self::starting_at(HybridTimestamp::ZERO)
    }

    /// Creates a clock that never issues anything at or below `floor`.
    pub fn starting_at(floor: HybridTimestamp) -> Self {
        Self {
            last: Mutex::new(floor),
        }
    }

    /// Issues the next local timestamp.
    pub fn now(&self) -> HybridTimestamp {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        *last = last.tick();
        *last
    }

    /// Merges a remote timestamp, returning the new clock value.
    pub fn observe(&self, remote: &HybridTimestamp) -> HybridTimestamp {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        *last = last.receive(remote);
        *last
    }

    /// Returns the last issued or observed timestamp without advancing.
    pub fn peek(&self) -> HybridTimestamp {
        *self.last.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for HybridClock {
    fn default() -> Self {
        Self::new()
    }
}
