//! Calendar of collection dates built from a day-selection policy.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate, Weekday};
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::error::ScheduleError;

/// How days are picked inside each month.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayStrategy {
    /// Even spread that avoids the first and last day. Deterministic.
    Distributed,
    /// Uniform sample over the whole month.
    Random,
    /// Uniform sample over Monday..=Friday.
    Weekdays,
    /// Uniform sample over Saturday and Sunday.
    Weekends,
}

impl FromStr for DayStrategy {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "distributed" => Ok(Self::Distributed),
            "random" => Ok(Self::Random),
            "weekdays" => Ok(Self::Weekdays),
            "weekends" => Ok(Self::Weekends),
            _ => Err(ScheduleError::InvalidStrategy(s.to_string())),
        }
    }
}

impl fmt::Display for DayStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Distributed => "distributed",
            Self::Random => "random",
            Self::Weekdays => "weekdays",
            Self::Weekends => "weekends",
        };
        f.write_str(name)
    }
}

/// Strictly increasing list of target dates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionSchedule {
    dates: Vec<NaiveDate>,
}

/// A schedule split around "today".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatePartition {
    /// Today or earlier; collectible now.
    pub eligible: Vec<NaiveDate>,
    /// After today; reported only.
    pub future: Vec<NaiveDate>,
}

impl CollectionSchedule {
    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn partition(&self, today: NaiveDate) -> DatePartition {
        let (eligible, future) = self.dates.iter().partition(|d| **d <= today);
        DatePartition { eligible, future }
    }
}

/// Inputs for one schedule generation. `seed` makes sampled strategies
/// reproducible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulePolicy {
    pub years: Vec<i32>,
    pub days_per_month: usize,
    pub strategy: String,
    pub seed: Option<u64>,
}

impl SchedulePolicy {
    /// Validates the strategy token, then generates the schedule.
    pub fn generate(&self) -> Result<CollectionSchedule, ScheduleError> {
        let strategy: DayStrategy = self.strategy.parse()?;
        match self.seed {
            Some(seed) => generate_schedule(
                &self.years,
                self.days_per_month,
                strategy,
                &mut StdRng::seed_from_u64(seed),
            ),
            None => generate_schedule(&self.years, self.days_per_month, strategy, &mut rand::rng()),
        }
    }
}

/// Builds the schedule month by month across `years`.
///
/// When fewer days satisfy the strategy than `days_per_month`, every
/// qualifying day is taken and the month is left short. That is expected
/// under-fulfilment, not an error.
pub fn generate_schedule<R: Rng + ?Sized>(
    years: &[i32],
    days_per_month: usize,
    strategy: DayStrategy,
    rng: &mut R,
) -> Result<CollectionSchedule, ScheduleError> {
    let mut years = years.to_vec();
    years.sort_unstable();
    years.dedup();

    let mut dates = Vec::new();

    for year in years {
        for month in 1..=12 {
            let days = select_days(year, month, days_per_month, strategy, rng)?;
            for day in days {
                let date = NaiveDate::from_ymd_opt(year, month, day)
                    .ok_or(ScheduleError::InvalidDate { year, month, day })?;
                dates.push(date);
            }
        }
    }

    debug!(count = dates.len(), %strategy, days_per_month, "Schedule generated");
    Ok(CollectionSchedule { dates })
}

/// Number of days in `month` of `year`.
pub fn days_in_month(year: i32, month: u32) -> Result<u32, ScheduleError> {
    let first = NaiveDate::from_ymd_opt(year, month, 1).ok_or(ScheduleError::InvalidDate {
        year,
        month,
        day: 1,
    })?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .ok_or(ScheduleError::InvalidDate { year, month, day: 1 })?;

    Ok((next - first).num_days() as u32)
}

/// Days of the month that satisfy `strategy`, ascending.
pub fn candidate_days(
    year: i32,
    month: u32,
    strategy: DayStrategy,
) -> Result<Vec<u32>, ScheduleError> {
    let last = days_in_month(year, month)?;
    let mut days = Vec::with_capacity(last as usize);

    for day in 1..=last {
        let weekday = NaiveDate::from_ymd_opt(year, month, day)
            .ok_or(ScheduleError::InvalidDate { year, month, day })?
            .weekday();
        let weekend = matches!(weekday, Weekday::Sat | Weekday::Sun);
        let keep = match strategy {
            DayStrategy::Distributed | DayStrategy::Random => true,
            DayStrategy::Weekdays => !weekend,
            DayStrategy::Weekends => weekend,
        };
        if keep {
            days.push(day);
        }
    }

    Ok(days)
}

fn select_days<R: Rng + ?Sized>(
    year: i32,
    month: u32,
    k: usize,
    strategy: DayStrategy,
    rng: &mut R,
) -> Result<Vec<u32>, ScheduleError> {
    if strategy == DayStrategy::Distributed {
        return Ok(distributed_days(days_in_month(year, month)?, k));
    }

    let candidates = candidate_days(year, month, strategy)?;
    let take = k.min(candidates.len());
    let mut picked: Vec<u32> = candidates.choose_multiple(rng, take).copied().collect();
    picked.sort_unstable();
    Ok(picked)
}

/// `round(D / (k + 1) * i)` for `i` in `1..=k`.
///
/// For `k < D` the step is at least one day, so the picks are distinct and
/// fall strictly between the first and last day. For `k >= D` the whole month
/// is returned.
fn distributed_days(days_in_month: u32, k: usize) -> Vec<u32> {
    let d = days_in_month as usize;
    if k >= d {
        return (1..=days_in_month).collect();
    }

    let step = days_in_month as f64 / (k + 1) as f64;
    (1..=k).map(|i| (step * i as f64).round() as u32).collect()
}
