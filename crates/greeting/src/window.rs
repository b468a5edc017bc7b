//! Daily time bands in which greetings may be delivered.

use {
    chrono::{DateTime, Days, NaiveTime, TimeZone, Timelike, Utc},
    chrono_tz::Tz,
    parley_config::{GreetingConfig, parse_band_minutes},
};

use crate::error::{Error, Result};

/// How many days ahead to look for the next band start.
const SEARCH_DAYS: u64 = 8;

/// A `[start, end)` band in minutes since local midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Band {
    start: u32,
    end: u32,
}

/// Set of allowed bands in a reference timezone.
#[derive(Debug, Clone)]
pub struct GreetingWindow {
    tz: Tz,
    bands: Vec<Band>,
}

impl GreetingWindow {
    /// Build a window from `(start, end)` pairs of `HH:MM` strings.
    pub fn new<S: AsRef<str>>(timezone: &str, bands: &[(S, S)]) -> Result<Self> {
        let tz = timezone
            .parse::<Tz>()
            .map_err(|_| Error::unknown_timezone(timezone))?;

        let mut parsed = Vec::with_capacity(bands.len());
        for (start, end) in bands {
            let (start, end): (&str, &str) = (start.as_ref(), end.as_ref());
            match (parse_band_minutes(start), parse_band_minutes(end)) {
                (Some(s), Some(e)) if s < e => parsed.push(Band { start: s, end: e }),
                _ => return Err(Error::invalid_band(start, end)),
            }
        }
        parsed.sort_by_key(|b| b.start);

        Ok(Self { tz, bands: parsed })
    }

    pub fn from_config(config: &GreetingConfig) -> Result<Self> {
        let bands: Vec<(&str, &str)> = config
            .bands
            .iter()
            .map(|b| (b.start.as_str(), b.end.as_str()))
            .collect();
        Self::new(&config.timezone, &bands)
    }

    #[must_use]
    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Whether `at` falls inside any band.
    #[must_use]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let local = at.with_timezone(&self.tz);
        let minutes = local.hour() * 60 + local.minute();
        self.bands
            .iter()
            .any(|b| minutes >= b.start && minutes < b.end)
    }

    /// Earliest instant at or after `at` that lies inside a band.
    ///
    /// Returns `at` unchanged when it is already inside a band, otherwise the
    /// start of the next band. Never moves backwards. `None` when no band is
    /// configured.
    #[must_use]
    pub fn next_allowed(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.bands.is_empty() {
            return None;
        }
        if self.contains(at) {
            return Some(at);
        }

        let today = at.with_timezone(&self.tz).date_naive();
        for offset in 0..SEARCH_DAYS {
            let Some(day) = today.checked_add_days(Days::new(offset)) else {
                break;
            };
            for band in &self.bands {
                let Some(start) = NaiveTime::from_hms_opt(band.start / 60, band.start % 60, 0) else {
                    continue;
                };
                // Band starts that fall in a DST gap are skipped.
                let Some(candidate) = self.tz.from_local_datetime(&day.and_time(start)).earliest()
                else {
                    continue;
                };
                let candidate = candidate.with_timezone(&Utc);
                if candidate > at {
                    return Some(candidate);
                }
            }
        }
        None
    }
}
