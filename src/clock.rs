use chrono::{DateTime, Local, NaiveDate, Utc};

/// Source of "now" for everything that derives a day key.
pub trait Clock: Send + Sync {
    /// Calendar date in the viewer's local time zone.
    fn today(&self) -> NaiveDate;
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to a single date, used to make day arithmetic deterministic.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    today: NaiveDate,
    now: DateTime<Utc>,
}

impl FixedClock {
    pub fn new(today: NaiveDate) -> Self {
        let now = today.and_hms_opt(12, 0, 0).unwrap_or_default().and_utc();
        Self { today, now }
    }

    pub fn at(today: NaiveDate, now: DateTime<Utc>) -> Self {
        Self { today, now }
    }
}

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.today
    }

    fn now(&self) -> DateTime<Utc> {
        self.now
    }
}

pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Parses a canonical `YYYY-MM-DD` key. Unpadded forms such as `2026-1-4`
/// are rejected so each date has exactly one key.
pub fn parse_date_key(key: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(key, "%Y-%m-%d")
        .ok()
        .filter(|date| date_key(*date) == key)
}
