use std::fmt::{Display, Formatter};
use std::str::FromStr;
use anyhow::anyhow;
use chrono::{Datelike, NaiveDate, NaiveTime, TimeDelta, Weekday};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use crate::impl_sqlx_text_type_encode_decode;

#[derive(Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}
impl_sqlx_text_type_encode_decode!(DayOfWeek);

impl DayOfWeek {
    pub const ALL: [DayOfWeek; 7] = [
        DayOfWeek::Monday,
        DayOfWeek::Tuesday,
        DayOfWeek::Wednesday,
        DayOfWeek::Thursday,
        DayOfWeek::Friday,
        DayOfWeek::Saturday,
        DayOfWeek::Sunday,
    ];
    pub fn of(date: NaiveDate) -> Self {
        date.weekday().into()
    }
    pub fn matches(self, date: NaiveDate) -> bool {
        Self::of(date) == self
    }
}
impl From<Weekday> for DayOfWeek {
    fn from(value: Weekday) -> Self {
        match value {
            Weekday::Mon => DayOfWeek::Monday,
            Weekday::Tue => DayOfWeek::Tuesday,
            Weekday::Wed => DayOfWeek::Wednesday,
            Weekday::Thu => DayOfWeek::Thursday,
            Weekday::Fri => DayOfWeek::Friday,
            Weekday::Sat => DayOfWeek::Saturday,
            Weekday::Sun => DayOfWeek::Sunday,
        }
    }
}
impl Display for DayOfWeek {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DayOfWeek::Monday => "monday",
            DayOfWeek::Tuesday => "tuesday",
            DayOfWeek::Wednesday => "wednesday",
            DayOfWeek::Thursday => "thursday",
            DayOfWeek::Friday => "friday",
            DayOfWeek::Saturday => "saturday",
            DayOfWeek::Sunday => "sunday",
        };
        f.write_str(s)
    }
}
impl FromStr for DayOfWeek {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DayOfWeek::ALL.into_iter()
            .find(|day| day.to_string().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow!("Unknown day of week: {s}"))
    }
}

/// Wall-clock start of a session, `HH:MM`.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy)]
pub struct SessionTime(pub NaiveTime);
impl_sqlx_text_type_encode_decode!(SessionTime);

impl SessionTime {
    pub fn from_hm(hour: u32, min: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, min, 0).map(Self)
    }
}
impl Display for SessionTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%H:%M"))
    }
}
impl FromStr for SessionTime {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tm = NaiveTime::parse_from_str(s.trim(), "%H:%M")
            .map_err(|e| anyhow!("Invalid session time '{s}', expected HH:MM: {e}"))?;
        Ok(Self(tm))
    }
}
impl Serialize for SessionTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}
impl<'de> Deserialize<'de> for SessionTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

pub fn parse_date(date_str: &str) -> anyhow::Result<NaiveDate> {
    NaiveDate::parse_from_str(date_str.trim(), "%Y-%m-%d")
        .map_err(|e| anyhow!("Invalid date '{date_str}', expected YYYY-MM-DD: {e}"))
}

/// All dates in `from ..= to` falling on `day`.
pub fn dates_on(day: DayOfWeek, from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
    let Some(first) = (0..7)
        .filter_map(|n| from.checked_add_signed(TimeDelta::days(n)))
        .find(|dt| day.matches(*dt)) else {
        return vec![]
    };
    first.iter_days()
        .step_by(7)
        .take_while(|dt| *dt <= to)
        .collect()
}

pub fn days_between(from: NaiveDate, to: NaiveDate) -> i64 {
    to.signed_duration_since(from).num_days()
}
