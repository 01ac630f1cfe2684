//! Packed FAT date and time fields.

use bitfield::bitfield;
use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use std::fmt;

bitfield! {
    /// Date packed as `year - 1980` (7 bits), month (4 bits), day (5 bits).
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct FatDate(u16);
    impl Debug;
    year_offset, set_year_offset: 15, 9;
    pub month, set_month: 8, 5;
    pub day, set_day: 4, 0;
}

bitfield! {
    /// Time packed as hour (5 bits), minute (6 bits), halved second (5 bits).
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct FatTime(u16);
    impl Debug;
    pub hour, set_hour: 15, 11;
    pub minute, set_minute: 10, 5;
    double_second, set_double_second: 4, 0;
}

impl FatDate {
    pub fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u16 {
        self.0
    }

    pub fn from_ymd(year: u16, month: u16, day: u16) -> Self {
        let mut date = Self::default();
        date.set_year(year);
        date.set_month(month);
        date.set_day(day);
        date
    }

    pub fn year(&self) -> u16 {
        self.year_offset() + 1980
    }

    /// Stores the year, clamped to the representable 1980..=2107 range.
    pub fn set_year(&mut self, year: u16) {
        self.set_year_offset(year.clamp(1980, 2107) - 1980)
    }
}

impl FatTime {
    pub fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u16 {
        self.0
    }

    pub fn from_hms(hour: u16, minute: u16, second: u16) -> Self {
        let mut time = Self::default();
        time.set_hour(hour);
        time.set_minute(minute);
        time.set_second(second);
        time
    }

    pub fn second(&self) -> u16 {
        self.double_second() * 2
    }

    pub fn set_second(&mut self, second: u16) {
        self.set_double_second(second / 2)
    }
}

impl fmt::Display for FatDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}.{:02}.{}", self.day(), self.month(), self.year())
    }
}

impl fmt::Display for FatTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}:{:02}",
            self.hour(),
            self.minute(),
            self.second()
        )
    }
}

/// Creation timestamp of a directory entry.
///
/// `hundredths` holds the odd second and the centiseconds dropped by the 2-second
/// resolution of [`FatTime`], so it ranges over 0..=199.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FatDateTime {
    pub date: FatDate,
    pub time: FatTime,
    pub hundredths: u8,
}

impl FatDateTime {
    /// Timestamp given to the synthesized root directory.
    pub fn epoch() -> Self {
        Self {
            date: FatDate::from_ymd(1980, 1, 1),
            time: FatTime::default(),
            hundredths: 0,
        }
    }

    /// Current local wall-clock time.
    pub fn now() -> Self {
        Local::now().naive_local().into()
    }

    /// Converts back to a calendar value. Invalid packed fields yield `None`.
    pub fn to_naive(&self) -> Option<NaiveDateTime> {
        let date = NaiveDate::from_ymd_opt(
            self.date.year() as i32,
            self.date.month() as u32,
            self.date.day() as u32,
        )?;
        let extra_second = self.hundredths as u32 / 100;
        let time = NaiveTime::from_hms_milli_opt(
            self.time.hour() as u32,
            self.time.minute() as u32,
            self.time.second() as u32 + extra_second,
            (self.hundredths as u32 % 100) * 10,
        )?;
        Some(NaiveDateTime::new(date, time))
    }
}

impl fmt::Display for FatDateTime {
    /// `dd.mm.yyyy  hh:mm:ss`, the odd second included. Invalid fields are shown as stored.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_naive() {
            Some(datetime) => write!(f, "{}", datetime.format("%d.%m.%Y  %H:%M:%S")),
            None => write!(f, "{}  {}", self.date, self.time),
        }
    }
}

impl From<NaiveDateTime> for FatDateTime {
    fn from(datetime: NaiveDateTime) -> Self {
        let date = FatDate::from_ymd(
            datetime.year().clamp(1980, 2107) as u16,
            datetime.month() as u16,
            datetime.day() as u16,
        );
        let time = FatTime::from_hms(
            datetime.hour() as u16,
            datetime.minute() as u16,
            datetime.second() as u16,
        );
        // Leap seconds report more than 1e9 nanoseconds
        let centis = (datetime.nanosecond() / 10_000_000).min(99);
        let hundredths = ((datetime.second() % 2) * 100 + centis) as u8;

        Self {
            date,
            time,
            hundredths,
        }
    }
}
