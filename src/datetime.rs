use std::time::SystemTime;

use time::{OffsetDateTime, PrimitiveDateTime};

/// Packs a datetime into the DOS `(date, time)` pair stored in CFFILE.
pub fn datetime_to_bits(mut datetime: PrimitiveDateTime) -> (u16, u16) {
    // Clamp to legal range:
    if datetime.year() < 1980 {
        return (0x21, 0); // 1980-01-01 00:00:00
    } else if datetime.year() > 2107 {
        return (0xff9f, 0xbf7d); // 2107-12-31 23:59:59
    }

    // Round to nearest two seconds:
    if datetime.second() % 2 != 0 {
        datetime += time::Duration::seconds(1);
        if datetime.year() > 2107 {
            return (0xff9f, 0xbf7d);
        }
    }

    let year = datetime.year() as u16;
    let month = datetime.month() as u16;
    let day = datetime.day() as u16;
    let date = ((year - 1980) << 9) | (month << 5) | day;
    let hour = datetime.hour() as u16;
    let minute = datetime.minute() as u16;
    let second = datetime.second() as u16;
    let time = (hour << 11) | (minute << 5) | (second / 2);
    (date, time)
}

/// Converts a file system timestamp to a UTC datetime.
pub fn datetime_from_system_time(time: SystemTime) -> PrimitiveDateTime {
    let datetime = OffsetDateTime::from(time);
    PrimitiveDateTime::new(datetime.date(), datetime.time())
}

/// The current UTC datetime.
pub fn now_utc() -> PrimitiveDateTime {
    let now = OffsetDateTime::now_utc();
    PrimitiveDateTime::new(now.date(), now.time())
}

#[cfg(test)]
pub fn datetime_from_bits(date: u16, time: u16) -> Option<PrimitiveDateTime> {
    use std::convert::TryInto;

    let year = (date >> 9) as i32 + 1980;
    let month = (((date >> 5) & 0xf) as u8).try_into().ok()?;
    let day = (date & 0x1f) as u8;
    let date = time::Date::from_calendar_date(year, month, day).ok()?;

    let hour = (time >> 11) as u8;
    let minute = ((time >> 5) & 0x3f) as u8;
    let second = 2 * (time & 0x1f) as u8;
    let time = time::Time::from_hms(hour, minute, second).ok()?;

    Some(PrimitiveDateTime::new(date, time))
}
