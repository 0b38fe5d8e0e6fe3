//! São Paulo (B3) market calendar: national/state holidays, Easter-derived
//! floating holidays, configurable special closures, and business-day
//! arithmetic.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use std::collections::HashMap;

/// Compute Easter Sunday for `year` using the anonymous Gregorian algorithm
/// (Meeus/Jones/Butcher). Valid for any year in the Gregorian era.
pub fn easter_sunday(year: i32) -> NaiveDate {
    let a = year % 19;
    let b = year / 100;
    let c = year % 100;
    let d = b / 4;
    let e = b % 4;
    let f = (b + 8) / 25;
    let g = (b - f + 1) / 3;
    let h = (19 * a + b - d - g + 15) % 30;
    let i = c / 4;
    let k = c % 4;
    let l = (32 + 2 * e + 2 * i - h - k) % 7;
    let m = (a + 11 * h + 22 * l) / 451;
    let month = (h + l - 7 * m + 114) / 31;
    let day = (h + l - 7 * m + 114) % 31 + 1;
    NaiveDate::from_ymd_opt(year, month as u32, day as u32).expect("valid Easter date")
}

/// Parse the `SPECIAL_MARKET_CLOSURES` parameter: comma-separated
/// `YYYY-MM-DD:name` entries. Malformed entries are logged and skipped.
pub fn parse_special_closures(raw: &str) -> HashMap<NaiveDate, String> {
    let mut out = HashMap::new();
    if raw.trim().is_empty() {
        return out;
    }
    for pair in raw.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        match pair.split_once(':') {
            Some((date_str, name)) => match NaiveDate::parse_from_str(date_str.trim(), "%Y-%m-%d") {
                Ok(date) => {
                    out.insert(date, name.trim().to_string());
                }
                Err(_) => {
                    tracing::warn!("could not parse entry in SPECIAL_MARKET_CLOSURES: '{pair}'. skipping");
                }
            },
            None => {
                tracing::warn!("could not parse entry in SPECIAL_MARKET_CLOSURES: '{pair}'. skipping");
            }
        }
    }
    out
}

/// Full set of B3/São Paulo market holidays for `year`, merged with any
/// `special_closures` falling in that year.
pub fn holidays(year: i32, special_closures: &HashMap<NaiveDate, String>) -> HashMap<NaiveDate, String> {
    let mut out = HashMap::new();

    // Fixed national holidays.
    let fixed_national = [
        (1, 1, "Confraternização Universal"),
        (4, 21, "Tiradentes"),
        (5, 1, "Dia do Trabalho"),
        (9, 7, "Independência do Brasil"),
        (10, 12, "Nossa Senhora Aparecida"),
        (11, 2, "Finados"),
        (11, 15, "Proclamação da República"),
        (12, 25, "Natal"),
    ];
    for (m, d, name) in fixed_national {
        if let Some(date) = NaiveDate::from_ymd_opt(year, m, d) {
            out.insert(date, name.to_string());
        }
    }

    // Fixed São Paulo / market-specific holidays.
    let fixed_sp = [
        (1, 25, "Aniversário de São Paulo"),
        (7, 9, "Data Magna SP"),
        (11, 20, "Consciência Negra"),
        (12, 24, "Véspera de Natal"),
        (12, 31, "Véspera de Ano Novo"),
    ];
    for (m, d, name) in fixed_sp {
        if let Some(date) = NaiveDate::from_ymd_opt(year, m, d) {
            out.insert(date, name.to_string());
        }
    }

    // Easter-derived floating holidays.
    let easter = easter_sunday(year);
    let floating = [
        (easter - Duration::days(48), "Carnaval (Segunda-feira)"),
        (easter - Duration::days(47), "Carnaval (Terça-feira)"),
        (easter - Duration::days(2), "Sexta-feira Santa"),
        (easter + Duration::days(60), "Corpus Christi"),
    ];
    for (date, name) in floating {
        out.insert(date, name.to_string());
    }

    // Special one-off closures for this year.
    for (date, name) in special_closures {
        if date.year() == year {
            out.insert(*date, name.clone());
        }
    }

    out
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// True if `date` is a valid B3 trading day (not a weekend, not a holiday).
pub fn is_business_day(date: NaiveDate, special_closures: &HashMap<NaiveDate, String>) -> bool {
    if is_weekend(date) {
        return false;
    }
    let year_holidays = holidays(date.year(), special_closures);
    !year_holidays.contains_key(&date)
}

/// The most recent business day strictly before `today`, merging holiday
/// tables for `today`'s year and the prior year (to handle early-January
/// lookbacks correctly).
pub fn previous_business_day(today: NaiveDate, special_closures: &HashMap<NaiveDate, String>) -> NaiveDate {
    let mut merged = holidays(today.year(), special_closures);
    merged.extend(holidays(today.year() - 1, special_closures));

    let mut candidate = today - Duration::days(1);
    while is_weekend(candidate) || merged.contains_key(&candidate) {
        candidate -= Duration::days(1);
    }
    candidate
}

/// All business days in `[start, end]` inclusive.
pub fn business_days(
    start: NaiveDate,
    end: NaiveDate,
    special_closures: &HashMap<NaiveDate, String>,
) -> Vec<NaiveDate> {
    if start > end {
        return Vec::new();
    }
    let mut merged = HashMap::new();
    for year in start.year()..=end.year() {
        merged.extend(holidays(year, special_closures));
    }

    let mut out = Vec::new();
    let mut cursor = start;
    while cursor <= end {
        if !is_weekend(cursor) && !merged.contains_key(&cursor) {
            out.push(cursor);
        }
        cursor += Duration::days(1);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn easter_matches_known_dates() {
        assert_eq!(easter_sunday(2024), NaiveDate::from_ymd_opt(2024, 3, 31).unwrap());
        assert_eq!(easter_sunday(2025), NaiveDate::from_ymd_opt(2025, 4, 20).unwrap());
        assert_eq!(easter_sunday(2026), NaiveDate::from_ymd_opt(2026, 4, 5).unwrap());
    }

    #[test]
    fn carnival_derived_from_easter() {
        let special = HashMap::new();
        let h = holidays(2025, &special);
        // Easter 2025-04-20 minus 48 days
        let expected = NaiveDate::from_ymd_opt(2025, 4, 20).unwrap() - Duration::days(48);
        assert!(h.contains_key(&expected));
    }

    #[test]
    fn previous_business_day_skips_weekend() {
        // 2026-07-27 is a Monday; previous business day should be Friday 2026-07-24.
        let monday = NaiveDate::from_ymd_opt(2026, 7, 27).unwrap();
        let special = HashMap::new();
        let prev = previous_business_day(monday, &special);
        assert_eq!(prev, NaiveDate::from_ymd_opt(2026, 7, 24).unwrap());
    }

    #[test]
    fn previous_business_day_skips_holiday() {
        // Christmas 2025-12-25 is a Thursday holiday; day before (24th) is also
        // a holiday (Véspera de Natal); should land on 2025-12-23 (Tuesday).
        let day_after = NaiveDate::from_ymd_opt(2025, 12, 26).unwrap();
        let special = HashMap::new();
        let prev = previous_business_day(day_after, &special);
        assert_eq!(prev, NaiveDate::from_ymd_opt(2025, 12, 23).unwrap());
    }

    #[test]
    fn special_closures_parsed_and_applied() {
        let special = parse_special_closures("2025-03-10:Bank Holiday, malformed-entry");
        let h = holidays(2025, &special);
        assert!(h.contains_key(&NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()));
    }

    #[test]
    fn business_days_excludes_weekends_and_holidays() {
        let special = HashMap::new();
        let days = business_days(
            NaiveDate::from_ymd_opt(2025, 12, 22).unwrap(),
            NaiveDate::from_ymd_opt(2025, 12, 26).unwrap(),
            &special,
        );
        // 22 Mon, 23 Tue, 24 Wed(holiday), 25 Thu(holiday), 26 Fri
        assert_eq!(days.len(), 3);
    }
}
