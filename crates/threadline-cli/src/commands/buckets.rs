use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Local, TimeZone, Utc};
use threadline_core::DateBucket;

use crate::ui;

pub fn run(timestamps: &[String], now: Option<&str>) -> Result<()> {
    let rows = match now {
        Some(text) => classify_all(&parse(text)?, timestamps)?,
        None => classify_all(&Local::now(), timestamps)?,
    };

    let width = rows.iter().map(|(text, _)| text.len()).max().unwrap_or(0);
    for (text, bucket) in rows {
        ui::info(&format!("{text:<width$}  {bucket}"));
    }
    Ok(())
}

fn classify_all<Tz: TimeZone>(
    now: &DateTime<Tz>,
    timestamps: &[String],
) -> Result<Vec<(String, DateBucket)>> {
    timestamps
        .iter()
        .map(|text| {
            let at = parse(text)?.with_timezone(&Utc);
            Ok((text.clone(), DateBucket::classify(now, &at)))
        })
        .collect()
}

fn parse(text: &str) -> Result<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(text.trim())
        .with_context(|| format!("Invalid RFC 3339 timestamp: {}", text))
}
