//! Date grouping and separator reconciliation.
//!
//! Each pass throws away the separators from the previous pass, binds the
//! live links to indexed records, and puts a labelled separator in front
//! of the first link of every run that shares a date bucket. Links are
//! never moved.

use std::fmt;

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use tracing::debug;

use crate::panel::{NodeId, Panel, PanelLayout};
use crate::{LocalIndex, Record};

/// Coarse recency label, ordered from newest to oldest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DateBucket {
    Today,
    Yesterday,
    LastSevenDays,
    ThisMonth,
    ThisYear,
    Older,
}

impl DateBucket {
    pub const ALL: [DateBucket; 6] = [
        DateBucket::Today,
        DateBucket::Yesterday,
        DateBucket::LastSevenDays,
        DateBucket::ThisMonth,
        DateBucket::ThisYear,
        DateBucket::Older,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            DateBucket::Today => "Today",
            DateBucket::Yesterday => "Yesterday",
            DateBucket::LastSevenDays => "Last 7 Days",
            DateBucket::ThisMonth => "This Month",
            DateBucket::ThisYear => "This Year",
            DateBucket::Older => "Older",
        }
    }

    /// Classify `updated_at` relative to `now`, using calendar days in
    /// `now`'s timezone. Timestamps in the future count as now.
    pub fn classify<Tz: TimeZone>(now: &DateTime<Tz>, updated_at: &DateTime<Utc>) -> Self {
        let tz = now.timezone();
        let updated = updated_at.with_timezone(&tz).min(now.clone());
        let elapsed = now.clone().signed_duration_since(updated.clone());

        let today = now.date_naive();
        let day = updated.date_naive();
        if day == today {
            return DateBucket::Today;
        }
        if today.pred_opt() == Some(day) {
            return DateBucket::Yesterday;
        }
        if elapsed < Duration::days(7) {
            return DateBucket::LastSevenDays;
        }
        if day.year() == today.year() && day.month() == today.month() {
            return DateBucket::ThisMonth;
        }
        if elapsed < Duration::days(365) {
            return DateBucket::ThisYear;
        }
        DateBucket::Older
    }
}

impl fmt::Display for DateBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Record id encoded in a link target: the single path segment after
/// `marker`, ignoring any query string, fragment or trailing slash.
pub fn element_key<'a>(href: &'a str, marker: &str) -> Option<&'a str> {
    if marker.is_empty() {
        return None;
    }
    let path = href.split(['?', '#']).next().unwrap_or_default();
    let (_, rest) = path.split_once(marker)?;
    let key = rest.strip_suffix('/').unwrap_or(rest);
    if key.is_empty() || key.contains('/') {
        return None;
    }
    Some(key)
}

/// Order bound links newest first. Equal timestamps keep panel order.
pub fn sort_bound(bound: &mut [(NodeId, &Record)]) {
    bound.sort_by(|(_, a), (_, b)| b.updated_at.cmp(&a.updated_at));
}

/// Where separators go for an already sorted sequence.
pub fn plan_separators<Tz: TimeZone>(
    sorted: &[(NodeId, &Record)],
    now: &DateTime<Tz>,
) -> Vec<(NodeId, DateBucket)> {
    let mut plan = Vec::new();
    let mut last: Option<DateBucket> = None;
    for (node, record) in sorted {
        let bucket = DateBucket::classify(now, &record.updated_at);
        if last != Some(bucket) {
            plan.push((*node, bucket));
            last = Some(bucket);
        }
    }
    plan
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Separators left over from the previous pass.
    pub removed: usize,
    /// Links matched to an indexed record.
    pub bound: usize,
    /// Links with no id or no metadata yet.
    pub unbound: usize,
    /// Separators placed this pass, in sort order.
    pub separators: Vec<(NodeId, DateBucket)>,
}

/// Redo the grouping of `panel` against `index`.
///
/// Returns `None` without touching anything when the panel is not mounted.
pub fn reconcile<P, Tz>(
    index: &LocalIndex,
    panel: &mut P,
    now: &DateTime<Tz>,
    layout: &PanelLayout,
) -> Option<ReconcileReport>
where
    P: Panel + ?Sized,
    Tz: TimeZone,
{
    if !panel.is_mounted() {
        debug!("panel not mounted, skipping reconcile");
        return None;
    }

    let removed = panel.remove_separators(&layout.separator_class);

    let anchors = panel.anchors();
    let mut bound: Vec<(NodeId, &Record)> = anchors
        .iter()
        .filter_map(|anchor| {
            let key = element_key(anchor.href.as_deref()?, &layout.link_marker)?;
            index.get(key).map(|record| (anchor.node, record))
        })
        .collect();
    let unbound = anchors.len() - bound.len();

    sort_bound(&mut bound);
    let planned = plan_separators(&bound, now);

    let mut separators = Vec::with_capacity(planned.len());
    for (node, bucket) in planned {
        if panel.insert_separator_before(node, &layout.separator_class, bucket.label()) {
            separators.push((node, bucket));
        }
    }

    debug!(
        removed,
        bound = bound.len(),
        unbound,
        separators = separators.len(),
        "reconciled panel"
    );

    Some(ReconcileReport {
        removed,
        bound: bound.len(),
        unbound,
        separators,
    })
}
