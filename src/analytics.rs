/*!
 * Analytics Aggregation
 * Pure in-memory rollups over the raw event set. No server-side aggregation
 * happens in SQL: every summary is recomputed from all rows on each request,
 * which keeps the math trivially idempotent at this system's traffic level.
 */
use chrono::{DateTime, Days, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const EVENT_VIEW: &str = "view";
pub const EVENT_CLICK: &str = "click";
pub const EVENT_EMBED_CLICKED: &str = "embed_clicked";

/// Event types the reporter endpoint accepts.
pub const VALID_EVENT_TYPES: &[&str] = &[EVENT_VIEW, EVENT_CLICK, EVENT_EMBED_CLICKED];

pub fn is_valid_event_type(event_type: &str) -> bool {
    VALID_EVENT_TYPES.contains(&event_type)
}

/// The slice of a content row the aggregation needs.
#[derive(Debug, Clone)]
pub struct ContentRef {
    pub id: Uuid,
    pub title: String,
    pub category_name: Option<String>,
}

/// The slice of a raw event row the aggregation needs.
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub content_id: Uuid,
    pub event_type: String,
    pub created_at: DateTime<Utc>,
}

/// Per-content totals, one entry per content row with at least one view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContentTotals {
    pub content_id: Uuid,
    pub title: String,
    pub views: u64,
    pub clicks: u64,
    pub embed_clicks: u64,
}

/// One day of the 7-day time series.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DailyCounts {
    pub date: NaiveDate,
    pub views: u64,
    pub clicks: u64,
    pub embed_clicks: u64,
}

/// Total event count attributed to one category.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CategoryTotals {
    pub name: String,
    pub count: u64,
}

/// Grand totals across all counted content.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GrandTotals {
    pub views: u64,
    pub clicks: u64,
    pub embed_clicks: u64,
}

/// Per-content view/click/embed_clicked counts.
///
/// Events whose content_id matches no known content (orphans left behind by
/// deleted content) are ignored. Content with zero views is dropped from the
/// result, matching the dashboard's "has been seen at least once" rule.
/// Output preserves the input content order.
pub fn content_totals(content: &[ContentRef], events: &[EventRecord]) -> Vec<ContentTotals> {
    let mut totals: Vec<ContentTotals> = content
        .iter()
        .map(|c| ContentTotals {
            content_id: c.id,
            title: c.title.clone(),
            views: 0,
            clicks: 0,
            embed_clicks: 0,
        })
        .collect();

    for event in events {
        if let Some(entry) = totals.iter_mut().find(|t| t.content_id == event.content_id) {
            match event.event_type.as_str() {
                EVENT_VIEW => entry.views += 1,
                EVENT_CLICK => entry.clicks += 1,
                EVENT_EMBED_CLICKED => entry.embed_clicks += 1,
                _ => {}
            }
        }
    }

    totals.retain(|t| t.views > 0);
    totals
}

/// Top `n` content entries sorted by view count descending.
pub fn top_content(totals: &[ContentTotals], n: usize) -> Vec<ContentTotals> {
    let mut sorted = totals.to_vec();
    sorted.sort_by(|a, b| b.views.cmp(&a.views));
    sorted.truncate(n);
    sorted
}

/// The local calendar date an event belongs to.
pub fn local_event_date(created_at: &DateTime<Utc>) -> NaiveDate {
    created_at.with_timezone(&Local).date_naive()
}

/// 7-day time series: `today` and the 6 preceding calendar days, ascending.
/// Days with no matching events appear with zero counts.
pub fn daily_series(events: &[EventRecord], today: NaiveDate) -> Vec<DailyCounts> {
    let mut series: Vec<DailyCounts> = (0..7)
        .rev()
        .filter_map(|back| today.checked_sub_days(Days::new(back)))
        .map(|date| DailyCounts {
            date,
            views: 0,
            clicks: 0,
            embed_clicks: 0,
        })
        .collect();

    for event in events {
        let date = local_event_date(&event.created_at);
        if let Some(day) = series.iter_mut().find(|d| d.date == date) {
            match event.event_type.as_str() {
                EVENT_VIEW => day.views += 1,
                EVENT_CLICK => day.clicks += 1,
                EVENT_EMBED_CLICKED => day.embed_clicks += 1,
                _ => {}
            }
        }
    }

    series
}

/// Per-category totals: every event (any type) attributed to a category's
/// content counts toward that category. Content without a category is
/// grouped under "Unknown"; categories with zero events are omitted.
pub fn category_totals(content: &[ContentRef], events: &[EventRecord]) -> Vec<CategoryTotals> {
    let mut totals: Vec<CategoryTotals> = Vec::new();

    for item in content {
        let count = events
            .iter()
            .filter(|e| e.content_id == item.id)
            .count() as u64;
        if count == 0 {
            continue;
        }

        let name = item.category_name.as_deref().unwrap_or("Unknown");
        match totals.iter_mut().find(|t| t.name == name) {
            Some(entry) => entry.count += count,
            None => totals.push(CategoryTotals {
                name: name.to_string(),
                count,
            }),
        }
    }

    totals
}

/// Grand totals summed over the per-content rollup.
pub fn grand_totals(totals: &[ContentTotals]) -> GrandTotals {
    totals.iter().fold(GrandTotals::default(), |mut acc, t| {
        acc.views += t.views;
        acc.clicks += t.clicks;
        acc.embed_clicks += t.embed_clicks;
        acc
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn content(id: Uuid, title: &str, category: Option<&str>) -> ContentRef {
        ContentRef {
            id,
            title: title.to_string(),
            category_name: category.map(|c| c.to_string()),
        }
    }

    fn event(content_id: Uuid, event_type: &str) -> EventRecord {
        EventRecord {
            content_id,
            event_type: event_type.to_string(),
            created_at: Utc::now(),
        }
    }

    /// Build an event pinned to a local calendar date, so date bucketing is
    /// deterministic in whatever timezone the test host runs in.
    fn event_on_local_date(content_id: Uuid, event_type: &str, date: NaiveDate) -> EventRecord {
        let local = Local
            .from_local_datetime(&date.and_hms_opt(12, 0, 0).unwrap())
            .unwrap();
        EventRecord {
            content_id,
            event_type: event_type.to_string(),
            created_at: local.with_timezone(&Utc),
        }
    }

    #[test]
    fn test_is_valid_event_type() {
        assert!(is_valid_event_type("view"));
        assert!(is_valid_event_type("click"));
        assert!(is_valid_event_type("embed_clicked"));
        assert!(!is_valid_event_type("hover"));
        assert!(!is_valid_event_type(""));
    }

    #[test]
    fn test_content_totals_counts_per_type() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let content = vec![content(a, "First", None), content(b, "Second", None)];
        let events = vec![
            event(a, "view"),
            event(a, "view"),
            event(a, "click"),
            event(b, "view"),
            event(b, "embed_clicked"),
        ];

        let totals = content_totals(&content, &events);
        assert_eq!(totals.len(), 2);
        assert_eq!(totals[0].views, 2);
        assert_eq!(totals[0].clicks, 1);
        assert_eq!(totals[0].embed_clicks, 0);
        assert_eq!(totals[1].views, 1);
        assert_eq!(totals[1].embed_clicks, 1);
    }

    #[test]
    fn test_content_totals_drops_unviewed_content() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let content = vec![content(a, "Viewed", None), content(b, "Clicked only", None)];
        let events = vec![event(a, "view"), event(b, "click")];

        let totals = content_totals(&content, &events);
        assert_eq!(totals.len(), 1);
        assert_eq!(totals[0].content_id, a);
    }

    #[test]
    fn test_content_totals_ignores_orphaned_events() {
        let a = Uuid::new_v4();
        let content = vec![content(a, "Alive", None)];
        let events = vec![event(a, "view"), event(Uuid::new_v4(), "view")];

        let totals = content_totals(&content, &events);
        assert_eq!(totals.len(), 1);
        assert_eq!(totals[0].views, 1);
    }

    #[test]
    fn test_content_totals_recomputation_is_idempotent() {
        let a = Uuid::new_v4();
        let content = vec![content(a, "Repeat", None)];
        let events = vec![event(a, "view"), event(a, "view"), event(a, "click")];

        let first = content_totals(&content, &events);
        let second = content_totals(&content, &events);
        assert_eq!(first, second);
    }

    #[test]
    fn test_top_content_sorts_by_views_and_truncates() {
        let totals: Vec<ContentTotals> = (0..8)
            .map(|i| ContentTotals {
                content_id: Uuid::new_v4(),
                title: format!("item {}", i),
                views: i,
                clicks: 0,
                embed_clicks: 0,
            })
            .collect();

        let top = top_content(&totals, 5);
        assert_eq!(top.len(), 5);
        assert_eq!(top[0].views, 7);
        assert_eq!(top[4].views, 3);
    }

    #[test]
    fn test_daily_series_spans_exactly_seven_ascending_days() {
        let today = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let series = daily_series(&[], today);

        assert_eq!(series.len(), 7);
        assert_eq!(series[0].date, NaiveDate::from_ymd_opt(2025, 3, 4).unwrap());
        assert_eq!(series[6].date, today);
        for window in series.windows(2) {
            assert!(window[0].date < window[1].date);
        }
        assert!(series.iter().all(|d| d.views == 0 && d.clicks == 0));
    }

    #[test]
    fn test_daily_series_buckets_events_by_local_date() {
        let id = Uuid::new_v4();
        let today = Local::now().date_naive();
        let yesterday = today.checked_sub_days(Days::new(1)).unwrap();
        let last_week = today.checked_sub_days(Days::new(8)).unwrap();

        let events = vec![
            event_on_local_date(id, "view", today),
            event_on_local_date(id, "view", today),
            event_on_local_date(id, "click", yesterday),
            // Outside the window: must not show up anywhere.
            event_on_local_date(id, "view", last_week),
        ];

        let series = daily_series(&events, today);
        assert_eq!(series[6].views, 2);
        assert_eq!(series[5].clicks, 1);
        let total_views: u64 = series.iter().map(|d| d.views).sum();
        assert_eq!(total_views, 2);
    }

    #[test]
    fn test_category_totals_sums_across_category_content() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let content = vec![
            content(a, "Reel one", Some("Reels")),
            content(b, "Reel two", Some("Reels")),
            content(c, "Photo", Some("Photos")),
        ];
        let events = vec![
            event(a, "view"),
            event(a, "click"),
            event(b, "view"),
            event(c, "embed_clicked"),
        ];

        let totals = category_totals(&content, &events);
        assert_eq!(totals.len(), 2);
        assert_eq!(totals[0].name, "Reels");
        assert_eq!(totals[0].count, 3);
        assert_eq!(totals[1].name, "Photos");
        assert_eq!(totals[1].count, 1);
    }

    #[test]
    fn test_category_totals_skips_untracked_and_labels_unknown() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let content = vec![
            content(a, "Uncategorised", None),
            content(b, "Silent", Some("Photos")),
        ];
        let events = vec![event(a, "view")];

        let totals = category_totals(&content, &events);
        assert_eq!(totals.len(), 1);
        assert_eq!(totals[0].name, "Unknown");
    }

    #[test]
    fn test_grand_totals() {
        let totals = vec![
            ContentTotals {
                content_id: Uuid::new_v4(),
                title: "a".to_string(),
                views: 3,
                clicks: 1,
                embed_clicks: 0,
            },
            ContentTotals {
                content_id: Uuid::new_v4(),
                title: "b".to_string(),
                views: 2,
                clicks: 2,
                embed_clicks: 4,
            },
        ];

        let grand = grand_totals(&totals);
        assert_eq!(grand.views, 5);
        assert_eq!(grand.clicks, 3);
        assert_eq!(grand.embed_clicks, 4);
    }
}
