//! Filter, sort and pagination types for ledger listings.
//!
//! Parsing is lenient: values that fail to parse are dropped, never rejected.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use utoipa::IntoParams;

use crate::utils::StringExt;

pub const QUERY_PAGE_SIZE: i64 = 15;
pub const ANALYSIS_PAGE_SIZE: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slowness {
    Slow,
    Fast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisStatus {
    Analyzed,
    Unanalyzed,
}

/// Inclusive calendar-day range on a timestamp column
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateRange {
    /// Lower bound as the first instant of `from`
    pub fn start(&self) -> Option<DateTime<Utc>> {
        self.from.and_then(start_of_day)
    }

    /// Exclusive upper bound: first instant of the day after `to`
    pub fn end_exclusive(&self) -> Option<DateTime<Utc>> {
        self.to.and_then(|d| d.succ_opt()).and_then(start_of_day)
    }
}

fn start_of_day(date: NaiveDate) -> Option<DateTime<Utc>> {
    date.and_hms_opt(0, 0, 0).map(|naive| Utc.from_utc_datetime(&naive))
}

fn parse_date(value: Option<&String>) -> Option<NaiveDate> {
    value.clean().and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
}

fn parse_f64(value: Option<&String>) -> Option<f64> {
    value.clean().and_then(|s| s.parse::<f64>().ok()).filter(|v| v.is_finite())
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryFilter {
    pub dates: DateRange,
    pub slowness: Option<Slowness>,
    pub analysis_status: Option<AnalysisStatus>,
    /// Case-insensitive substring of the view name
    pub view_name: Option<String>,
    pub min_duration: Option<f64>,
    pub max_duration: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QuerySort {
    Timestamp,
    #[default]
    TimestampDesc,
    Duration,
    DurationDesc,
    ViewName,
    ViewNameDesc,
}

impl QuerySort {
    /// Parse a `sort_by` key; unknown keys give `None`
    pub fn parse(key: &str) -> Option<Self> {
        match key {
            "timestamp" => Some(Self::Timestamp),
            "-timestamp" => Some(Self::TimestampDesc),
            "duration" => Some(Self::Duration),
            "-duration" => Some(Self::DurationDesc),
            "view_name" => Some(Self::ViewName),
            "-view_name" => Some(Self::ViewNameDesc),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timestamp => "timestamp",
            Self::TimestampDesc => "-timestamp",
            Self::Duration => "duration",
            Self::DurationDesc => "-duration",
            Self::ViewName => "view_name",
            Self::ViewNameDesc => "-view_name",
        }
    }

    /// ORDER BY clause; `id` breaks ties so pages are stable
    pub fn order_by(&self) -> &'static str {
        match self {
            Self::Timestamp => "r.timestamp ASC, r.id ASC",
            Self::TimestampDesc => "r.timestamp DESC, r.id DESC",
            Self::Duration => "r.duration ASC, r.id ASC",
            Self::DurationDesc => "r.duration DESC, r.id DESC",
            Self::ViewName => "r.view_name ASC, r.id ASC",
            Self::ViewNameDesc => "r.view_name DESC, r.id DESC",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::TimestampDesc => "Newest First",
            Self::Timestamp => "Oldest First",
            Self::DurationDesc => "Slowest First",
            Self::Duration => "Fastest First",
            Self::ViewName => "View Name (A-Z)",
            Self::ViewNameDesc => "View Name (Z-A)",
        }
    }

    pub const ALL: [QuerySort; 6] = [
        Self::TimestampDesc,
        Self::Timestamp,
        Self::DurationDesc,
        Self::Duration,
        Self::ViewName,
        Self::ViewNameDesc,
    ];
}

/// Raw query-string parameters of the query list
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct QueryListParams {
    /// `YYYY-MM-DD`
    pub date_from: Option<String>,
    /// `YYYY-MM-DD`
    pub date_to: Option<String>,
    /// `slow` or `fast`
    pub slowness: Option<String>,
    /// `analyzed` or `unanalyzed`
    pub analysis_status: Option<String>,
    pub view_name: Option<String>,
    pub min_duration: Option<String>,
    pub max_duration: Option<String>,
    /// One of `timestamp`, `duration`, `view_name`, optionally prefixed with `-`
    pub sort_by: Option<String>,
    pub page: Option<String>,
}

impl QueryListParams {
    pub fn filter(&self) -> QueryFilter {
        QueryFilter {
            dates: DateRange {
                from: parse_date(self.date_from.as_ref()),
                to: parse_date(self.date_to.as_ref()),
            },
            slowness: match self.slowness.as_deref() {
                Some("slow") => Some(Slowness::Slow),
                Some("fast") => Some(Slowness::Fast),
                _ => None,
            },
            analysis_status: match self.analysis_status.as_deref() {
                Some("analyzed") => Some(AnalysisStatus::Analyzed),
                Some("unanalyzed") => Some(AnalysisStatus::Unanalyzed),
                _ => None,
            },
            view_name: self.view_name.clean(),
            min_duration: parse_f64(self.min_duration.as_ref()),
            max_duration: parse_f64(self.max_duration.as_ref()),
        }
    }

    pub fn sort(&self) -> QuerySort {
        self.sort_by.as_deref().and_then(QuerySort::parse).unwrap_or_default()
    }

    pub fn page(&self) -> PageRequest {
        PageRequest::parse(self.page.as_ref(), QUERY_PAGE_SIZE)
    }
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AnalysisListParams {
    /// `YYYY-MM-DD`, on the analysis creation date
    pub date_from: Option<String>,
    /// `YYYY-MM-DD`, on the analysis creation date
    pub date_to: Option<String>,
    pub page: Option<String>,
}

impl AnalysisListParams {
    pub fn dates(&self) -> DateRange {
        DateRange {
            from: parse_date(self.date_from.as_ref()),
            to: parse_date(self.date_to.as_ref()),
        }
    }

    pub fn page(&self) -> PageRequest {
        PageRequest::parse(self.page.as_ref(), ANALYSIS_PAGE_SIZE)
    }
}

/// 1-based page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: i64,
    pub page_size: i64,
}

impl PageRequest {
    pub fn new(page: i64, page_size: i64) -> Self {
        Self { page: page.max(1), page_size: page_size.max(1) }
    }

    fn parse(raw: Option<&String>, page_size: i64) -> Self {
        let page = raw.clean().and_then(|s| s.parse::<i64>().ok()).unwrap_or(1);
        Self::new(page, page_size)
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.page_size
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: i64, request: PageRequest) -> Self {
        let total_pages = if total == 0 { 0 } else { (total + request.page_size - 1) / request.page_size };
        Self { items, total, page: request.page, page_size: request.page_size, total_pages }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            page_size: self.page_size,
            total_pages: self.total_pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_values_are_ignored() {
        let params = QueryListParams {
            date_from: Some("yesterday".into()),
            date_to: Some("2024-02-30".into()),
            slowness: Some("sluggish".into()),
            analysis_status: Some("maybe".into()),
            view_name: Some("   ".into()),
            min_duration: Some("abc".into()),
            max_duration: Some("NaN".into()),
            sort_by: Some("random".into()),
            page: Some("-3".into()),
        };

        assert_eq!(params.filter(), QueryFilter::default());
        assert_eq!(params.sort(), QuerySort::TimestampDesc);
        assert_eq!(params.page(), PageRequest::new(1, QUERY_PAGE_SIZE));
    }

    #[test]
    fn test_valid_filter_values() {
        let params = QueryListParams {
            date_from: Some("2024-03-01".into()),
            slowness: Some("slow".into()),
            analysis_status: Some("unanalyzed".into()),
            view_name: Some(" orders ".into()),
            min_duration: Some("0.25".into()),
            sort_by: Some("-duration".into()),
            page: Some("3".into()),
            ..Default::default()
        };

        let filter = params.filter();
        assert_eq!(filter.dates.from, NaiveDate::from_ymd_opt(2024, 3, 1));
        assert_eq!(filter.slowness, Some(Slowness::Slow));
        assert_eq!(filter.analysis_status, Some(AnalysisStatus::Unanalyzed));
        assert_eq!(filter.view_name.as_deref(), Some("orders"));
        assert_eq!(filter.min_duration, Some(0.25));
        assert_eq!(params.sort(), QuerySort::DurationDesc);
        assert_eq!(params.page().offset(), 30);
    }

    #[test]
    fn test_date_range_bounds() {
        let range = DateRange {
            from: NaiveDate::from_ymd_opt(2024, 1, 31),
            to: NaiveDate::from_ymd_opt(2024, 1, 31),
        };
        assert_eq!(range.start().unwrap().to_rfc3339(), "2024-01-31T00:00:00+00:00");
        assert_eq!(range.end_exclusive().unwrap().to_rfc3339(), "2024-02-01T00:00:00+00:00");
    }

    #[test]
    fn test_page_math() {
        let page: Page<i32> = Page::new(vec![], 31, PageRequest::new(1, 15));
        assert_eq!(page.total_pages, 3);
        let empty: Page<i32> = Page::new(vec![], 0, PageRequest::new(1, 15));
        assert_eq!(empty.total_pages, 0);
    }
}
