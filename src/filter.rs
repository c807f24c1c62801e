//! Pure predicates over stubs and detail records.
//!
//! Every list filter is case-insensitive substring matching with OR across
//! entries, and an empty list admits everything.

use chrono::{Duration, Local, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::records::{ArticleDetail, ArticleStub};

/// Inclusive date window. An open bound is unbounded on that side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl Period {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn between(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// `all`, `1d`, `1w`, `1m`, `3m`, `6m` or `1y`, ending `today`.
    pub fn preset(name: &str, today: NaiveDate) -> Option<Self> {
        let days = match name.trim().to_ascii_lowercase().as_str() {
            "" | "all" => return Some(Self::all()),
            "1d" => 1,
            "1w" => 7,
            "1m" => 30,
            "3m" => 90,
            "6m" => 180,
            "1y" => 365,
            _ => return None,
        };
        Some(Self::between(today - Duration::days(days), today))
    }

    pub fn is_all(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |s| date >= s) && self.end.map_or(true, |e| date <= e)
    }

    /// Dates that are absent or unreadable pass: listing dates are too
    /// unreliable to drop an article on.
    pub fn admits(&self, posted_at: Option<&str>, today: NaiveDate) -> bool {
        if self.is_all() {
            return true;
        }
        match posted_at.and_then(|raw| parse_posted_at(raw, today)) {
            Some(date) => self.contains(date),
            None => true,
        }
    }
}

static FULL_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})\s*[.\-/]\s*(\d{1,2})\s*[.\-/]\s*(\d{1,2})").unwrap());
static TIME_ONLY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{1,2}:\d{2}(:\d{2})?$").unwrap());
static RELATIVE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)\s*(분|시간|일)\s*전$").unwrap());

/// Date of a listing/article timestamp such as `2024.01.05.`,
/// `2024.01.05. 13:22`, `2024-01-05`, `13:22` (today) or `3일 전`.
pub fn parse_posted_at(raw: &str, today: NaiveDate) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Some(caps) = FULL_DATE.captures(raw) {
        let year = caps[1].parse().ok()?;
        let month = caps[2].parse().ok()?;
        let day = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }
    if TIME_ONLY.is_match(raw) || raw == "방금 전" {
        return Some(today);
    }
    if raw == "어제" {
        return today.checked_sub_signed(Duration::try_days(1)?);
    }
    let caps = RELATIVE.captures(raw)?;
    let n: i64 = caps[1].parse().ok()?;
    match &caps[2] {
        "일" => today.checked_sub_signed(Duration::try_days(n)?),
        _ => Some(today),
    }
}

/// What the filter engine needs to see of a record.
pub trait Filterable {
    fn title(&self) -> &str;
    /// `None` when the record carries no body (listing stubs).
    fn content(&self) -> Option<&str>;
    fn author(&self) -> &str;
    fn posted_at(&self) -> Option<&str>;
}

impl Filterable for ArticleStub {
    fn title(&self) -> &str {
        &self.title
    }

    fn content(&self) -> Option<&str> {
        None
    }

    fn author(&self) -> &str {
        &self.author_nickname
    }

    fn posted_at(&self) -> Option<&str> {
        self.posted_at.as_deref()
    }
}

impl Filterable for ArticleDetail {
    fn title(&self) -> &str {
        &self.title
    }

    fn content(&self) -> Option<&str> {
        Some(&self.content_text)
    }

    fn author(&self) -> &str {
        &self.author_nickname
    }

    fn posted_at(&self) -> Option<&str> {
        self.posted_at.as_deref()
    }
}

fn any_substring(haystack: &str, needles: &[String]) -> bool {
    let haystack = haystack.to_lowercase();
    needles
        .iter()
        .map(|n| n.trim().to_lowercase())
        .any(|n| !n.is_empty() && haystack.contains(&n))
}

fn is_blank(list: &[String]) -> bool {
    list.iter().all(|s| s.trim().is_empty())
}

pub fn matches_keywords<T: Filterable>(item: &T, keywords: &[String]) -> bool {
    is_blank(keywords)
        || any_substring(item.title(), keywords)
        || item.content().map_or(false, |c| any_substring(c, keywords))
}

pub fn matches_authors<T: Filterable>(item: &T, authors: &[String]) -> bool {
    is_blank(authors) || any_substring(item.author(), authors)
}

pub fn filter_by_keywords<T: Filterable>(items: Vec<T>, keywords: &[String]) -> Vec<T> {
    items.into_iter().filter(|i| matches_keywords(i, keywords)).collect()
}

/// Filters applied before (keywords, authors, period) and after
/// (`content_keywords`) the detail fetch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub content_keywords: Vec<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub period: Period,
}

impl FilterSpec {
    pub fn admits<T: Filterable>(&self, item: &T, today: NaiveDate) -> bool {
        matches_keywords(item, &self.keywords)
            && matches_authors(item, &self.authors)
            && self.period.admits(item.posted_at(), today)
    }

    pub fn filter_stubs(&self, stubs: Vec<ArticleStub>) -> Vec<ArticleStub> {
        let today = Local::now().date_naive();
        stubs.into_iter().filter(|s| self.admits(s, today)).collect()
    }

    /// Degraded records always pass so failures stay visible in the output.
    pub fn admits_detail(&self, detail: &ArticleDetail) -> bool {
        detail.is_degraded()
            || is_blank(&self.content_keywords)
            || any_substring(&detail.content_text, &self.content_keywords)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn stub(id: u32, title: &str, author: &str, date: Option<&str>) -> ArticleStub {
        ArticleStub {
            article_id: id.to_string(),
            article_url: format!("https://cafe.naver.com/ArticleRead.nhn?clubid=1&articleid={id}"),
            title: title.to_string(),
            author_nickname: author.to_string(),
            posted_at: date.map(str::to_string),
        }
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn keyword_match_is_case_insensitive_on_title() {
        let stubs = vec![
            stub(1, "Selling iPhone 13", "a", None),
            stub(2, "Camping chair", "b", None),
            stub(3, "IPHONE case", "c", None),
        ];
        let kept = filter_by_keywords(stubs, &["iphone".to_string()]);
        let ids: Vec<&str> = kept.iter().map(|s| s.article_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);
    }

    #[test]
    fn detail_matches_on_content_too() {
        let mut detail = ArticleDetail::degraded("https://cafe.naver.com/x?articleid=1", "e");
        detail.error = None;
        detail.title = "Weekend".into();
        detail.content_text = "bringing the Tent and stove".into();
        assert!(matches_keywords(&detail, &["tent".to_string()]));
        assert!(!matches_keywords(&detail, &["kayak".to_string()]));
    }

    #[test]
    fn authors_are_substring_or() {
        let s = stub(1, "title text", "CampingKing", None);
        assert!(matches_authors(&s, &["king".into(), "nobody".into()]));
        assert!(!matches_authors(&s, &["queen".into()]));
        assert!(matches_authors(&s, &[]));
    }

    #[test]
    fn posted_at_formats() {
        let today = day(2024, 3, 10);
        assert_eq!(parse_posted_at("2024.01.05.", today), Some(day(2024, 1, 5)));
        assert_eq!(parse_posted_at("2024.01.05. 13:22", today), Some(day(2024, 1, 5)));
        assert_eq!(parse_posted_at("2024-01-05", today), Some(day(2024, 1, 5)));
        assert_eq!(parse_posted_at("13:22", today), Some(today));
        assert_eq!(parse_posted_at("3일 전", today), Some(day(2024, 3, 7)));
        assert_eq!(parse_posted_at("5분 전", today), Some(today));
        assert_eq!(parse_posted_at("어제", today), Some(day(2024, 3, 9)));
        assert_eq!(parse_posted_at("yesterday-ish", today), None);
        assert_eq!(parse_posted_at("2024.13.40.", today), None);
    }

    #[test]
    fn out_of_range_relative_dates_are_unparseable() {
        let today = day(2024, 3, 10);
        assert_eq!(parse_posted_at("100000000일 전", today), None);
        assert_eq!(parse_posted_at("99999999999999999999일 전", today), None);
        assert!(Period::preset("1w", today).unwrap().admits(Some("100000000일 전"), today));
    }

    #[test]
    fn period_presets_and_leniency() {
        let today = day(2024, 3, 10);
        let week = Period::preset("1w", today).unwrap();
        assert!(week.admits(Some("2024.03.05."), today));
        assert!(!week.admits(Some("2024.02.01."), today));
        assert!(week.admits(Some("09:15"), today));
        assert!(week.admits(None, today));
        assert!(week.admits(Some("garbage"), today));
        assert!(Period::preset("all", today).unwrap().is_all());
        assert_eq!(Period::preset("2w", today), None);
    }

    #[test]
    fn explicit_range_is_inclusive() {
        let p = Period::between(day(2024, 1, 1), day(2024, 1, 31));
        assert!(p.contains(day(2024, 1, 1)));
        assert!(p.contains(day(2024, 1, 31)));
        assert!(!p.contains(day(2024, 2, 1)));
    }

    #[test]
    fn content_keywords_apply_to_details_only() {
        let spec = FilterSpec {
            content_keywords: vec!["배송".into()],
            ..Default::default()
        };
        let mut detail = ArticleDetail::degraded("https://cafe.naver.com/x?articleid=1", "e");
        assert!(spec.admits_detail(&detail));
        detail.error = None;
        detail.content_text = "직거래만 합니다".into();
        assert!(!spec.admits_detail(&detail));
        detail.content_text = "택배 배송 가능".into();
        assert!(spec.admits_detail(&detail));
    }

    proptest! {
        #[test]
        fn keyword_filter_is_a_matching_subset(
            titles in prop::collection::vec("[a-zA-Z ]{0,12}", 0..20),
            keywords in prop::collection::vec("[a-zA-Z]{1,3}", 0..3),
        ) {
            let stubs: Vec<ArticleStub> = titles
                .iter()
                .enumerate()
                .map(|(i, t)| stub(i as u32, t, "author", None))
                .collect();
            let kept = filter_by_keywords(stubs.clone(), &keywords);

            prop_assert!(kept.len() <= stubs.len());
            for s in &kept {
                prop_assert!(stubs.contains(s));
                if !keywords.is_empty() {
                    let title = s.title.to_lowercase();
                    prop_assert!(keywords.iter().any(|k| title.contains(&k.to_lowercase())));
                }
            }
            if keywords.is_empty() {
                prop_assert_eq!(kept, stubs);
            }
        }
    }
}
