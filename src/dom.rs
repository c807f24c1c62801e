//! Plain-data views of DOM elements and the `scraper` helpers that work on them.
//!
//! Live element handles never leave the browser driver. Everything above it sees
//! `ElementSnapshot`s: text, outer HTML, attributes, and the enclosing listing
//! row, which is enough for scoped sub-selection without another round trip.

use anyhow::{anyhow, Result};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementSnapshot {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub html: String,
    #[serde(default)]
    pub attrs: HashMap<String, String>,
    /// Outer HTML of the closest `tr`/`li` ancestor, used for listing rows.
    #[serde(default)]
    pub row_html: Option<String>,
}

impl ElementSnapshot {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }
}

pub fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| anyhow!("invalid selector {:?}: {:?}", selector, e))
}

/// Collapse runs of whitespace the way `innerText` reads to a human.
pub fn normalize_text(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn element_text(el: &ElementRef) -> String {
    normalize_text(&el.text().collect::<Vec<_>>().join(" "))
}

fn snapshot(el: ElementRef) -> ElementSnapshot {
    let attrs = el
        .value()
        .attrs()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let row_html = el
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|a| matches!(a.value().name(), "tr" | "li"))
        .map(|row| row.html());
    ElementSnapshot {
        text: element_text(&el),
        html: el.html(),
        attrs,
        row_html,
    }
}

/// Table rows and list items do not survive fragment parsing outside their
/// parent element, so wrap them before handing the markup to html5ever.
fn parse_scoped(html: &str) -> Html {
    let trimmed = html.trim_start();
    let lower = trimmed.get(..4).unwrap_or("").to_ascii_lowercase();
    let wrapped = if lower.starts_with("<tr") {
        format!("<table><tbody>{}</tbody></table>", trimmed)
    } else if lower.starts_with("<td") || lower.starts_with("<th") {
        format!("<table><tbody><tr>{}</tr></tbody></table>", trimmed)
    } else if lower.starts_with("<li") {
        format!("<ul>{}</ul>", trimmed)
    } else {
        trimmed.to_string()
    };
    Html::parse_document(&wrapped)
}

/// All elements under `html` matching `selector`, as snapshots.
pub fn select_snapshots(html: &str, selector: &str) -> Result<Vec<ElementSnapshot>> {
    let selector = parse_selector(selector)?;
    let document = parse_scoped(html);
    let snapshots = document.select(&selector).map(snapshot).collect();
    Ok(snapshots)
}

/// First text under `html` that one of `candidates` yields and `accept` allows.
/// Candidates are tried in order; an unparsable candidate is skipped.
pub fn first_text_in(html: &str, candidates: &[&str], accept: impl Fn(&str) -> bool) -> Option<String> {
    let document = parse_scoped(html);
    for candidate in candidates {
        let Ok(selector) = parse_selector(candidate) else {
            continue;
        };
        let hit = document
            .select(&selector)
            .map(|el| element_text(&el))
            .find(|text| !text.is_empty() && accept(text));
        if hit.is_some() {
            return hit;
        }
    }
    None
}

/// Visible text of an HTML fragment.
pub fn fragment_text(html: &str) -> String {
    let document = parse_scoped(html);
    normalize_text(&document.root_element().text().collect::<Vec<_>>().join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"
        <table class="article-board"><tbody>
          <tr>
            <td class="td_article"><a class="article" href="/ArticleRead.nhn?clubid=1&articleid=11">First   post</a></td>
            <td class="td_name"><span class="nickname">alice</span></td>
            <td class="td_date">2024.01.05.</td>
          </tr>
        </tbody></table>"#;

    #[test]
    fn snapshots_carry_text_attrs_and_row() {
        let snaps = select_snapshots(LISTING, "a.article").unwrap();
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].text, "First post");
        assert_eq!(
            snaps[0].attr("href"),
            Some("/ArticleRead.nhn?clubid=1&articleid=11")
        );
        let row = snaps[0].row_html.as_deref().unwrap();
        assert!(row.contains("td_name"));
    }

    #[test]
    fn row_fragments_keep_table_structure() {
        let snaps = select_snapshots(LISTING, "a.article").unwrap();
        let row = snaps[0].row_html.as_deref().unwrap();
        let author = first_text_in(row, &[".td_name .nickname"], |_| true);
        assert_eq!(author.as_deref(), Some("alice"));
        let date = first_text_in(row, &[".td_date"], |_| true);
        assert_eq!(date.as_deref(), Some("2024.01.05."));
    }

    #[test]
    fn first_text_respects_order_and_predicate() {
        let html = r#"<div><span class="a">x</span><span class="b">long enough</span></div>"#;
        let got = first_text_in(html, &[".a", ".b"], |t| t.len() > 3);
        assert_eq!(got.as_deref(), Some("long enough"));
        assert_eq!(first_text_in(html, &["::bogus(", ".a"], |_| true).as_deref(), Some("x"));
    }

    #[test]
    fn invalid_selector_is_an_error() {
        assert!(select_snapshots("<p></p>", "a[href").is_err());
    }
}
