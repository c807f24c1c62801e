//! Cookie persistence for the Naver session.
//!
//! The browser profile directory already keeps cookies across restarts; this
//! module is the second, portable layer: a JSON array of cookie objects that can
//! be copied between machines and re-injected into a fresh profile.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One browser cookie as stored in the session cookie file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CookieRecord {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    /// Unix seconds. `None` for session cookies.
    #[serde(default)]
    pub expiry: Option<f64>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, rename = "httpOnly")]
    pub http_only: bool,
    #[serde(default, rename = "sameSite")]
    pub same_site: Option<String>,
}

impl CookieRecord {
    pub fn new(name: impl Into<String>, value: impl Into<String>, domain: Option<&str>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: domain.map(str::to_string),
            path: Some("/".to_string()),
            expiry: None,
            secure: false,
            http_only: false,
            same_site: None,
        }
    }
}

/// Observed cookie domain -> canonical domain the browser accepts while the
/// home origin is loaded. Anything not listed loses its domain attribute and is
/// set against the current origin instead.
const NAVER_DOMAINS: &[(&str, &str)] = &[
    (".naver.com", ".naver.com"),
    ("naver.com", ".naver.com"),
    ("www.naver.com", ".naver.com"),
    (".www.naver.com", ".naver.com"),
    ("nid.naver.com", ".naver.com"),
    (".nid.naver.com", ".naver.com"),
    ("cafe.naver.com", ".naver.com"),
    (".cafe.naver.com", ".naver.com"),
    ("m.cafe.naver.com", ".naver.com"),
    (".m.cafe.naver.com", ".naver.com"),
    ("apis.naver.com", ".naver.com"),
    (".apis.naver.com", ".naver.com"),
];

#[derive(Debug, Clone)]
pub struct DomainTable {
    entries: Vec<(String, String)>,
}

impl Default for DomainTable {
    fn default() -> Self {
        Self::new(NAVER_DOMAINS.iter().map(|(from, to)| (from.to_string(), to.to_string())))
    }
}

impl DomainTable {
    pub fn new(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|(from, to)| (from.to_ascii_lowercase(), to))
                .collect(),
        }
    }

    pub fn canonical(&self, domain: &str) -> Option<&str> {
        let domain = domain.trim().to_ascii_lowercase();
        self.entries
            .iter()
            .find(|(from, _)| *from == domain)
            .map(|(_, to)| to.as_str())
    }

    /// Remap a cookie's domain through the table, dropping unrecognised domains.
    pub fn normalize(&self, cookie: &CookieRecord) -> CookieRecord {
        let mut out = cookie.clone();
        out.domain = cookie
            .domain
            .as_deref()
            .and_then(|d| self.canonical(d))
            .map(str::to_string);
        if out.domain.is_none() && cookie.domain.is_some() {
            debug!(
                "Dropping unrecognised domain {:?} for cookie {}",
                cookie.domain, cookie.name
            );
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Written(usize),
    KeptExisting,
    NothingToWrite,
}

#[derive(Debug, Clone)]
pub struct CookieFile {
    path: PathBuf,
}

impl CookieFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists_non_empty(&self) -> bool {
        fs::metadata(&self.path)
            .map(|m| m.is_file() && m.len() > 2)
            .unwrap_or(false)
    }

    /// Missing file reads as an empty jar.
    pub fn load(&self) -> Result<Vec<CookieRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("reading cookie file {}", self.path.display()))?;
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        let cookies: Vec<CookieRecord> = serde_json::from_str(&raw)
            .with_context(|| format!("parsing cookie file {}", self.path.display()))?;
        Ok(cookies)
    }

    /// Persist `cookies`. Unless `refresh` is set, an existing non-empty file is
    /// left untouched so a known-good jar is never replaced by a stale one.
    pub fn save(&self, cookies: &[CookieRecord], refresh: bool) -> Result<SaveOutcome> {
        if cookies.is_empty() {
            return Ok(SaveOutcome::NothingToWrite);
        }
        if !refresh && self.exists_non_empty() {
            debug!("Keeping existing cookie file {}", self.path.display());
            return Ok(SaveOutcome::KeptExisting);
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(cookies)?;
        fs::write(&self.path, json)
            .with_context(|| format!("writing cookie file {}", self.path.display()))?;
        info!("💾 Saved {} cookies to {}", cookies.len(), self.path.display());
        Ok(SaveOutcome::Written(cookies.len()))
    }
}

/// `Cookie` request header for `host`, built from cookies whose domain covers it.
pub fn cookie_header(cookies: &[CookieRecord], host: &str) -> Option<String> {
    let host = host.to_ascii_lowercase();
    let pairs: Vec<String> = cookies
        .iter()
        .filter(|c| match c.domain.as_deref() {
            None => true,
            Some(d) => {
                let d = d.trim_start_matches('.').to_ascii_lowercase();
                host == d || host.ends_with(&format!(".{}", d))
            }
        })
        .map(|c| format!("{}={}", c.name, c.value))
        .collect();
    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subdomains_coalesce_to_parent() {
        let table = DomainTable::default();
        let cookie = CookieRecord::new("NID_AUT", "abc", Some(".cafe.naver.com"));
        assert_eq!(table.normalize(&cookie).domain.as_deref(), Some(".naver.com"));

        let cookie = CookieRecord::new("NID_SES", "def", Some("NID.naver.com"));
        assert_eq!(table.normalize(&cookie).domain.as_deref(), Some(".naver.com"));
    }

    #[test]
    fn unknown_domains_are_dropped_not_rejected() {
        let table = DomainTable::default();
        let cookie = CookieRecord::new("_ga", "1", Some(".doubleclick.net"));
        let normalized = table.normalize(&cookie);
        assert_eq!(normalized.domain, None);
        assert_eq!(normalized.name, "_ga");
        assert_eq!(normalized.value, "1");
    }

    #[test]
    fn cookie_file_uses_selenium_style_keys() {
        let raw = r#"[{"name":"NID_AUT","value":"x","domain":".naver.com","path":"/",
                       "expiry":1767225600,"secure":true,"httpOnly":true,"sameSite":"Lax"}]"#;
        let cookies: Vec<CookieRecord> = serde_json::from_str(raw).unwrap();
        assert_eq!(cookies[0].expiry, Some(1767225600.0));
        assert!(cookies[0].http_only);
        assert_eq!(cookies[0].same_site.as_deref(), Some("Lax"));

        let back = serde_json::to_value(&cookies[0]).unwrap();
        assert_eq!(back["httpOnly"], true);
        assert_eq!(back["sameSite"], "Lax");
    }

    #[test]
    fn save_keeps_existing_file_unless_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let file = CookieFile::new(dir.path().join("cookies.json"));
        let first = vec![CookieRecord::new("NID_AUT", "first", Some(".naver.com"))];
        let second = vec![CookieRecord::new("NID_AUT", "second", Some(".naver.com"))];

        assert_eq!(file.save(&first, false).unwrap(), SaveOutcome::Written(1));
        assert_eq!(file.save(&second, false).unwrap(), SaveOutcome::KeptExisting);
        assert_eq!(file.load().unwrap()[0].value, "first");

        assert_eq!(file.save(&second, true).unwrap(), SaveOutcome::Written(1));
        assert_eq!(file.load().unwrap()[0].value, "second");
    }

    #[test]
    fn empty_jar_never_clobbers_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = CookieFile::new(dir.path().join("cookies.json"));
        file.save(&[CookieRecord::new("a", "b", None)], false).unwrap();
        assert_eq!(file.save(&[], true).unwrap(), SaveOutcome::NothingToWrite);
        assert_eq!(file.load().unwrap().len(), 1);
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let file = CookieFile::new(dir.path().join("absent.json"));
        assert!(!file.exists_non_empty());
        assert!(file.load().unwrap().is_empty());
    }

    #[test]
    fn header_filters_by_host() {
        let cookies = vec![
            CookieRecord::new("NID_AUT", "a", Some(".naver.com")),
            CookieRecord::new("other", "b", Some(".example.com")),
            CookieRecord::new("hostonly", "c", None),
        ];
        let header = cookie_header(&cookies, "cafeptthumb-phinf.pstatic.net");
        assert_eq!(header.as_deref(), Some("hostonly=c"));
        let header = cookie_header(&cookies, "cafe.naver.com").unwrap();
        assert_eq!(header, "NID_AUT=a; hostonly=c");
    }
}
