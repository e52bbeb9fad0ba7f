//! Validity classification
//!
//! Decides whether a fetched page is a valid item page, a confirmed miss, a
//! dead link, or a failure worth retrying. Decision order:
//!
//! 1. A status that is not a success goes to `TransientError` when it is in
//!    the transient table and `NotFound` otherwise
//! 2. Any matching link rule gives `BadLink`
//! 3. A success status that is also transient gives `TransientError`
//! 4. Everything else is `Valid`

use regex::Regex;
use scraper::Selector;
use std::cell::OnceCell;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::config::TargetConfig;
use crate::engine::FetchResult;
use crate::extract::{parse_selector, Document, ParseMode};
use crate::ConfigError;

/// Site-supplied dead-link check
pub trait LinkPredicate: Send + Sync {
    /// Returns true if the page marks its link as dead
    fn is_bad(&self, page: &FetchResult, document: &Document) -> bool;
}

impl<F> LinkPredicate for F
where
    F: Fn(&FetchResult, &Document) -> bool + Send + Sync,
{
    fn is_bad(&self, page: &FetchResult, document: &Document) -> bool {
        self(page, document)
    }
}

/// A rule that marks a successfully fetched page as a dead link
#[derive(Clone)]
pub enum LinkRule {
    /// Body contains the text (case-insensitive)
    BodyContains(String),
    /// Body matches the pattern
    BodyMatches(Regex),
    /// Final URL matches the pattern
    UrlMatches(Regex),
    /// The selector matches at least one element
    SelectorPresent { selector: Selector, raw: String },
    /// The request was redirected to a different page
    RedirectedAway,
    /// The final status is one of the listed codes
    StatusIn(BTreeSet<u16>),
    /// Arbitrary predicate
    Custom {
        name: String,
        predicate: Arc<dyn LinkPredicate>,
    },
}

impl LinkRule {
    pub fn body_contains(text: impl Into<String>) -> Self {
        Self::BodyContains(text.into())
    }

    pub fn body_matches(pattern: &str) -> Result<Self, ConfigError> {
        Ok(Self::BodyMatches(compile(pattern)?))
    }

    pub fn url_matches(pattern: &str) -> Result<Self, ConfigError> {
        Ok(Self::UrlMatches(compile(pattern)?))
    }

    pub fn selector_present(selector: &str) -> Result<Self, ConfigError> {
        Ok(Self::SelectorPresent {
            selector: parse_selector(selector)?,
            raw: selector.to_string(),
        })
    }

    pub fn status_in(codes: impl IntoIterator<Item = u16>) -> Self {
        Self::StatusIn(codes.into_iter().collect())
    }

    /// Wraps a closure or [`LinkPredicate`] as a named rule
    pub fn custom<P>(name: impl Into<String>, predicate: P) -> Self
    where
        P: LinkPredicate + 'static,
    {
        Self::Custom {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// Returns the reason the page is a dead link, if this rule matches
    fn check(&self, view: &PageView<'_>) -> Option<String> {
        let page = view.page;
        let matched = match self {
            Self::BodyContains(text) => view.lowered_body().contains(&text.to_lowercase()),
            Self::BodyMatches(re) => re.is_match(&page.body),
            Self::UrlMatches(re) => re.is_match(page.final_url.as_str()),
            Self::SelectorPresent { selector, .. } => view.document().exists(selector),
            Self::RedirectedAway => is_redirected_away(page),
            Self::StatusIn(codes) => codes.contains(&page.status),
            Self::Custom { predicate, .. } => predicate.is_bad(page, view.document()),
        };
        matched.then(|| self.to_string())
    }
}

impl fmt::Display for LinkRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BodyContains(text) => write!(f, "body contains '{}'", text),
            Self::BodyMatches(re) => write!(f, "body matches /{}/", re.as_str()),
            Self::UrlMatches(re) => write!(f, "URL matches /{}/", re.as_str()),
            Self::SelectorPresent { raw, .. } => write!(f, "page has '{}'", raw),
            Self::RedirectedAway => f.write_str("redirected away from the requested page"),
            Self::StatusIn(codes) => write!(f, "status in {:?}", codes),
            Self::Custom { name, .. } => write!(f, "rule '{}' matched", name),
        }
    }
}

impl fmt::Debug for LinkRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BodyContains(text) => f.debug_tuple("BodyContains").field(text).finish(),
            Self::BodyMatches(re) => f.debug_tuple("BodyMatches").field(&re.as_str()).finish(),
            Self::UrlMatches(re) => f.debug_tuple("UrlMatches").field(&re.as_str()).finish(),
            Self::SelectorPresent { raw, .. } => {
                f.debug_tuple("SelectorPresent").field(raw).finish()
            }
            Self::RedirectedAway => f.write_str("RedirectedAway"),
            Self::StatusIn(codes) => f.debug_tuple("StatusIn").field(codes).finish(),
            Self::Custom { name, .. } => f.debug_tuple("Custom").field(name).finish(),
        }
    }
}

fn compile(pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern)
        .map_err(|e| ConfigError::InvalidRule(format!("bad pattern '{}': {}", pattern, e)))
}

fn is_redirected_away(page: &FetchResult) -> bool {
    let requested = &page.url;
    let landed = &page.final_url;
    requested.host_str() != landed.host_str()
        || requested.path().trim_end_matches('/') != landed.path().trim_end_matches('/')
}

/// Classification without the parsed document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    NotFound { status: u16 },
    BadLink { reason: String },
    TransientError { cause: String },
}

impl Verdict {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientError { .. })
    }
}

/// Classification of a fetched page
#[derive(Debug)]
pub enum ClassifiedOutcome {
    Valid(Document),
    NotFound { status: u16 },
    BadLink { reason: String },
    TransientError { cause: String },
}

/// A page under classification, parsed lazily
struct PageView<'a> {
    page: &'a FetchResult,
    mode: ParseMode,
    document: OnceCell<Document>,
    lowered: OnceCell<String>,
}

impl<'a> PageView<'a> {
    fn new(page: &'a FetchResult, mode: ParseMode) -> Self {
        Self {
            page,
            mode,
            document: OnceCell::new(),
            lowered: OnceCell::new(),
        }
    }

    fn document(&self) -> &Document {
        self.document.get_or_init(|| {
            Document::parse(&self.page.body, self.page.final_url.clone(), self.mode)
        })
    }

    fn lowered_body(&self) -> &str {
        self.lowered.get_or_init(|| self.page.body.to_lowercase())
    }

    fn into_document(self) -> Document {
        match self.document.into_inner() {
            Some(document) => document,
            None => Document::parse(&self.page.body, self.page.final_url.clone(), self.mode),
        }
    }
}

fn decide(view: &PageView<'_>, config: &TargetConfig) -> Verdict {
    let status = view.page.status;
    let table = config.status_table();

    if !table.is_success(status) {
        if table.is_transient(status) {
            return Verdict::TransientError {
                cause: format!("HTTP {}", status),
            };
        }
        return Verdict::NotFound { status };
    }

    if let Some(reason) = config.link_rules().iter().find_map(|rule| rule.check(view)) {
        return Verdict::BadLink { reason };
    }

    if table.is_transient(status) {
        return Verdict::TransientError {
            cause: format!("HTTP {}", status),
        };
    }

    Verdict::Valid
}

/// Classifies a page without keeping its document
///
/// Only parses the body when a rule needs the DOM.
pub fn verdict(page: &FetchResult, config: &TargetConfig) -> Verdict {
    decide(&PageView::new(page, config.parse_mode()), config)
}

/// Classifies a page, handing back the parsed document when it is valid
pub fn classify(page: &FetchResult, config: &TargetConfig) -> ClassifiedOutcome {
    let view = PageView::new(page, config.parse_mode());
    let settled = decide(&view, config);
    ClassifiedOutcome::build(settled, view)
}

impl ClassifiedOutcome {
    /// Turns a verdict already reached for `page` into an outcome
    ///
    /// Link rules are not evaluated again; the body is parsed only when the
    /// verdict is `Valid`.
    pub fn from_verdict(settled: Verdict, page: &FetchResult, config: &TargetConfig) -> Self {
        Self::build(settled, PageView::new(page, config.parse_mode()))
    }

    fn build(settled: Verdict, view: PageView<'_>) -> Self {
        match settled {
            Verdict::Valid => Self::Valid(view.into_document()),
            Verdict::NotFound { status } => Self::NotFound { status },
            Verdict::BadLink { reason } => Self::BadLink { reason },
            Verdict::TransientError { cause } => Self::TransientError { cause },
        }
    }
}
