//! Parsed page documents and selector queries
//!
//! [`Document`] is the DOM query capability handed to field extractors. It
//! wraps a parsed `scraper` tree together with the page URL so extractors can
//! resolve relative links.

use scraper::{Html, Selector};
use std::fmt;
use std::str::FromStr;
use url::Url;

use crate::ConfigError;

/// How a response body is parsed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseMode {
    /// Full HTML document (`<html>` is implied if missing)
    #[default]
    Document,
    /// HTML fragment, for endpoints that return partial markup
    Fragment,
}

impl FromStr for ParseMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" | "document" => Ok(Self::Document),
            "fragment" => Ok(Self::Fragment),
            other => Err(ConfigError::Validation(format!(
                "unknown parse mode '{}', expected 'normal' or 'fragment'",
                other
            ))),
        }
    }
}

/// A parsed page
pub struct Document {
    html: Html,
    url: Url,
}

impl Document {
    /// Parses a response body
    ///
    /// # Example
    ///
    /// ```
    /// use scraper::Selector;
    /// use shelfscan::extract::{Document, ParseMode};
    /// use url::Url;
    ///
    /// let url = Url::parse("https://example.test/item/1").unwrap();
    /// let doc = Document::parse("<h1> Drill </h1>", url, ParseMode::Document);
    /// let h1 = Selector::parse("h1").unwrap();
    /// assert_eq!(doc.select_text(&h1), Some("Drill".to_string()));
    /// ```
    pub fn parse(body: &str, url: Url, mode: ParseMode) -> Self {
        let html = match mode {
            ParseMode::Document => Html::parse_document(body),
            ParseMode::Fragment => Html::parse_fragment(body),
        };
        Self { html, url }
    }

    /// The URL the document was served from (after redirects)
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Direct access to the underlying tree for custom extractors
    pub fn html(&self) -> &Html {
        &self.html
    }

    /// Text of the first matching element, whitespace-collapsed
    ///
    /// Returns None if nothing matches or the text is empty.
    pub fn select_text(&self, selector: &Selector) -> Option<String> {
        self.html
            .select(selector)
            .map(|element| collapse_whitespace(&element.text().collect::<String>()))
            .find(|text| !text.is_empty())
    }

    /// Attribute value of the first matching element that carries it
    pub fn select_attr(&self, selector: &Selector, attr: &str) -> Option<String> {
        self.html
            .select(selector)
            .filter_map(|element| element.value().attr(attr))
            .map(str::trim)
            .find(|value| !value.is_empty())
            .map(str::to_string)
    }

    /// Returns true if at least one element matches
    pub fn exists(&self, selector: &Selector) -> bool {
        self.html.select(selector).next().is_some()
    }

    /// Page title from the `<title>` tag
    pub fn title(&self) -> Option<String> {
        let selector = Selector::parse("title").ok()?;
        self.select_text(&selector)
    }

    /// Resolves an href against the document URL
    ///
    /// Returns None for `javascript:`, `mailto:`, `tel:` and `data:` links,
    /// fragment-only links and anything that does not resolve to HTTP(S).
    pub fn resolve_link(&self, href: &str) -> Option<String> {
        let href = href.trim();

        if href.is_empty() || href.starts_with('#') {
            return None;
        }

        if ["javascript:", "mailto:", "tel:", "data:"]
            .iter()
            .any(|scheme| href.starts_with(scheme))
        {
            return None;
        }

        let absolute = self.url.join(href).ok()?;
        match absolute.scheme() {
            "http" | "https" => Some(absolute.to_string()),
            _ => None,
        }
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("url", &self.url.as_str())
            .finish_non_exhaustive()
    }
}

/// Per-page context passed to extractors alongside the document
#[derive(Debug, Clone, Copy)]
pub struct ExtractContext<'a> {
    /// The URL that was requested (before redirects)
    pub requested_url: &'a str,
    /// Final HTTP status
    pub status: u16,
    /// Proxy the page was fetched through, if any
    pub proxy: Option<&'a str>,
}

/// Parses a CSS selector, mapping failures to a configuration error
pub fn parse_selector(selector: &str) -> Result<Selector, ConfigError> {
    Selector::parse(selector).map_err(|e| ConfigError::InvalidSelector {
        selector: selector.to_string(),
        message: format!("{:?}", e),
    })
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(html: &str) -> Document {
        Document::parse(
            html,
            Url::parse("https://example.test/catalog/item/1").unwrap(),
            ParseMode::Document,
        )
    }

    #[test]
    fn test_select_text_collapses_whitespace() {
        let d = doc("<html><body><h1>\n  Cordless\n   Drill  </h1></body></html>");
        let h1 = parse_selector("h1").unwrap();
        assert_eq!(d.select_text(&h1), Some("Cordless Drill".to_string()));
    }

    #[test]
    fn test_select_text_skips_empty_matches() {
        let d = doc("<span class='p'> </span><span class='p'>42</span>");
        let sel = parse_selector("span.p").unwrap();
        assert_eq!(d.select_text(&sel), Some("42".to_string()));
    }

    #[test]
    fn test_select_attr() {
        let d = doc(r#"<img class="main" src=" /img/1.jpg ">"#);
        let sel = parse_selector("img.main").unwrap();
        assert_eq!(d.select_attr(&sel, "src"), Some("/img/1.jpg".to_string()));
        assert_eq!(d.select_attr(&sel, "alt"), None);
    }

    #[test]
    fn test_exists_and_title() {
        let d = doc("<html><head><title> Item </title></head><body><div id='x'></div></body></html>");
        assert!(d.exists(&parse_selector("#x").unwrap()));
        assert!(!d.exists(&parse_selector("#y").unwrap()));
        assert_eq!(d.title(), Some("Item".to_string()));
    }

    #[test]
    fn test_resolve_link() {
        let d = doc("");
        assert_eq!(
            d.resolve_link("/img/1.jpg"),
            Some("https://example.test/img/1.jpg".to_string())
        );
        assert_eq!(
            d.resolve_link("2"),
            Some("https://example.test/catalog/item/2".to_string())
        );
        assert_eq!(d.resolve_link("javascript:void(0)"), None);
        assert_eq!(d.resolve_link("mailto:shop@example.test"), None);
        assert_eq!(d.resolve_link("#top"), None);
        assert_eq!(d.resolve_link("ftp://example.test/file"), None);
    }

    #[test]
    fn test_fragment_mode() {
        let d = Document::parse(
            "<li class='sku'>A-100</li>",
            Url::parse("https://example.test/").unwrap(),
            ParseMode::Fragment,
        );
        let sel = parse_selector("li.sku").unwrap();
        assert_eq!(d.select_text(&sel), Some("A-100".to_string()));
    }

    #[test]
    fn test_parse_mode_from_str() {
        assert_eq!("normal".parse::<ParseMode>().unwrap(), ParseMode::Document);
        assert_eq!("Fragment".parse::<ParseMode>().unwrap(), ParseMode::Fragment);
        assert!("headless".parse::<ParseMode>().is_err());
    }

    #[test]
    fn test_invalid_selector() {
        assert!(matches!(
            parse_selector("div[["),
            Err(ConfigError::InvalidSelector { .. })
        ));
    }
}
