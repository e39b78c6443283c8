//! Small helpers over `scraper` shared by the session and submission stages.
//!
//! Callers parse, extract owned strings, and drop the document before the next
//! await point: `scraper::Html` is not `Send`.

use scraper::{ElementRef, Html, Selector};

/// First element matching `css`, if any.
pub fn select_first<'a>(document: &'a Html, css: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(css).ok()?;
    document.select(&selector).next()
}

/// All elements matching `css`, in document order.
pub fn select_all<'a>(document: &'a Html, css: &str) -> Vec<ElementRef<'a>> {
    match Selector::parse(css) {
        Ok(selector) => document.select(&selector).collect(),
        Err(_) => Vec::new(),
    }
}

/// Non-empty attribute value of an element.
pub fn attr(element: ElementRef<'_>, name: &str) -> Option<String> {
    element
        .value()
        .attr(name)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Text content with runs of whitespace collapsed to single spaces.
pub fn normalized_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}
