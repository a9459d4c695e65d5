//! Thin query layer over `scraper`.
//!
//! Every component parses HTML through [`Page`] and asks it for nodes,
//! text, or attributes by CSS selector. `Page` is not `Send`; parse and
//! query it synchronously, never across an `.await`.

use scraper::{ElementRef, Html, Selector};

use sso_shared::{Result, SsoError};

/// Compile a CSS selector, reporting bad syntax as a parse error.
pub fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| SsoError::parse(format!("invalid selector {css:?}: {e}")))
}

/// Concatenated, whitespace-trimmed text of an element.
pub fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// A parsed HTML document.
pub struct Page {
    doc: Html,
}

impl Page {
    pub fn parse(html: &str) -> Self {
        Self {
            doc: Html::parse_document(html),
        }
    }

    /// The underlying document, for queries that need element-level access.
    pub fn html(&self) -> &Html {
        &self.doc
    }

    /// Outer HTML of every match, in document order.
    pub fn outer_html_all(&self, css: &str) -> Result<Vec<String>> {
        let sel = selector(css)?;
        Ok(self.doc.select(&sel).map(|el| el.html()).collect())
    }

    /// Value of `attr` on every match that carries it, in document order.
    pub fn attr_all(&self, css: &str, attr: &str) -> Result<Vec<String>> {
        let sel = selector(css)?;
        Ok(self
            .doc
            .select(&sel)
            .filter_map(|el| el.value().attr(attr))
            .map(str::to_string)
            .collect())
    }

    /// Trimmed text of the first match, if any.
    pub fn first_text(&self, css: &str) -> Result<Option<String>> {
        let sel = selector(css)?;
        Ok(self.doc.select(&sel).next().map(element_text))
    }

    /// `attr` of the first match that carries it.
    pub fn first_attr(&self, css: &str, attr: &str) -> Result<Option<String>> {
        Ok(self.attr_all(css, attr)?.into_iter().next())
    }

    pub fn exists(&self, css: &str) -> Result<bool> {
        let sel = selector(css)?;
        Ok(self.doc.select(&sel).next().is_some())
    }
}
