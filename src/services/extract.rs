// src/services/extract.rs

//! Markup extraction: raw result page → raw listing records.

use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{ListingSelectors, RawPosting};
use crate::utils::resolve_url;

/// Turns retrieved documents into listing records.
///
/// Each item is its own `Result` so one malformed listing never costs the
/// rest of the page.
pub trait ListingExtractor: Send + Sync {
    /// Extract every listing item on a search result page.
    fn extract(&self, document: &str) -> Vec<Result<RawPosting>>;

    /// Extract the long-form description from a posting's own page.
    fn extract_description(&self, document: &str) -> Option<String>;
}

/// CSS-selector based extractor for the guest job search markup.
pub struct HtmlListingExtractor {
    origin: Url,
    item: Selector,
    title: Selector,
    company: Selector,
    link: Selector,
    link_attr: String,
    time: Selector,
    location: Selector,
    description: Selector,
}

impl HtmlListingExtractor {
    /// Compile the configured selectors. `origin` resolves relative links.
    pub fn new(selectors: &ListingSelectors, origin: &str) -> Result<Self> {
        Ok(Self {
            origin: Url::parse(origin)?,
            item: Self::parse_selector(&selectors.item)?,
            title: Self::parse_selector(&selectors.title)?,
            company: Self::parse_selector(&selectors.company)?,
            link: Self::parse_selector(&selectors.link)?,
            link_attr: selectors.link_attr.clone(),
            time: Self::parse_selector(&selectors.time)?,
            location: Self::parse_selector(&selectors.location)?,
            description: Self::parse_selector(&selectors.description)?,
        })
    }

    fn parse_item(&self, item: &ElementRef) -> Result<RawPosting> {
        let url = match item
            .select(&self.link)
            .next()
            .and_then(|a| a.value().attr(&self.link_attr))
        {
            Some(href) if !href.trim().is_empty() => Some(
                resolve_url(&self.origin, href)
                    .map_err(|e| AppError::parse(format!("unresolvable link {href:?}: {e}")))?,
            ),
            _ => None,
        };

        Ok(RawPosting {
            title: Self::first_text(item, &self.title),
            company: Self::first_text(item, &self.company),
            url,
            time_posted: Self::first_text(item, &self.time),
            location: Self::first_text(item, &self.location),
        })
    }

    /// Whitespace-normalized text of the first match, if non-empty.
    fn first_text(item: &ElementRef, selector: &Selector) -> Option<String> {
        let element = item.select(selector).next()?;
        let text = element.text().collect::<Vec<_>>().join(" ");
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        (!text.is_empty()).then_some(text)
    }

    fn parse_selector(s: &str) -> Result<Selector> {
        Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
    }
}

impl ListingExtractor for HtmlListingExtractor {
    fn extract(&self, document: &str) -> Vec<Result<RawPosting>> {
        let document = Html::parse_fragment(document);
        document
            .select(&self.item)
            .map(|item| self.parse_item(&item))
            .collect()
    }

    fn extract_description(&self, document: &str) -> Option<String> {
        let document = Html::parse_document(document);
        let container = document.select(&self.description).next()?;

        let lines: Vec<String> = container
            .text()
            .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|t| !t.is_empty())
            .collect();

        (!lines.is_empty()).then(|| lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <li>
          <div class="base-card">
            <a class="base-card__full-link" href="https://dk.linkedin.com/jobs/view/student-data-analyst-1?refId=a"></a>
            <h3 class="base-search-card__title">
              Student Data Analyst
            </h3>
            <h4 class="base-search-card__subtitle"><a href="/company/acme">Acme A/S</a></h4>
            <span class="job-search-card__location">Copenhagen, Denmark</span>
            <time class="job-search-card__listdate--new" datetime="2025-02-01">3 minutes ago</time>
          </div>
        </li>
        <li>
          <a href="/jobs/view/senior-advisor-2"></a>
          <h3>Senior Student Advisor</h3>
          <time>2 minutes ago</time>
        </li>
        <li>
          <h3>No link here</h3>
        </li>
    "#;

    fn extractor() -> HtmlListingExtractor {
        HtmlListingExtractor::new(&ListingSelectors::default(), "https://www.linkedin.com").unwrap()
    }

    #[test]
    fn extracts_listing_fields() {
        let items = extractor().extract(PAGE);
        assert_eq!(items.len(), 3);

        let first = items[0].as_ref().unwrap();
        assert_eq!(first.title.as_deref(), Some("Student Data Analyst"));
        assert_eq!(first.company.as_deref(), Some("Acme A/S"));
        assert_eq!(first.time_posted.as_deref(), Some("3 minutes ago"));
        assert_eq!(first.location.as_deref(), Some("Copenhagen, Denmark"));
        assert_eq!(
            first.url.as_deref(),
            Some("https://dk.linkedin.com/jobs/view/student-data-analyst-1?refId=a")
        );
    }

    #[test]
    fn resolves_relative_links_against_origin() {
        let items = extractor().extract(PAGE);
        let second = items[1].as_ref().unwrap();
        assert_eq!(
            second.url.as_deref(),
            Some("https://www.linkedin.com/jobs/view/senior-advisor-2")
        );
        assert!(second.company.is_none());
    }

    #[test]
    fn missing_fields_are_none_not_errors() {
        let items = extractor().extract(PAGE);
        let third = items[2].as_ref().unwrap();
        assert!(third.url.is_none());
    }

    #[test]
    fn malformed_item_is_isolated() {
        let page = r#"
            <li><a href="http://[::1"></a><h3>Broken</h3></li>
            <li><a href="/jobs/view/ok-3"></a><h3>Fine</h3></li>
        "#;
        let items = extractor().extract(page);
        assert_eq!(items.len(), 2);
        assert!(matches!(items[0], Err(AppError::Parse(_))));
        assert!(items[1].is_ok());
    }

    #[test]
    fn empty_page_yields_nothing() {
        assert!(extractor().extract("").is_empty());
        assert!(extractor().extract("<html><body></body></html>").is_empty());
    }

    #[test]
    fn extracts_description_lines() {
        let page = r#"
            <html><body>
              <div class="show-more-less-html__markup">
                <p>We are hiring.</p>
                <ul><li>SQL</li><li>Python</li></ul>
              </div>
            </body></html>
        "#;
        assert_eq!(
            extractor().extract_description(page).as_deref(),
            Some("We are hiring.\nSQL\nPython")
        );
        assert!(extractor().extract_description("<p>nothing</p>").is_none());
    }
}
