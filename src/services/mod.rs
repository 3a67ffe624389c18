//! Service layer for the job relay.
//!
//! This module contains the business logic for:
//! - Recency classification (`is_recent`)
//! - Keyword filtering (`matches`)
//! - Listing extraction (`HtmlListingExtractor`)
//! - Paginated fetching (`PaginatedFetcher`)
//! - On-demand descriptions (`DescriptionService`)

mod descriptions;
mod extract;
pub mod fetcher;
pub mod keywords;
pub mod recency;

pub use descriptions::DescriptionService;
pub use extract::{HtmlListingExtractor, ListingExtractor};
pub use fetcher::{FetchStats, HttpPageSource, PageResponse, PageSource, Pages, PaginatedFetcher};
pub use keywords::{destination_matches, matches};
pub use recency::{is_recent, parse_age};
