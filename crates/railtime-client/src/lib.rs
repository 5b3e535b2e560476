pub mod detail;
pub mod fetcher;
pub mod listing;

pub use detail::{DetailSelectors, HtmlDetailParser};
pub use fetcher::ReqwestFetcher;
pub use listing::{HtmlListingParser, ListingSelectors};
