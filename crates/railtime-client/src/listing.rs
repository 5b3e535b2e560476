use railtime_core::error::AppError;
use railtime_core::models::{LimitedExpress, ListingEntry};
use railtime_core::traits::ListingParser;
use railtime_core::util::{DEFAULT_NAME_SUFFIXES, dedup_entries, normalize_station_name};
use scraper::{ElementRef, Html, Selector};

/// Marker tokens that flag a limited-express stop by default.
pub const DEFAULT_EXPRESS_MARKERS: &[&str] = &["特急"];

/// CSS selectors locating stations on the listing page.
#[derive(Debug, Clone)]
pub struct ListingSelectors {
    /// Element(s) wrapping the station list. Absence means the page is malformed.
    pub container: String,
    /// One element per station, searched inside each container.
    pub entry: String,
    /// Name element inside an entry. Falls back to the entry's own text.
    pub name: Option<String>,
}

impl Default for ListingSelectors {
    fn default() -> Self {
        Self {
            container: ".station-list".to_string(),
            entry: "li".to_string(),
            name: Some(".station-name".to_string()),
        }
    }
}

/// Listing parser backed by `scraper` CSS selectors.
#[derive(Clone)]
pub struct HtmlListingParser {
    container: Selector,
    entry: Selector,
    name: Option<Selector>,
    name_suffixes: Vec<String>,
    express_markers: Vec<String>,
}

impl HtmlListingParser {
    pub fn new(selectors: &ListingSelectors) -> Result<Self, AppError> {
        Ok(Self {
            container: compile(&selectors.container)?,
            entry: compile(&selectors.entry)?,
            name: selectors.name.as_deref().map(compile).transpose()?,
            name_suffixes: DEFAULT_NAME_SUFFIXES.iter().map(|s| s.to_string()).collect(),
            express_markers: DEFAULT_EXPRESS_MARKERS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        })
    }

    pub fn with_name_suffixes(mut self, suffixes: Vec<String>) -> Self {
        self.name_suffixes = suffixes;
        self
    }

    /// Tokens whose presence in an entry marks a limited-express stop.
    /// An empty list means the listing carries no such signal and every
    /// entry is reported as [`LimitedExpress::Unknown`].
    pub fn with_express_markers(mut self, markers: Vec<String>) -> Self {
        self.express_markers = markers;
        self
    }

    fn limited_express(&self, entry_text: &str) -> LimitedExpress {
        if self.express_markers.is_empty() {
            LimitedExpress::Unknown
        } else if self
            .express_markers
            .iter()
            .any(|marker| entry_text.contains(marker.as_str()))
        {
            LimitedExpress::Yes
        } else {
            LimitedExpress::No
        }
    }

    fn parse_entry(&self, entry: ElementRef<'_>) -> Option<ListingEntry> {
        let raw_name: String = match self.name.as_ref().and_then(|sel| entry.select(sel).next()) {
            Some(name) => name.text().collect(),
            None => entry.text().collect(),
        };
        let name = normalize_station_name(&raw_name, &self.name_suffixes)?;
        let entry_text: String = entry.text().collect();
        Some(ListingEntry::new(name, self.limited_express(&entry_text)))
    }
}

impl ListingParser for HtmlListingParser {
    fn parse_listing(&self, html: &str) -> Result<Vec<ListingEntry>, AppError> {
        let document = Html::parse_document(html);
        let containers: Vec<_> = document.select(&self.container).collect();
        if containers.is_empty() {
            return Err(AppError::Parse("listing container not found".into()));
        }

        let entries = containers
            .into_iter()
            .flat_map(|container| container.select(&self.entry))
            .filter_map(|entry| self.parse_entry(entry));

        Ok(dedup_entries(entries))
    }
}

pub(crate) fn compile(selector: &str) -> Result<Selector, AppError> {
    Selector::parse(selector)
        .map_err(|e| AppError::Config(format!("Invalid CSS selector '{selector}': {e}")))
}
