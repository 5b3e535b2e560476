use railtime_core::error::AppError;
use railtime_core::traits::DetailParser;
use scraper::{Html, Selector};

use crate::listing::compile;

/// Unit suffixes stripped before integer coercion by default.
pub const DEFAULT_UNIT_SUFFIXES: &[&str] = &["分", "mins", "min"];

const HOUR_MARKER: &str = "時間";

/// CSS selector locating the travel-time field on a search result page.
#[derive(Debug, Clone)]
pub struct DetailSelectors {
    pub field: String,
}

impl Default for DetailSelectors {
    fn default() -> Self {
        Self {
            field: ".route-summary .time".to_string(),
        }
    }
}

/// Detail parser backed by `scraper` CSS selectors.
#[derive(Clone)]
pub struct HtmlDetailParser {
    field: Selector,
    unit_suffixes: Vec<String>,
}

impl HtmlDetailParser {
    pub fn new(selectors: &DetailSelectors) -> Result<Self, AppError> {
        Ok(Self {
            field: compile(&selectors.field)?,
            unit_suffixes: DEFAULT_UNIT_SUFFIXES.iter().map(|s| s.to_string()).collect(),
        })
    }

    pub fn with_unit_suffixes(mut self, suffixes: Vec<String>) -> Self {
        self.unit_suffixes = suffixes;
        self
    }
}

impl DetailParser for HtmlDetailParser {
    fn parse_detail(&self, html: &str) -> Result<u32, AppError> {
        let document = Html::parse_document(html);
        let field = document
            .select(&self.field)
            .next()
            .ok_or_else(|| AppError::Parse("travel time field not found".into()))?;

        let text: String = field.text().collect();
        parse_minutes(&text, &self.unit_suffixes)
    }
}

/// Coerce a travel-time label such as `18分` or `1時間5分` into minutes.
///
/// Whitespace is ignored and full-width digits are accepted. Anything that
/// is not a plain count of minutes (optionally preceded by hours) fails.
pub fn parse_minutes(text: &str, unit_suffixes: &[impl AsRef<str>]) -> Result<u32, AppError> {
    let invalid = || {
        AppError::Parse(format!(
            "travel time '{}' is not a number of minutes",
            text.trim()
        ))
    };

    let mut compact: String = text
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| match c {
            '０'..='９' => char::from_u32(c as u32 - '０' as u32 + '0' as u32).unwrap_or(c),
            _ => c,
        })
        .collect();

    if let Some(suffix) = unit_suffixes
        .iter()
        .map(|s| s.as_ref())
        .find(|s| !s.is_empty() && compact.ends_with(*s))
    {
        compact.truncate(compact.len() - suffix.len());
    }

    let (hours, minutes) = match compact.split_once(HOUR_MARKER) {
        Some((hours, minutes)) => (Some(hours), minutes),
        None => (None, compact.as_str()),
    };

    let hours = match hours {
        Some(h) => digits(h).ok_or_else(invalid)?,
        None => 0,
    };
    let minutes = match (minutes.is_empty(), hours) {
        (true, h) if h > 0 => 0,
        _ => digits(minutes).ok_or_else(invalid)?,
    };

    hours
        .checked_mul(60)
        .and_then(|h| h.checked_add(minutes))
        .ok_or_else(invalid)
}

/// Plain ASCII digits only; `parse` alone would also take a leading `+`.
fn digits(s: &str) -> Option<u32> {
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}
