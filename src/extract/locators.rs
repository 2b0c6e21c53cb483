//! Data-driven field locators for dataset pages.

use scraper::{ElementRef, Html, Selector};
use url::Url;

/// How to find one field value on a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// Text content of the first element matching a CSS selector.
    Text(String),
    /// Attribute of the first matching element that carries it.
    Attr { selector: String, attr: String },
    /// Value cell following a table cell whose text contains the label.
    AdjacentCell(String),
}

impl Locator {
    pub fn text(selector: &str) -> Self {
        Locator::Text(selector.to_string())
    }

    pub fn attr(selector: &str, attr: &str) -> Self {
        Locator::Attr {
            selector: selector.to_string(),
            attr: attr.to_string(),
        }
    }

    pub fn adjacent(label: &str) -> Self {
        Locator::AdjacentCell(label.to_string())
    }

    /// First non-empty value this locator yields on `document`.
    fn find(&self, document: &Html) -> Option<String> {
        match self {
            Locator::Text(css) => {
                let selector = Selector::parse(css).ok()?;
                document
                    .select(&selector)
                    .map(element_text)
                    .find(|text| !text.is_empty())
            }
            Locator::Attr { selector, attr } => {
                let selector = Selector::parse(selector).ok()?;
                document
                    .select(&selector)
                    .filter_map(|el| el.value().attr(attr))
                    .map(str::trim)
                    .find(|value| !value.is_empty())
                    .map(str::to_string)
            }
            Locator::AdjacentCell(label) => adjacent_cell(document, label),
        }
    }
}

/// Fields read from a dataset page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Title,
    Description,
    Owner,
    Keywords,
    Categories,
    DataLink,
    MetaLink,
}

impl Field {
    fn is_link(self) -> bool {
        matches!(self, Field::DataLink | Field::MetaLink)
    }
}

/// Ordered fallback locators per field. The first non-empty hit wins.
#[derive(Debug, Clone)]
pub struct FieldTable {
    entries: Vec<(Field, Vec<Locator>)>,
}

impl Default for FieldTable {
    fn default() -> Self {
        Self {
            entries: vec![
                (
                    Field::Title,
                    vec![
                        Locator::text("#versionName"),
                        Locator::text("h1"),
                        Locator::text("title"),
                    ],
                ),
                (
                    Field::Description,
                    vec![
                        Locator::text("#versionDescription"),
                        Locator::adjacent("Описание"),
                    ],
                ),
                (
                    Field::Owner,
                    vec![
                        Locator::text("#versionOwner"),
                        Locator::adjacent("Владелец"),
                        Locator::adjacent("Государственный орган"),
                    ],
                ),
                (
                    Field::Keywords,
                    vec![
                        Locator::text("#versionKeywordsBlock"),
                        Locator::adjacent("Ключевые слова"),
                    ],
                ),
                (Field::Categories, vec![Locator::adjacent("Категории")]),
                (
                    Field::DataLink,
                    vec![
                        Locator::attr("a[href*=\"api/v4/\"]", "href"),
                        Locator::attr("a[href*=\"/api/\"]", "href"),
                    ],
                ),
                (
                    Field::MetaLink,
                    vec![
                        Locator::attr("a[href*=\"/meta/\"]", "href"),
                        Locator::attr("a[href*=\"meta\"]", "href"),
                    ],
                ),
            ],
        }
    }
}

impl FieldTable {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Replace the locator chain for `field`.
    pub fn with(mut self, field: Field, locators: Vec<Locator>) -> Self {
        match self.entries.iter_mut().find(|(f, _)| *f == field) {
            Some(entry) => entry.1 = locators,
            None => self.entries.push((field, locators)),
        }
        self
    }

    pub fn locators(&self, field: Field) -> &[Locator] {
        self.entries
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, l)| l.as_slice())
            .unwrap_or(&[])
    }

    /// Apply every chain to `html`. Links are resolved against `page_url`.
    pub fn apply(&self, html: &str, page_url: &str) -> PageFields {
        let document = Html::parse_document(html);
        let base = Url::parse(page_url).ok();
        let mut fields = PageFields::default();

        for (field, locators) in &self.entries {
            let Some(value) = locators.iter().find_map(|l| l.find(&document)) else {
                continue;
            };
            let value = if field.is_link() {
                resolve_link(base.as_ref(), &value)
            } else {
                value
            };
            fields.set(*field, value);
        }
        fields
    }
}

/// Raw values found on a page.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PageFields {
    pub title: Option<String>,
    pub description: Option<String>,
    pub owner: Option<String>,
    pub keywords: Option<String>,
    pub categories: Option<String>,
    pub data_link: Option<String>,
    pub meta_link: Option<String>,
}

impl PageFields {
    fn set(&mut self, field: Field, value: String) {
        let slot = match field {
            Field::Title => &mut self.title,
            Field::Description => &mut self.description,
            Field::Owner => &mut self.owner,
            Field::Keywords => &mut self.keywords,
            Field::Categories => &mut self.categories,
            Field::DataLink => &mut self.data_link,
            Field::MetaLink => &mut self.meta_link,
        };
        *slot = Some(value);
    }
}

/// Trimmed text nodes of an element joined by newlines.
fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn adjacent_cell(document: &Html, label: &str) -> Option<String> {
    let cells = Selector::parse("td, th").ok()?;
    document
        .select(&cells)
        .filter(|cell| element_text(*cell).contains(label))
        .filter_map(|cell| {
            cell.next_siblings()
                .filter_map(ElementRef::wrap)
                .find(|sibling| sibling.value().name() == "td")
        })
        .map(element_text)
        .find(|text| !text.is_empty())
}

fn resolve_link(base: Option<&Url>, href: &str) -> String {
    match base.and_then(|b| b.join(href).ok()) {
        Some(url) => url.to_string(),
        None => href.to_string(),
    }
}

/// Collapse runs of whitespace into single spaces.
pub fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split a keyword block on commas, semicolons and line breaks.
pub fn split_list(text: &str) -> Vec<String> {
    text.split([',', ';', '\n'])
        .map(single_line)
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head><title>Портал</title></head><body>
        <h1>Заголовок</h1>
        <div id="versionName">  Перечень   школ </div>
        <div id="versionDescription"></div>
        <table class="table-striped">
          <tr><td>Описание</td><td>Список школ города</td></tr>
          <tr><td>Государственный орган</td><td>Акимат города Алматы</td></tr>
          <tr><td>Категории</td><td>Образование</td></tr>
        </table>
        <div id="versionKeywordsBlock"><span>школы</span><span>образование, Алматы</span></div>
        <a href="/api/v4/schools/v1">Данные</a>
        <a href="https://data.egov.kz/meta/schools/v1">Мета</a>
    </body></html>"#;

    #[test]
    fn first_non_empty_locator_wins() {
        let fields = FieldTable::default().apply(PAGE, "https://data.egov.kz/datasets/view?index=schools");
        assert_eq!(fields.title.as_deref().map(single_line).as_deref(), Some("Перечень школ"));
        // #versionDescription is empty, so the adjacent cell is used.
        assert_eq!(fields.description.as_deref(), Some("Список школ города"));
        assert_eq!(fields.owner.as_deref(), Some("Акимат города Алматы"));
        assert_eq!(fields.categories.as_deref(), Some("Образование"));
    }

    #[test]
    fn links_are_absolute() {
        let fields = FieldTable::default().apply(PAGE, "https://data.egov.kz/datasets/view?index=schools");
        assert_eq!(
            fields.data_link.as_deref(),
            Some("https://data.egov.kz/api/v4/schools/v1")
        );
        assert_eq!(
            fields.meta_link.as_deref(),
            Some("https://data.egov.kz/meta/schools/v1")
        );
    }

    #[test]
    fn keywords_split_on_separators() {
        let fields = FieldTable::default().apply(PAGE, "https://data.egov.kz/");
        let keywords = split_list(fields.keywords.as_deref().unwrap_or_default());
        assert_eq!(keywords, vec!["школы", "образование", "Алматы"]);
    }

    #[test]
    fn falls_back_to_heading_and_title() {
        let fields = FieldTable::default().apply(
            "<html><head><title>Только title</title></head><body></body></html>",
            "https://x/",
        );
        assert_eq!(fields.title.as_deref(), Some("Только title"));
        assert_eq!(fields.data_link, None);
    }

    #[test]
    fn custom_chain_replaces_default() {
        let table = FieldTable::default().with(Field::Title, vec![Locator::text("h1")]);
        assert_eq!(table.locators(Field::Title).len(), 1);
        let fields = table.apply(PAGE, "https://x/");
        assert_eq!(fields.title.as_deref(), Some("Заголовок"));
    }
}
