mod locator;

use serde::Serialize;
use serde_json::{json, Map, Value};

pub use locator::Locator;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedResult {
    urls: Vec<String>,
}

impl NormalizedResult {
    pub fn new(urls: Vec<String>) -> Option<Self> {
        if urls.is_empty() {
            return None;
        }
        Some(Self { urls })
    }

    pub fn single(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
        }
    }

    pub fn urls(&self) -> &[String] {
        self.urls.as_slice()
    }

    pub fn into_urls(self) -> Vec<String> {
        self.urls
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    pub fn locators(&self) -> impl Iterator<Item = Locator<'_>> {
        self.urls.iter().map(|url| Locator::parse(url))
    }

    pub fn to_value(&self) -> Value {
        json!({ "urls": self.urls })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    Urls(NormalizedResult),
    NoMatch,
}

impl Normalized {
    pub fn result(&self) -> Option<&NormalizedResult> {
        match self {
            Normalized::Urls(result) => Some(result),
            Normalized::NoMatch => None,
        }
    }

    pub fn into_result(self) -> Option<NormalizedResult> {
        match self {
            Normalized::Urls(result) => Some(result),
            Normalized::NoMatch => None,
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, Normalized::Urls(_))
    }

    pub fn to_value(&self) -> Value {
        match self {
            Normalized::Urls(result) => result.to_value(),
            Normalized::NoMatch => Value::Object(Map::new()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    Urls,
    ResultUrls,
    ResultUrl,
    ResultList,
    FlatList,
}

impl Rule {
    pub const ORDER: [Rule; 5] = [
        Rule::Urls,
        Rule::ResultUrls,
        Rule::ResultUrl,
        Rule::ResultList,
        Rule::FlatList,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Rule::Urls => "urls",
            Rule::ResultUrls => "result_urls",
            Rule::ResultUrl => "result_url",
            Rule::ResultList => "result",
            Rule::FlatList => "flat_list",
        }
    }

    /// `None` when the rule does not apply to `raw`; otherwise the
    /// locators it found, possibly none.
    fn apply(self, raw: &Value) -> Option<Vec<String>> {
        match self {
            Rule::Urls => raw
                .as_object()
                .and_then(|obj| obj.get("urls"))
                .and_then(Value::as_array)
                .map(|rows| strings_in(rows)),
            Rule::ResultUrls => raw
                .as_object()
                .and_then(|obj| obj.get("result_urls"))
                .and_then(Value::as_array)
                .map(|rows| strings_in(rows)),
            Rule::ResultUrl => raw
                .as_object()
                .and_then(|obj| obj.get("result_url"))
                .and_then(Value::as_str)
                .map(|url| vec![url.to_string()]),
            Rule::ResultList => raw
                .as_object()
                .and_then(|obj| obj.get("result"))
                .and_then(Value::as_array)
                .map(|rows| collect_result_rows(rows)),
            Rule::FlatList => raw
                .as_array()
                .filter(|rows| rows.iter().all(Value::is_string))
                .map(|rows| strings_in(rows)),
        }
    }
}

pub fn normalize_response(raw: &Value) -> Normalized {
    normalize_traced(raw).0
}

pub fn normalize_traced(raw: &Value) -> (Normalized, Option<Rule>) {
    for rule in Rule::ORDER {
        if let Some(urls) = rule.apply(raw) {
            let normalized = NormalizedResult::new(urls)
                .map(Normalized::Urls)
                .unwrap_or(Normalized::NoMatch);
            return (normalized, Some(rule));
        }
    }
    (Normalized::NoMatch, None)
}

fn collect_result_rows(rows: &[Value]) -> Vec<String> {
    let mut urls = Vec::new();
    for row in rows {
        match row {
            Value::Object(item) => {
                if let Some(nested) = item.get("urls").and_then(Value::as_array) {
                    urls.extend(strings_in(nested));
                } else if let Some(url) = item.get("result_url").and_then(Value::as_str) {
                    urls.push(url.to_string());
                }
            }
            Value::String(url) => urls.push(url.clone()),
            Value::Array(nested) => urls.extend(strings_in(nested)),
            _ => {}
        }
    }
    urls
}

fn strings_in(rows: &[Value]) -> Vec<String> {
    rows.iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect()
}
