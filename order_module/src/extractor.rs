//! Order field extraction for marketplace sale notifications.
//!
//! The vendor template is an HTML table of label/value cells. Each field is
//! located by a fixed pattern; a field the pattern cannot find is left as
//! `None` rather than failing the whole order.

use regex::Regex;
use scraper::Html;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::notification::NotificationRecord;

/// Order fields recovered from one notification. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub order_number: Option<String>,
    /// `YYYY-MM-DD HH:MM:SS` as printed by the vendor.
    pub transaction_time: Option<String>,
    pub buyer_name: Option<String>,
    pub product_name: Option<String>,
    pub quantity: Option<String>,
    pub price_text: Option<String>,
    /// Buyer-supplied account details needed to fulfil the order.
    pub transaction_secret: Option<String>,
    pub deadline_text: Option<String>,
    pub source_notification_id: String,
}

impl Order {
    /// Order number when known, otherwise the source notification id.
    pub fn display_number(&self) -> &str {
        self.order_number
            .as_deref()
            .unwrap_or(&self.source_notification_id)
    }
}

// =============================================================================
// Patterns
// =============================================================================

static ORDER_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"OD\d+").unwrap());

static TRANSACTION_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2})").unwrap());

static BUYER_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)Nama Pembeli.*?<td[^>]*>([^<]+)</td>").unwrap());

static TRANSACTION_SECRET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)Informasi Transaksi.*?<td[^>]*>(.*?)</td>").unwrap());

static PRODUCT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)Produk.*?<td[^>]*>(.*?)<br\s*/?>").unwrap());

static QUANTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)Jumlah.*?<td[^>]*>(.*?)</td>").unwrap());

static PRICE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)Harga Produk.*?<b[^>]*>([^<]+)</b>").unwrap());

static DEADLINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"maksimal sebelum ([^.]+)\.").unwrap());

// =============================================================================
// Extraction
// =============================================================================

/// Extracts an order from a notification body. Never fails.
pub fn extract(body: &str) -> Order {
    Order {
        order_number: ORDER_NUMBER
            .find(body)
            .map(|found| found.as_str().to_string()),
        transaction_time: capture(&TRANSACTION_TIME, body),
        buyer_name: capture(&BUYER_NAME, body),
        product_name: capture(&PRODUCT_NAME, body),
        quantity: capture(&QUANTITY, body),
        price_text: capture(&PRICE, body),
        transaction_secret: capture(&TRANSACTION_SECRET, body),
        deadline_text: capture(&DEADLINE, body),
        source_notification_id: String::new(),
    }
}

/// Extracts from the preferred body of `record` and links the order back to it.
pub fn extract_notification(record: &NotificationRecord) -> Order {
    Order {
        source_notification_id: record.id.clone(),
        ..extract(record.preferred_body())
    }
}

fn capture(pattern: &Regex, body: &str) -> Option<String> {
    let raw = pattern.captures(body)?.get(1)?.as_str();
    let text = strip_markup(raw);
    (!text.is_empty()).then_some(text)
}

/// Drops tags, decodes entities and collapses whitespace.
fn strip_markup(fragment: &str) -> String {
    if !fragment.contains('<') && !fragment.contains('&') {
        return collapse_whitespace(fragment);
    }
    let parsed = Html::parse_fragment(fragment);
    let text = parsed.root_element().text().collect::<Vec<_>>().join(" ");
    collapse_whitespace(&text)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
