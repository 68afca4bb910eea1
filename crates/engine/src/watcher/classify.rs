//! Change-type classification
//!
//! Keyword cascade: the event name wins, then the payload `reason` field,
//! then the sign of the quantity delta, and finally `adjustment` when nothing
//! else applies.

use stocksync_domain::ChangeType;

fn keyword_match(text: &str) -> Option<ChangeType> {
    let text = text.to_ascii_lowercase();

    if text.contains("sale") || text.contains("transaction") {
        Some(ChangeType::Sale)
    } else if text.contains("order") {
        Some(ChangeType::Order)
    } else if text.contains("return") || text.contains("refund") {
        Some(ChangeType::Return)
    } else if text.contains("restock") || text.contains("receive") {
        Some(ChangeType::Restock)
    } else {
        None
    }
}

pub fn classify(
    event_type: &str,
    reason: Option<&str>,
    previous_quantity: Option<i64>,
    new_quantity: i64,
) -> ChangeType {
    if let Some(change_type) = keyword_match(event_type) {
        return change_type;
    }

    if let Some(change_type) = reason.and_then(keyword_match) {
        return change_type;
    }

    match previous_quantity {
        Some(previous) if new_quantity < previous => ChangeType::Sale,
        Some(previous) if new_quantity > previous => ChangeType::Restock,
        _ => ChangeType::Adjustment,
    }
}
