//! Per-channel webhook decoders
//!
//! Payload shapes differ per channel type, so each gets an explicit decoder
//! producing the same raw shape; no field probing scattered around the
//! engine. An event type a decoder does not know is skipped (providers send
//! plenty the engine does not care about); a known event with a broken
//! payload is an error the Watcher records.

use serde_json::Value;
use thiserror::Error;

use stocksync_domain::ChannelType;

/// A change as read off the wire, before mapping resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawChange {
    /// The channel reported an absolute quantity.
    Absolute {
        external_id: String,
        new_quantity: i64,
        previous_quantity: Option<i64>,
    },
    /// The channel reported units leaving stock (a sale or order line).
    Deduction { external_id: String, quantity: i64 },
}

impl RawChange {
    pub fn external_id(&self) -> &str {
        match self {
            RawChange::Absolute { external_id, .. } => external_id,
            RawChange::Deduction { external_id, .. } => external_id,
        }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed {event_type} payload: missing {field}")]
    MissingField {
        event_type: String,
        field: &'static str,
    },
}

fn missing(event_type: &str, field: &'static str) -> DecodeError {
    DecodeError::MissingField {
        event_type: event_type.to_string(),
        field,
    }
}

/// Read a field that may be a string or a number, by any of the given keys.
fn get_id(payload: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        match payload.get(key) {
            Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

fn get_i64(payload: &Value, keys: &[&str]) -> Option<i64> {
    for key in keys {
        if let Some(n) = payload.get(key).and_then(Value::as_i64) {
            return Some(n);
        }
    }
    None
}

/// The provider's own event id, for idempotency. Falls back to `None`; the
/// Watcher then derives a synthetic id from the payload hash.
pub fn event_id(payload: &Value) -> Option<String> {
    get_id(payload, &["EventId", "eventId", "event_id", "Id", "id"])
}

/// The payload `reason` field, for change-type classification.
pub fn reason(payload: &Value) -> Option<&str> {
    for key in ["Reason", "reason"] {
        if let Some(value) = payload.get(key).and_then(Value::as_str) {
            return Some(value);
        }
    }
    None
}

/// Dispatch by channel type and event type. Returns an empty vec for event
/// types the engine does not consume.
pub fn decode(
    channel_type: ChannelType,
    event_type: &str,
    payload: &Value,
) -> Result<Vec<RawChange>, DecodeError> {
    match channel_type {
        ChannelType::Pos => decode_pos(event_type, payload),
        ChannelType::OnlineStore => decode_online_store(event_type, payload),
        ChannelType::DeliveryPlatform => decode_delivery(event_type, payload),
    }
}

fn decode_pos(event_type: &str, payload: &Value) -> Result<Vec<RawChange>, DecodeError> {
    match event_type {
        "stock.updated" | "product.updated" => {
            let external_id = get_id(payload, &["ProductId", "productId", "product_id"])
                .ok_or_else(|| missing(event_type, "ProductId"))?;
            let new_quantity = get_i64(
                payload,
                &["CurrentStockLevel", "currentStockLevel", "current_stock"],
            )
            .ok_or_else(|| missing(event_type, "CurrentStockLevel"))?;
            let previous_quantity = get_i64(
                payload,
                &["PreviousStockLevel", "previousStockLevel", "previous_stock"],
            );

            Ok(vec![RawChange::Absolute {
                external_id,
                new_quantity,
                previous_quantity,
            }])
        }

        "transaction.created" | "sale.completed" => {
            let items = payload
                .get("Items")
                .or_else(|| payload.get("items"))
                .and_then(Value::as_array)
                .ok_or_else(|| missing(event_type, "Items"))?;

            let mut changes = Vec::with_capacity(items.len());
            for item in items {
                let external_id = get_id(item, &["ProductId", "productId", "product_id"])
                    .ok_or_else(|| missing(event_type, "Items[].ProductId"))?;
                let quantity = get_i64(item, &["Quantity", "quantity"])
                    .ok_or_else(|| missing(event_type, "Items[].Quantity"))?;

                changes.push(RawChange::Deduction {
                    external_id,
                    quantity,
                });
            }
            Ok(changes)
        }

        _ => Ok(Vec::new()),
    }
}

fn decode_online_store(event_type: &str, payload: &Value) -> Result<Vec<RawChange>, DecodeError> {
    if event_type.contains("inventory") && event_type.ends_with("updated") {
        // Either a batch of variants or a single object.
        if let Some(variants) = payload.get("variants").and_then(Value::as_array) {
            let mut changes = Vec::with_capacity(variants.len());
            for variant in variants {
                let external_id = get_id(variant, &["variantId", "variant_id", "id"])
                    .ok_or_else(|| missing(event_type, "variants[].variantId"))?;
                let new_quantity = get_i64(variant, &["quantity"])
                    .ok_or_else(|| missing(event_type, "variants[].quantity"))?;

                changes.push(RawChange::Absolute {
                    external_id,
                    new_quantity,
                    previous_quantity: get_i64(variant, &["previousQuantity", "previous_quantity"]),
                });
            }
            return Ok(changes);
        }

        let external_id = get_id(payload, &["variantId", "variant_id", "productId", "id"])
            .ok_or_else(|| missing(event_type, "variantId"))?;
        let new_quantity =
            get_i64(payload, &["quantity"]).ok_or_else(|| missing(event_type, "quantity"))?;

        return Ok(vec![RawChange::Absolute {
            external_id,
            new_quantity,
            previous_quantity: get_i64(payload, &["previousQuantity", "previous_quantity"]),
        }]);
    }

    match event_type {
        "order.created" | "order_paid" => {
            let lines = payload
                .get("lineItems")
                .or_else(|| payload.get("line_items"))
                .and_then(Value::as_array)
                .ok_or_else(|| missing(event_type, "lineItems"))?;

            let mut changes = Vec::with_capacity(lines.len());
            for line in lines {
                let external_id =
                    get_id(line, &["catalogItemId", "catalog_item_id", "productId", "id"])
                        .ok_or_else(|| missing(event_type, "lineItems[].catalogItemId"))?;
                let quantity = get_i64(line, &["quantity"])
                    .ok_or_else(|| missing(event_type, "lineItems[].quantity"))?;

                changes.push(RawChange::Deduction {
                    external_id,
                    quantity,
                });
            }
            Ok(changes)
        }

        _ => Ok(Vec::new()),
    }
}

fn decode_delivery(event_type: &str, payload: &Value) -> Result<Vec<RawChange>, DecodeError> {
    match event_type {
        "item.availability.updated" => {
            let external_id = get_id(payload, &["itemId", "item_id", "id"])
                .ok_or_else(|| missing(event_type, "itemId"))?;
            let available = payload
                .get("available")
                .and_then(Value::as_bool)
                .ok_or_else(|| missing(event_type, "available"))?;

            // The platform only knows on/off, so stock collapses to 1 or 0.
            Ok(vec![RawChange::Absolute {
                external_id,
                new_quantity: if available { 1 } else { 0 },
                previous_quantity: None,
            }])
        }

        "order.created" => {
            let items = payload
                .get("items")
                .and_then(Value::as_array)
                .ok_or_else(|| missing(event_type, "items"))?;

            let mut changes = Vec::with_capacity(items.len());
            for item in items {
                let external_id = get_id(item, &["itemId", "item_id", "id"])
                    .ok_or_else(|| missing(event_type, "items[].itemId"))?;
                let quantity = get_i64(item, &["quantity"])
                    .ok_or_else(|| missing(event_type, "items[].quantity"))?;

                changes.push(RawChange::Deduction {
                    external_id,
                    quantity,
                });
            }
            Ok(changes)
        }

        _ => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pos_stock_update() {
        let payload = json!({"ProductId": "12345", "CurrentStockLevel": 85});
        let changes = decode(ChannelType::Pos, "stock.updated", &payload).unwrap();

        assert_eq!(
            changes,
            vec![RawChange::Absolute {
                external_id: "12345".into(),
                new_quantity: 85,
                previous_quantity: None,
            }]
        );
    }

    #[test]
    fn test_pos_numeric_product_id() {
        let payload = json!({"ProductId": 12345, "CurrentStockLevel": 85, "PreviousStockLevel": 100});
        let changes = decode(ChannelType::Pos, "stock.updated", &payload).unwrap();

        assert_eq!(
            changes,
            vec![RawChange::Absolute {
                external_id: "12345".into(),
                new_quantity: 85,
                previous_quantity: Some(100),
            }]
        );
    }

    #[test]
    fn test_pos_transaction_lines() {
        let payload = json!({
            "TransactionId": "tx-9",
            "Items": [
                {"ProductId": "12345", "Quantity": 2},
                {"ProductId": "67890", "Quantity": 1},
            ]
        });
        let changes = decode(ChannelType::Pos, "transaction.created", &payload).unwrap();

        assert_eq!(changes.len(), 2);
        assert_eq!(
            changes[0],
            RawChange::Deduction {
                external_id: "12345".into(),
                quantity: 2
            }
        );
    }

    #[test]
    fn test_online_store_inventory_variants() {
        let payload = json!({
            "variants": [
                {"variantId": "v-1", "quantity": 40},
                {"variantId": "v-2", "quantity": 0},
            ]
        });
        let changes =
            decode(ChannelType::OnlineStore, "inventory/items.updated", &payload).unwrap();

        assert_eq!(changes.len(), 2);
        assert_eq!(changes[1].external_id(), "v-2");
    }

    #[test]
    fn test_online_store_order_lines() {
        let payload = json!({
            "lineItems": [{"catalogItemId": "v-1", "quantity": 3}]
        });
        let changes = decode(ChannelType::OnlineStore, "order.created", &payload).unwrap();

        assert_eq!(
            changes,
            vec![RawChange::Deduction {
                external_id: "v-1".into(),
                quantity: 3
            }]
        );
    }

    #[test]
    fn test_delivery_availability_collapses_to_binary() {
        let on = json!({"itemId": "d-1", "available": true});
        let off = json!({"itemId": "d-1", "available": false});

        let changes_on =
            decode(ChannelType::DeliveryPlatform, "item.availability.updated", &on).unwrap();
        let changes_off =
            decode(ChannelType::DeliveryPlatform, "item.availability.updated", &off).unwrap();

        assert!(matches!(
            changes_on[0],
            RawChange::Absolute { new_quantity: 1, .. }
        ));
        assert!(matches!(
            changes_off[0],
            RawChange::Absolute { new_quantity: 0, .. }
        ));
    }

    #[test]
    fn test_unknown_event_type_is_skipped() {
        let payload = json!({"whatever": true});
        assert!(decode(ChannelType::Pos, "customer.created", &payload)
            .unwrap()
            .is_empty());
        assert!(
            decode(ChannelType::OnlineStore, "app.installed", &payload)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn test_malformed_known_event_is_an_error() {
        let payload = json!({"ProductId": "12345"}); // no stock level
        let err = decode(ChannelType::Pos, "stock.updated", &payload).unwrap_err();
        assert!(err.to_string().contains("CurrentStockLevel"));
    }

    #[test]
    fn test_event_id_extraction() {
        assert_eq!(
            event_id(&json!({"EventId": "evt-1"})),
            Some("evt-1".to_string())
        );
        assert_eq!(event_id(&json!({"id": 77})), Some("77".to_string()));
        assert_eq!(event_id(&json!({"foo": "bar"})), None);
    }
}
