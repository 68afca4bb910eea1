/*!
 * End-to-end scenarios
 *
 * The full engine pipeline on in-memory fakes: webhook in at the Watcher,
 * bus pumps carrying changes to Sync and Alert, mock providers observing
 * what reaches each channel. Each test is a literal scenario from the
 * system's contract, with exact quantities asserted.
 */

mod harness;

use harness::Harness;
use serde_json::json;
use stocksync_domain::{
    AlertType, ChannelType, EngineEvent, SyncEventType, SyncJob, SyncOperation, SyncStatus,
};
use stocksync_engine::Repository;

/// POS sale propagation: stock 100 → 85 with buffer 10 pushes 75 to both
/// online channels, nothing back to the POS, and leaves exactly three audit
/// rows.
#[tokio::test]
async fn pos_sale_propagates_with_buffer() {
    let h = Harness::new();
    let mut events = h.engine.bus.subscribe();

    let changes = h
        .webhook(
            &h.pos,
            ChannelType::Pos,
            "stock.updated",
            json!({"EventId": "evt-1", "ProductId": "12345", "CurrentStockLevel": 85}),
        )
        .await;
    assert_eq!(changes.len(), 1);

    let online = h.online.mock.clone();
    let delivery = h.delivery.mock.clone();
    let delivered = h
        .wait_until(|| {
            let online = online.clone();
            let delivery = delivery.clone();
            async move {
                online.update_log().await == vec![("web-12345".to_string(), 75)]
                    && delivery.update_log().await == vec![("del-12345".to_string(), 75)]
            }
        })
        .await;
    assert!(delivered, "both online channels must receive 75");

    // Canonical stock is the webhook value.
    let product = h
        .repo
        .get_product(h.tenant_id, h.product_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(product.current_stock, 85);

    // The POS originated the change; it never gets a push back.
    assert!(h.pos.mock.update_log().await.is_empty());

    // Three sync_events rows: one stock_update + two push_update.
    h.settle().await;
    let events_rows = h.repo.sync_events();
    assert_eq!(events_rows.len(), 3);
    assert_eq!(
        h.repo.sync_events_of_type(SyncEventType::StockUpdate).len(),
        1
    );
    assert_eq!(
        h.repo.sync_events_of_type(SyncEventType::PushUpdate).len(),
        2
    );
    assert!(events_rows.iter().all(|e| e.status == SyncStatus::Completed));

    // Exactly one sync:completed went over the bus.
    let mut completed = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, EngineEvent::SyncCompleted { .. }) {
            completed += 1;
        }
    }
    assert_eq!(completed, 1);
}

/// An unmapped external id records webhook_unmatched and touches nothing.
#[tokio::test]
async fn unmapped_webhook_records_unmatched() {
    let h = Harness::new();

    let changes = h
        .webhook(
            &h.pos,
            ChannelType::Pos,
            "stock.updated",
            json!({"EventId": "evt-2", "ProductId": "unknown-xyz", "CurrentStockLevel": 10}),
        )
        .await;
    assert!(changes.is_empty());
    h.settle().await;

    let unmatched = h.repo.sync_events_of_type(SyncEventType::WebhookUnmatched);
    assert_eq!(unmatched.len(), 1);
    assert_eq!(unmatched[0].status, SyncStatus::Failed);
    assert!(unmatched[0]
        .error_message
        .as_ref()
        .unwrap()
        .contains("No product mapping found"));

    // No provider call, no alert.
    assert!(h.pos.mock.update_log().await.is_empty());
    assert!(h.online.mock.update_log().await.is_empty());
    assert!(h.delivery.mock.update_log().await.is_empty());
    assert!(h.repo.alerts().is_empty());

    // Canonical stock untouched.
    let product = h
        .repo
        .get_product(h.tenant_id, h.product_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(product.current_stock, 100);
}

/// Low stock: dropping to 5 with buffer 20 raises exactly one alert carrying
/// the quantities; an identical follow-up creates nothing new.
#[tokio::test]
async fn low_stock_alert_raised_once() {
    let h = Harness::with_product(100, 20);

    h.webhook(
        &h.pos,
        ChannelType::Pos,
        "stock.updated",
        json!({"EventId": "evt-3", "ProductId": "12345", "CurrentStockLevel": 5}),
    )
    .await;

    let repo = h.repo.clone();
    let alerted = h
        .wait_until(|| {
            let repo = repo.clone();
            async move { !repo.unread_alerts(AlertType::LowStock).is_empty() }
        })
        .await;
    assert!(alerted, "low stock alert expected");

    let alerts = h.repo.unread_alerts(AlertType::LowStock);
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].metadata["current_stock"], 5);
    assert_eq!(alerts[0].metadata["buffer_stock"], 20);
    assert_eq!(alerts[0].product_id, Some(h.product_id));

    // Same stock level again, new event id: still exactly one unread alert.
    h.webhook(
        &h.pos,
        ChannelType::Pos,
        "stock.updated",
        json!({"EventId": "evt-4", "ProductId": "12345", "CurrentStockLevel": 5}),
    )
    .await;
    h.settle().await;

    assert_eq!(h.repo.unread_alerts(AlertType::LowStock).len(), 1);
    assert_eq!(h.repo.alerts().len(), 1);
}

/// Recovery resolves the unread alert without creating another; an operator
/// marking it read does not count as recovery.
#[tokio::test]
async fn alert_read_is_not_resolution() {
    let h = Harness::with_product(100, 20);

    h.webhook(
        &h.pos,
        ChannelType::Pos,
        "stock.updated",
        json!({"EventId": "evt-5", "ProductId": "12345", "CurrentStockLevel": 5}),
    )
    .await;
    let repo = h.repo.clone();
    assert!(
        h.wait_until(|| {
            let repo = repo.clone();
            async move { !repo.unread_alerts(AlertType::LowStock).is_empty() }
        })
        .await
    );

    // Restock above the threshold: alert flips to read on its own.
    h.webhook(
        &h.pos,
        ChannelType::Pos,
        "stock.updated",
        json!({"EventId": "evt-6", "ProductId": "12345", "CurrentStockLevel": 90}),
    )
    .await;
    let repo = h.repo.clone();
    assert!(
        h.wait_until(|| {
            let repo = repo.clone();
            async move { repo.unread_alerts(AlertType::LowStock).is_empty() }
        })
        .await
    );
    assert_eq!(h.repo.alerts().len(), 1, "resolution creates no new alert");

    // Drop low again, mark read by hand, re-evaluate: a NEW alert appears.
    h.webhook(
        &h.pos,
        ChannelType::Pos,
        "stock.updated",
        json!({"EventId": "evt-7", "ProductId": "12345", "CurrentStockLevel": 3}),
    )
    .await;
    let repo = h.repo.clone();
    assert!(
        h.wait_until(|| {
            let repo = repo.clone();
            async move { !repo.unread_alerts(AlertType::LowStock).is_empty() }
        })
        .await
    );

    let alert_id = h.repo.unread_alerts(AlertType::LowStock)[0].id;
    h.repo.mark_alert_read(alert_id);

    let product = h
        .repo
        .get_product(h.tenant_id, h.product_id)
        .await
        .unwrap()
        .unwrap();
    assert!(h.engine.alerts.evaluate_product(&product).await.unwrap());
    assert_eq!(h.repo.unread_alerts(AlertType::LowStock).len(), 1);
}

/// Webhook idempotency: the same event id delivered twice produces pushes
/// once, plus a single duplicate bookkeeping row on the replay.
#[tokio::test]
async fn webhook_replay_is_idempotent() {
    let h = Harness::new();
    let payload = json!({"EventId": "evt-8", "ProductId": "12345", "CurrentStockLevel": 85});

    let first = h
        .webhook(&h.pos, ChannelType::Pos, "stock.updated", payload.clone())
        .await;
    assert_eq!(first.len(), 1);

    let online = h.online.mock.clone();
    let delivery = h.delivery.mock.clone();
    assert!(
        h.wait_until(|| {
            let online = online.clone();
            let delivery = delivery.clone();
            async move {
                online.update_log().await.len() == 1 && delivery.update_log().await.len() == 1
            }
        })
        .await
    );

    let replay = h
        .webhook(&h.pos, ChannelType::Pos, "stock.updated", payload)
        .await;
    assert!(replay.is_empty());
    h.settle().await;

    // Still exactly one push per target.
    assert_eq!(h.online.mock.update_log().await.len(), 1);
    assert_eq!(h.delivery.mock.update_log().await.len(), 1);

    // Exactly one webhook_processed row, marked duplicate.
    let processed = h.repo.sync_events_of_type(SyncEventType::WebhookProcessed);
    assert_eq!(processed.len(), 1);
    assert_eq!(processed[0].new_value.as_ref().unwrap()["duplicate"], true);
}

/// Availability flips from the delivery platform collapse to 1/0 and
/// propagate outward from that channel.
#[tokio::test]
async fn delivery_availability_collapses_and_propagates() {
    let h = Harness::new();

    let changes = h
        .webhook(
            &h.delivery,
            ChannelType::DeliveryPlatform,
            "item.availability.updated",
            json!({"EventId": "evt-9", "itemId": "del-12345", "available": false}),
        )
        .await;
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].new_quantity, 0);

    // POS sees the full (zero) value, online store sees max(0, 0-10) = 0,
    // delivery itself is excluded.
    let pos = h.pos.mock.clone();
    let online = h.online.mock.clone();
    assert!(
        h.wait_until(|| {
            let pos = pos.clone();
            let online = online.clone();
            async move {
                pos.update_log().await == vec![("12345".to_string(), 0)]
                    && online.update_log().await == vec![("web-12345".to_string(), 0)]
            }
        })
        .await
    );
    assert!(h.delivery.mock.update_log().await.is_empty());
}

/// Running full_sync twice with no writes in between leaves identical
/// target states.
#[tokio::test]
async fn full_sync_twice_is_stable() {
    let h = Harness::new();

    let job = SyncJob {
        tenant_id: h.tenant_id,
        channel_id: None,
        channel_type: None,
        operation: SyncOperation::FullSync,
        product_ids: None,
    };

    h.engine.sync.handle_sync_job(&job).await.unwrap();
    let first = (
        h.pos.mock.stock_of("12345").await,
        h.online.mock.stock_of("web-12345").await,
        h.delivery.mock.stock_of("del-12345").await,
    );
    assert_eq!(first, (Some(100), Some(90), Some(90)));

    h.engine.sync.handle_sync_job(&job).await.unwrap();
    let second = (
        h.pos.mock.stock_of("12345").await,
        h.online.mock.stock_of("web-12345").await,
        h.delivery.mock.stock_of("del-12345").await,
    );
    assert_eq!(first, second);
}

/// Order webhooks from the online store deduct line quantities and exclude
/// their own channel from the fan-out.
#[tokio::test]
async fn online_order_deducts_and_skips_source() {
    let h = Harness::new();

    let changes = h
        .webhook(
            &h.online,
            ChannelType::OnlineStore,
            "order.created",
            json!({
                "EventId": "evt-10",
                "lineItems": [{"catalogItemId": "web-12345", "quantity": 4}]
            }),
        )
        .await;
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].new_quantity, 96);

    let pos = h.pos.mock.clone();
    let delivery = h.delivery.mock.clone();
    assert!(
        h.wait_until(|| {
            let pos = pos.clone();
            let delivery = delivery.clone();
            async move {
                pos.update_log().await == vec![("12345".to_string(), 96)]
                    && delivery.update_log().await == vec![("del-12345".to_string(), 86)]
            }
        })
        .await
    );
    assert!(h.online.mock.update_log().await.is_empty());
}
