/*!
 * Tenant isolation properties
 *
 * Two tenants' engines over one shared repository: nothing tenant A does may
 * mutate tenant B's entities, and B keeps working while A misbehaves.
 * (Crash containment between worker *processes* is the orchestrator's
 * supervision contract; what is tested here is the data boundary every
 * engine call must respect.)
 */

mod harness;

use std::sync::Arc;

use harness::Harness;
use serde_json::json;
use stocksync_domain::{AlertType, ChannelType};
use stocksync_engine::Repository;
use stocksync_engine::repository::MemoryRepository;
use stocksync_provider::mock::MockFailure;

#[tokio::test]
async fn tenant_a_activity_never_touches_tenant_b() {
    let repo = Arc::new(MemoryRepository::new());
    let a = Harness::with_repo_and_product(repo.clone(), 100, 10);
    let b = Harness::with_repo_and_product(repo.clone(), 40, 5);

    // A processes a sale.
    a.webhook(
        &a.pos,
        ChannelType::Pos,
        "stock.updated",
        json!({"EventId": "evt-a1", "ProductId": "12345", "CurrentStockLevel": 70}),
    )
    .await;

    let a_repo = a.repo.clone();
    let a_tenant = a.tenant_id;
    let a_product = a.product_id;
    assert!(
        a.wait_until(|| {
            let repo = a_repo.clone();
            async move {
                repo.get_product(a_tenant, a_product)
                    .await
                    .unwrap()
                    .map(|p| p.current_stock)
                    == Some(70)
            }
        })
        .await
    );

    // B's product, channels, and providers are untouched.
    let b_product = repo.get_product(b.tenant_id, b.product_id).await.unwrap().unwrap();
    assert_eq!(b_product.current_stock, 40);
    assert!(b.online.mock.update_log().await.is_empty());
    assert!(b.delivery.mock.update_log().await.is_empty());

    // Every sync event written belongs to tenant A.
    a.settle().await;
    assert!(repo.sync_events().iter().all(|e| e.tenant_id == a.tenant_id));
}

#[tokio::test]
async fn tenant_b_works_while_tenant_a_fails() {
    let repo = Arc::new(MemoryRepository::new());
    let a = Harness::with_repo_and_product(repo.clone(), 100, 10);
    let b = Harness::with_repo_and_product(repo.clone(), 100, 10);

    // Everything tenant A pushes fails hard.
    a.online.mock.fail_updates_with(Some(MockFailure::Server)).await;
    a.delivery.mock.fail_updates_with(Some(MockFailure::Server)).await;

    a.webhook(
        &a.pos,
        ChannelType::Pos,
        "stock.updated",
        json!({"EventId": "evt-a2", "ProductId": "12345", "CurrentStockLevel": 60}),
    )
    .await;
    b.webhook(
        &b.pos,
        ChannelType::Pos,
        "stock.updated",
        json!({"EventId": "evt-b1", "ProductId": "12345", "CurrentStockLevel": 85}),
    )
    .await;

    // B's propagation completes normally despite A's failures.
    let b_online = b.online.mock.clone();
    let b_delivery = b.delivery.mock.clone();
    assert!(
        b.wait_until(|| {
            let online = b_online.clone();
            let delivery = b_delivery.clone();
            async move {
                online.update_log().await == vec![("web-12345".to_string(), 75)]
                    && delivery.update_log().await == vec![("del-12345".to_string(), 75)]
            }
        })
        .await
    );

    // A's canonical write survived its push failures.
    let a_product = repo.get_product(a.tenant_id, a.product_id).await.unwrap().unwrap();
    assert_eq!(a_product.current_stock, 60);

    // Cross-tenant reads come back empty both ways.
    assert!(repo.get_product(a.tenant_id, b.product_id).await.unwrap().is_none());
    assert!(repo.get_product(b.tenant_id, a.product_id).await.unwrap().is_none());
}

#[tokio::test]
async fn alert_dedup_keys_are_tenant_scoped() {
    let repo = Arc::new(MemoryRepository::new());
    let a = Harness::with_repo_and_product(repo.clone(), 100, 20);
    let b = Harness::with_repo_and_product(repo.clone(), 100, 20);

    for h in [&a, &b] {
        h.webhook(
            &h.pos,
            ChannelType::Pos,
            "stock.updated",
            json!({"EventId": "evt-low", "ProductId": "12345", "CurrentStockLevel": 2}),
        )
        .await;
    }

    let shared = repo.clone();
    assert!(
        a.wait_until(|| {
            let repo = shared.clone();
            async move { repo.unread_alerts(AlertType::LowStock).len() == 2 }
        })
        .await,
        "each tenant gets its own low-stock alert"
    );

    let alerts = repo.unread_alerts(AlertType::LowStock);
    let tenants: Vec<_> = alerts.iter().map(|al| al.tenant_id).collect();
    assert!(tenants.contains(&a.tenant_id));
    assert!(tenants.contains(&b.tenant_id));
}
