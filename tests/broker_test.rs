//! Connection broker against a live server (`TEST_DATABASE_URL`).

mod common;

use common::{harness, unique_slug};
use hms_tenancy::broker::TenantContext;
use hms_tenancy::error::ConnectionError;
use tokio_postgres::error::SqlState;

#[tokio::test]
async fn disconnect_clears_context_and_registry() {
    let Some(h) = harness().await else { return };
    let tenant = h.register_tenant(&unique_slug("oak")).await;
    h.create_empty_database(&tenant).await;

    let mut ctx = TenantContext::new();
    h.broker.connect(&mut ctx, &tenant).await.unwrap();
    assert_eq!(ctx.tenant_id(), Some(tenant.id));
    assert!(h.broker.is_registered(tenant.id));

    h.broker.disconnect(&mut ctx);
    assert!(ctx.tenant().is_none());
    assert!(!h.broker.is_registered(tenant.id));

    h.cleanup(&[&tenant]).await;
}

#[tokio::test]
async fn context_refuses_second_tenant() {
    let Some(h) = harness().await else { return };
    let a = h.register_tenant(&unique_slug("elm")).await;
    let b = h.register_tenant(&unique_slug("fir")).await;
    h.create_empty_database(&a).await;
    h.create_empty_database(&b).await;

    let mut ctx = TenantContext::new();
    h.broker.connect(&mut ctx, &a).await.unwrap();
    let err = h.broker.connect(&mut ctx, &b).await.unwrap_err();
    assert!(matches!(err, ConnectionError::ContextBusy { current, requested } if current == a.id && requested == b.id));
    assert_eq!(ctx.tenant_id(), Some(a.id));

    h.broker.disconnect(&mut ctx);
    h.cleanup(&[&a, &b]).await;
}

#[tokio::test]
async fn sessions_share_one_pool_per_tenant() {
    let Some(h) = harness().await else { return };
    let tenant = h.register_tenant(&unique_slug("pine")).await;
    h.create_empty_database(&tenant).await;

    let first = h.broker.session(&tenant).await.unwrap();
    let second = h.broker.session(&tenant).await.unwrap();
    assert!(h.broker.is_registered(tenant.id));
    drop(first);
    assert!(h.broker.is_registered(tenant.id));
    drop(second);
    assert!(!h.broker.is_registered(tenant.id));

    h.cleanup(&[&tenant]).await;
}

#[tokio::test]
async fn missing_database_reports_invalid_catalog_name() {
    let Some(h) = harness().await else { return };
    let tenant = h.register_tenant(&unique_slug("ghost")).await;

    let mut ctx = TenantContext::new();
    let err = h.broker.connect(&mut ctx, &tenant).await.unwrap_err();
    assert_eq!(err.sql_state(), Some(&SqlState::INVALID_CATALOG_NAME));
    assert!(!ctx.is_connected());
    assert!(!h.broker.is_registered(tenant.id));

    let outcome = h.broker.test_connection(&tenant).await;
    assert!(outcome.is_err());

    h.cleanup(&[&tenant]).await;
}
