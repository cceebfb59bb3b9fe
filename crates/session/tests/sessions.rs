// Session lifecycle: sliding TTL expiry and the ledger round trip.

use presenti_core::{PresenceBuilder, PresenceLedger, Scope, StaticTokenValidator, Updates};
use presenti_session::{SessionError, SessionRegistry};
use std::sync::Arc;
use std::time::Duration;

const USER_TOKEN: &str = "user-token-0123456789-0123456789-0123456789";

async fn registry_with_ttl(ttl: Duration) -> (Arc<SessionRegistry>, Arc<PresenceLedger>) {
    let validator = StaticTokenValidator::new();
    validator
        .register(USER_TOKEN.to_string(), Scope::user("venus"))
        .await
        .unwrap();
    let ledger = Arc::new(PresenceLedger::new(Updates::new()));
    let registry = SessionRegistry::new(Arc::new(validator), ledger.clone(), ttl);
    (registry, ledger)
}

#[tokio::test(start_paused = true)]
async fn session_expires_without_refresh() {
    let (registry, ledger) = registry_with_ttl(Duration::from_millis(100)).await;
    let session = registry.create_session(USER_TOKEN).await.unwrap();
    registry
        .set_presences(&session.id, vec![PresenceBuilder::new().title("Reading").build()])
        .unwrap();

    tokio::time::advance(Duration::from_millis(150)).await;
    tokio::task::yield_now().await;

    assert!(ledger.scoped(&Scope::user("venus")).is_empty());
    assert!(matches!(
        registry.refresh(&session.id),
        Err(SessionError::UnknownSession)
    ));
}

#[tokio::test(start_paused = true)]
async fn refresh_slides_the_ttl() {
    let (registry, ledger) = registry_with_ttl(Duration::from_millis(100)).await;
    let session = registry.create_session(USER_TOKEN).await.unwrap();
    registry
        .set_presences(&session.id, vec![PresenceBuilder::new().title("Reading").build()])
        .unwrap();

    tokio::time::advance(Duration::from_millis(80)).await;
    tokio::task::yield_now().await;
    registry.refresh(&session.id).unwrap();

    // Past the original deadline but within the refreshed one.
    tokio::time::advance(Duration::from_millis(80)).await;
    tokio::task::yield_now().await;
    assert_eq!(ledger.scoped(&Scope::user("venus")).len(), 1);

    tokio::time::advance(Duration::from_millis(50)).await;
    tokio::task::yield_now().await;
    assert!(ledger.scoped(&Scope::user("venus")).is_empty());
}

#[tokio::test(start_paused = true)]
async fn expiry_notifies_the_update_bus() {
    let validator = StaticTokenValidator::new();
    validator
        .register(USER_TOKEN.to_string(), Scope::user("venus"))
        .await
        .unwrap();
    let updates = Updates::new();
    let notified = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = notified.clone();
    updates.subscribe(move |scope: &Scope| {
        sink.lock().unwrap().push(scope.clone());
    });

    let ledger = Arc::new(PresenceLedger::new(updates));
    let registry = SessionRegistry::new(
        Arc::new(validator),
        ledger,
        Duration::from_millis(100),
    );
    let session = registry.create_session(USER_TOKEN).await.unwrap();
    registry
        .set_presences(&session.id, vec![PresenceBuilder::new().title("Reading").build()])
        .unwrap();
    notified.lock().unwrap().clear();

    tokio::time::advance(Duration::from_millis(150)).await;
    tokio::task::yield_now().await;
    assert_eq!(notified.lock().unwrap().as_slice(), &[Scope::user("venus")]);
}

#[tokio::test]
async fn round_trip_create_put_read() {
    let (registry, ledger) = registry_with_ttl(Duration::from_secs(300)).await;
    let session = registry.create_session(USER_TOKEN).await.unwrap();
    assert_eq!(session.scope, Scope::user("venus"));

    let record = PresenceBuilder::new().id("np").title("Reading").build();
    registry
        .set_presences(&session.id, vec![record.clone()])
        .unwrap();
    assert_eq!(ledger.scoped(&Scope::user("venus")), vec![record]);

    registry.destroy(&session.id).unwrap();
    assert!(ledger.scoped(&Scope::user("venus")).is_empty());
    assert!(registry.session_scope(&session.id).is_none());
}
