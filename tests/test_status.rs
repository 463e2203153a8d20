//! Status store tests

use flotilla::status::models::{ActionKind, ReadyChecks, ServerState};
use flotilla::status::store::StatusStore;
use flotilla::storage::layout::StateLayout;
use tempfile::TempDir;

fn scratch_layout() -> (TempDir, StateLayout) {
    let dir = TempDir::new().unwrap();
    let layout = StateLayout::new(dir.path());
    (dir, layout)
}

fn all_ready() -> ReadyChecks {
    ReadyChecks {
        address_valid: true,
        key_file_present: true,
        port_valid: true,
        fields_complete: true,
    }
}

#[tokio::test]
async fn test_get_synthesises_unknown() {
    let (_dir, layout) = scratch_layout();
    let store = StatusStore::open(&layout, "test").await.unwrap();

    let record = store.get("ghost").await;
    assert_eq!(record.state, ServerState::Unknown);
    assert_eq!(record.name, "ghost");
    assert!(record.error_message.is_empty());
}

#[tokio::test]
async fn test_update_roundtrip() {
    let (_dir, layout) = scratch_layout();
    {
        let store = StatusStore::open(&layout, "test").await.unwrap();
        store
            .update("alpha", ServerState::Provisioned, ActionKind::Provision, "")
            .await
            .unwrap();
        store
            .update("beta", ServerState::Ready, ActionKind::Validate, "")
            .await
            .unwrap();
    }

    let store = StatusStore::open(&layout, "test").await.unwrap();
    assert_eq!(store.get("alpha").await.state, ServerState::Provisioned);
    assert_eq!(
        store.get("alpha").await.last_action,
        Some(ActionKind::Provision)
    );
    assert_eq!(store.get("beta").await.state, ServerState::Ready);
    assert_eq!(store.all().await.len(), 2);
}

#[tokio::test]
async fn test_transient_states_demote_on_load() {
    let (_dir, layout) = scratch_layout();
    {
        let store = StatusStore::open(&layout, "test").await.unwrap();
        store
            .update("a", ServerState::Provisioning, ActionKind::Provision, "in flight")
            .await
            .unwrap();
        store
            .update("b", ServerState::Deploying, ActionKind::Deploy, "in flight")
            .await
            .unwrap();
        store
            .update("c", ServerState::Verifying, ActionKind::Deploy, "in flight")
            .await
            .unwrap();
        store
            .update("d", ServerState::Failed, ActionKind::Deploy, "engine exited with 2")
            .await
            .unwrap();
        store
            .update("e", ServerState::Deployed, ActionKind::Deploy, "")
            .await
            .unwrap();
    }

    let store = StatusStore::open(&layout, "test").await.unwrap();
    for name in ["a", "b", "c", "d"] {
        let record = store.get(name).await;
        assert_eq!(record.state, ServerState::Unknown, "{name} should demote");
        assert!(record.error_message.is_empty(), "{name} message should clear");
    }
    assert_eq!(store.get("e").await.state, ServerState::Deployed);
}

#[tokio::test]
async fn test_demotion_is_persisted() {
    let (_dir, layout) = scratch_layout();
    {
        let store = StatusStore::open(&layout, "test").await.unwrap();
        store
            .update("a", ServerState::Failed, ActionKind::Deploy, "boom")
            .await
            .unwrap();
    }
    // First reopen demotes and writes; second reopen reads the demoted form.
    {
        let _ = StatusStore::open(&layout, "test").await.unwrap();
    }
    let contents = tokio::fs::read_to_string(layout.status_file("test").path())
        .await
        .unwrap();
    assert!(contents.contains("\"unknown\""));
    assert!(!contents.contains("boom"));
}

#[tokio::test]
async fn test_readiness_sets_ready_and_not_ready() {
    let (_dir, layout) = scratch_layout();
    let store = StatusStore::open(&layout, "test").await.unwrap();

    store.update_readiness("alpha", all_ready()).await.unwrap();
    assert_eq!(store.get("alpha").await.state, ServerState::Ready);

    let mut broken = all_ready();
    broken.key_file_present = false;
    store.update_readiness("alpha", broken).await.unwrap();
    assert_eq!(store.get("alpha").await.state, ServerState::NotReady);

    store.update_readiness("alpha", all_ready()).await.unwrap();
    assert_eq!(store.get("alpha").await.state, ServerState::Ready);
}

#[tokio::test]
async fn test_readiness_never_regresses_advanced_states() {
    let (_dir, layout) = scratch_layout();
    let store = StatusStore::open(&layout, "test").await.unwrap();

    store
        .update("alpha", ServerState::Provisioned, ActionKind::Provision, "")
        .await
        .unwrap();
    store.update_readiness("alpha", all_ready()).await.unwrap();
    assert_eq!(store.get("alpha").await.state, ServerState::Provisioned);

    store
        .update("alpha", ServerState::Deployed, ActionKind::Deploy, "")
        .await
        .unwrap();
    let mut broken = all_ready();
    broken.address_valid = false;
    store.update_readiness("alpha", broken).await.unwrap();

    let record = store.get("alpha").await;
    assert_eq!(record.state, ServerState::Deployed);
    assert!(!record.ready_checks.address_valid);
}
