//! Action queue tests

use flotilla::queue::ActionQueue;
use flotilla::status::models::ActionKind;
use flotilla::storage::layout::StateLayout;
use tempfile::TempDir;

fn scratch_layout() -> (TempDir, StateLayout) {
    let dir = TempDir::new().unwrap();
    let layout = StateLayout::new(dir.path());
    (dir, layout)
}

#[tokio::test]
async fn test_priority_order_with_fifo_ties() {
    let (_dir, layout) = scratch_layout();
    let queue = ActionQueue::open(&layout, "test").await.unwrap();

    queue.add("a", ActionKind::Provision, 0, "").await;
    queue.add("b", ActionKind::Provision, 5, "").await;
    queue.add("c", ActionKind::Provision, 0, "").await;
    queue.add("d", ActionKind::Provision, 5, "").await;

    let names: Vec<String> = queue
        .get_all()
        .await
        .into_iter()
        .map(|a| a.server_name)
        .collect();
    assert_eq!(names, ["b", "d", "a", "c"]);
}

#[tokio::test]
async fn test_next_is_non_destructive() {
    let (_dir, layout) = scratch_layout();
    let queue = ActionQueue::open(&layout, "test").await.unwrap();

    queue.add("a", ActionKind::Check, 0, "").await;
    let head = queue.next().await.unwrap();

    assert_eq!(head.server_name, "a");
    assert!(head.started_at.is_some());
    assert_eq!(queue.size().await, 1);
    assert_eq!(queue.get_current().await.unwrap().id, head.id);

    queue.complete().await;
    assert_eq!(queue.size().await, 0);
    assert!(queue.get_current().await.is_none());
}

#[tokio::test]
async fn test_complete_by_id_removes_for_good() {
    let (_dir, layout) = scratch_layout();
    let queue = ActionQueue::open(&layout, "test").await.unwrap();

    let first = queue.add("a", ActionKind::Provision, 0, "").await;
    let second = queue.add("b", ActionKind::Provision, 0, "").await;

    queue.complete_by_id(&second.id).await;

    let remaining = queue.get_all().await;
    assert_eq!(remaining.len(), 1);
    assert!(remaining.iter().all(|a| a.id != second.id));
    assert_eq!(remaining[0].id, first.id);

    // Completing a gone id is a no-op, not a panic.
    queue.complete_by_id(&second.id).await;
    assert_eq!(queue.size().await, 1);
}

#[tokio::test]
async fn test_persistence_across_restart() {
    let (_dir, layout) = scratch_layout();
    let ids: Vec<String> = {
        let queue = ActionQueue::open(&layout, "test").await.unwrap();
        queue.add("a", ActionKind::Provision, 1, "nginx").await;
        queue.add("b", ActionKind::Deploy, 3, "").await;
        queue.add("c", ActionKind::Check, 2, "").await;
        queue.get_all().await.into_iter().map(|a| a.id).collect()
    };

    let queue = ActionQueue::open(&layout, "test").await.unwrap();
    let reloaded = queue.get_all().await;
    assert_eq!(
        reloaded.iter().map(|a| a.id.clone()).collect::<Vec<_>>(),
        ids
    );
    assert_eq!(reloaded[0].server_name, "b");
    assert_eq!(reloaded[2].tags, "nginx");
}

#[tokio::test]
async fn test_clear_empties_and_persists() {
    let (_dir, layout) = scratch_layout();
    {
        let queue = ActionQueue::open(&layout, "test").await.unwrap();
        queue.add("a", ActionKind::Provision, 0, "").await;
        queue.clear().await;
        assert_eq!(queue.size().await, 0);
    }

    let queue = ActionQueue::open(&layout, "test").await.unwrap();
    assert_eq!(queue.size().await, 0);
}

#[tokio::test]
async fn test_stop_latch() {
    let (_dir, layout) = scratch_layout();
    let queue = ActionQueue::open(&layout, "test").await.unwrap();

    assert!(!queue.should_stop());
    queue.stop();
    assert!(queue.should_stop());
    queue.stop();
    assert!(queue.should_stop());
    queue.resume();
    assert!(!queue.should_stop());
}
