//! Scheduler behavior under concurrent load.

use core_gateway::{Actor, RequestScheduler};
use futures::future::join_all;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[tokio::test]
async fn test_concurrency_per_actor_never_exceeds_limit() {
    let scheduler = RequestScheduler::with_limit(2);
    let actor = Actor::user("alice");
    let current = AtomicUsize::new(0);
    let peak = AtomicUsize::new(0);

    let tasks = (0..10).map(|_| {
        scheduler.enqueue(&actor, || async {
            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            current.fetch_sub(1, Ordering::SeqCst);
        })
    });
    join_all(tasks).await;

    assert_eq!(peak.load(Ordering::SeqCst), 2);
    assert_eq!(scheduler.stats(&actor).in_flight, 0);
}

#[tokio::test]
async fn test_limit_one_starts_in_submission_order() {
    let scheduler = RequestScheduler::with_limit(1);
    let actor = Actor::user("alice");
    let started = Mutex::new(Vec::new());

    let tasks = (0..6).map(|i| {
        let started = &started;
        scheduler.enqueue(&actor, move || async move {
            started.lock().unwrap().push(i);
            tokio::task::yield_now().await;
        })
    });
    join_all(tasks).await;

    assert_eq!(*started.lock().unwrap(), vec![0, 1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_actors_do_not_block_each_other() {
    let scheduler = Arc::new(RequestScheduler::with_limit(1));
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

    let busy = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move {
            scheduler
                .enqueue(&Actor::user("slow"), || async move {
                    let _ = release_rx.await;
                })
                .await
        })
    };

    while scheduler.stats(&Actor::user("slow")).in_flight == 0 {
        tokio::task::yield_now().await;
    }

    let other = tokio::time::timeout(
        Duration::from_secs(1),
        scheduler.enqueue(&Actor::user("fast"), || async { "done" }),
    )
    .await;
    assert_eq!(other.unwrap(), "done");

    release_tx.send(()).unwrap();
    busy.await.unwrap();
}

#[tokio::test]
async fn test_failing_task_does_not_affect_siblings() {
    let scheduler = RequestScheduler::with_limit(1);
    let actor = Actor::ip_username("10.0.0.7", "alice");

    let results: Vec<Result<usize, String>> = join_all((0..4).map(|i| {
        scheduler.enqueue(&actor, move || async move {
            if i == 1 {
                Err(format!("task {} failed", i))
            } else {
                Ok(i)
            }
        })
    }))
    .await;

    assert_eq!(
        results,
        vec![Ok(0), Err("task 1 failed".to_string()), Ok(2), Ok(3)]
    );
}

#[tokio::test]
async fn test_panicking_task_releases_its_slot() {
    let scheduler = Arc::new(RequestScheduler::with_limit(1));
    let actor = Actor::user("alice");

    let panicked = {
        let scheduler = Arc::clone(&scheduler);
        let actor = actor.clone();
        tokio::spawn(async move {
            scheduler
                .enqueue(&actor, || async {
                    panic!("handler bug");
                })
                .await
        })
        .await
    };
    assert!(panicked.is_err());

    assert_eq!(scheduler.stats(&actor).in_flight, 0);
    assert_eq!(scheduler.enqueue(&actor, || async { 1 }).await, 1);
}

#[tokio::test]
async fn test_cancelled_waiter_in_middle_of_queue_is_skipped() {
    let scheduler = Arc::new(RequestScheduler::with_limit(1));
    let actor = Actor::user("alice");
    let order = Arc::new(Mutex::new(Vec::new()));
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

    let spawn_task = |label: &'static str| {
        let scheduler = Arc::clone(&scheduler);
        let actor = actor.clone();
        let order = Arc::clone(&order);
        tokio::spawn(async move {
            scheduler
                .enqueue(&actor, || async move {
                    order.lock().unwrap().push(label);
                })
                .await
        })
    };

    let holder = {
        let scheduler = Arc::clone(&scheduler);
        let actor = actor.clone();
        tokio::spawn(async move {
            scheduler
                .enqueue(&actor, || async move {
                    let _ = release_rx.await;
                })
                .await
        })
    };
    while scheduler.stats(&actor).in_flight == 0 {
        tokio::task::yield_now().await;
    }

    let first = spawn_task("first");
    while scheduler.stats(&actor).pending < 1 {
        tokio::task::yield_now().await;
    }
    let doomed = spawn_task("doomed");
    while scheduler.stats(&actor).pending < 2 {
        tokio::task::yield_now().await;
    }
    let last = spawn_task("last");
    while scheduler.stats(&actor).pending < 3 {
        tokio::task::yield_now().await;
    }

    doomed.abort();
    let _ = doomed.await;
    assert_eq!(scheduler.stats(&actor).pending, 2);

    release_tx.send(()).unwrap();
    holder.await.unwrap();
    first.await.unwrap();
    last.await.unwrap();

    assert_eq!(*order.lock().unwrap(), vec!["first", "last"]);
    assert_eq!(scheduler.prune_idle(), 1);
}
