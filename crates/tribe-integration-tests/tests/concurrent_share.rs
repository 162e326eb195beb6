//! Integration test: concurrent share, unshare and listing on one pair.
//!
//! Every caller gets its own clone of the service over the same pooled
//! database, so conflicts are resolved only by transaction isolation:
//! 1. Two first shares race: one inserts, the other updates
//! 2. Many shares race: versions count every call, one row survives
//! 3. Share and unshare race: owners and visibility follow the share row
//! 4. Listings are not blocked by a writer holding the write lock

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tribe_db::TxOptions;
use tribe_sharing::test_utils::TestEnv;
use tribe_sharing::Context;
use tribe_types::{Principal, Visibility};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_concurrent_first_shares_leave_one_row_at_version_two() {
    let env = TestEnv::new().await;
    let ctx = Context::background();

    let (a, b) = tokio::join!(
        env.service.share(&ctx, env.list, env.tribe, env.user, None),
        env.service.share(&ctx, env.list, env.tribe, env.user, None),
    );
    let mut versions = vec![a.expect("share a").version, b.expect("share b").version];
    versions.sort_unstable();
    assert_eq!(versions, vec![1, 2]);

    let active = env.active_share(env.list, env.tribe).await.expect("active share");
    assert_eq!(active.version, 2);
    assert_eq!(env.share_rows(env.list, env.tribe).await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_concurrent_shares_lose_no_update() {
    const CALLERS: u64 = 12;

    let env = TestEnv::new().await;
    let mut tasks = Vec::new();
    for _ in 0..CALLERS {
        let service = env.service.clone();
        let (list, tribe, user) = (env.list, env.tribe, env.user);
        tasks.push(tokio::spawn(async move {
            service
                .share(&Context::background(), list, tribe, user, None)
                .await
        }));
    }

    let mut versions = Vec::new();
    for task in tasks {
        versions.push(task.await.expect("join").expect("share").version);
    }
    versions.sort_unstable();
    assert_eq!(versions, (1..=CALLERS).collect::<Vec<_>>());

    let active = env.active_share(env.list, env.tribe).await.expect("active share");
    assert_eq!(active.version, CALLERS);
    assert_eq!(env.share_rows(env.list, env.tribe).await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_share_and_unshare_stay_consistent() {
    let env = TestEnv::new().await;
    let ctx = Context::background();
    env.service
        .share(&ctx, env.list, env.tribe, env.user, None)
        .await
        .expect("share");

    let mut tasks = Vec::new();
    for i in 0..10 {
        let service = env.service.clone();
        let (list, tribe, user) = (env.list, env.tribe, env.user);
        tasks.push(tokio::spawn(async move {
            let ctx = Context::background();
            if i % 2 == 0 {
                service.unshare(&ctx, list, tribe).await
            } else {
                service.share(&ctx, list, tribe, user, None).await.map(drop)
            }
        }));
    }
    for task in tasks {
        task.await.expect("join").expect("operation");
    }

    let active = env.active_share(env.list, env.tribe).await;
    let owners = env.service.list_owners(&ctx, env.list).await.expect("owners");
    let group_owner = owners.iter().any(|o| o.principal == Principal::Group(env.tribe));
    assert_eq!(group_owner, active.is_some());

    let expected = if active.is_some() {
        Visibility::Shared
    } else {
        Visibility::Private
    };
    assert_eq!(env.visibility(env.list).await, expected);

    let listed = env.service.list_shares(&ctx, env.list).await.expect("list");
    assert_eq!(listed.len(), usize::from(active.is_some()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn listings_do_not_wait_for_writers() {
    let env = TestEnv::new().await;
    let ctx = Context::background();
    env.service
        .share(&ctx, env.list, env.tribe, env.user, None)
        .await
        .expect("share");

    // Hold the write lock for a while.
    let locked = Arc::new(AtomicBool::new(false));
    let writer = {
        let db = env.db.clone();
        let locked = Arc::clone(&locked);
        tokio::spawn(async move {
            db.run_in_transaction(
                &Context::background(),
                &TxOptions::serializable(),
                move |tx| -> tribe_db::Result<()> {
                    tx.execute("UPDATE users SET display_name = display_name", [])?;
                    locked.store(true, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(1500));
                    Ok(())
                },
            )
            .await
        })
    };
    while !locked.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let started = Instant::now();
    let listed = env.service.list_shares(&ctx, env.list).await.expect("list");
    assert_eq!(listed.len(), 1);
    assert!(started.elapsed() < Duration::from_millis(1000));

    writer.await.expect("join").expect("writer");
}
