//! Integration test: expiry and the sweeper under concurrent writers.
//!
//! 1. Expired shares disappear from listings before any sweep
//! 2. The sweep tombstones them once and demotes their owners
//! 3. A sweep racing a renewal never resurrects or loses the renewal
//! 4. A sweep racing an unshare leaves no owner behind

use tribe_sharing::test_utils::{TestEnv, NOW};
use tribe_sharing::Context;
use tribe_types::{Principal, Visibility};

const HOUR: u64 = 3600;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn expired_shares_vanish_then_get_swept_once() {
    let env = TestEnv::new().await;
    let ctx = Context::background();
    let mut lists = Vec::new();
    for name in ["Groceries 2", "Gear", "Routes"] {
        let list = env.add_list(env.user, name).await.expect("list");
        env.service
            .share(&ctx, list, env.tribe, env.user, Some(NOW + HOUR))
            .await
            .expect("share");
        lists.push(list);
    }
    env.service
        .share(&ctx, env.list, env.tribe, env.user, None)
        .await
        .expect("share");
    assert_eq!(
        env.service.list_shared_with(&ctx, env.tribe).await.expect("list").len(),
        4
    );

    env.clock.advance(HOUR);
    let visible = env.service.list_shared_with(&ctx, env.tribe).await.expect("list");
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].resource.id, env.list);

    assert_eq!(env.service.sweep_expired(&ctx).await.expect("sweep"), 3);
    assert_eq!(env.service.sweep_expired(&ctx).await.expect("sweep"), 0);

    for list in lists {
        assert!(env.active_share(list, env.tribe).await.is_none());
        let owners = env.service.list_owners(&ctx, list).await.expect("owners");
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].principal, Principal::User(env.user));
        assert_eq!(env.visibility(list).await, Visibility::Private);
    }
    let after = env.service.list_shared_with(&ctx, env.tribe).await.expect("list");
    assert_eq!(after, visible);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sweep_racing_renewal_keeps_the_renewal() {
    for _ in 0..5 {
        let env = TestEnv::new().await;
        let ctx = Context::background();
        env.service
            .share(&ctx, env.list, env.tribe, env.user, Some(NOW + HOUR))
            .await
            .expect("share");
        env.clock.advance(HOUR);

        let (swept, renewed) = tokio::join!(
            env.service.sweep_expired(&ctx),
            env.service
                .share(&ctx, env.list, env.tribe, env.user, Some(NOW + 5 * HOUR)),
        );
        let swept = swept.expect("sweep");
        let renewed = renewed.expect("renew");

        // Sweep first: the renewal starts a new row. Renewal first: the
        // sweep finds nothing expired.
        if swept == 1 {
            assert_eq!(renewed.version, 1);
        } else {
            assert_eq!(swept, 0);
            assert_eq!(renewed.version, 2);
        }
        let active = env.active_share(env.list, env.tribe).await.expect("active share");
        assert_eq!(active, renewed);
        assert!(env
            .service
            .is_shared_with(&ctx, env.list, env.tribe)
            .await
            .expect("check"));
        let owners = env.service.list_owners(&ctx, env.list).await.expect("owners");
        assert!(owners.iter().any(|o| o.principal == Principal::Group(env.tribe)));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sweep_racing_unshare_leaves_nothing_behind() {
    let env = TestEnv::new().await;
    let ctx = Context::background();
    env.service
        .share(&ctx, env.list, env.tribe, env.user, Some(NOW + HOUR))
        .await
        .expect("share");
    env.clock.advance(2 * HOUR);

    let (swept, unshared) = tokio::join!(
        env.service.sweep_expired(&ctx),
        env.service.unshare(&ctx, env.list, env.tribe),
    );
    assert!(swept.expect("sweep") <= 1);
    unshared.expect("unshare");

    assert!(env.active_share(env.list, env.tribe).await.is_none());
    assert!(env.has_share_version(env.list, env.tribe, 2).await);
    let owners = env.service.list_owners(&ctx, env.list).await.expect("owners");
    assert!(owners.iter().all(|o| o.principal != Principal::Group(env.tribe)));
    assert_eq!(env.visibility(env.list).await, Visibility::Private);
}
