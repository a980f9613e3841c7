//! Single sync passes against the in-memory runtime.

mod common;

use common::{set, FakeRuntime, PROXY_ID, PROXY_NAME};
use falcon::MembershipReconciler;

#[tokio::test]
async fn joins_eligible_networks_and_skips_other_drivers() {
    let runtime = FakeRuntime::new();
    runtime.add_network("A", "bridge", &["web", "db"]);
    runtime.add_network("B", "bridge", &["cache"]);
    runtime.add_network("C", "overlay", &["s1", "s2", "s3", "s4", "s5"]);
    let reconciler = MembershipReconciler::new(runtime.clone(), PROXY_NAME);

    let diff = reconciler.reconcile().await.unwrap();

    assert_eq!(diff.to_join, set(&["A", "B"]));
    assert!(diff.to_leave.is_empty());
    assert_eq!(runtime.proxy_networks(), set(&["A", "B"]));
}

#[tokio::test]
async fn second_pass_changes_nothing() {
    let runtime = FakeRuntime::new();
    runtime.add_network("A", "bridge", &["web"]);
    runtime.add_default_bridge("bridge0");
    let reconciler = MembershipReconciler::new(runtime.clone(), PROXY_NAME);

    reconciler.reconcile().await.unwrap();
    runtime.clear_calls();

    let diff = reconciler.reconcile().await.unwrap();
    assert!(diff.is_empty());
    assert!(runtime.changes().is_empty());
    assert_eq!(runtime.proxy_networks(), set(&["A", "bridge0"]));
}

#[tokio::test]
async fn leaves_networks_only_the_proxy_is_on() {
    let runtime = FakeRuntime::new();
    runtime.add_network("A", "bridge", &["web", PROXY_ID]);
    let reconciler = MembershipReconciler::new(runtime.clone(), PROXY_NAME);

    assert!(reconciler.reconcile().await.unwrap().is_empty());

    // The last real container goes away.
    runtime.detach("A", "web");
    let diff = reconciler.reconcile().await.unwrap();

    assert_eq!(diff.to_leave, set(&["A"]));
    assert!(runtime.proxy_networks().is_empty());
}

#[tokio::test]
async fn joins_run_before_leaves() {
    let runtime = FakeRuntime::new();
    runtime.add_network("old", "bridge", &[PROXY_ID]);
    runtime.add_network("new", "bridge", &["web"]);
    let reconciler = MembershipReconciler::new(runtime.clone(), PROXY_NAME);

    reconciler.reconcile().await.unwrap();

    assert_eq!(runtime.changes(), vec!["connect new", "disconnect old"]);
}

#[tokio::test]
async fn failed_inspect_applies_nothing() {
    let runtime = FakeRuntime::new();
    runtime.add_network("A", "bridge", &["web"]);
    runtime.set_fail_inspect(true);
    let reconciler = MembershipReconciler::new(runtime.clone(), PROXY_NAME);

    assert!(reconciler.reconcile().await.is_err());
    assert!(runtime.changes().is_empty());
    assert!(runtime.proxy_networks().is_empty());
}

#[tokio::test]
async fn failed_listing_applies_nothing() {
    let runtime = FakeRuntime::new();
    runtime.add_network("A", "bridge", &["web"]);
    runtime.add_network("B", "bridge", &[PROXY_ID]);
    runtime.set_fail_list(true);
    let reconciler = MembershipReconciler::new(runtime.clone(), PROXY_NAME);

    let err = reconciler.reconcile().await.unwrap_err();
    assert!(!err.is_not_found());
    assert!(runtime.changes().is_empty());
    assert_eq!(runtime.proxy_networks(), set(&["B"]));
}

#[tokio::test]
async fn unknown_proxy_is_not_found() {
    let runtime = FakeRuntime::new();
    let reconciler = MembershipReconciler::new(runtime.clone(), "no-such-proxy");

    assert!(reconciler.reconcile().await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn network_removed_mid_pass_is_skipped() {
    let runtime = FakeRuntime::new();
    runtime.add_network("A", "bridge", &["web"]);
    runtime.add_network("B", "bridge", &["db"]);
    runtime.remove_after_next_list("A");
    let reconciler = MembershipReconciler::new(runtime.clone(), PROXY_NAME);

    let diff = reconciler.reconcile().await.unwrap();

    assert_eq!(diff.to_join, set(&["A", "B"]));
    assert_eq!(runtime.proxy_networks(), set(&["B"]));
    assert!(reconciler.reconcile().await.unwrap().is_empty());
}

#[tokio::test]
async fn proxy_removed_mid_pass_is_an_error() {
    let runtime = FakeRuntime::new();
    runtime.add_network("A", "bridge", &["web"]);
    runtime.remove_proxy_after_next_list();
    let reconciler = MembershipReconciler::new(runtime.clone(), PROXY_NAME);

    let err = reconciler.reconcile().await.unwrap_err();

    assert!(err.is_not_found());
    assert!(!err.is_network_not_found());
    assert_eq!(runtime.changes(), vec!["connect A"]);
}
