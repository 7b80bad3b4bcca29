mod common;

use std::sync::Arc;

use bigsync_model::{ConnectionInfo, DataGroup, DataGroupType, LocalFileStore, ModelType};
use bigsync_rest::testing::StaticProbe;
use bigsync_rest::{Method, RestError};
use bigsync_sync::{
    AppContext, ConnectionPhase, LoadState, OfflineOutcome, StatusLevel, SyncDecision, SyncError,
};

use common::*;

async fn online_fixture() -> Fixture {
    let f = fixture().await;
    serve_device(&f.transport, "13.1.0");
    f.ctx.go_online(CONNECTION).await.expect("online");
    f
}

fn requests_to(f: &Fixture, method: Method, fragment: &str) -> usize {
    f.transport
        .requests()
        .iter()
        .filter(|r| r.method == method && r.url.contains(fragment))
        .count()
}

#[tokio::test]
async fn test_go_online_populates_workspace_and_tree() {
    let f = online_fixture().await;

    let handle = f.ctx.connection(CONNECTION).await.unwrap();
    assert_eq!(handle.phase().await, ConnectionPhase::ResourcesLoaded);
    let info = handle.info().await;
    assert_eq!(info.version.as_deref(), Some("13.1.0"));
    assert!(info.is_provisioned("ltm"));
    assert!(!info.is_provisioned("gtm"));
    assert_eq!(requests_to(&f, Method::Get, "gtm/"), 0);

    assert_eq!(
        f.store.read_all(&path("/lab/Common/iRules/LTM/redirect.tcl")).unwrap(),
        b"when HTTP_REQUEST { HTTP::redirect / }"
    );
    let group = DataGroup::from_json(
        &f.store.read_all(&path("/lab/Common/DataGroups/LTM/hosts.dg")).unwrap(),
    )
    .unwrap();
    assert_eq!(group.group_type, DataGroupType::Ip);
    assert_eq!(group.get("10.0.0.1/32").unwrap().data.as_deref(), Some("web"));
    assert_eq!(
        f.store.read_all(&path("/lab/Common/iLX/ws/extensions/ext/index.js")).unwrap(),
        b"module.exports = {};"
    );

    assert!(f.ctx.edited_resources(CONNECTION).await.unwrap().is_empty());
    {
        let tree = f.ctx.tree().read().await;
        let conn = tree.find_connection(CONNECTION).unwrap();
        let rule = tree.get_model(conn, "redirect", None).unwrap();
        assert_eq!(tree.node(rule).unwrap().kind, ModelType::RuleLtm);
        let hosts = tree.get_model(conn, "hosts", None).unwrap();
        assert!(tree.node(hosts).unwrap().data_group().is_some());
        assert!(tree.node(conn).unwrap().connection_info().unwrap().online);
    }
    let persisted = ConnectionInfo::restore(f.store.as_ref(), CONNECTION).unwrap().unwrap();
    assert!(persisted.online);
}

#[tokio::test]
async fn test_unsupported_version_keeps_connection_offline() {
    let f = fixture().await;
    serve_device(&f.transport, "11.6.0");
    let mut events = f.ctx.subscribe();

    let err = f.ctx.go_online(CONNECTION).await.unwrap_err();
    assert!(matches!(
        err.rest_error(),
        Some(RestError::VersionUnsupported { version, .. }) if version == "11.6.0"
    ));
    let handle = f.ctx.connection(CONNECTION).await.unwrap();
    assert_eq!(handle.phase().await, ConnectionPhase::Offline);
    assert_eq!(handle.flow().load_state(), LoadState::Idle);
    assert_eq!(f.transport.request_count(), 1);

    let event = events.recv().await.unwrap();
    assert_eq!(event.level, StatusLevel::Error);
    assert!(event.message.contains("11.6.0"));
}

#[tokio::test]
async fn test_version_bounds_are_inclusive() {
    let cases = [
        ("12.1.0", true),
        ("14.9.9", true),
        ("14.99.99", true),
        ("12.0.9", false),
        ("15.0.0", false),
    ];
    for (version, accepted) in cases {
        let f = fixture().await;
        serve_device(&f.transport, version);
        assert_eq!(f.ctx.go_online(CONNECTION).await.is_ok(), accepted, "{}", version);
    }
}

#[tokio::test]
async fn test_unreachable_device_falls_back_to_disk() {
    let f = fixture_with_probe(Arc::new(StaticProbe(false))).await;
    let local = path("/lab/Common/iRules/LTM/local.tcl");
    f.store.write(&local, b"when HTTP_REQUEST {}", true).unwrap();

    let err = f.ctx.go_online(CONNECTION).await.unwrap_err();
    assert!(matches!(err.rest_error(), Some(RestError::Unreachable(_))));
    assert_eq!(f.transport.request_count(), 0);

    let handle = f.ctx.connection(CONNECTION).await.unwrap();
    assert!(!handle.is_online().await);
    let tree = f.ctx.tree().read().await;
    let conn = tree.find_connection(CONNECTION).unwrap();
    let node = tree.get_model(conn, "", Some(&local)).unwrap();
    assert!(tree.node(node).unwrap().flags.locally_added);
    drop(tree);
    assert!(!ConnectionInfo::restore(f.store.as_ref(), CONNECTION).unwrap().unwrap().online);
}

#[tokio::test]
async fn test_second_load_trigger_is_dropped() {
    let probe = GatedProbe::closed();
    let f = fixture_with_probe(probe.clone()).await;
    serve_device(&f.transport, "13.1.0");
    let handle = f.ctx.connection(CONNECTION).await.unwrap();

    let ctx = f.ctx.clone();
    let first = tokio::spawn(async move { ctx.go_online(CONNECTION).await });
    while handle.flow().load_state() != LoadState::Loading {
        tokio::task::yield_now().await;
    }

    assert!(matches!(
        f.ctx.go_online(CONNECTION).await,
        Err(SyncError::AlreadyLoading(_))
    ));
    probe.open();
    first.await.unwrap().unwrap();

    assert_eq!(handle.flow().load_state(), LoadState::Ready);
    assert_eq!(requests_to(&f, Method::Get, "sys/version"), 1);
}

#[tokio::test]
async fn test_offline_prompt_cancel_and_proceed() {
    let f = online_fixture().await;
    let handle = f.ctx.connection(CONNECTION).await.unwrap();
    let rule = path("/lab/Common/iRules/LTM/redirect.tcl");
    f.store.write(&rule, b"when HTTP_REQUEST { drop }", false).unwrap();
    let before = f.transport.request_count();

    f.prompt.answer(SyncDecision::Cancel);
    assert_eq!(f.ctx.go_offline(CONNECTION).await.unwrap(), OfflineOutcome::StayedOnline);
    assert_eq!(f.prompt.questions(), vec![vec![rule.clone()]]);
    assert!(handle.is_online().await);

    f.prompt.answer(SyncDecision::ProceedWithoutSync);
    assert_eq!(f.ctx.go_offline(CONNECTION).await.unwrap(), OfflineOutcome::Offline);
    assert!(!handle.is_online().await);
    assert_eq!(f.transport.request_count(), before);
    assert_eq!(f.store.read_all(&rule).unwrap(), b"when HTTP_REQUEST { drop }");
    assert_eq!(f.ctx.edited_resources(CONNECTION).await.unwrap(), vec![rule]);
}

#[tokio::test]
async fn test_offline_push_sends_selected_changes() {
    let f = online_fixture().await;
    let rule = path("/lab/Common/iRules/LTM/redirect.tcl");
    f.store.write(&rule, b"when HTTP_REQUEST { drop }", false).unwrap();
    f.prompt.answer(SyncDecision::Push(vec![rule.clone()]));

    assert_eq!(f.ctx.go_offline(CONNECTION).await.unwrap(), OfflineOutcome::Offline);

    let patches: Vec<_> = f
        .transport
        .requests()
        .into_iter()
        .filter(|r| r.method == Method::Patch)
        .collect();
    assert_eq!(patches.len(), 1);
    assert!(patches[0].url.ends_with("/mgmt/tm/ltm/rule/~Common~redirect/"));
    let body: serde_json::Value =
        serde_json::from_slice(patches[0].body.as_ref().unwrap()).unwrap();
    assert_eq!(body["apiAnonymous"], "when HTTP_REQUEST { drop }");
    assert!(!f.ctx.tracker().is_file_modified(CONNECTION, &rule).unwrap());
}

#[tokio::test]
async fn test_going_offline_without_edits_reloads_writable_files() {
    let f = online_fixture().await;
    f.store
        .write(&path("/lab/Common/iLX/ws/node_modules/lib/x.js"), b"", true)
        .unwrap();
    f.ctx.load_from_disk(CONNECTION).await.unwrap();
    let gets = f.transport.count(Method::Get);

    assert_eq!(f.ctx.go_offline(CONNECTION).await.unwrap(), OfflineOutcome::Offline);

    assert!(f.prompt.questions().is_empty());
    // redirect, block, hosts and index.js; nothing below node_modules
    assert_eq!(f.transport.count(Method::Get), gets + 4);
    assert_eq!(requests_to(&f, Method::Get, "node_modules"), 0);
    assert_eq!(
        f.store.read_all(&path("/lab/Common/iRules/LTM/block.tcl")).unwrap(),
        b"when CLIENT_ACCEPTED { reject }"
    );
}

#[tokio::test]
async fn test_reload_keeps_local_edits_and_prunes_removed_resources() {
    let f = online_fixture().await;
    let redirect = path("/lab/Common/iRules/LTM/redirect.tcl");
    let block = path("/lab/Common/iRules/LTM/block.tcl");
    f.store.write(&redirect, b"local edit", false).unwrap();
    f.ctx.go_offline(CONNECTION).await.unwrap();

    serve_rules(&f.transport, &[("redirect", "remote v2")]);
    f.ctx.go_online(CONNECTION).await.unwrap();

    assert_eq!(f.store.read_all(&redirect).unwrap(), b"local edit");
    assert!(!f.store.exists(&block));
    assert_eq!(f.ctx.tracker().response_stamp(CONNECTION, &block).unwrap(), None);
    assert_eq!(f.ctx.edited_resources(CONNECTION).await.unwrap(), vec![redirect]);

    let tree = f.ctx.tree().read().await;
    let conn = tree.find_connection(CONNECTION).unwrap();
    assert!(tree.get_model(conn, "block", None).is_none());
}

#[tokio::test]
async fn test_create_and_delete_resource_online() {
    let f = online_fixture().await;
    let rule = path("/lab/Common/iRules/LTM/fresh.tcl");

    let outcome = f
        .ctx
        .create_resource(CONNECTION, &rule, false, Some(b"when HTTP_REQUEST {}"))
        .await
        .unwrap();
    assert_eq!(outcome.map(|o| o.path().clone()), Some(rule.clone()));
    let post = f.transport.requests().pop().unwrap();
    assert_eq!(post.method, Method::Post);
    assert!(post.url.ends_with("/mgmt/tm/ltm/rule/"));
    assert!(f.ctx.edited_resources(CONNECTION).await.unwrap().is_empty());

    f.ctx.delete_resource(CONNECTION, &rule).await.unwrap();
    assert_eq!(requests_to(&f, Method::Delete, "~Common~fresh"), 1);
    assert!(!f.store.exists(&rule));
    let tree = f.ctx.tree().read().await;
    let conn = tree.find_connection(CONNECTION).unwrap();
    assert!(tree.get_model(conn, "", Some(&rule)).is_none());
}

#[tokio::test]
async fn test_offline_changes_stay_local() {
    let f = fixture().await;
    let group = path("/lab/Common/DataGroups/LTM/allow.dg");

    let outcome = f.ctx.create_resource(CONNECTION, &group, false, None).await.unwrap();
    assert_eq!(outcome, None);
    let created = DataGroup::from_json(&f.store.read_all(&group).unwrap()).unwrap();
    assert_eq!(created.name, "allow");
    assert_eq!(f.ctx.edited_resources(CONNECTION).await.unwrap(), vec![group.clone()]);
    assert!(matches!(
        f.ctx.push(CONNECTION, &group).await,
        Err(SyncError::Offline(_))
    ));

    f.ctx.delete_resource(CONNECTION, &group).await.unwrap();
    assert!(!f.store.exists(&group));
    assert_eq!(f.transport.request_count(), 0);
}

#[tokio::test]
async fn test_read_only_resources_are_refused() {
    let f = online_fixture().await;
    let module = path("/lab/Common/iLX/ws/node_modules/dep/index.js");
    assert!(matches!(
        f.ctx.create_resource(CONNECTION, &module, false, Some(b"")).await,
        Err(SyncError::ReadOnly(_))
    ));
    assert!(matches!(
        f.ctx.push(CONNECTION, &module).await,
        Err(SyncError::ReadOnly(_))
    ));
}

#[tokio::test]
async fn test_restore_brings_online_connections_back() {
    let f = online_fixture().await;

    let ctx = AppContext::new(
        config(),
        f.store.clone(),
        f.transport.clone(),
        Arc::new(StaticProbe(true)),
        f.prompt.clone(),
    )
    .unwrap();
    assert_eq!(ctx.restore_connections().await.unwrap(), vec![CONNECTION.to_string()]);
    let handle = ctx.connection(CONNECTION).await.unwrap();
    assert!(handle.is_online().await);
    assert_eq!(handle.info().await.credentials.user, "admin");
}

fn serve_package(f: &Fixture) {
    f.transport.route(
        Method::Get,
        "iapp/directory",
        200,
        serde_json::json!({"items": [{"name": "pkg", "isDirectory": true}]}),
    );
    f.transport
        .route(Method::Get, "iapp/directory/pkg", 200, serde_json::json!({"items": []}));
}

#[tokio::test]
async fn test_delete_connection_removes_remote_roots() {
    let f = fixture().await;
    serve_device(&f.transport, "13.1.0");
    serve_package(&f);
    f.ctx.go_online(CONNECTION).await.unwrap();
    let local_only = path("/lab/Common/iRules/LTM/draft.tcl");
    f.store.write(&local_only, b"when HTTP_REQUEST {}", true).unwrap();
    f.ctx.load_from_disk(CONNECTION).await.unwrap();

    f.ctx.delete_connection(CONNECTION, true).await.unwrap();

    let deletes: Vec<String> = f
        .transport
        .requests()
        .into_iter()
        .filter(|r| r.method == Method::Delete)
        .map(|r| r.url)
        .collect();
    assert_eq!(deletes.len(), 5, "{:?}", deletes);
    for fragment in [
        "/mgmt/tm/ltm/rule/~Common~redirect/",
        "/mgmt/tm/ltm/rule/~Common~block/",
        "/mgmt/tm/ltm/data-group/internal/~Common~hosts/",
        "/mgmt/tm/ilx/workspace/~Common~ws/",
        "/mgmt/shared/iapp/directory/pkg",
    ] {
        assert_eq!(
            deletes.iter().filter(|url| url.ends_with(fragment)).count(),
            1,
            "{}",
            fragment
        );
    }
    assert!(!f.store.exists(&path("/lab")));
    assert_eq!(ConnectionInfo::restore(f.store.as_ref(), CONNECTION).unwrap(), None);
    assert!(matches!(
        f.ctx.connection(CONNECTION).await,
        Err(SyncError::ConnectionNotFound(_))
    ));
}

#[tokio::test]
async fn test_failed_remote_delete_keeps_connection() {
    let f = online_fixture().await;
    f.transport.route(
        Method::Delete,
        "~Common~block",
        404,
        serde_json::json!({"code": 404, "message": "not found"}),
    );
    let mut events = f.ctx.subscribe();

    let err = f.ctx.delete_connection(CONNECTION, true).await.unwrap_err();
    assert!(matches!(
        err.rest_error(),
        Some(RestError::Protocol { status: 404, .. })
    ));
    // one attempt only: a missing resource is not a busy device
    assert_eq!(requests_to(&f, Method::Delete, "~Common~block"), 1);

    assert!(f.store.exists(&path("/lab")));
    assert!(f.store.exists(&path("/lab/Common/iRules/LTM/block.tcl")));
    let persisted = ConnectionInfo::restore(f.store.as_ref(), CONNECTION).unwrap().unwrap();
    assert_eq!(persisted.address, "bigip.lab");
    assert!(f.ctx.connection(CONNECTION).await.is_ok());
    assert!(f.ctx.tree().read().await.find_connection(CONNECTION).is_some());

    let event = events.recv().await.unwrap();
    assert_eq!(event.level, StatusLevel::Error);
}

#[tokio::test]
async fn test_failed_flag_write_still_falls_back_to_disk() {
    let store = Arc::new(LockableProperties::default());
    let prompt = ScriptedPrompt::new(SyncDecision::ProceedWithoutSync);
    let ctx = AppContext::new(
        config(),
        store.clone(),
        Arc::new(bigsync_rest::testing::RecordingTransport::new()),
        Arc::new(StaticProbe(false)),
        prompt,
    )
    .unwrap();
    ctx.add_connection(CONNECTION, ConnectionInfo::new("bigip.lab")).await.unwrap();
    let local = path("/lab/Common/iRules/LTM/local.tcl");
    store.write(&local, b"when HTTP_REQUEST {}", true).unwrap();
    store.lock();

    let err = ctx.go_online(CONNECTION).await.unwrap_err();
    assert!(matches!(err.rest_error(), Some(RestError::Unreachable(_))));

    let tree = ctx.tree().read().await;
    let conn = tree.find_connection(CONNECTION).unwrap();
    assert!(tree.get_model(conn, "", Some(&local)).is_some());
}
