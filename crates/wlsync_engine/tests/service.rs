//! Admin operations and scheduling through the service.

use std::collections::BTreeSet;
use std::time::Duration;
use wlsync_engine::{AdminError, Profile, RoleGrant, SchedulerState};
use wlsync_testkit::prelude::*;

const DEBOUNCE: Duration = Duration::from_secs(5);

fn scenario() -> Scenario {
    let scenario = Scenario::new(&["survival.smp", "creative"])
        .with_role("smp", RoleGrant::new(["*.smp"]).with_allowed_links(1))
        .with_role("builder", RoleGrant::new(["creative"]).with_allowed_links(2));
    scenario.member("42", &["smp"]);
    scenario.member("7", &["smp", "builder"]);
    scenario.member("99", &[]);
    scenario.player(uuid(1), "Steve");
    scenario.player(uuid(2), "Alex");
    scenario.player(uuid(3), "Sam");
    scenario
}

#[tokio::test(start_paused = true)]
async fn add_account_links_and_syncs() {
    let scenario = scenario();
    let service = scenario.service(DEBOUNCE);

    let profile = service.add_account("42", "steve").await.unwrap();
    assert_eq!(profile.uuid, uuid(1));
    assert_eq!(service.scheduler().state(), SchedulerState::Scheduled);

    service.scheduler().settle().await;
    assert_eq!(
        scenario.server("survival.smp").whitelisted(),
        vec![uuid(1).to_string()]
    );
    assert!(scenario.server("creative").whitelist().is_empty());
}

#[tokio::test(start_paused = true)]
async fn add_account_rejections() {
    let scenario = scenario();
    let service = scenario.service(DEBOUNCE);
    service.add_account("42", "Steve").await.unwrap();

    let err = service.add_account("42", "Nobody").await.unwrap_err();
    assert!(matches!(err, AdminError::UnknownPlayer(name) if name == "Nobody"));

    let err = service.add_account("42", "Steve").await.unwrap_err();
    assert!(matches!(err, AdminError::AlreadyOnUser { .. }));

    let err = service.add_account("7", "Steve").await.unwrap_err();
    assert!(matches!(err, AdminError::LinkedToOther { owner, .. } if owner == "42"));

    let err = service.add_account("42", "Alex").await.unwrap_err();
    assert!(matches!(err, AdminError::LinkLimit { allowed: 1 }));

    // No mapped role, no links
    let err = service.add_account("99", "Alex").await.unwrap_err();
    assert!(matches!(err, AdminError::LinkLimit { allowed: 0 }));

    // Not in the guild at all
    let err = service.add_account("1000", "Alex").await.unwrap_err();
    assert!(matches!(err, AdminError::LinkLimit { allowed: 0 }));
}

#[tokio::test(start_paused = true)]
async fn link_cap_is_highest_role() {
    let scenario = scenario();
    let service = scenario.service(DEBOUNCE);

    service.add_account("7", "Alex").await.unwrap();
    service.add_account("7", "Sam").await.unwrap();
    let err = service.add_account("7", "Steve").await.unwrap_err();
    assert!(matches!(err, AdminError::LinkLimit { allowed: 2 }));
}

#[tokio::test(start_paused = true)]
async fn remove_account_and_remove_all() {
    let scenario = scenario();
    let service = scenario.service(DEBOUNCE);
    service.add_account("7", "Alex").await.unwrap();
    service.add_account("7", "Sam").await.unwrap();

    let err = service.remove_account("42", &uuid(2).to_string()).await.unwrap_err();
    assert!(matches!(err, AdminError::UnknownUser(id) if id == "42"));

    let err = service.remove_account("7", &uuid(1).to_string()).await.unwrap_err();
    assert!(matches!(err, AdminError::NotLinked { .. }));

    let err = service.remove_account("7", "not-a-uuid").await.unwrap_err();
    assert!(matches!(err, AdminError::InvalidUuid(_)));

    // Undashed form is accepted
    let undashed = uuid(2).simple().to_string();
    let record = service.remove_account("7", &undashed).await.unwrap();
    assert_eq!(record.uuids, BTreeSet::from([uuid(3)]));

    let record = service.remove_all("7").await.unwrap();
    assert_eq!(record.uuids, BTreeSet::from([uuid(3)]));
    assert_eq!(
        scenario.store.removed(),
        BTreeSet::from([uuid(2), uuid(3)])
    );

    let err = service.remove_all("7").await.unwrap_err();
    assert!(matches!(err, AdminError::UnknownUser(_)));
}

#[tokio::test(start_paused = true)]
async fn info_lookups() {
    let scenario = scenario();
    let service = scenario.service(DEBOUNCE);
    service.add_account("7", "Alex").await.unwrap();

    let info = service.info_by_user("7").await.unwrap();
    assert_eq!(info.profiles, vec![Profile::new(uuid(2), "Alex")]);
    assert_eq!(
        info.servers,
        BTreeSet::from(["creative".to_string(), "survival.smp".to_string()])
    );
    assert_eq!(info.allowed_links, Some(2));
    assert!(info.member);
    assert!(!info.banned);

    assert_eq!(service.info_by_uuid(&uuid(2).to_string()).await.unwrap(), info);
    assert_eq!(service.info_by_name("ALEX").await.unwrap(), info);

    assert!(matches!(
        service.info_by_user("42").await.unwrap_err(),
        AdminError::UnknownUser(_)
    ));
    assert!(matches!(
        service.info_by_uuid(&uuid(1).to_string()).await.unwrap_err(),
        AdminError::UnknownUser(_)
    ));
}

#[tokio::test(start_paused = true)]
async fn ban_and_dump() {
    let scenario = scenario();
    let service = scenario.service(DEBOUNCE);
    service.add_account("42", "Steve").await.unwrap();
    service.add_account("7", "Alex").await.unwrap();
    service.add_account("7", "Sam").await.unwrap();
    service.remove_account("7", &uuid(3).to_string()).await.unwrap();

    let err = service.set_banned("1000", true).await.unwrap_err();
    assert!(matches!(err, AdminError::UnknownUser(_)));
    service.set_banned("42", true).await.unwrap();

    let dump = service.dump().await.unwrap();
    let json = serde_json::to_value(&dump).unwrap();

    let steve = &json["users"]["42"];
    assert_eq!(steve["banned"], true);
    assert_eq!(steve["uuids"][uuid(1).to_string()], "Steve");
    assert_eq!(steve["servers"], serde_json::json!(["survival.smp"]));

    let alex = &json["users"]["7"];
    assert!(alex.get("banned").is_none());
    assert_eq!(alex["uuids"][uuid(2).to_string()], "Alex");
    assert_eq!(json["removed"][uuid(3).to_string()], "Sam");

    service.scheduler().settle().await;
    assert_eq!(
        scenario.server("survival.smp").whitelisted(),
        vec![uuid(2).to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn reload_migrates_and_waits_for_pass() {
    let scenario = scenario();
    let service = scenario.service(DEBOUNCE);

    // Another tool rewrote the document with a legacy record
    let path = scenario.store.path().to_path_buf();
    std::fs::write(
        &path,
        r#"{ "users": { "42": { "uuids": [], "names": ["Steve", "Ghost"] } }, "removed": [] }"#,
    )
    .unwrap();

    let report = service.reload().await.unwrap();

    assert_eq!(
        scenario.store.get_user("42").uuids,
        BTreeSet::from([uuid(1)])
    );
    assert!(scenario.store.legacy_names().is_empty());
    assert_eq!(report.updated(), vec!["survival.smp"]);
    assert_eq!(
        scenario.server("survival.smp").whitelisted(),
        vec![uuid(1).to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn mutations_burst_into_one_pass() {
    let scenario = scenario();
    let service = scenario.service(DEBOUNCE);

    service.add_account("7", "Alex").await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    service.add_account("7", "Sam").await.unwrap();
    service.scheduler().settle().await;

    assert_eq!(service.scheduler().passes_completed(), 1);
    assert_eq!(scenario.server("creative").commands.batches().len(), 1);
    assert_eq!(scenario.server("creative").whitelist().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn role_changes_trigger_only_for_mapped_roles() {
    let scenario = scenario();
    let service = scenario.service(DEBOUNCE);

    let before = BTreeSet::from(["unrelated".to_string()]);
    let after = BTreeSet::from(["unrelated".to_string(), "other".to_string()]);
    assert!(!service.role_changed(&before, &after));
    assert_eq!(service.scheduler().state(), SchedulerState::Idle);

    let after = BTreeSet::from(["unrelated".to_string(), "builder".to_string()]);
    assert!(service.role_changed(&before, &after));
    assert_eq!(service.scheduler().state(), SchedulerState::Scheduled);
}
