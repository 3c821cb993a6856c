use std::sync::Arc;

use filmlist_api::{Coordinator, CoordinatorConfig};
use filmlist_core::{QueryOutcome, QueryParams, RunOutcome, ShowRow};
use filmlist_persist::SqliteShowStore;

fn temp_db() -> String {
    let nanos = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos();
    std::env::temp_dir().join(format!("filmlist-api-{nanos}.db")).to_string_lossy().to_string()
}

fn show(id: i64, channel: &str, title: &str, minutes: i64) -> ShowRow {
    ShowRow { id, channel: channel.into(), title: title.into(), duration: minutes * 60, ..Default::default() }
}

fn titles(outcome: &QueryOutcome) -> Vec<String> {
    outcome.page().expect("page").items.iter().map(|r| r.title.clone()).collect()
}

#[tokio::test]
async fn reimport_is_picked_up_by_refresh() {
    let path = temp_db();
    let store = Arc::new(SqliteShowStore::open(&path).unwrap());
    store
        .import(&[show(1, "ARD", "Tatort: Wut", 90), show(2, "ZDF", "heute", 15), show(3, "ARD", "Tatort: Angst", 88)])
        .unwrap();
    let coord = Arc::new(Coordinator::new(Arc::clone(&store), CoordinatorConfig::default()).unwrap());
    assert_eq!(coord.ensure_loaded().await.unwrap(), RunOutcome::Completed);

    let params = QueryParams {
        rules: vec!["title=tatort".parse().unwrap(), "duration+60".parse().unwrap()],
        sort_field: Some("title".into()),
        sort_direction: Some("v".into()),
        ..Default::default()
    };
    let first = coord.query(params.clone()).await.unwrap();
    assert_eq!(titles(&first), ["Tatort: Wut", "Tatort: Angst"]);

    // Nothing changed on disk: cached answer stays.
    coord.request_refresh().await.unwrap();
    assert_eq!(coord.stats().await.invalidations, 1);

    store.import(&[show(4, "ARD", "Tatort: Zorn", 89)]).unwrap();
    coord.request_refresh().await.unwrap();
    let second = coord.query(params).await.unwrap();
    assert_eq!(titles(&second), ["Tatort: Zorn"]);
    assert_eq!(coord.stats().await.invalidations, 2);

    coord.shutdown().await;
    let _ = std::fs::remove_file(&path);
}
