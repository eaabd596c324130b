use std::time::{SystemTime, UNIX_EPOCH};

use magpie::domain::{CiCheck, Comment, Issue, ParentRef, PullRequest, Repository, Review};
use magpie::store::{CounterField, ShardStore};
use magpie_schema::CheckPayload;
use serde_json::json;

fn unique_sqlite_path(prefix: &str) -> std::path::PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before UNIX_EPOCH")
        .as_nanos();

    let mut temp_path = std::env::temp_dir();
    temp_path.push(format!(
        "magpie-{prefix}-{}-{}.sqlite",
        std::process::id(),
        nanos
    ));
    temp_path
}

async fn open_store(prefix: &str) -> (ShardStore, std::path::PathBuf) {
    let path = unique_sqlite_path(prefix);
    let url = format!("sqlite:{}", path.display());
    let store = ShardStore::open(0, &url).await.expect("open shard store");
    (store, path)
}

#[tokio::test]
async fn redelivered_repository_converges_on_latest_values() {
    let (store, path) = open_store("shard-upsert").await;

    let mut repo = Repository {
        external_id: "R_1".to_string(),
        name_with_owner: "acme/widget".to_string(),
        star_count: 10,
        updated_at: None,
    };
    store.upsert_repository(&repo).await.expect("first upsert");

    repo.star_count = 12;
    store.upsert_repository(&repo).await.expect("second upsert");
    store.upsert_repository(&repo).await.expect("redelivery");

    let row = store
        .get_repository("R_1")
        .await
        .expect("lookup")
        .expect("row exists");
    assert_eq!(row.star_count, 12);
    assert_eq!(row.name_with_owner, "acme/widget");

    let _ = tokio::fs::remove_file(&path).await;
}

#[tokio::test]
async fn redelivered_comments_contribute_zero_delta() {
    let (store, path) = open_store("shard-comments").await;

    let parent = ParentRef::Issue("I_7".to_string());
    store
        .upsert_issue(&Issue {
            external_id: "I_7".to_string(),
            repository_id: "R_1".to_string(),
            title: "flaky test".to_string(),
            state: "OPEN".to_string(),
        })
        .await
        .expect("upsert issue");

    let comments: Vec<Comment> = (1..=3)
        .map(|i| Comment {
            external_id: format!("C_{i}"),
            parent: parent.clone(),
            author: None,
        })
        .collect();

    let deltas = store.insert_comments(&comments).await.expect("insert");
    assert_eq!(deltas.get(&parent), Some(&3));
    store
        .increment_counter(&parent, CounterField::CommentCount, 3)
        .await
        .expect("increment");

    // Second delivery of the identical batch inserts nothing.
    let deltas = store.insert_comments(&comments).await.expect("redeliver");
    assert!(deltas.is_empty());

    let row = store
        .get_issue("I_7")
        .await
        .expect("lookup")
        .expect("row exists");
    assert_eq!(row.comment_count, 3);

    // Redelivering the parent must not reset the counter.
    store
        .upsert_issue(&Issue {
            external_id: "I_7".to_string(),
            repository_id: "R_1".to_string(),
            title: "flaky test (renamed)".to_string(),
            state: "CLOSED".to_string(),
        })
        .await
        .expect("re-upsert issue");
    let row = store.get_issue("I_7").await.expect("lookup").unwrap();
    assert_eq!(row.comment_count, 3);
    assert_eq!(row.state, "CLOSED");

    let _ = tokio::fs::remove_file(&path).await;
}

#[tokio::test]
async fn comments_before_their_parent_keep_the_counter_delta() {
    let (store, path) = open_store("shard-orphan-comments").await;

    // The issue's own unit has not been crawled yet.
    let parent = ParentRef::Issue("I_42".to_string());
    let comments: Vec<Comment> = (1..=3)
        .map(|i| Comment {
            external_id: format!("C_42{i}"),
            parent: parent.clone(),
            author: None,
        })
        .collect();

    let deltas = store.insert_comments(&comments).await.expect("insert");
    assert_eq!(deltas.get(&parent), Some(&3));
    store
        .increment_counter(&parent, CounterField::CommentCount, 3)
        .await
        .expect("increment against absent parent");

    store
        .upsert_issue(&Issue {
            external_id: "I_42".to_string(),
            repository_id: "R_9".to_string(),
            title: "late parent".to_string(),
            state: "OPEN".to_string(),
        })
        .await
        .expect("upsert issue");

    // Redelivery after the parent arrived inserts nothing.
    let deltas = store.insert_comments(&comments).await.expect("redeliver");
    assert!(deltas.is_empty());

    let row = store
        .get_issue("I_42")
        .await
        .expect("lookup")
        .expect("row exists");
    assert_eq!(row.comment_count, 3, "counter equals live child count");
    assert_eq!(row.title, "late parent");
    assert_eq!(store.recount_comments(&parent).await.expect("recount"), 3);

    let _ = tokio::fs::remove_file(&path).await;
}

#[tokio::test]
async fn reviews_and_checks_before_their_pull_request_keep_the_deltas() {
    let (store, path) = open_store("shard-orphan-pr-children").await;

    let review = Review {
        external_id: "REV_55".to_string(),
        pull_request_id: "PR_55".to_string(),
        author: Some("bob".to_string()),
        state: Some("APPROVED".to_string()),
    };
    let check = CiCheck {
        external_id: "CHK_55".to_string(),
        pull_request_id: "PR_55".to_string(),
        payload: CheckPayload {
            version: 1,
            origin: "actions".to_string(),
            data: json!({ "conclusion": "success" }),
        },
    };
    let parent = ParentRef::PullRequest("PR_55".to_string());

    assert!(store.insert_review(&review).await.expect("insert review"));
    store
        .increment_counter(&parent, CounterField::ReviewCount, 1)
        .await
        .expect("review increment");
    assert!(store.insert_check(&check).await.expect("insert check"));
    store
        .increment_counter(&parent, CounterField::CheckCount, 1)
        .await
        .expect("check increment");

    store
        .upsert_pull_request(&PullRequest {
            external_id: "PR_55".to_string(),
            repository_id: "R_9".to_string(),
            title: "late pull request".to_string(),
            state: "MERGED".to_string(),
        })
        .await
        .expect("upsert pull request");

    let row = store
        .get_pull_request("PR_55")
        .await
        .expect("lookup")
        .expect("row exists");
    assert_eq!(row.review_count, 1);
    assert_eq!(row.check_count, 1);
    assert_eq!(row.state, "MERGED");

    let _ = tokio::fs::remove_file(&path).await;
}

#[tokio::test]
async fn recount_overwrites_a_drifted_counter() {
    let (store, path) = open_store("shard-recount").await;

    let parent = ParentRef::Issue("I_9".to_string());
    store
        .upsert_issue(&Issue {
            external_id: "I_9".to_string(),
            repository_id: "R_1".to_string(),
            title: String::new(),
            state: "OPEN".to_string(),
        })
        .await
        .expect("upsert issue");

    store
        .insert_comments(&[Comment {
            external_id: "C_91".to_string(),
            parent: parent.clone(),
            author: Some("alice".to_string()),
        }])
        .await
        .expect("insert");

    // Simulate drift: the cached counter disagrees with the child rows.
    store
        .increment_counter(&parent, CounterField::CommentCount, 5)
        .await
        .expect("drift");

    let recounted = store.recount_comments(&parent).await.expect("recount");
    assert_eq!(recounted, 1);
    let row = store.get_issue("I_9").await.expect("lookup").unwrap();
    assert_eq!(row.comment_count, 1);

    let _ = tokio::fs::remove_file(&path).await;
}

#[tokio::test]
async fn check_payload_round_trips_unmodified() {
    let (store, path) = open_store("shard-checks").await;

    let payload = CheckPayload {
        version: 3,
        origin: "jenkins".to_string(),
        data: json!({ "stages": ["build", "test"], "durations": [12.5, 90.0] }),
    };
    let check = CiCheck {
        external_id: "CHK_1".to_string(),
        pull_request_id: "PR_4".to_string(),
        payload: payload.clone(),
    };

    assert!(store.insert_check(&check).await.expect("insert"));
    assert!(
        !store.insert_check(&check).await.expect("redeliver"),
        "redelivered check must not insert again"
    );

    let row = store
        .get_check("CHK_1")
        .await
        .expect("lookup")
        .expect("row exists");
    assert_eq!(row.payload_version, 3);
    assert_eq!(row.origin, "jenkins");

    let stored: CheckPayload = serde_json::from_str(&row.payload).expect("payload is json");
    assert_eq!(stored.data, payload.data);

    let _ = tokio::fs::remove_file(&path).await;
}

#[tokio::test]
async fn issue_counters_reject_review_fields() {
    let (store, path) = open_store("shard-counter-guard").await;

    let parent = ParentRef::Issue("I_1".to_string());
    let err = store
        .increment_counter(&parent, CounterField::ReviewCount, 1)
        .await
        .expect_err("issues do not track reviews");
    assert!(err.to_string().contains("review_count"));

    let _ = tokio::fs::remove_file(&path).await;
}
