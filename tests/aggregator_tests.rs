use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use magpie::domain::{Comment, ParentRef, PullRequest};
use magpie::store::{CounterAggregator, CounterField, ShardRouter};

fn unique_data_dir(prefix: &str) -> std::path::PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before UNIX_EPOCH")
        .as_nanos();

    let mut dir = std::env::temp_dir();
    dir.push(format!("magpie-{prefix}-{}-{}", std::process::id(), nanos));
    std::fs::create_dir_all(&dir).expect("create data dir");
    dir
}

#[tokio::test]
async fn concurrent_deltas_commute_to_the_same_total() {
    let dir = unique_data_dir("aggr-commute");
    let router = Arc::new(ShardRouter::open(&dir, 4).await.expect("open router"));
    let aggregator = CounterAggregator::new(router.clone());

    let parent = ParentRef::PullRequest("PR_1".to_string());
    router
        .shard_for_parent(&parent)
        .upsert_pull_request(&PullRequest {
            external_id: "PR_1".to_string(),
            repository_id: "R_1".to_string(),
            title: String::new(),
            state: "OPEN".to_string(),
        })
        .await
        .expect("upsert pull request");

    // Ten workers each reporting one new comment, plus one reporting nine.
    let mut tasks = Vec::new();
    for _ in 0..10 {
        let aggregator = aggregator.clone();
        let parent = parent.clone();
        tasks.push(tokio::spawn(async move {
            aggregator
                .increment(&parent, CounterField::CommentCount, 1)
                .await
        }));
    }
    {
        let aggregator = aggregator.clone();
        let parent = parent.clone();
        tasks.push(tokio::spawn(async move {
            aggregator
                .increment(&parent, CounterField::CommentCount, 9)
                .await
        }));
    }
    for task in tasks {
        task.await.expect("task join").expect("increment");
    }

    let row = router
        .shard_for_parent(&parent)
        .get_pull_request("PR_1")
        .await
        .expect("lookup")
        .expect("row exists");
    assert_eq!(row.comment_count, 19);

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn reconcile_restores_the_counter_from_child_rows() {
    let dir = unique_data_dir("aggr-reconcile");
    let router = Arc::new(ShardRouter::open(&dir, 2).await.expect("open router"));
    let aggregator = CounterAggregator::new(router.clone());

    let parent = ParentRef::PullRequest("PR_2".to_string());
    let shard = router.shard_for_parent(&parent);
    shard
        .upsert_pull_request(&PullRequest {
            external_id: "PR_2".to_string(),
            repository_id: "R_1".to_string(),
            title: String::new(),
            state: "OPEN".to_string(),
        })
        .await
        .expect("upsert pull request");

    let comments: Vec<Comment> = (1..=4)
        .map(|i| Comment {
            external_id: format!("C_{i}"),
            parent: parent.clone(),
            author: None,
        })
        .collect();
    let deltas = shard.insert_comments(&comments).await.expect("insert");
    aggregator
        .increment(&parent, CounterField::CommentCount, deltas[&parent])
        .await
        .expect("apply delta");

    // Corrupt the cache, then recover it from the child rows.
    aggregator
        .increment(&parent, CounterField::CommentCount, 100)
        .await
        .expect("drift");
    let recounted = aggregator
        .reconcile_comments(&parent)
        .await
        .expect("reconcile");
    assert_eq!(recounted, 4);

    let row = shard
        .get_pull_request("PR_2")
        .await
        .expect("lookup")
        .expect("row exists");
    assert_eq!(row.comment_count, 4);

    let _ = std::fs::remove_dir_all(&dir);
}
