use std::time::{SystemTime, UNIX_EPOCH};

use magpie::partition::UnitSpec;
use magpie::queue::{self, QueueSettings};

// NOTE: `queue::spawn()` registers a named ractor actor within the process.
// Keep this test file to a single test.
#[tokio::test]
async fn queue_survives_restart_and_deduplicates_enqueue() {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before UNIX_EPOCH")
        .as_nanos();

    let mut temp_path = std::env::temp_dir();
    temp_path.push(format!(
        "magpie-queue-lifecycle-{}-{}.sqlite",
        std::process::id(),
        nanos
    ));
    let database_url = format!("sqlite:{}", temp_path.display());

    let specs = vec![
        UnitSpec::IdRange { lo: 1, hi: 100 },
        UnitSpec::IdRange { lo: 101, hi: 200 },
        UnitSpec::Query {
            predicate: "stars:1..1 language:rust".to_string(),
        },
    ];

    let queue = queue::spawn(&database_url, QueueSettings::default()).await;

    let registered = queue.enqueue(specs.clone()).await.expect("enqueue");
    assert_eq!(registered, 3);

    // Re-planning after a crash enqueues the same specs again; none of them
    // may register twice.
    let registered = queue.enqueue(specs.clone()).await.expect("re-enqueue");
    assert_eq!(registered, 0);

    // Complete one unit, dead-letter another.
    let first = queue.lease().await.expect("lease").expect("unit available");
    queue.ack(first.token).await.expect("ack");

    let second = queue.lease().await.expect("lease").expect("unit available");
    queue.fail(second.token, false).await.expect("fail");

    let depth = queue.depth().await.expect("depth");
    assert_eq!(depth.done, 1);
    assert_eq!(depth.dead_letter, 1);
    assert_eq!(depth.pending, 1);

    let dead = queue.dead_letters().await.expect("dead letters");
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].spec, second.spec);

    // Restart: the surviving pending unit must replay from the database,
    // and the finished/dead units must not come back.
    queue.stop();
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let queue = queue::spawn(&database_url, QueueSettings::default()).await;

    let depth = queue.depth().await.expect("depth after restart");
    assert_eq!(depth.outstanding(), 1);

    let survivor = queue
        .lease()
        .await
        .expect("lease after restart")
        .expect("replayed unit leasable");
    assert_ne!(survivor.spec, first.spec);
    assert_ne!(survivor.spec, second.spec);
    queue.ack(survivor.token).await.expect("ack after restart");

    assert!(
        queue.lease().await.expect("final lease").is_none(),
        "no units left after the survivor is acked"
    );

    queue.stop();
    let _ = tokio::fs::remove_file(&temp_path).await;
}
