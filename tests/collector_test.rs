//! Class scoring and the periodic collector wired together

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{ORIGIN, cylinder, fly, line, prepare};
use taskscore::class_scoring::{TrackUpdate, spawn_class};
use taskscore::collector::{ScoreBatch, ScoreCollector, run_collector};
use taskscore::config::ScoringConfig;
use taskscore::pilot_cache::{PilotCache, PilotRoster};
use taskscore::task::{Direction, Task, TaskRules};
use tokio_util::sync::CancellationToken;

const BASE: i64 = 1_600_000_000;

fn task() -> Task {
    let tp = ORIGIN.destination(0.0, 10.0);
    let task = prepare(
        TaskRules::default(),
        vec![
            line("Start", ORIGIN, 5.0, Direction::NextPoint),
            cylinder("TP", tp, 0.5),
            line("Finish", ORIGIN.destination(90.0, 5.0), 1.0, Direction::PreviousPoint),
        ],
    );
    Arc::unwrap_or_clone(task)
}

async fn batch_where(batches: &flume::Receiver<ScoreBatch>, accept: impl Fn(&ScoreBatch) -> bool) -> ScoreBatch {
    loop {
        let batch = batches.recv_async().await.expect("collector still running");
        if accept(&batch) {
            return batch;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_batches_follow_control_operations() {
    let config = ScoringConfig::default();
    let pilots = Arc::new(PilotCache::new(
        Box::new(PilotRoster::default()),
        config.pilot_cache_ttl(),
        config.pilot_cache_capacity,
    ));
    let (collector_tx, collector_rx) = flume::bounded(256);
    let (batch_tx, batch_rx) = flume::bounded(16);
    let collector = tokio::spawn(run_collector(
        ScoreCollector::new("club"),
        collector_rx,
        batch_tx,
        config.collector_interval(),
        CancellationToken::new(),
    ));
    let (handle, class_loop) = spawn_class("club", config, pilots, collector_tx, CancellationToken::new());
    handle.set_task(task()).await.unwrap();

    let start = ORIGIN.destination(180.0, 0.5);
    let over_line = ORIGIN.destination(0.0, 0.5);
    for compno in ["A1", "B2"] {
        for fix in fly(compno, &[(BASE, start), (BASE + 60, over_line)], 20) {
            handle.push_fix(fix).await.unwrap();
        }
    }

    let batch = batch_where(&batch_rx, |b| {
        b.scores.len() == 2 && b.scores.iter().all(|s| s.utc_start.is_some())
    })
    .await;
    assert_eq!(batch.class, "club");
    assert!(batch.scores.iter().all(|s| s.utc_start == Some(BASE + 40)));

    // a start override replaces B2's pipeline; the old one's scores are dropped
    handle
        .set_track(
            "B2",
            TrackUpdate {
                history: fly("B2", &[(BASE, start), (BASE + 60, over_line)], 20),
                handicap: Some(90.0),
                start_override: Some(BASE + 10),
            },
        )
        .await
        .unwrap();
    let batch = batch_where(&batch_rx, |b| {
        b.scores
            .iter()
            .any(|s| s.compno == "B2" && s.utc_start == Some(BASE + 10))
    })
    .await;
    let b2 = batch.scores.iter().find(|s| s.compno == "B2").unwrap();
    assert_eq!(b2.handicap, 90.0);
    assert!(b2.start_confirmed);

    handle.clear_competitor("A1").await.unwrap();
    let batch = batch_where(&batch_rx, |b| b.removed.contains(&"A1".to_string())).await;
    assert_eq!(batch.scores.len(), 1);

    // A1 comes back after being cleared and is scored again
    for fix in fly("A1", &[(BASE, start), (BASE + 60, over_line)], 20) {
        handle.push_fix(fix).await.unwrap();
    }
    let batch = batch_where(&batch_rx, |b| {
        b.scores
            .iter()
            .any(|s| s.compno == "A1" && s.utc_start == Some(BASE + 40))
    })
    .await;
    assert_eq!(batch.scores.len(), 2);
    handle.clear_competitor("A1").await.unwrap();
    batch_where(&batch_rx, |b| b.removed.contains(&"A1".to_string())).await;

    // the class stopping lets the collector flush and finish
    handle.shutdown().await.unwrap();
    class_loop.await.unwrap();
    collector.await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    while let Ok(batch) = batch_rx.try_recv() {
        assert!(batch.scores.iter().all(|s| s.compno != "A1"));
    }
}
