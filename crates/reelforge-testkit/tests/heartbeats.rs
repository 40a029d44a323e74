//! Background loops driving the real pipeline on the test bed.

use chrono::{Duration, Local, Utc};
use reelforge_core::traits::{Candidate, Ledger};
use reelforge_core::types::{Channel, ScheduleEntry, ScheduleStatus, TaskOrigin, TaskStatus, VariantKind};
use reelforge_pipeline::Lane;
use reelforge_scheduler::{Radar, RecoverySweep, SchedulePromoter, VariantSwapMonitor};
use reelforge_testkit::{FakeMetrics, FakeSignals, TestBed};
use serde_json::json;
use std::sync::Arc;

/// Poll `check` until it holds or two seconds pass.
async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    check()
}

#[tokio::test]
async fn test_due_schedule_is_published_through_the_pipeline() {
    let bed = TestBed::new();
    bed.channel("C1");
    let now = Local::now().naive_local();
    let entry = bed
        .control
        .upsert_schedule(ScheduleEntry {
            id: "morning".into(),
            title: "Morning short".into(),
            platform: "youtube".into(),
            payload: json!({"source_url": "https://www.youtube.com/watch?v=sched1", "title": "Sched"}),
            publish_time_local: now - Duration::minutes(1),
            status: ScheduleStatus::Scheduled,
            target_channel_id: Some("C1".into()),
            error: None,
        })
        .unwrap();

    let promoter = SchedulePromoter::new(bed.control.clone());
    assert_eq!(promoter.tick(now).unwrap(), 1);
    assert_eq!(promoter.tick(now).unwrap(), 0);

    let outcome = bed
        .control
        .dispatcher()
        .dispatch(&entry.task_id(), Lane::Scheduled)
        .unwrap()
        .outcome()
        .await
        .unwrap();
    assert_eq!(outcome.status, TaskStatus::Completed, "{:?}", outcome.error);
    let task = bed.ledger.get_task(&entry.task_id()).unwrap().unwrap();
    assert_eq!(task.origin, TaskOrigin::Schedule);

    let ledger = bed.ledger.clone();
    assert!(
        eventually(|| {
            ledger.list_schedules().unwrap()[0].status == ScheduleStatus::Published
        })
        .await
    );
}

#[tokio::test]
async fn test_recovery_resumes_stale_task_to_completion() {
    let bed = TestBed::new();
    bed.channel("C1");
    let mut task = bed.put_task("T5", "C1");
    task.status = TaskStatus::Muxing;
    task.attempt = 1;
    let now = Utc::now();
    bed.ledger.upsert_task_at(&task, now - Duration::hours(2)).unwrap();

    let sweep = RecoverySweep::new(bed.control.clone(), 30, 0);
    assert_eq!(sweep.sweep(now).unwrap(), 1);
    // Still in flight, so a second sweep leaves it alone.
    assert_eq!(sweep.sweep(now).unwrap(), 0);

    let outcome = bed
        .control
        .dispatcher()
        .dispatch("T5", Lane::Recovery)
        .unwrap()
        .outcome()
        .await
        .unwrap();
    assert_eq!(outcome.status, TaskStatus::Completed, "{:?}", outcome.error);
    assert_eq!(bed.ledger.get_task("T5").unwrap().unwrap().attempt, 2);
    assert!(bed.scratch_files().is_empty());
    assert_eq!(sweep.sweep(Utc::now() + Duration::hours(2)).unwrap(), 0);
}

#[tokio::test]
async fn test_radar_routes_by_niche_and_dispatches_once() {
    let bed = TestBed::new();
    bed.channel("C1");
    bed.ledger
        .upsert_channel(&Channel::new("C2", "Gadgets", "tech"))
        .unwrap();

    let signals = Arc::new(FakeSignals::default());
    *signals.candidates.lock().unwrap() = vec![
        Candidate {
            source_id: "slow".into(),
            title: "Slow burner".into(),
            url: "https://www.youtube.com/watch?v=slow".into(),
            velocity: 100.0,
            niche: Some("tech".into()),
        },
        Candidate {
            source_id: "abc/1".into(),
            title: "Phone teardown".into(),
            url: "https://www.youtube.com/watch?v=abc1".into(),
            velocity: 90_000.0,
            niche: Some("tech".into()),
        },
    ];
    let radar = Radar::new(bed.control.clone(), signals.clone(), 10_000.0);
    assert_eq!(radar.tick().await.unwrap(), 1);
    assert_eq!(radar.tick().await.unwrap(), 0);

    let task = bed.ledger.get_task("radar_abc_1").unwrap().unwrap();
    assert_eq!(task.origin, TaskOrigin::Radar);
    assert_eq!(task.target_channel_id.as_deref(), Some("C2"));
    assert!(bed.ledger.get_task("radar_slow").unwrap().is_none());

    let outcome = bed
        .control
        .dispatcher()
        .dispatch("radar_abc_1", Lane::Radar)
        .unwrap()
        .outcome()
        .await
        .unwrap();
    assert!(outcome.is_success(), "{:?}", outcome.error);
}

#[tokio::test]
async fn test_underperforming_title_is_swapped_until_exhausted() {
    let bed = TestBed::new();
    bed.channel("C1");
    let outcome = bed.run_to_end("C1").await;
    assert!(outcome.is_success());
    let task_id = outcome.task_id.clone();

    let metrics = Arc::new(FakeMetrics::default());
    metrics.ctr.lock().unwrap().insert(task_id.clone(), 0.02);
    let monitor = VariantSwapMonitor::new(bed.ledger.clone(), bed.driver.clone(), metrics, 0.05, 48);

    assert_eq!(monitor.tick(Utc::now()).await.unwrap(), 1);
    let content = bed.ledger.get_content(&task_id).unwrap().unwrap();
    assert_eq!(content.title, "Why your iced coffee tastes flat");
    assert!(
        bed.browser
            .calls()
            .iter()
            .any(|c| c.starts_with("type") && c.ends_with("= Why your iced coffee tastes flat"))
    );

    let titles: Vec<_> = bed
        .ledger
        .list_variants(&task_id)
        .unwrap()
        .into_iter()
        .filter(|v| v.kind == VariantKind::Title)
        .collect();
    let active: Vec<_> = titles.iter().filter(|v| v.is_active).collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].content, "Why your iced coffee tastes flat");
    assert!(titles[0].observed_performance > 0.0);

    assert_eq!(monitor.tick(Utc::now()).await.unwrap(), 1);
    assert_eq!(monitor.tick(Utc::now()).await.unwrap(), 0);
    let content = bed.ledger.get_content(&task_id).unwrap().unwrap();
    assert_eq!(content.title, "18 hours to better coffee");
}

#[tokio::test]
async fn test_healthy_title_is_left_alone() {
    let bed = TestBed::new();
    bed.channel("C1");
    let outcome = bed.run_to_end("C1").await;
    let launches = bed.browser.launches();

    let monitor = VariantSwapMonitor::new(
        bed.ledger.clone(),
        bed.driver.clone(),
        Arc::new(FakeMetrics::default()),
        0.05,
        48,
    );
    assert_eq!(monitor.tick(Utc::now()).await.unwrap(), 0);
    assert_eq!(bed.browser.launches(), launches);
    let content = bed.ledger.get_content(&outcome.task_id).unwrap().unwrap();
    assert_eq!(content.title, "The cold brew trick baristas hide");
}
