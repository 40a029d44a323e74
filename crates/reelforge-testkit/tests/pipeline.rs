//! End-to-end pipeline properties against the wired test bed.

use chrono::{Duration, Utc};
use reelforge_core::traits::Ledger;
use reelforge_core::types::{TaskStatus, VariantKind};
use reelforge_driver::LocatorTable;
use reelforge_driver::locator::{NEXT_BUTTON, PUBLISH_BUTTON, VIDEO_LINK};
use reelforge_pipeline::Lane;
use reelforge_testkit::{EXPORTED_COOKIES, PUBLISHED_URL, STUDIO_PAGE_URL, TestBed, valid_plan};

#[tokio::test]
async fn test_scenario_a_happy_path() {
    let bed = TestBed::new();
    bed.channel("C1");

    let outcome = bed.run_to_end("C1").await;
    assert_eq!(outcome.status, TaskStatus::Completed, "{:?}", outcome.error);
    assert_eq!(outcome.published_url.as_deref(), Some(PUBLISHED_URL));

    assert!(bed.scratch_files().is_empty());
    let channel = bed.ledger.get_channel("C1").unwrap().unwrap();
    assert!(channel.last_refreshed_at.is_some());
    assert_eq!(channel.credential_blob.as_deref(), Some(EXPORTED_COOKIES));

    let content = bed.ledger.get_content(&outcome.task_id).unwrap().unwrap();
    assert_eq!(content.title, "The cold brew trick baristas hide");
    assert_eq!(content.channel_id.as_deref(), Some("C1"));

    let titles: Vec<_> = bed
        .ledger
        .list_variants(&outcome.task_id)
        .unwrap()
        .into_iter()
        .filter(|v| v.kind == VariantKind::Title)
        .collect();
    assert_eq!(titles.len(), 3);
    assert_eq!(titles.iter().filter(|v| v.is_active).count(), 1);
    assert!(titles[0].is_active);

    let calls = bed.browser.calls();
    assert!(calls.iter().any(|c| c.starts_with("type") && c.contains(&format!("[rf:{}]", outcome.task_id))));
}

#[tokio::test]
async fn test_status_progression_is_monotonic() {
    let bed = TestBed::new();
    bed.channel("C1");
    let outcome = bed.run_to_end("C1").await;

    let statuses = bed.statuses(&outcome.task_id);
    assert_eq!(
        statuses,
        vec![
            TaskStatus::Scraping,
            TaskStatus::Mutating,
            TaskStatus::Muxing,
            TaskStatus::Uploading,
            TaskStatus::Completed
        ]
    );
    for pair in statuses.windows(2) {
        assert!(pair[0].can_transition_to(pair[1]), "{:?} → {:?}", pair[0], pair[1]);
    }
}

#[tokio::test]
async fn test_synthesis_failure_leaves_scratch_empty() {
    let bed = TestBed::new();
    bed.channel("C1");
    bed.transcoder.fail_next(true);

    let outcome = bed.run_to_end("C1").await;
    assert_eq!(outcome.status, TaskStatus::Failed);
    assert!(outcome.error.unwrap().starts_with("synthesis error"));
    assert!(bed.scratch_files().is_empty());
    assert_eq!(bed.transcoder.calls(), 1);
    // Scrape happened; upload never did.
    assert_eq!(bed.browser.launches(), 1);
}

#[tokio::test]
async fn test_redispatch_after_crash_yields_one_terminal_row() {
    let bed = TestBed::new();
    bed.channel("C1");
    let mut task = bed.put_task("T9", "C1");
    task.status = TaskStatus::Uploading;
    task.attempt = 1;
    bed.ledger.upsert_task(&task).unwrap();

    let dispatcher = bed.control.dispatcher();
    let first = dispatcher.dispatch("T9", Lane::Recovery).unwrap();
    let second = dispatcher.dispatch("T9", Lane::Recovery).unwrap();
    let a = first.outcome().await.unwrap();
    let b = second.outcome().await.unwrap();
    assert_eq!(a, b);
    assert_eq!(a.status, TaskStatus::Completed);

    let launches = bed.browser.launches();
    let again = dispatcher.dispatch("T9", Lane::Recovery).unwrap().outcome().await.unwrap();
    assert_eq!(again.status, TaskStatus::Completed);
    assert_eq!(again.published_url.as_deref(), Some(PUBLISHED_URL));
    assert_eq!(bed.browser.launches(), launches);

    let history = bed.ledger.task_history("T9").unwrap();
    assert_eq!(history.iter().filter(|e| e.status.is_terminal()).count(), 1);
    let stored = bed.ledger.get_task("T9").unwrap().unwrap();
    assert_eq!(stored.attempt, 2);
    assert_eq!(bed.model.calls(), 1);
}

#[tokio::test]
async fn test_scenario_b_sixth_dispatch_in_hour_is_rejected() {
    let bed = TestBed::new();
    bed.channel("C1");
    for _ in 0..5 {
        assert!(bed.run_to_end("C1").await.is_success());
    }
    let launches = bed.browser.launches();
    let model_calls = bed.model.calls();

    let outcome = bed.run_to_end("C1").await;
    assert_eq!(outcome.status, TaskStatus::Failed);
    assert_eq!(outcome.error.as_deref(), Some("RateLimitExceeded"));
    let stored = bed.ledger.get_task(&outcome.task_id).unwrap().unwrap();
    assert_eq!(stored.error.as_deref(), Some("RateLimitExceeded"));

    assert_eq!(bed.browser.launches(), launches);
    assert_eq!(bed.model.calls(), model_calls);
    assert!(bed.scratch_files().is_empty());
}

#[tokio::test]
async fn test_twenty_first_dispatch_in_day_is_rejected() {
    let bed = TestBed::new();
    bed.channel("C1");
    let now = Utc::now();
    for i in 0..20 {
        bed.ledger
            .record_dispatch("C1", &format!("earlier{i}"), now - Duration::hours(2 + i))
            .unwrap();
    }
    let outcome = bed.run_to_end("C1").await;
    assert_eq!(outcome.error.as_deref(), Some("RateLimitExceeded"));
    assert_eq!(bed.browser.launches(), 0);

    // Another channel is unaffected.
    bed.channel("C2");
    assert!(bed.run_to_end("C2").await.is_success());
}

#[tokio::test]
async fn test_quality_gate_rejection_skips_synthesis() {
    let bed = TestBed::new();
    bed.channel("C1");
    let mut plan = valid_plan();
    plan.as_object_mut().unwrap().remove("full_script");
    bed.model.set_plan(plan);

    let outcome = bed.run_to_end("C1").await;
    assert_eq!(outcome.status, TaskStatus::Failed);
    assert!(outcome.error.unwrap().contains("full_script"));
    assert_eq!(bed.speech.calls(), 0);
    assert_eq!(bed.transcoder.calls(), 0);
    assert_eq!(bed.model.calls(), 1);
    assert_eq!(
        bed.statuses(&outcome.task_id),
        vec![TaskStatus::Scraping, TaskStatus::Mutating, TaskStatus::Failed]
    );
}

#[tokio::test]
async fn test_malformed_patch_leaves_table_unchanged() {
    let bed = TestBed::new();
    bed.channel("C1");
    bed.browser.break_role(NEXT_BUTTON);
    bed.registry.answer_with("cap_bad", "this is not a locator table {");

    let outcome = bed.run_to_end("C1").await;
    assert_eq!(outcome.status, TaskStatus::Failed);
    assert!(outcome.error.unwrap().starts_with("automation error"));
    assert_eq!(*bed.driver.locators(), LocatorTable::builtin());
    // One heal per retry, then the budget is spent.
    assert_eq!(bed.registry.searches(), bed.config.driver.heal_retries as usize);
    assert!(bed.scratch_files().is_empty());
    assert!(bed.ledger.cached_patch("youtube,studio,selector").unwrap().is_none());
}

#[tokio::test]
async fn test_valid_patch_heals_and_is_cached() {
    let bed = TestBed::new();
    bed.channel("C1");
    bed.browser.break_role(NEXT_BUTTON);
    bed.registry.answer_with("cap_next_v2", r##"{"next_button": ["#next-v2"]}"##);

    let outcome = bed.run_to_end("C1").await;
    assert_eq!(outcome.status, TaskStatus::Completed, "{:?}", outcome.error);
    assert_eq!(bed.registry.searches(), 1);
    let live = bed.driver.locators();
    assert_eq!(live.get(NEXT_BUTTON)[0].to_query().value, "#next-v2");
    let cached = bed.ledger.cached_patch("youtube,studio,selector").unwrap().unwrap();
    assert_eq!(cached.asset_id, "cap_next_v2");
}

#[tokio::test]
async fn test_paused_channel_fails_without_automation() {
    let bed = TestBed::new();
    let mut channel = bed.channel("C1");
    channel.status = reelforge_core::types::ChannelStatus::Paused;
    bed.ledger.upsert_channel(&channel).unwrap();

    let outcome = bed.run_to_end("C1").await;
    assert!(outcome.error.unwrap().contains("paused"));
    assert_eq!(bed.browser.launches(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_same_channel_runs_respect_ceiling() {
    let mut config = TestBed::base_config();
    config.rate_limit.hourly = 1;
    let bed = TestBed::with_config(config);
    bed.channel("C1");

    let first = bed.submit("C1").unwrap();
    let second = bed.submit("C1").unwrap();
    let (a, b) = tokio::join!(first.outcome(), second.outcome());
    let mut outcomes = vec![a.unwrap(), b.unwrap()];
    outcomes.sort_by_key(|o| o.status == TaskStatus::Failed);

    assert_eq!(outcomes[0].status, TaskStatus::Completed, "{:?}", outcomes[0].error);
    assert_eq!(outcomes[1].status, TaskStatus::Failed);
    assert_eq!(outcomes[1].error.as_deref(), Some("RateLimitExceeded"));

    // One scrape and one publish session; the loser never reached the browser.
    assert_eq!(bed.browser.launches(), 2);
    assert_eq!(bed.model.calls(), 1);
    assert_eq!(bed.speech.calls(), 1);
    assert_eq!(bed.transcoder.calls(), 1);
    assert!(bed.scratch_files().is_empty());
}

#[tokio::test]
async fn test_failure_before_upload_returns_the_slot() {
    let mut config = TestBed::base_config();
    config.rate_limit.hourly = 1;
    let bed = TestBed::with_config(config);
    bed.channel("C1");

    bed.transcoder.fail_next(true);
    let failed = bed.run_to_end("C1").await;
    assert_eq!(failed.status, TaskStatus::Failed);
    assert!(failed.error.unwrap().starts_with("synthesis error"));
    assert_eq!(bed.ledger.count_dispatches("C1", Utc::now() - Duration::hours(1)).unwrap(), 0);

    bed.transcoder.fail_next(false);
    let ok = bed.run_to_end("C1").await;
    assert_eq!(ok.status, TaskStatus::Completed, "{:?}", ok.error);
    assert_eq!(bed.ledger.count_dispatches("C1", Utc::now() - Duration::hours(1)).unwrap(), 1);
}

#[tokio::test]
async fn test_unreadable_link_after_publish_does_not_republish() {
    let bed = TestBed::new();
    bed.channel("C1");
    bed.browser.stale_text_once(VIDEO_LINK);

    let outcome = bed.run_to_end("C1").await;
    assert_eq!(outcome.status, TaskStatus::Completed, "{:?}", outcome.error);
    assert_eq!(outcome.published_url.as_deref(), Some(STUDIO_PAGE_URL));

    assert_eq!(bed.browser.clicks_on(PUBLISH_BUTTON), 1);
    assert_eq!(bed.browser.calls().iter().filter(|c| c.starts_with("upload")).count(), 1);
    assert_eq!(bed.browser.launches(), 2);
    assert_eq!(bed.registry.searches(), 0);
}
