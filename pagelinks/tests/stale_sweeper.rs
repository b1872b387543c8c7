//! Stale `processing` page detection and re-enqueueing.

mod common;

use std::time::Duration;

use pagelinks::scraper::{JobQueue, JobState, StaleSweeper, StaleSweeperConfig, SweepReport};

use common::{ScriptedFetcher, container, test_config, test_db};

fn sweeper_config(reenqueue: bool) -> StaleSweeperConfig {
    StaleSweeperConfig {
        interval: Duration::from_millis(50),
        stale_after: Duration::from_millis(1),
        reenqueue,
        orphan_after: Duration::from_millis(1),
        batch_size: 10,
    }
}

#[tokio::test]
async fn reports_stale_pages_without_touching_them() {
    let db = test_db().await;
    let user_id = common::create_user(&db, "stale@example.com").await;
    let config = test_config(&db);
    let services = container(&db, &config, ScriptedFetcher::new(vec![]));

    let page = services
        .pages
        .create_page(user_id, "https://example.com", "Processing...")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let sweeper = StaleSweeper::new(
        sweeper_config(false),
        services.queue.clone(),
        services.pages.clone(),
    );
    let report = sweeper.sweep_once().await.unwrap();
    assert_eq!(
        report,
        SweepReport {
            stale: 1,
            reenqueued: 0,
            reclaimed: 0,
        }
    );
    assert!(!services.queue.has_live_job(page.id).await.unwrap());
}

#[tokio::test]
async fn reenqueues_orphaned_pages_once() {
    let db = test_db().await;
    let user_id = common::create_user(&db, "orphan@example.com").await;
    let config = test_config(&db);
    let services = container(&db, &config, ScriptedFetcher::new(vec![]));

    let orphan = services
        .pages
        .create_page(user_id, "https://example.com/orphan", "Processing...")
        .await
        .unwrap();
    let queued = services
        .page_service
        .create_page_with_async_scrape(user_id, "https://example.com/queued")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let sweeper = StaleSweeper::new(
        sweeper_config(true),
        services.queue.clone(),
        services.pages.clone(),
    );

    let first = sweeper.sweep_once().await.unwrap();
    assert_eq!(first.stale, 2);
    assert_eq!(first.reenqueued, 1);
    assert!(services.queue.has_live_job(orphan.id).await.unwrap());
    assert!(services.queue.has_live_job(queued.id).await.unwrap());

    let second = sweeper.sweep_once().await.unwrap();
    assert_eq!(second.reenqueued, 0);
    assert_eq!(services.queue.counts().await.unwrap().pending, 2);
}

#[tokio::test]
async fn terminal_pages_are_never_stale() {
    let db = test_db().await;
    let user_id = common::create_user(&db, "done@example.com").await;
    let config = test_config(&db);
    let services = container(&db, &config, ScriptedFetcher::new(vec![]));

    let page = services
        .pages
        .create_page(user_id, "https://example.com", "Processing...")
        .await
        .unwrap();
    services
        .pages
        .fail_page(page.id, "example.com (Failed)")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let sweeper = StaleSweeper::new(
        sweeper_config(true),
        services.queue.clone(),
        services.pages.clone(),
    );
    assert_eq!(sweeper.sweep_once().await.unwrap(), SweepReport::default());
}

#[tokio::test]
async fn background_sweeper_stops_cleanly() {
    let db = test_db().await;
    let user_id = common::create_user(&db, "bg@example.com").await;
    let config = test_config(&db);
    let services = container(&db, &config, ScriptedFetcher::new(vec![]));
    let page = services
        .pages
        .create_page(user_id, "https://example.com", "Processing...")
        .await
        .unwrap();

    let sweeper = StaleSweeper::new(
        sweeper_config(true),
        services.queue.clone(),
        services.pages.clone(),
    );
    sweeper.start();

    let (queue, page_id) = (&services.queue, page.id);
    assert!(
        common::wait_until(Duration::from_secs(2), || async move {
            queue.has_live_job(page_id).await.unwrap()
        })
        .await
    );
    sweeper.stop().await;
}

#[tokio::test]
async fn sweep_returns_orphaned_claims_to_the_queue() {
    let db = test_db().await;
    let user_id = common::create_user(&db, "claim@example.com").await;
    let config = test_config(&db);
    let services = container(&db, &config, ScriptedFetcher::new(vec![]));

    let page = services
        .page_service
        .create_page_with_async_scrape(user_id, "https://example.com")
        .await
        .unwrap();

    // A claim made through another queue handle is not held by this one.
    let other = JobQueue::with_config(config.queue.clone(), services.jobs.clone());
    let job = other.dequeue().await.unwrap().unwrap();
    assert_eq!(job.page_id, page.id);
    tokio::time::sleep(Duration::from_millis(20)).await;

    let sweeper = StaleSweeper::new(
        sweeper_config(false),
        services.queue.clone(),
        services.pages.clone(),
    );
    let report = sweeper.sweep_once().await.unwrap();
    assert_eq!(report.reclaimed, 1);

    let status = services
        .queue
        .get_job_status(job.id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status.state, JobState::Waiting);
    assert_eq!(status.attempts_made, 0);

    assert_eq!(sweeper.sweep_once().await.unwrap().reclaimed, 0);
}
