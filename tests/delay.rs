use std::time::{Duration, Instant};

use quiesce::cancel::CancellationSource;
use quiesce::prelude::*;
use quiesce::runtime::block_on;
use quiesce::time::delay;

#[test_log::test]
fn zero_delay_resolves_after_a_queue_turn() {
    block_on(async {
        delay(Duration::ZERO, None).await.unwrap();
    });
}

#[test_log::test]
fn delay_waits_roughly_the_requested_time() {
    block_on(async {
        let start = Instant::now();
        delay(Duration::from_millis(40), None).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(40));
    });
}

#[test_log::test]
fn cancellation_wins_the_race_and_clears_the_timer() {
    block_on(async {
        let source = CancellationSource::new();
        let token = source.token();
        source.cancel_after(Duration::from_millis(40));
        let start = Instant::now();
        let outcome = delay(Duration::from_millis(400), Some(&token)).await;
        let elapsed = start.elapsed();
        assert!(outcome.unwrap_err().is_cancelled());
        assert!(
            elapsed < Duration::from_millis(200),
            "cancellation should win promptly, took {elapsed:?}"
        );
        // The 400ms timer was disposed with the loss; waiting past its
        // deadline must stay quiet instead of firing into the settled value.
        delay(Duration::from_millis(450), None).await.unwrap();
    });
}

#[test_log::test]
fn a_pre_cancelled_token_short_circuits_at_entry() {
    block_on(async {
        let source = CancellationSource::new();
        source.cancel();
        let start = Instant::now();
        let outcome = delay(Duration::from_secs(1), Some(&source.token())).await;
        assert!(outcome.unwrap_err().is_cancelled());
        assert!(start.elapsed() < Duration::from_millis(100));
    });
}

#[test_log::test]
fn a_completed_delay_ignores_later_cancellation() {
    block_on(async {
        let source = CancellationSource::new();
        let token = source.token();
        delay(Duration::from_millis(10), Some(&token)).await.unwrap();
        // The subscription was disposed when the timer won; cancelling now
        // has nobody left to notify.
        source.cancel();
        assert!(token.is_cancellation_requested());
    });
}

#[test_log::test]
fn with_cancellation_rejects_when_the_token_fires_first() {
    block_on(async {
        let source = CancellationSource::new();
        source.cancel_after(Duration::from_millis(30));
        let start = Instant::now();
        let outcome = delay(Duration::from_millis(300), None)
            .with_cancellation(&source.token())
            .await;
        assert!(outcome.unwrap_err().is_cancelled());
        assert!(start.elapsed() < Duration::from_millis(150));
    });
}

#[test_log::test]
fn with_cancellation_passes_success_through() {
    block_on(async {
        let source = CancellationSource::new();
        let outcome = delay(Duration::from_millis(10), None)
            .with_cancellation(&source.token())
            .await;
        outcome.unwrap().unwrap();
    });
}
