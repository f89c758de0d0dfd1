use allm_router::config::{RateLimitConfig, RateLimitScope};
use allm_router::{Error, RateLimiter};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

#[tokio::test(start_paused = true)]
async fn test_ceiling_then_recovery()
{   let limiter = RateLimiter::new(5, Duration::from_secs(60));

    for _ in 0..5
    {   assert_ok!(limiter.check_and_record("a/model"));
    }
    let denied = assert_err!(limiter.check_and_record("a/model"));
    assert!(matches!(denied, Error::RateLimitExceeded { .. }));
    assert_eq!(limiter.remaining("a/model"), 0);

    tokio::time::advance(Duration::from_secs(30)).await;
    assert_err!(limiter.check_and_record("a/model"));

    tokio::time::advance(Duration::from_secs(31)).await;
    assert_ok!(limiter.check_and_record("a/model"));
    assert_eq!(limiter.remaining("a/model"), 4);
}

#[tokio::test(start_paused = true)]
async fn test_denied_attempts_are_not_recorded()
{   let limiter = RateLimiter::new(2, Duration::from_secs(10));

    assert_ok!(limiter.check_and_record("m"));
    tokio::time::advance(Duration::from_secs(5)).await;
    assert_ok!(limiter.check_and_record("m"));

    // a storm of denials must not push the window forward
    for _ in 0..10
    {   assert_err!(limiter.check_and_record("m"));
    }

    tokio::time::advance(Duration::from_secs(5)).await;
    assert_ok!(limiter.check_and_record("m"));
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_tracks_oldest_entry()
{   let limiter = RateLimiter::new(1, Duration::from_secs(60));
    assert_ok!(limiter.check_and_record("m"));
    tokio::time::advance(Duration::from_secs(20)).await;

    match limiter.check_and_record("m")
    {   Err(Error::RateLimitExceeded { retry_after }) => {
          assert_eq!(retry_after, Duration::from_secs(40));
        }
      , other => panic!("expected rate limit, got {:?}", other)
    }
}

#[tokio::test(start_paused = true)]
async fn test_global_scope_shares_budget()
{   let limiter = RateLimiter::new(2, Duration::from_secs(60));

    assert_ok!(limiter.check_and_record("a/one"));
    assert_ok!(limiter.check_and_record("b/two"));
    assert_err!(limiter.check_and_record("c/three"));
}

#[tokio::test(start_paused = true)]
async fn test_per_model_scope()
{   let limiter = RateLimiter::from_config(&RateLimitConfig
    {   max_requests: 1
      , window_secs: 60
      , scope: RateLimitScope::PerModel
    });

    assert_ok!(limiter.check_and_record("a/one"));
    assert_ok!(limiter.check_and_record("b/two"));
    assert_err!(limiter.check_and_record("a/one"));
    assert_eq!(limiter.remaining("c/three"), 1);

    limiter.reset();
    assert_ok!(limiter.check_and_record("a/one"));
}

#[test]
fn test_default_is_100_per_minute_global()
{   let limiter = RateLimiter::default();
    assert_eq!(limiter.scope(), RateLimitScope::Global);
    assert_eq!(limiter.remaining("any"), 100);
}
