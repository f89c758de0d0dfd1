mod common;

use allm_router::{
  Error, FailoverManager, FailoverStrategy, LlmRequest, ModelDescriptor
, ModelPricing, RequestDispatcher, RetryPolicy
};
use common::{dispatcher, ids, model, Behavior, ScriptedTransport};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;

fn manager(strategy: FailoverStrategy, dispatcher: &RequestDispatcher)
  -> FailoverManager
{   FailoverManager::new(
      strategy,
      Arc::clone(dispatcher.performance()),
      Arc::clone(dispatcher.cost_tracker()),
      Arc::clone(dispatcher.catalog())
    )
}

fn flaky() -> Behavior
{   Behavior::Fail(Error::HttpError("503 upstream".to_string()))
}

#[tokio::test]
async fn test_round_robin_covers_every_candidate()
{   common::init();
    for n in 1..=6usize
    {   let transport = ScriptedTransport::new().into_arc();
        let dispatcher = dispatcher(Arc::clone(&transport), vec![]);
        let failover = manager(FailoverStrategy::RoundRobin, &dispatcher);
        let candidates: Vec<String> = (0..n)
          .map(|i| format!("p/model-{}", i))
          .collect();

        let mut seen = HashSet::new();
        for _ in 0..n
        {   let response = assert_ok!(
              failover.send_with_failover(
                &dispatcher,
                &LlmRequest::new("hello"),
                &candidates
              ).await
            );
            seen.insert(response.model);
        }
        assert_eq!(seen.len(), n, "round robin skipped a model for n={}", n);
    }
}

#[tokio::test]
async fn test_round_robin_select_next_cycles()
{   let transport = ScriptedTransport::new().into_arc();
    let dispatcher = dispatcher(transport, vec![]);
    let failover = manager(FailoverStrategy::RoundRobin, &dispatcher);
    let candidates = ids(&["a/1", "b/2", "c/3"]);

    let picks: Vec<String> = (0..6)
      .filter_map(|_| failover.select_next(&candidates))
      .collect();
    assert_eq!(picks, ids(&["a/1", "b/2", "c/3", "a/1", "b/2", "c/3"]));
    assert!(failover.select_next(&[]).is_none());
}

#[tokio::test]
async fn test_failover_reaches_third_candidate()
{   common::init();
    let transport = ScriptedTransport::new()
      .on("a/first", flaky())
      .on("b/second", flaky())
      .on("c/third", Behavior::reply("third answers"))
      .into_arc();
    let dispatcher = dispatcher(
      Arc::clone(&transport),
      vec![model("a/first"), model("b/second"), model("c/third")]
    );
    let failover = manager(FailoverStrategy::RoundRobin, &dispatcher);

    let response = assert_ok!(
      failover.send_with_failover(
        &dispatcher,
        &LlmRequest::new("hello"),
        &ids(&["a/first", "b/second", "c/third"])
      ).await
    );

    assert_eq!(response.model, "c/third");
    assert_eq!(response.text, "third answers");
    assert_eq!(transport.calls(), ids(&["a/first", "b/second", "c/third"]));

    let performance = dispatcher.performance();
    let samples: usize = ["a/first", "b/second", "c/third"].iter()
      .map(|m| performance.sample_count(m))
      .sum();
    assert_eq!(samples, 3);
    assert_eq!(performance.failure_count("a/first"), 1);
    assert_eq!(performance.failure_count("b/second"), 1);
    assert_eq!(performance.failure_count("c/third"), 0);

    let ledger = dispatcher.cost_tracker().analytics(None);
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger["c/third"].request_count, 1);
}

#[tokio::test]
async fn test_all_candidates_failing()
{   let transport = ScriptedTransport::new()
      .on("a/1", flaky())
      .on("b/2", flaky())
      .on("c/3", Behavior::Fail(Error::Timeout))
      .into_arc();
    let dispatcher = dispatcher(transport, vec![]);
    let failover = manager(FailoverStrategy::RoundRobin, &dispatcher);

    let result = failover.send_with_failover(
      &dispatcher,
      &LlmRequest::new("hello"),
      &ids(&["a/1", "b/2", "c/3"])
    ).await;

    match result
    {   Err(Error::AllCandidatesFailed { attempts, last_error }) => {
          assert_eq!(attempts, 3);
          assert_eq!(*last_error, Error::Timeout);
        }
      , other => panic!("expected exhaustion, got {:?}", other)
    }
    assert_eq!(dispatcher.cost_tracker().grand_total(None), 0.0);
}

#[tokio::test]
async fn test_non_retriable_error_stops_chain()
{   let transport = ScriptedTransport::new()
      .on("a/1", Behavior::Fail(Error::InvalidRequest("bad".to_string())))
      .into_arc();
    let dispatcher = dispatcher(Arc::clone(&transport), vec![]);
    let failover = manager(FailoverStrategy::RoundRobin, &dispatcher);

    let result = failover.send_with_failover(
      &dispatcher,
      &LlmRequest::new("hello"),
      &ids(&["a/1", "b/2"])
    ).await;

    assert_eq!(result.unwrap_err(), Error::InvalidRequest("bad".to_string()));
    assert_eq!(transport.calls(), ids(&["a/1"]));
}

#[tokio::test]
async fn test_empty_and_duplicate_candidates()
{   let transport = ScriptedTransport::new()
      .on("a/1", flaky())
      .into_arc();
    let dispatcher = dispatcher(Arc::clone(&transport), vec![]);
    let failover = manager(FailoverStrategy::RoundRobin, &dispatcher);
    let request = LlmRequest::new("hello");

    let empty = failover.send_with_failover(&dispatcher, &request, &[]).await;
    assert_eq!(empty.unwrap_err(), Error::NoModelSelected);

    let result = failover
      .send_with_failover(&dispatcher, &request, &ids(&["a/1", "a/1"]))
      .await;
    assert!(matches!(
      result,
      Err(Error::AllCandidatesFailed { attempts: 1, .. })
    ));
    assert_eq!(transport.calls().len(), 1);
}

#[tokio::test]
async fn test_least_latency_ordering()
{   let transport = ScriptedTransport::new().into_arc();
    let dispatcher = dispatcher(transport, vec![]);
    let performance = dispatcher.performance();
    performance.record("a/slow", Duration::from_millis(300), true, None);
    performance.record("b/fast", Duration::from_millis(100), true, None);

    let failover = manager(FailoverStrategy::LeastLatency, &dispatcher);
    let candidates = ids(&["c/unmeasured", "a/slow", "b/fast"]);

    assert_eq!(
      failover.ordered(&candidates),
      ids(&["b/fast", "a/slow", "c/unmeasured"])
    );
    assert_eq!(failover.select_next(&candidates).as_deref(), Some("b/fast"));
}

#[tokio::test]
async fn test_most_reliable_ordering()
{   let transport = ScriptedTransport::new().into_arc();
    let dispatcher = dispatcher(transport, vec![]);
    let performance = dispatcher.performance();
    performance.record("a/shaky", Duration::from_millis(10), true, None);
    performance.record("a/shaky", Duration::from_millis(10), false, None);
    performance.record("b/solid", Duration::from_millis(10), true, None);

    let failover = manager(FailoverStrategy::MostReliable, &dispatcher);
    assert_eq!(
      failover.ordered(&ids(&["a/shaky", "c/new", "b/solid"])),
      ids(&["b/solid", "a/shaky", "c/new"])
    );
}

#[tokio::test]
async fn test_cost_optimized_prefers_cheapest()
{   let transport = ScriptedTransport::new().into_arc();
    let dear = ModelDescriptor::new("a/dear", 8192, ModelPricing::new(0.03, 0.06));
    let cheap = ModelDescriptor::new("b/cheap", 8192, ModelPricing::new(0.0001, 0.0002));
    let dispatcher = dispatcher(Arc::clone(&transport), vec![dear, cheap]);
    let failover = manager(FailoverStrategy::CostOptimized, &dispatcher);

    let response = assert_ok!(
      failover.send_with_failover(
        &dispatcher,
        &LlmRequest::new("hello"),
        &ids(&["a/dear", "z/unpriced", "b/cheap"])
      ).await
    );
    assert_eq!(response.model, "b/cheap");
    assert_eq!(
      failover.ordered(&ids(&["z/unpriced", "a/dear", "b/cheap"])),
      ids(&["b/cheap", "a/dear", "z/unpriced"])
    );
}

#[tokio::test]
async fn test_performance_strategy_reranks_after_failure()
{   let transport = ScriptedTransport::new()
      .on("b/fast", flaky())
      .into_arc();
    let dispatcher = dispatcher(Arc::clone(&transport), vec![]);
    let performance = dispatcher.performance();
    performance.record("a/slow", Duration::from_millis(900), true, None);
    performance.record("b/fast", Duration::from_millis(100), true, None);
    performance.record("c/medium", Duration::from_millis(400), true, None);

    let failover = manager(FailoverStrategy::LeastLatency, &dispatcher);
    let response = assert_ok!(
      failover.send_with_failover(
        &dispatcher,
        &LlmRequest::new("hello"),
        &ids(&["a/slow", "b/fast", "c/medium"])
      ).await
    );
    assert_eq!(response.model, "c/medium");
    assert_eq!(transport.calls(), ids(&["b/fast", "c/medium"]));
}

#[tokio::test]
async fn test_custom_selector()
{   let transport = ScriptedTransport::new().into_arc();
    let dispatcher = dispatcher(transport, vec![]);

    let last = FailoverStrategy::Custom(Arc::new(|candidates: &[String]| {
      candidates.last().cloned()
    }));
    let failover = manager(last, &dispatcher);
    assert_eq!(
      failover.ordered(&ids(&["a/1", "b/2", "c/3"])),
      ids(&["c/3", "b/2", "a/1"])
    );

    let bogus = FailoverStrategy::Custom(Arc::new(|_: &[String]| {
      Some("nowhere/none".to_string())
    }));
    let failover = manager(bogus, &dispatcher);
    assert_eq!(
      failover.select_next(&ids(&["a/1", "b/2"])).as_deref(),
      Some("a/1")
    );
}

#[tokio::test(start_paused = true)]
async fn test_backoff_between_attempts()
{   let transport = ScriptedTransport::new()
      .on("a/1", flaky())
      .on("b/2", flaky())
      .into_arc();
    let dispatcher = dispatcher(transport, vec![]);
    let failover = manager(FailoverStrategy::RoundRobin, &dispatcher)
      .with_retry_policy(RetryPolicy::new(2.0, 100));

    let started = tokio::time::Instant::now();
    let response = assert_ok!(
      failover.send_with_failover(
        &dispatcher,
        &LlmRequest::new("hello"),
        &ids(&["a/1", "b/2", "c/3"])
      ).await
    );
    assert_eq!(response.model, "c/3");
    // 100ms before the second attempt, 200ms before the third
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[test]
fn test_retry_policy_backoff()
{   let policy = RetryPolicy::default();
    assert_eq!(policy.backoff_for_attempt(0), Duration::from_millis(100));
    assert_eq!(policy.backoff_for_attempt(1), Duration::from_millis(200));
    assert_eq!(policy.backoff_for_attempt(2), Duration::from_millis(400));
}
