//! Cancellation and timeout tests
//!
//! Cancelling a request stops scheduling, lets in-flight resolvers observe
//! the token and returns whatever completed so far.

#[path = "testutils/mod.rs"]
mod testutils;

use graphflow::{ExecutionRequest, ExecutorConfig, LeafType, Operation, Selection, SelectionSet};
use serde_json::json;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use testutils::fixture::{
    CountingTransactions, ExecutorFixture, SlowLoader, SlowResolver, UserRefResolver,
};

fn mixed_query() -> Operation {
    Operation::query(SelectionSet::new(vec![
        Selection::leaf("fast", LeafType::Int)
            .with_resolver(SlowResolver::shared(json!(1), Duration::from_millis(1))),
        Selection::leaf("slow", LeafType::Int)
            .with_resolver(SlowResolver::shared(json!(2), Duration::from_secs(5))),
    ]))
}

#[tokio::test]
#[serial_test::serial]
async fn test_cancelled_request_returns_partial_result() {
    let fixture = ExecutorFixture::new();
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let result = fixture
        .run(ExecutionRequest::new(mixed_query()).with_cancellation(token))
        .await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(result.data, Some(json!({"fast": 1})));
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].message, "Execution cancelled");
    assert!(result.errors[0].path.is_none());
}

#[tokio::test]
#[serial_test::serial]
async fn test_timeout_cancels_the_request() {
    let fixture =
        ExecutorFixture::with_config(ExecutorConfig::default().with_timeout(Duration::from_millis(50)));

    let started = Instant::now();
    let result = fixture.run_operation(mixed_query()).await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(result.data, Some(json!({"fast": 1})));
    assert!(result
        .errors
        .iter()
        .any(|error| error.message == "Execution cancelled"));
}

fn post_author_query() -> Operation {
    Operation::query(SelectionSet::new(vec![Selection::object(
        "post",
        SelectionSet::new(vec![
            Selection::leaf("title", LeafType::String),
            Selection::leaf("author", LeafType::String).with_resolver(UserRefResolver::shared()),
        ]),
    )]))
}

async fn run_with_slow_loader(config: ExecutorConfig) {
    let loader = SlowLoader::new(Duration::from_secs(3));
    let fixture = ExecutorFixture::with_config(config.with_timeout(Duration::from_millis(50)))
        .with_loader(loader.clone());
    let request = ExecutionRequest::new(post_author_query())
        .with_root_value(json!({"post": {"title": "One", "userId": "u1"}}));

    let started = Instant::now();
    let result = fixture.run(request).await;

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(loader.call_count(), 1);
    let data = result.data.expect("data");
    assert_eq!(data.pointer("/post/title"), Some(&json!("One")));
    assert!(data.pointer("/post/author").is_none());
    assert!(result
        .errors
        .iter()
        .any(|error| error.message == "Execution cancelled"));
    assert_eq!(fixture.executor.services().pooled_schedulers(), 1);
}

#[tokio::test]
#[serial_test::serial]
async fn test_timeout_abandons_batched_flush() {
    run_with_slow_loader(ExecutorConfig::default()).await;
}

#[tokio::test]
#[serial_test::serial]
async fn test_timeout_abandons_immediate_load() {
    run_with_slow_loader(ExecutorConfig::default().without_batching()).await;
}

#[tokio::test]
async fn test_request_within_timeout_is_unaffected() {
    let fixture =
        ExecutorFixture::with_config(ExecutorConfig::default().with_timeout(Duration::from_secs(5)));
    let operation = Operation::query(SelectionSet::new(vec![Selection::leaf("fast", LeafType::Int)
        .with_resolver(SlowResolver::shared(json!(1), Duration::from_millis(1)))]));

    let result = fixture.run_operation(operation).await;

    assert!(result.is_ok());
    assert_eq!(result.data, Some(json!({"fast": 1})));
}

#[tokio::test]
async fn test_already_cancelled_token_runs_nothing() {
    let fixture = ExecutorFixture::new();
    let token = CancellationToken::new();
    token.cancel();

    let result = fixture
        .run(ExecutionRequest::new(mixed_query()).with_cancellation(token))
        .await;

    assert_eq!(result.data, Some(json!({})));
    assert_eq!(result.errors.len(), 1);
    let statistics = result.statistics.expect("statistics");
    assert!(statistics.is_completed());
    assert_eq!(statistics.running_tasks(), 0);
}

#[tokio::test]
#[serial_test::serial]
async fn test_cancelled_mutation_leaves_transaction_open() {
    let transactions = CountingTransactions::new();
    let fixture = ExecutorFixture::new().with_transactions(transactions.clone());
    let operation = Operation::mutation(SelectionSet::new(vec![Selection::leaf(
        "transfer",
        LeafType::Int,
    )
    .with_resolver(SlowResolver::shared(json!(1), Duration::from_secs(5)))]));
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });

    let result = fixture
        .run(ExecutionRequest::new(operation).with_cancellation(token))
        .await;

    assert_eq!(result.data, Some(json!({})));
    assert_eq!(transactions.created(), 1);
    assert_eq!(transactions.completed(), 0);
}

#[tokio::test]
async fn test_scheduler_is_reusable_after_cancellation() {
    let fixture = ExecutorFixture::new();
    let token = CancellationToken::new();
    token.cancel();
    fixture
        .run(ExecutionRequest::new(mixed_query()).with_cancellation(token))
        .await;

    let operation = Operation::query(SelectionSet::new(vec![Selection::leaf("fast", LeafType::Int)
        .with_resolver(SlowResolver::shared(json!(1), Duration::from_millis(1)))]));
    let result = fixture.run_operation(operation).await;

    assert!(result.is_ok());
    assert_eq!(result.data, Some(json!({"fast": 1})));
    assert_eq!(fixture.executor.services().pooled_schedulers(), 1);
}
