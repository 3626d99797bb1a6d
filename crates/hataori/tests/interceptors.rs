use hataori::prelude::*;
use hataori::{ActivityKey, ActivityName, WorkflowRecord};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

fn math() -> FunctionProvider {
    FunctionProvider::new().activity("inc", |x: i64| async move { Ok(x + 1) })
}

fn builder(storage: Arc<MemoryStorage>) -> EngineBuilder {
    WorkflowEngine::builder()
        .provider("math", math())
        .workflow(
            "double",
            workflow_fn(|executor: ActivityExecutor, n: i64| async move {
                let a: i64 = executor.call_as("math", "inc", n).await?;
                let b: i64 = executor.call_as("math", "inc", n).await?;
                Ok::<_, WorkflowError>(a + b)
            }),
        )
        .workflow(
            "once",
            workflow_fn(|executor: ActivityExecutor, n: i64| async move {
                executor.call_as::<i64>("math", "inc", n).await
            }),
        )
        .storage("main", storage)
        .storage_selector(|_| Some("main".to_string()))
}

// Records its name for every activity input phase it is not declining.
fn named(
    name: &'static str,
    seen: Arc<Mutex<Vec<(&'static str, Value)>>>,
    decline: bool,
) -> impl Interceptor {
    interceptor_fn(move |collector: EventCollector| {
        let seen = Arc::clone(&seen);
        async move {
            let collector = collector
                .when_type_is(EventType::Activity)?
                .when_order_is(Phase::Input)?
                .filter(|_| !decline)?;
            seen.lock()
                .push((name, collector.event().operation.input.clone()));
            let changes = collector
                .commands()
                .returns()
                .set_input(|prev, _| json!(prev.as_i64().unwrap_or(0) * 10))?
                .into_changes();
            InterceptResult::Ok(Some(changes))
        }
    })
}

#[tokio::test]
async fn test_interceptors_run_in_order_and_see_rewrites() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let engine = builder(Arc::new(MemoryStorage::new()))
        .interceptor("m1", named("m1", Arc::clone(&seen), false))
        .interceptor("m2", named("m2", Arc::clone(&seen), true))
        .interceptor("m3", named("m3", Arc::clone(&seen), false))
        .build()
        .unwrap();

    let execution = engine.execute("once", 5).await.unwrap();
    // m1 and m3 each multiply by ten, m2 declines
    assert_eq!(execution.promise.await.unwrap(), json!(501));
    assert_eq!(*seen.lock(), vec![("m1", json!(5)), ("m3", json!(50))]);
}

#[tokio::test]
async fn test_workflow_data_accumulates_from_activity_outputs() {
    let storage = Arc::new(MemoryStorage::new());
    let totals = Arc::new(Mutex::new(Vec::new()));
    let observed = Arc::clone(&totals);
    let engine = builder(Arc::clone(&storage))
        .interceptor(
            "accumulate",
            interceptor_fn(|collector: EventCollector| async move {
                let collector = collector
                    .when_type_is(EventType::Activity)?
                    .when_order_is(Phase::Output)?;
                let output = collector.event().operation.output.clone();
                let added = output.and_then(|v| v.as_i64()).unwrap_or(0);
                let changes = collector
                    .commands()
                    .returns()
                    .set_workflow_additional_data(|prev, _| {
                        json!({ "total": prev["total"].as_i64().unwrap_or(0) + added })
                    })?
                    .into_changes();
                InterceptResult::Ok(Some(changes))
            }),
        )
        .interceptor(
            "observe",
            interceptor_fn(move |collector: EventCollector| {
                let observed = Arc::clone(&observed);
                async move {
                    let collector = collector
                        .when_type_is(EventType::Workflow)?
                        .when_order_is(Phase::Output)?;
                    observed
                        .lock()
                        .push(collector.event().operation.additional_data.clone());
                    InterceptResult::Ok(None)
                }
            }),
        )
        .build()
        .unwrap();

    let execution = engine.execute("double", 5).await.unwrap();
    assert_eq!(execution.promise.await.unwrap(), json!(12));
    assert_eq!(*totals.lock(), vec![json!({ "total": 12 })]);

    let stored = storage
        .get_workflow_additional_data(&"double".into(), &execution.workflow_id)
        .await
        .unwrap();
    assert_eq!(stored, Some(json!({ "total": 12 })));
}

#[tokio::test]
async fn test_exit_on_start_aborts_without_activity_record() {
    let storage = Arc::new(MemoryStorage::new());
    let engine = builder(Arc::clone(&storage))
        .interceptor(
            "budget",
            interceptor_fn(|collector: EventCollector| async move {
                let collector = collector
                    .when_type_is(EventType::Activity)?
                    .when_order_is(Phase::Start)?
                    .when_provider_is("math")?;
                InterceptResult::Err(collector.commands().exit("budget exceeded").into())
            }),
        )
        .build()
        .unwrap();

    let execution = engine.execute("double", 5).await.unwrap();
    let error = execution.promise.await.unwrap_err();
    assert_eq!(error, WorkflowError::Exit("budget exceeded".to_string()));
    assert_eq!(error.to_string(), "budget exceeded");

    assert_eq!(storage.activity_count().await.unwrap(), 0);
    let record = storage
        .get_workflow(&"double".into(), &execution.workflow_id)
        .await
        .unwrap();
    assert_eq!(record, Some(WorkflowRecord::pending(json!(5))));
}

#[tokio::test]
async fn test_output_rewrite_is_persisted() {
    let storage = Arc::new(MemoryStorage::new());
    let engine = builder(Arc::clone(&storage))
        .id_generator(|| "id".to_string())
        .interceptor(
            "scale",
            interceptor_fn(|collector: EventCollector| async move {
                let collector = collector
                    .when_type_is(EventType::Activity)?
                    .when_order_is(Phase::Output)?;
                let changes = collector
                    .commands()
                    .returns()
                    .set_output(|prev, _| json!(prev.as_i64().unwrap_or(0) * 10))?
                    .set_additional_data(|_, _| json!({ "scaled": true }))?
                    .into_changes();
                InterceptResult::Ok(Some(changes))
            }),
        )
        .build()
        .unwrap();

    let execution = engine.execute("once", 5).await.unwrap();
    assert_eq!(execution.promise.await.unwrap(), json!(60));

    let key = ActivityKey {
        provider: "math".into(),
        activity: "inc".into(),
        activity_id: "id".into(),
        args: json!(5),
    };
    assert_eq!(storage.get_activity(&key).await.unwrap(), Some(json!(60)));
    assert_eq!(
        storage.get_activity_additional_data(&key).await.unwrap(),
        Some(json!({ "scaled": true }))
    );
}

#[tokio::test]
async fn test_workflow_input_rewrite_is_recorded() {
    let storage = Arc::new(MemoryStorage::new());
    let engine = builder(Arc::clone(&storage))
        .interceptor(
            "tenfold",
            interceptor_fn(|collector: EventCollector| async move {
                let collector = collector
                    .when_type_is(EventType::Workflow)?
                    .when_order_is(Phase::Input)?
                    .when_workflow_name_is("once")?;
                let changes = collector
                    .commands()
                    .returns()
                    .set_input(|prev, _| json!(prev.as_i64().unwrap_or(0) * 10))?
                    .into_changes();
                InterceptResult::Ok(Some(changes))
            }),
        )
        .build()
        .unwrap();

    let execution = engine.execute("once", 5).await.unwrap();
    assert_eq!(execution.promise.await.unwrap(), json!(51));
    let record = storage
        .get_workflow(&"once".into(), &execution.workflow_id)
        .await
        .unwrap();
    assert_eq!(record, Some(WorkflowRecord::completed(json!(50), json!(51))));
}

#[tokio::test]
async fn test_setter_outside_its_phase_fails_execution() {
    let engine = builder(Arc::new(MemoryStorage::new()))
        .interceptor(
            "late",
            interceptor_fn(|collector: EventCollector| async move {
                let collector = collector
                    .when_type_is(EventType::Workflow)?
                    .when_order_is(Phase::Start)?;
                let changes = collector
                    .commands()
                    .returns()
                    .set_input(|_, _| json!(0))?
                    .into_changes();
                InterceptResult::Ok(Some(changes))
            }),
        )
        .build()
        .unwrap();

    let execution = engine.execute("once", 5).await.unwrap();
    assert_eq!(
        execution.promise.await.unwrap_err(),
        WorkflowError::CommandNotAvailable {
            command: "set_input",
            phase: Phase::Start,
        }
    );
}

#[tokio::test]
async fn test_interceptor_can_call_activities() {
    let audited = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&audited);
    let entrypoints = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&entrypoints);

    let engine = builder(Arc::new(MemoryStorage::new()))
        .provider(
            "audit",
            FunctionProvider::new().activity("log", move |_: Value| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(true)
                }
            }),
        )
        .interceptor(
            "entrypoints",
            interceptor_fn(move |collector: EventCollector| {
                let recorded = Arc::clone(&recorded);
                async move {
                    let collector = collector
                        .when_type_is(EventType::Activity)?
                        .when_order_is(Phase::Input)?;
                    let event = collector.event();
                    recorded
                        .lock()
                        .push((event.activity_name().cloned(), event.entrypoint));
                    InterceptResult::Ok(None)
                }
            }),
        )
        .interceptor(
            "audit",
            interceptor_fn(|collector: EventCollector| async move {
                let collector = collector
                    .when_type_is(EventType::Activity)?
                    .when_order_is(Phase::Output)?
                    .when_entrypoint_is(Entrypoint::Workflow)?;
                if let Some(executor) = collector.commands().executor() {
                    executor
                        .call("audit", "log", &collector.event().operation.output)
                        .await?;
                }
                InterceptResult::Ok(None)
            }),
        )
        .build()
        .unwrap();

    let execution = engine.execute("double", 1).await.unwrap();
    assert_eq!(execution.promise.await.unwrap(), json!(4));
    assert_eq!(audited.load(Ordering::SeqCst), 2);
    assert_eq!(
        *entrypoints.lock(),
        vec![
            (Some(ActivityName::new("inc")), Entrypoint::Workflow),
            (Some(ActivityName::new("log")), Entrypoint::Middleware),
            (Some(ActivityName::new("inc")), Entrypoint::Workflow),
            (Some(ActivityName::new("log")), Entrypoint::Middleware),
        ]
    );
}

#[tokio::test]
async fn test_workflow_data_survives_concurrent_activities() {
    let storage = Arc::new(MemoryStorage::new());
    let engine = builder(Arc::clone(&storage))
        .workflow(
            "pair",
            workflow_fn(|executor: ActivityExecutor, n: i64| async move {
                let (a, b) = tokio::try_join!(
                    executor.call_as::<i64>("math", "inc", n),
                    executor.call_as::<i64>("math", "inc", n + 100),
                )?;
                Ok::<_, WorkflowError>(a + b)
            }),
        )
        .interceptor(
            "count",
            interceptor_fn(|collector: EventCollector| async move {
                let collector = collector
                    .when_type_is(EventType::Activity)?
                    .when_order_is(Phase::Output)?;
                // both activities reach this point before either one updates
                tokio::time::sleep(Duration::from_millis(10)).await;
                let changes = collector
                    .commands()
                    .returns()
                    .set_workflow_additional_data(|prev, _| {
                        json!({ "count": prev["count"].as_i64().unwrap_or(0) + 1 })
                    })?
                    .into_changes();
                InterceptResult::Ok(Some(changes))
            }),
        )
        .build()
        .unwrap();

    let execution = engine.execute("pair", 1).await.unwrap();
    assert_eq!(execution.promise.await.unwrap(), json!(104));

    let stored = storage
        .get_workflow_additional_data(&"pair".into(), &execution.workflow_id)
        .await
        .unwrap();
    assert_eq!(stored, Some(json!({ "count": 2 })));
}

#[tokio::test]
async fn test_start_phase_runs_alongside_provider_call() {
    let provider_entered = Arc::new(Notify::new());
    let start_entered = Arc::new(Notify::new());
    let outputs = Arc::new(AtomicUsize::new(0));
    let wait = Duration::from_secs(5);

    let (signal, awaited) = (Arc::clone(&provider_entered), Arc::clone(&start_entered));
    let slow_math = FunctionProvider::new().activity("inc", move |x: i64| {
        let (signal, awaited) = (Arc::clone(&signal), Arc::clone(&awaited));
        async move {
            signal.notify_one();
            tokio::time::timeout(wait, awaited.notified())
                .await
                .map_err(|_| WorkflowError::activity("inc", "start phase never ran"))?;
            Ok(x + 1)
        }
    });

    let (signal, awaited) = (Arc::clone(&start_entered), Arc::clone(&provider_entered));
    let counter = Arc::clone(&outputs);
    let engine = WorkflowEngine::builder()
        .provider("math", slow_math)
        .workflow(
            "once",
            workflow_fn(|executor: ActivityExecutor, n: i64| async move {
                executor.call_as::<i64>("math", "inc", n).await
            }),
        )
        .interceptor(
            "start",
            interceptor_fn(move |collector: EventCollector| {
                let (signal, awaited) = (Arc::clone(&signal), Arc::clone(&awaited));
                async move {
                    let collector = collector
                        .when_type_is(EventType::Activity)?
                        .when_order_is(Phase::Start)?;
                    signal.notify_one();
                    if tokio::time::timeout(wait, awaited.notified()).await.is_err() {
                        return InterceptResult::Err(
                            collector.commands().exit("provider never ran").into(),
                        );
                    }
                    InterceptResult::Ok(None)
                }
            }),
        )
        .interceptor(
            "output",
            interceptor_fn(move |collector: EventCollector| {
                let counter = Arc::clone(&counter);
                async move {
                    collector
                        .when_type_is(EventType::Activity)?
                        .when_order_is(Phase::Output)?;
                    counter.fetch_add(1, Ordering::SeqCst);
                    InterceptResult::Ok(None)
                }
            }),
        )
        .build()
        .unwrap();

    let execution = engine.execute("once", 5).await.unwrap();
    assert_eq!(execution.promise.await.unwrap(), json!(6));
    assert_eq!(outputs.load(Ordering::SeqCst), 1);
}
