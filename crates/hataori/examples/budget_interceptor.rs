//! Interceptors enforcing a spending budget.
//!
//! Every `charge` activity records its cost as activity data and adds it to
//! a running total kept in the workflow's additional data. A second
//! interceptor aborts the workflow once the total would exceed the budget.

use hataori::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

const BUDGET: i64 = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Order {
    items: Vec<i64>,
}

fn spent(collector: &EventCollector) -> i64 {
    collector.event().workflow_operation().additional_data["spent"]
        .as_i64()
        .unwrap_or(0)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let storage = Arc::new(MemoryStorage::new());
    let engine = WorkflowEngine::builder()
        .provider(
            "billing",
            FunctionProvider::new().activity("charge", |amount: i64| async move {
                Ok(json!({ "charged": amount }))
            }),
        )
        .workflow(
            "checkout",
            workflow_fn(|executor: ActivityExecutor, order: Order| async move {
                let mut receipts = Vec::new();
                for amount in order.items {
                    receipts.push(executor.call("billing", "charge", amount).await?);
                }
                Ok::<_, WorkflowError>(receipts)
            }),
        )
        .interceptor(
            "budget",
            interceptor_fn(|collector: EventCollector| async move {
                let collector = collector
                    .when_type_is(EventType::Activity)?
                    .when_order_is(Phase::Input)?
                    .when_activity_name_is("charge")?;
                let amount = collector.event().operation.input.as_i64().unwrap_or(0);
                if spent(&collector) + amount > BUDGET {
                    return InterceptResult::Err(
                        collector.commands().exit("budget exceeded").into(),
                    );
                }
                InterceptResult::Ok(None)
            }),
        )
        .interceptor(
            "ledger",
            interceptor_fn(|collector: EventCollector| async move {
                let collector = collector
                    .when_type_is(EventType::Activity)?
                    .when_order_is(Phase::Output)?;
                let amount = collector.event().operation.input.as_i64().unwrap_or(0);
                let total = spent(&collector) + amount;
                let changes = collector
                    .commands()
                    .returns()
                    .set_additional_data(|_, _| json!({ "cost": amount }))?
                    .set_workflow_additional_data(|_, _| json!({ "spent": total }))?
                    .into_changes();
                InterceptResult::Ok(Some(changes))
            }),
        )
        .storage("memory", Arc::clone(&storage))
        .storage_selector(|_| Some("memory".to_string()))
        .build()?;

    for items in [vec![30, 40], vec![60, 70]] {
        let execution = engine.execute("checkout", Order { items }).await?;
        match execution.promise.clone().await {
            Ok(receipts) => println!("Checkout {} succeeded: {}", execution.workflow_id, receipts),
            Err(error) => eprintln!("Checkout {} failed: {}", execution.workflow_id, error),
        }
        let data = storage
            .get_workflow_additional_data(&"checkout".into(), &execution.workflow_id)
            .await?;
        println!("Ledger: {}", data.unwrap_or_default());
    }

    Ok(())
}
