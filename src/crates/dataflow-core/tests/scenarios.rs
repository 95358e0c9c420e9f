//! End-to-end scenarios exercising the public composition API against a
//! small shared set of reference plugins (`Static`, `Agg`, `Cancelable`).

use dataflow_core::{
    create_graph, with_nodes, with_options, with_plugin_registry, Category, ComputeResult,
    EngineOptions, EngineState, NodeDefinition, Plugin, PluginRegistry,
};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio_stream::StreamExt;

fn static_plugin() -> Plugin {
    Plugin::new("Static", Category::Data, |config, _inputs| {
        ComputeResult::Immediate(config.clone())
    })
}

/// Pointwise-sums N arrays of equal length.
fn agg_plugin() -> Plugin {
    Plugin::new("Agg", Category::Operational, |_config, inputs| {
        let arrays: Vec<Vec<i64>> = inputs
            .iter()
            .map(|v| {
                v.as_array()
                    .map(|arr| arr.iter().filter_map(|x| x.as_i64()).collect())
                    .unwrap_or_default()
            })
            .collect();
        let len = arrays.iter().map(|a| a.len()).max().unwrap_or(0);
        let mut summed = vec![0i64; len];
        for arr in &arrays {
            for (i, v) in arr.iter().enumerate() {
                summed[i] += v;
            }
        }
        ComputeResult::Immediate(json!(summed))
    })
}

fn base_registry() -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    registry.register(static_plugin());
    registry.register(agg_plugin());
    registry
}

#[tokio::test]
async fn s1_pointwise_aggregation() {
    let graph = create_graph(vec![
        with_plugin_registry(base_registry()),
        with_nodes([
            NodeDefinition::new("a", "Static").with_config(json!([1, 2])),
            NodeDefinition::new("b", "Static").with_config(json!([3, 4])),
            NodeDefinition::new("agg", "Agg")
                .with_inputs(["a", "b"])
                .subscribed(),
        ]),
    ])
    .await
    .unwrap();

    graph.execute().await.unwrap();

    let stream = graph.observe(&"agg".into()).await.unwrap();
    tokio::pin!(stream);
    let value = stream.next().await.unwrap();
    assert_eq!(value, dataflow_core::Emission::User(json!([4, 6])));
}

#[tokio::test]
async fn s2_diamond_update_recomputes_downstream() {
    let graph = create_graph(vec![
        with_plugin_registry(base_registry()),
        with_nodes([
            NodeDefinition::new("a", "Static").with_config(json!([1, 2])),
            NodeDefinition::new("b", "Static").with_config(json!([3, 4])),
            NodeDefinition::new("c", "Static").with_config(json!([5, 6])),
            NodeDefinition::new("d", "Agg")
                .with_inputs(["b", "c"])
                .subscribed(),
        ]),
    ])
    .await
    .unwrap();

    graph.execute().await.unwrap();
    let stream = graph.observe(&"d".into()).await.unwrap();
    tokio::pin!(stream);
    assert_eq!(
        stream.next().await.unwrap(),
        dataflow_core::Emission::User(json!([8, 10]))
    );

    graph
        .update_graph([
            NodeDefinition::new("a", "Static").with_config(json!([1, 2])),
            NodeDefinition::new("b", "Static").with_config(json!([3, 4])),
            NodeDefinition::new("c", "Static").with_config(json!([10, 20])),
            NodeDefinition::new("d", "Agg")
                .with_inputs(["b", "c"])
                .subscribed(),
        ])
        .await
        .unwrap();

    assert_eq!(
        stream.next().await.unwrap(),
        dataflow_core::Emission::User(json!([13, 24]))
    );
}

#[tokio::test]
async fn s3_cycle_is_rejected_at_construction() {
    let result = create_graph(vec![
        with_plugin_registry(base_registry()),
        with_nodes([
            NodeDefinition::new("a", "Static").with_config(json!(1)),
            NodeDefinition::new("b", "Agg").with_inputs(["a"]),
            NodeDefinition::new("a2", "Agg").with_inputs(["b", "a2"]),
        ]),
    ])
    .await;

    assert!(matches!(
        result,
        Err(dataflow_core::EngineError::CycleError { .. })
    ));
}

#[tokio::test]
async fn s4_error_isolation() {
    let mut registry = base_registry();
    registry.register(Plugin::new("Boom", Category::Operational, |_, _| {
        ComputeResult::Lazy(Box::pin(async { Err("boom".to_string()) }))
    }));

    let graph = create_graph(vec![
        with_plugin_registry(registry),
        with_nodes([
            NodeDefinition::new("err", "Boom").subscribed(),
            NodeDefinition::new("ok", "Static").with_config(json!(42)).subscribed(),
        ]),
    ])
    .await
    .unwrap();

    graph.execute().await.unwrap();

    let err_stream = graph.observe(&"err".into()).await.unwrap();
    tokio::pin!(err_stream);
    assert_eq!(err_stream.next().await.unwrap(), dataflow_core::Emission::null());

    let ok_stream = graph.observe(&"ok".into()).await.unwrap();
    tokio::pin!(ok_stream);
    assert_eq!(ok_stream.next().await.unwrap(), dataflow_core::Emission::User(json!(42)));

    assert!(graph.error_count(&"err".into()).await >= 1);
}

#[tokio::test]
async fn s5_cancel_on_rapid_update() {
    let compute_count = Arc::new(AtomicU32::new(0));
    let success_count = Arc::new(AtomicU32::new(0));
    let mut registry = base_registry();

    let compute_count_clone = compute_count.clone();
    let success_count_clone = success_count.clone();
    registry.register(
        Plugin::new("Cancelable", Category::Operational, move |_config, inputs| {
            compute_count_clone.fetch_add(1, Ordering::SeqCst);
            let success = success_count_clone.clone();
            let input = inputs[0].clone();
            let cancelled = Arc::new(std::sync::atomic::AtomicBool::new(false));
            let cancel_flag = cancelled.clone();
            ComputeResult::Cancelable {
                future: Box::pin(async move {
                    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                    if cancelled.load(Ordering::SeqCst) {
                        return Err("cancelled".to_string());
                    }
                    success.fetch_add(1, Ordering::SeqCst);
                    Ok(input)
                }),
                cancel: Arc::new(move || {
                    cancel_flag.store(true, Ordering::SeqCst);
                }),
            }
        })
        .not_worker_safe(),
    );

    let mut options = EngineOptions::default();
    options.enable_cancelable_compute = true;

    let graph = create_graph(vec![
        with_plugin_registry(registry),
        with_options(options),
        with_nodes([
            NodeDefinition::new("source", "Static").with_config(json!(0)),
            NodeDefinition::new("slow", "Cancelable")
                .with_inputs(["source"])
                .subscribed(),
        ]),
    ])
    .await
    .unwrap();

    graph.execute().await.unwrap();

    for i in 1..=5 {
        graph
            .update_graph([
                NodeDefinition::new("source", "Static").with_config(json!(i)),
                NodeDefinition::new("slow", "Cancelable")
                    .with_inputs(["source"])
                    .subscribed(),
            ])
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }

    tokio::time::sleep(std::time::Duration::from_millis(250)).await;

    assert!(success_count.load(Ordering::SeqCst) <= 1);
}

#[tokio::test]
async fn s6_pause_defers_updates_until_resume() {
    let mut registry = base_registry();
    registry.register(Plugin::new("Multiply", Category::Operational, |config, inputs| {
        let multiplier = config.get("multiplier").and_then(|v| v.as_i64()).unwrap_or(1);
        let input = inputs[0].as_i64().unwrap_or(0);
        ComputeResult::Immediate(json!(input * multiplier))
    }));

    let graph = create_graph(vec![
        with_plugin_registry(registry),
        with_nodes([
            NodeDefinition::new("source", "Static").with_config(json!(1)),
            NodeDefinition::new("terminal", "Multiply")
                .with_config(json!({"multiplier": 3}))
                .with_inputs(["source"])
                .subscribed(),
        ]),
    ])
    .await
    .unwrap();

    graph.execute().await.unwrap();
    graph.pause().await.unwrap();

    let stream = graph.observe(&"terminal".into()).await.unwrap();
    tokio::pin!(stream);
    // Drain the replayed pre-pause value so we observe only post-resume emissions.
    let _ = stream.next().await;

    graph
        .update_graph([
            NodeDefinition::new("source", "Static").with_config(json!(20)),
            NodeDefinition::new("terminal", "Multiply")
                .with_config(json!({"multiplier": 3}))
                .with_inputs(["source"])
                .subscribed(),
        ])
        .await
        .unwrap();

    assert_eq!(graph.get_state().await, EngineState::Paused);

    graph.resume().await.unwrap();
    assert_eq!(graph.get_state().await, EngineState::Running);

    let value = stream.next().await.unwrap();
    assert_eq!(value, dataflow_core::Emission::User(json!(60)));
}
