//! Delivery-contract tests for the in-process bus.

use hive_bus::{MemoryBus, MessageBus};
use hive_event::{polarity, Envelope, Meta, Payload};
use hive_types::{AgentName, SessionId, TopicName};
use serde_json::json;
use std::collections::HashSet;

fn producer() -> AgentName {
    AgentName::new("producer").unwrap()
}

fn event(tool: &str) -> Envelope {
    Envelope::tool_call(
        producer(),
        tool,
        json!({}),
        Meta::new(SessionId::new("hive-test")),
    )
}

/// Two consumers in one group over 100 events: every event id is seen
/// at least once across the pair.
#[tokio::test]
async fn at_least_once_across_group_members() {
    let bus = MemoryBus::new();
    let topic = TopicName::new("t6");

    let a = bus.subscribe(&topic, "workers").await.unwrap();
    let b = bus.subscribe(&topic, "workers").await.unwrap();

    let mut published = HashSet::new();
    for i in 0..100 {
        let e = event(&format!("tool-{i}"));
        published.insert(e.id);
        bus.publish(&topic, e).await.unwrap();
    }

    let mut seen = HashSet::new();
    loop {
        let next = a.try_recv().or_else(|| b.try_recv());
        match next {
            Some(e) => {
                seen.insert(e.id);
            }
            None => break,
        }
    }

    assert!(seen.len() >= 100);
    for id in &published {
        assert!(seen.contains(id), "event {id} was never delivered");
    }
}

/// One producer's publish order is observed in order by a subscriber.
#[tokio::test]
async fn per_producer_order_preserved() {
    let bus = MemoryBus::new();
    let topic = TopicName::new("ordered");
    let sub = bus.subscribe(&topic, "g").await.unwrap();

    for i in 0..50 {
        bus.publish(&topic, event(&format!("{i}"))).await.unwrap();
    }

    for i in 0..50 {
        let e = sub.recv().await.unwrap();
        match e.payload {
            Payload::ToolCall(ref p) => assert_eq!(p.tool, format!("{i}")),
            ref other => panic!("unexpected payload: {other:?}"),
        }
    }
}

/// A conforming consumer filtering at threshold τ sees exactly the
/// events with polarity ≥ τ or no polarity at all.
#[tokio::test]
async fn polarity_filter_selects_exactly() {
    let bus = MemoryBus::new();
    let topic = TopicName::new("filtered");
    let sub = bus.subscribe(&topic, "g").await.unwrap();

    let threshold = -0.5;
    let polarities = [
        Some(-1.0),
        Some(-0.6),
        Some(-0.5),
        Some(0.0),
        Some(1.0),
        None,
    ];
    for (i, p) in polarities.iter().enumerate() {
        let mut e = event(&format!("{i}"));
        if let Some(p) = p {
            e = e.with_polarity(*p).unwrap();
        }
        bus.publish(&topic, e).await.unwrap();
    }

    let mut kept = Vec::new();
    while let Some(e) = sub.try_recv() {
        if polarity::passes(e.polarity, threshold) {
            kept.push(e.polarity);
        }
    }

    assert_eq!(kept, vec![Some(-0.5), Some(0.0), Some(1.0), None]);
}

/// Different groups each receive a full copy of the stream.
#[tokio::test]
async fn distinct_groups_get_every_event() {
    let bus = MemoryBus::new();
    let topic = TopicName::new("fanout");
    let g1 = bus.subscribe(&topic, "one").await.unwrap();
    let g2 = bus.subscribe(&topic, "two").await.unwrap();

    for i in 0..10 {
        bus.publish(&topic, event(&format!("{i}"))).await.unwrap();
    }

    for _ in 0..10 {
        assert!(g1.recv().await.is_some());
        assert!(g2.recv().await.is_some());
    }
}
