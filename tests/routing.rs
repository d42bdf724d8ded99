// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

use broker::{
    delivery::{DeadLetterReason, Delivery},
    dispatcher::{handler_fn, SubscribeOptions},
    exchange::ExchangeKind,
    queue::QueueDefinition,
    router::MessageCategory,
    Broker, BrokerError, HandlerError, Message,
};
use serde::{Deserialize, Serialize};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::mpsc;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct EmailTask {
    to: String,
    subject: String,
}

async fn settle(broker: &Broker, queue: &str) {
    for _ in 0..200 {
        if broker.in_flight(queue) == 0 && broker.queue_depth(queue) == Some(0) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("queue {queue} did not drain");
}

#[tokio::test]
async fn direct_task_is_delivered_once_and_acked() {
    let broker = Broker::new();
    broker.declare_exchange("tasks", ExchangeKind::Direct).unwrap();
    broker.declare_queue(&QueueDefinition::new("task_queue")).unwrap();
    broker.bind("tasks", "task_queue", "task.email").unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handler = handler_fn(move |d: Delivery| {
        let tx = tx.clone();
        async move {
            let task: EmailTask = d.decode()?;
            tx.send((d.category.clone(), task)).unwrap();
            Ok::<_, HandlerError>(())
        }
    });
    let handle = broker
        .subscribe("task_queue", handler, broker.subscribe_options())
        .await
        .unwrap();

    let task = EmailTask {
        to: "user@example.com".to_owned(),
        subject: "Welcome".to_owned(),
    };
    let reached = broker
        .publish(
            "tasks",
            "task.email",
            Message::json(&task).unwrap().persistent().priority(5).build(),
        )
        .unwrap();
    assert_eq!(reached, 1);

    let (category, received) = rx.recv().await.unwrap();
    assert_eq!(category, MessageCategory::Task);
    assert_eq!(received, task);

    settle(&broker, "task_queue").await;
    assert!(rx.try_recv().is_err());
    handle.cancel().await;
}

#[tokio::test]
async fn fanout_gives_each_queue_one_copy() {
    let broker = Broker::new();
    broker.declare_exchange("broadcast", ExchangeKind::Fanout).unwrap();
    let queues = ["email", "sms", "push", "audit"];
    for q in queues {
        broker.declare_queue(&QueueDefinition::new(q)).unwrap();
        broker.bind("broadcast", q, "").unwrap();
    }

    assert_eq!(
        broker
            .publish("broadcast", "ignored", Message::builder("hello").build())
            .unwrap(),
        queues.len()
    );

    for q in queues {
        let mut consumer = broker.consume(q, 0).unwrap();
        let d = futures_util::StreamExt::next(&mut consumer.stream).await.unwrap();
        assert_eq!(d.message.payload(), b"hello");
        broker.ack(d.tag).unwrap();
        assert_eq!(broker.queue_depth(q), Some(0));
    }
}

#[tokio::test]
async fn topic_exchange_routes_analytics_events() {
    let broker = Broker::new();
    broker.declare_exchange("analytics", ExchangeKind::Topic).unwrap();
    for (queue, pattern) in [
        ("logins", "analytics.*.login"),
        ("user_events", "analytics.user.*"),
        ("everything", "analytics.#"),
    ] {
        broker.declare_queue(&QueueDefinition::new(queue)).unwrap();
        broker.bind("analytics", queue, pattern).unwrap();
    }

    let publish = |key: &str| {
        broker
            .publish("analytics", key, Message::builder(key).build())
            .unwrap()
    };
    assert_eq!(publish("analytics.user.login"), 3);
    assert_eq!(publish("analytics.admin.login"), 2);
    assert_eq!(publish("analytics.user.purchase"), 2);
    assert_eq!(publish("analytics"), 1);
    assert_eq!(publish("billing.invoice"), 0);

    assert_eq!(broker.queue_depth("logins"), Some(2));
    assert_eq!(broker.queue_depth("user_events"), Some(2));
    assert_eq!(broker.queue_depth("everything"), Some(4));
}

#[tokio::test]
async fn failing_handler_gets_one_retry_then_dead_letters() {
    let broker = Broker::new();
    broker.declare_queue(&QueueDefinition::new("jobs")).unwrap();
    let mut dead = broker.dead_letters();

    let attempts = Arc::new(Mutex::new(vec![]));
    let seen = attempts.clone();
    let handler = handler_fn(move |d: Delivery| {
        seen.lock().unwrap().push(d.redelivered);
        async { Err::<(), _>(HandlerError::failed("always fails")) }
    });
    let handle = broker
        .subscribe("jobs", handler, SubscribeOptions::new(1))
        .await
        .unwrap();

    broker
        .publish("", "jobs", Message::builder("job").build())
        .unwrap();

    let letter = tokio::time::timeout(Duration::from_secs(1), dead.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(letter.reason, DeadLetterReason::RetriesExhausted);
    assert_eq!(letter.message.payload(), b"job");

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(*attempts.lock().unwrap(), vec![false, true]);
    assert_eq!(broker.queue_depth("jobs"), Some(0));
    handle.cancel().await;
}

#[tokio::test]
async fn malformed_payload_is_dead_lettered_without_retry() {
    let broker = Broker::new();
    broker.declare_queue(&QueueDefinition::new("emails")).unwrap();
    let mut dead = broker.dead_letters();

    let handler = handler_fn(|d: Delivery| async move {
        let _task: EmailTask = d.decode()?;
        Ok::<_, HandlerError>(())
    });
    let handle = broker
        .subscribe("emails", handler, SubscribeOptions::new(1))
        .await
        .unwrap();

    broker
        .publish("", "emails", Message::builder("{broken").build())
        .unwrap();

    let letter = tokio::time::timeout(Duration::from_secs(1), dead.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(letter.reason, DeadLetterReason::Rejected);
    handle.cancel().await;
}

#[tokio::test]
async fn manual_ack_mode_waits_for_the_caller() {
    let broker = Broker::new();
    broker.declare_queue(&QueueDefinition::new("manual")).unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handler = handler_fn(move |d: Delivery| {
        let tx = tx.clone();
        async move {
            tx.send(d.tag).unwrap();
            Ok::<_, HandlerError>(())
        }
    });
    let handle = broker
        .subscribe("manual", handler, SubscribeOptions::new(1).manual())
        .await
        .unwrap();

    broker.publish("", "manual", Message::builder("a").build()).unwrap();
    broker.publish("", "manual", Message::builder("b").build()).unwrap();

    let first = rx.recv().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(broker.in_flight("manual"), 1);

    broker.ack(first).unwrap();
    let second = rx.recv().await.unwrap();
    broker.ack(second).unwrap();
    settle(&broker, "manual").await;
    handle.cancel().await;
}

#[tokio::test]
async fn cancelled_subscription_returns_unsettled_messages() {
    let broker = Broker::new();
    broker.declare_queue(&QueueDefinition::new("work")).unwrap();

    let handler = handler_fn(|_d: Delivery| async { Ok::<_, HandlerError>(()) });
    let handle = broker
        .subscribe("work", handler, SubscribeOptions::new(1).manual())
        .await
        .unwrap();
    broker.publish("", "work", Message::builder("x").build()).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(broker.in_flight("work"), 1);

    handle.cancel().await;
    assert_eq!(broker.consumer_count("work"), 0);
    assert_eq!(broker.in_flight("work"), 0);

    let mut consumer = broker.consume("work", 1).unwrap();
    let again = futures_util::StreamExt::next(&mut consumer.stream).await.unwrap();
    assert!(again.redelivered);
}

#[test]
fn declarations_are_idempotent_and_conflicts_are_reported() {
    let broker = Broker::new();
    broker.declare_exchange("x", ExchangeKind::Direct).unwrap();
    broker.declare_exchange("x", ExchangeKind::Direct).unwrap();
    assert!(matches!(
        broker.declare_exchange("x", ExchangeKind::Topic),
        Err(BrokerError::TopologyConflict { .. })
    ));

    broker.declare_queue(&QueueDefinition::new("q")).unwrap();
    broker.declare_queue(&QueueDefinition::new("q")).unwrap();
    broker.bind("x", "q", "k").unwrap();
    broker.bind("x", "q", "k").unwrap();
    assert_eq!(
        broker.publish("x", "k", Message::builder("m").build()),
        Ok(1)
    );
}

#[test]
fn bounded_queue_signals_back_pressure() {
    let broker = Broker::new();
    broker
        .declare_queue(&QueueDefinition::new("small").max_length(2))
        .unwrap();

    for _ in 0..2 {
        broker.publish("", "small", Message::builder("m").build()).unwrap();
    }
    assert_eq!(
        broker.publish("", "small", Message::builder("m").build()),
        Err(BrokerError::QueueFull("small".to_owned()))
    );
}
