// tests/event_bus.rs

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use strand::{BusOptions, ContextOptions, DeliveryOptions, ReactorError, Registration};

mod common;

#[test]
fn publish_reaches_every_consumer_exactly_once() {
  let ctx = common::test_context();
  let bus = ctx.bus();
  let (tx, rx) = common::channel();

  let tx_a = tx.clone();
  let _reg_a = bus.consumer("stocks.google", move |msg| {
    tx_a.send(("a", msg.data().map(<[u8]>::to_vec)));
  });
  let tx_b = tx.clone();
  let _reg_b = bus.consumer("stocks.google", move |msg| {
    tx_b.send(("b", msg.data().map(<[u8]>::to_vec)));
  });

  let delivered = bus.publish("stocks.google", vec![42u8]);
  assert_eq!(delivered, 2);

  let mut seen = vec![
    common::recv_within(&rx, common::RECV_TIMEOUT),
    common::recv_within(&rx, common::RECV_TIMEOUT),
  ];
  seen.sort_by_key(|(label, _)| *label);
  assert_eq!(seen[0], ("a", Some(vec![42u8])));
  assert_eq!(seen[1], ("b", Some(vec![42u8])));
  common::assert_no_event(&rx, common::QUIET_WINDOW);
  ctx.term();
}

#[test]
fn ten_consumers_all_observe_a_broadcast() {
  let ctx = common::test_context();
  let bus = ctx.bus();
  let (tx, rx) = common::channel();

  let registrations: Vec<Registration> = (0..10)
    .map(|index| {
      let tx_tick = tx.clone();
      bus.consumer("stocks.google", move |_msg| {
        tx_tick.send(index);
      })
    })
    .collect();
  assert_eq!(bus.consumer_count("stocks.google"), 10);

  let delivered = bus.publish("stocks.google", vec![1u8]);
  assert_eq!(delivered, 10);

  let mut seen: Vec<usize> = (0..10)
    .map(|_| common::recv_within(&rx, common::RECV_TIMEOUT))
    .collect();
  seen.sort_unstable();
  assert_eq!(seen, (0..10).collect::<Vec<_>>());
  common::assert_no_event(&rx, common::QUIET_WINDOW);

  drop(registrations);
  ctx.term();
}

#[test]
fn send_distributes_round_robin() {
  let ctx = common::test_context();
  let bus = ctx.bus();
  let (tx, rx) = common::channel();

  let _registrations: Vec<Registration> = (0..3)
    .map(|index| {
      let tx_hit = tx.clone();
      bus.consumer("jobs", move |_msg| {
        tx_hit.send(index);
      })
    })
    .collect();

  for _ in 0..6 {
    bus.send("jobs", vec![0u8]).expect("send");
  }

  let mut tally: HashMap<usize, usize> = HashMap::new();
  for _ in 0..6 {
    *tally.entry(common::recv_within(&rx, common::RECV_TIMEOUT)).or_insert(0) += 1;
  }
  assert_eq!(tally.len(), 3);
  for (_, count) in tally {
    assert_eq!(count, 2);
  }
  ctx.term();
}

#[test]
fn send_with_no_consumer_reports_or_drops_per_options() {
  let ctx = common::test_context();
  assert!(matches!(
    ctx.bus().send("nowhere", vec![1u8]),
    Err(ReactorError::NoConsumer(address)) if address == "nowhere"
  ));
  ctx.term();

  let silent_ctx = common::test_context_with(ContextOptions {
    bus: BusOptions {
      error_on_unroutable: false,
    },
    ..ContextOptions::default()
  });
  assert!(silent_ctx.bus().send("nowhere", vec![1u8]).is_ok());
  silent_ctx.term();
}

#[test]
fn request_reply_roundtrip() {
  let ctx = common::test_context();
  let bus = ctx.bus();
  let (reply_status_tx, reply_status_rx) = common::channel();

  let status = reply_status_tx.clone();
  let _reg = bus.consumer("chat", move |msg| {
    assert!(msg.expects_reply());
    assert_eq!(msg.data(), Some(&b"hello"[..]));
    status.send(msg.reply(&b"world"[..]));
  });

  let (tx, rx) = common::channel();
  let tx_reply = tx.clone();
  bus
    .request("chat", &b"hello"[..], DeliveryOptions::default())
    .on_complete(move |result| {
      tx_reply.send(result);
    });

  let reply = common::recv_within(&rx, common::RECV_TIMEOUT).expect("reply should arrive");
  assert_eq!(reply.data(), Some(&b"world"[..]));
  assert!(reply.flags().contains(strand::MsgFlags::REPLY));
  assert!(common::recv_within(&reply_status_rx, common::RECV_TIMEOUT).is_ok());
  ctx.term();
}

#[test]
fn request_with_no_consumer_fails_with_no_consumer() {
  let ctx = common::test_context();
  let (tx, rx) = common::channel();

  let tx_reply = tx.clone();
  ctx
    .bus()
    .request("chat", &b"hello"[..], DeliveryOptions::default())
    .on_complete(move |result| {
      tx_reply.send(result);
    });

  match common::recv_within(&rx, common::RECV_TIMEOUT) {
    Err(ReactorError::NoConsumer(address)) => assert_eq!(address, "chat"),
    other => panic!("expected NoConsumer, got {other:?}"),
  }
  ctx.term();
}

#[test]
fn request_times_out_when_nobody_replies() {
  let ctx = common::test_context();
  let bus = ctx.bus();

  let _reg = bus.consumer("slow", |_msg| {
    // Swallow the request without replying.
  });

  let (tx, rx) = common::channel();
  let tx_reply = tx.clone();
  bus
    .request("slow", vec![1u8], DeliveryOptions::with_timeout(Duration::from_millis(100)))
    .on_complete(move |result| {
      tx_reply.send(result);
    });

  match common::recv_within(&rx, common::RECV_TIMEOUT) {
    Err(ReactorError::ReplyTimeout) => {}
    other => panic!("expected ReplyTimeout, got {other:?}"),
  }
  ctx.term();
}

#[test]
fn second_reply_is_rejected() {
  let ctx = common::test_context();
  let bus = ctx.bus();
  let (status_tx, status_rx) = common::channel();

  let status = status_tx.clone();
  let _reg = bus.consumer("echo", move |msg| {
    let first = msg.reply(vec![1u8]);
    let second = msg.reply(vec![2u8]);
    status.send((first, second));
  });

  bus
    .request("echo", vec![0u8], DeliveryOptions::default())
    .on_complete(|_| {});

  let (first, second) = common::recv_within(&status_rx, common::RECV_TIMEOUT);
  assert!(first.is_ok());
  assert_eq!(second, Err(ReactorError::DoubleCompletion));
  ctx.term();
}

#[test]
fn reply_to_a_plain_message_is_invalid() {
  let ctx = common::test_context();
  let bus = ctx.bus();
  let (tx, rx) = common::channel();

  let tx_status = tx.clone();
  let _reg = bus.consumer("fire-and-forget", move |msg| {
    tx_status.send(msg.reply(vec![1u8]));
  });

  bus.send("fire-and-forget", vec![0u8]).expect("send");
  assert!(matches!(
    common::recv_within(&rx, common::RECV_TIMEOUT),
    Err(ReactorError::InvalidState(_))
  ));
  ctx.term();
}

#[test]
fn consumer_unregistering_after_its_delivery_misses_later_publishes() {
  let ctx = common::test_context();
  let bus = ctx.bus();
  let (tx, rx) = common::channel();

  let registration_slot: Arc<Mutex<Option<Registration>>> = Arc::new(Mutex::new(None));

  let slot_in_handler = registration_slot.clone();
  let tx_a = tx.clone();
  let reg_a = bus.consumer("ticker", move |_msg| {
    // Unregister from within the consumer's own delivery, before reporting,
    // so observing "a" implies the registration is already gone.
    if let Some(registration) = slot_in_handler.lock().expect("slot poisoned").as_ref() {
      registration.unregister();
    }
    tx_a.send("a");
  });
  *registration_slot.lock().expect("slot poisoned") = Some(reg_a);

  let tx_b = tx.clone();
  let _reg_b = bus.consumer("ticker", move |_msg| {
    tx_b.send("b");
  });

  assert_eq!(bus.publish("ticker", vec![1u8]), 2);
  let mut first_round = vec![
    common::recv_within(&rx, common::RECV_TIMEOUT),
    common::recv_within(&rx, common::RECV_TIMEOUT),
  ];
  first_round.sort_unstable();
  assert_eq!(first_round, vec!["a", "b"]);

  assert_eq!(bus.publish("ticker", vec![2u8]), 1);
  assert_eq!(common::recv_within(&rx, common::RECV_TIMEOUT), "b");
  common::assert_no_event(&rx, common::QUIET_WINDOW);
  ctx.term();
}
