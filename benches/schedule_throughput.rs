// benches/schedule_throughput.rs

use std::sync::mpsc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use strand::Context;

const BATCH: u64 = 1024;

fn bench_schedule(c: &mut Criterion) {
  let ctx = Context::new().expect("create context");
  let event_loop = ctx.event_loop();

  let mut group = c.benchmark_group("event_loop");
  group.throughput(Throughput::Elements(BATCH));
  group.bench_function("schedule_batch", |b| {
    b.iter(|| {
      let (tx, rx) = mpsc::channel();
      for _ in 0..BATCH - 1 {
        event_loop.schedule(|| {}).expect("schedule");
      }
      event_loop
        .schedule(move || {
          tx.send(()).expect("signal drain");
        })
        .expect("schedule sentinel");
      rx.recv_timeout(Duration::from_secs(30)).expect("drain batch");
    })
  });
  group.finish();
  ctx.term();
}

fn bench_publish(c: &mut Criterion) {
  let ctx = Context::new().expect("create context");
  let bus = ctx.bus().clone();
  let _reg = bus.consumer("bench.topic", |_msg| {});

  let mut group = c.benchmark_group("event_bus");
  group.throughput(Throughput::Elements(BATCH));
  group.bench_function("publish_batch", |b| {
    b.iter(|| {
      for _ in 0..BATCH {
        bus.publish("bench.topic", &b"tick"[..]);
      }
    })
  });
  group.finish();
  ctx.term();
}

criterion_group!(benches, bench_schedule, bench_publish);
criterion_main!(benches);
