use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use spindle_io::buffer::IoBuf;
use spindle_io::msg_queue::{MessageQueue, SegmentPool};
use spindle_io::queue::BoundedTaskQueue;
use spindle_io::timer::{Timeout, TimerWheel};
use std::{
    sync::{Arc, Barrier},
    thread,
};

fn bench_queue_single_thread(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_single_thread");
    group.throughput(Throughput::Elements(1));

    group.bench_function("offer_poll", |b| {
        let queue: BoundedTaskQueue<usize> = BoundedTaskQueue::new(1024);
        b.iter(|| {
            queue.offer(black_box(1)).unwrap();
            black_box(queue.poll());
        });
    });
    group.finish();
}

fn bench_queue_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_contended");
    const BATCH: usize = 4096;

    for producers in [1usize, 2, 4] {
        group.throughput(Throughput::Elements(BATCH as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(producers),
            &producers,
            |b, &producers| {
                b.iter(|| {
                    let queue: Arc<BoundedTaskQueue<usize>> =
                        Arc::new(BoundedTaskQueue::new(BATCH.next_power_of_two() * 2));
                    let barrier = Arc::new(Barrier::new(producers + 1));
                    let per_producer = BATCH / producers;

                    let handles: Vec<_> = (0..producers)
                        .map(|p| {
                            let queue = Arc::clone(&queue);
                            let barrier = Arc::clone(&barrier);
                            thread::spawn(move || {
                                barrier.wait();
                                for i in 0..per_producer {
                                    queue.offer(p * per_producer + i).unwrap();
                                }
                            })
                        })
                        .collect();

                    barrier.wait();
                    let mut drained = 0;
                    while drained < per_producer * producers {
                        if queue.poll().is_some() {
                            drained += 1;
                        }
                    }
                    for handle in handles {
                        handle.join().unwrap();
                    }
                    black_box(drained);
                });
            },
        );
    }
    group.finish();
}

fn bench_timer_wheel(c: &mut Criterion) {
    let mut group = c.benchmark_group("timer_wheel");
    group.throughput(Throughput::Elements(1));

    group.bench_function("schedule_cancel", |b| {
        let mut wheel = TimerWheel::new(1024, 10);
        b.iter(|| {
            let timeout = Timeout::new(|| {});
            wheel.schedule(&timeout, black_box(500));
            wheel.cancel(&timeout);
        });
    });

    group.bench_function("tick_empty", |b| {
        let mut wheel = TimerWheel::new(1024, 10);
        b.iter(|| {
            wheel.tick();
            black_box(wheel.current_tick());
        });
    });
    group.finish();
}

fn bench_message_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("message_queue");
    const BUFFERS: usize = 2048;
    group.throughput(Throughput::Elements(BUFFERS as u64));

    group.bench_function("push_pop_2048_pooled", |b| {
        let mut pool = SegmentPool::new(4);
        b.iter(|| {
            let mut queue = MessageQueue::new(&mut pool);
            for _ in 0..BUFFERS {
                queue.push(&mut pool, IoBuf::from(&b"x"[..]));
            }
            while queue.pop(&mut pool).is_some() {}
            black_box(queue.len());
            queue.release_all(&mut pool);
        });
    });
    group.finish();
}

fn bench_iobuf_from_vec(c: &mut Criterion) {
    let mut group = c.benchmark_group("iobuf");
    const PAYLOAD: usize = 4096;
    group.throughput(Throughput::Bytes(PAYLOAD as u64));

    group.bench_function("from_vec_4k", |b| {
        b.iter(|| {
            let buf = IoBuf::from(vec![0u8; PAYLOAD]);
            black_box(buf.remaining());
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_queue_single_thread,
    bench_queue_contended,
    bench_timer_wheel,
    bench_message_queue,
    bench_iobuf_from_vec
);
criterion_main!(benches);
