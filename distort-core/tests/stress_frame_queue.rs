//! Stress tests for the bounded frame queue
//!
//! Run with: cargo test --release --test stress_frame_queue -- --nocapture

use distort_core::data::{BoundedFrameQueue, QueueFull};
use distort_core::protocol::{FrameType, WireFrame};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn numbered(producer: usize, seq: usize) -> WireFrame {
    WireFrame::new(FrameType::JobData, format!("{}:{}", producer, seq))
}

fn parse(frame: &WireFrame) -> (usize, usize) {
    let text = frame.payload_str().unwrap();
    let (p, s) = text.split_once(':').unwrap();
    (p.parse().unwrap(), s.parse().unwrap())
}

/// Many producers against one consumer through a small queue
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stress_many_producers_one_consumer() {
    let producers = 4;
    let per_producer = 2_000;
    let queue = Arc::new(BoundedFrameQueue::new(32));

    let start = Instant::now();
    let mut tasks = Vec::new();
    for p in 0..producers {
        let queue = queue.clone();
        tasks.push(tokio::spawn(async move {
            let mut rejected = 0u64;
            for seq in 0..per_producer {
                let mut frame = numbered(p, seq);
                loop {
                    match queue.enqueue(frame) {
                        Ok(()) => break,
                        Err(QueueFull(back)) => {
                            rejected += 1;
                            frame = back;
                            tokio::task::yield_now().await;
                        }
                    }
                }
            }
            rejected
        }));
    }

    let consumer = {
        let queue = queue.clone();
        tokio::spawn(async move {
            let mut next: HashMap<usize, usize> = HashMap::new();
            let mut total = 0;
            while let Some(frame) = queue.dequeue().await {
                let (p, seq) = parse(&frame);
                let expected = next.entry(p).or_insert(0);
                assert_eq!(seq, *expected, "producer {} reordered", p);
                *expected += 1;
                total += 1;
            }
            total
        })
    };

    let mut rejected = 0;
    for task in tasks {
        rejected += task.await.unwrap();
    }
    queue.close();
    let total = consumer.await.unwrap();

    let elapsed = start.elapsed();
    println!(
        "{} frames through capacity {} in {:?} ({} full rejections)",
        total,
        queue.capacity(),
        elapsed,
        rejected
    );
    assert_eq!(total, producers * per_producer);
    assert!(queue.is_empty());
}

/// Consumers blocked on an empty queue are released by close
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stress_close_releases_waiting_consumers() {
    let queue = Arc::new(BoundedFrameQueue::new(4));

    let waiters: Vec<_> = (0..16)
        .map(|_| {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(20)).await;
    queue.close();

    for waiter in waiters {
        let got = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("consumer stayed blocked after close")
            .unwrap();
        assert!(got.is_none());
    }
    assert!(queue.enqueue(WireFrame::empty(FrameType::Disconnect)).is_err());
}

/// Frames queued before close are still delivered
#[tokio::test]
async fn stress_close_drains_backlog() {
    let queue = BoundedFrameQueue::new(8);
    for seq in 0..8 {
        queue.enqueue(numbered(0, seq)).unwrap();
    }
    assert!(queue.enqueue(numbered(0, 8)).is_err());
    queue.close();

    let mut seen = 0;
    while let Some(frame) = queue.dequeue().await {
        assert_eq!(parse(&frame), (0, seen));
        seen += 1;
    }
    assert_eq!(seen, 8);
}
