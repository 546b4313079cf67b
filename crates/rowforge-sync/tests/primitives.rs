//! Integration tests for the room concurrency primitives, driven from many
//! tasks at once on a multi-threaded runtime.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rowforge_protocol::{ClientId, DisciplinePolicy, QueueOrder};
use rowforge_sync::{
    AccessDiscipline, AccessMode, Gate, LogEvent, LogPipeline, MemorySink, QueuePolicy,
    ReaderWriterLock, SyncError, TurnBarrier, WaitQueue,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_writer_never_overlaps_readers() {
    let rw = Arc::new(ReaderWriterLock::new());
    let readers = Arc::new(AtomicUsize::new(0));
    let writing = Arc::new(AtomicBool::new(false));
    let violations = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for i in 0..16 {
        let rw = Arc::clone(&rw);
        let readers = Arc::clone(&readers);
        let writing = Arc::clone(&writing);
        let violations = Arc::clone(&violations);
        handles.push(tokio::spawn(async move {
            for _ in 0..20 {
                if i % 4 == 0 {
                    let _w = rw.write().await;
                    if writing.swap(true, Ordering::SeqCst) || readers.load(Ordering::SeqCst) > 0 {
                        violations.fetch_add(1, Ordering::SeqCst);
                    }
                    tokio::task::yield_now().await;
                    writing.store(false, Ordering::SeqCst);
                } else {
                    let _r = rw.read().await;
                    readers.fetch_add(1, Ordering::SeqCst);
                    if writing.load(Ordering::SeqCst) {
                        violations.fetch_add(1, Ordering::SeqCst);
                    }
                    tokio::task::yield_now().await;
                    readers.fetch_sub(1, Ordering::SeqCst);
                }
            }
        }));
    }
    for h in handles {
        h.await.expect("task should not panic");
    }
    assert_eq!(violations.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_writer_gets_in_under_reader_pressure() {
    let rw = Arc::new(ReaderWriterLock::new());
    let stop = Arc::new(AtomicBool::new(false));

    let mut readers = Vec::new();
    for _ in 0..8 {
        let rw = Arc::clone(&rw);
        let stop = Arc::clone(&stop);
        readers.push(tokio::spawn(async move {
            while !stop.load(Ordering::SeqCst) {
                let _r = rw.read().await;
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }));
    }
    tokio::time::sleep(Duration::from_millis(10)).await;

    let wrote = tokio::time::timeout(Duration::from_secs(2), rw.write()).await;
    assert!(wrote.is_ok(), "writer starved by a steady stream of readers");
    drop(wrote);

    stop.store(true, Ordering::SeqCst);
    for r in readers {
        r.await.expect("reader should finish");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_barber_discipline_serializes_reads_and_writes() {
    let discipline = Arc::new(AccessDiscipline::for_policy(
        DisciplinePolicy::BarberShop(QueueOrder::DynamicPriority),
        8,
        2,
    ));
    let inside = Arc::new(AtomicUsize::new(0));
    let overlap = Arc::new(AtomicBool::new(false));

    let mut handles = Vec::new();
    for i in 0..8u64 {
        let discipline = Arc::clone(&discipline);
        let inside = Arc::clone(&inside);
        let overlap = Arc::clone(&overlap);
        handles.push(tokio::spawn(async move {
            let mode = if i % 2 == 0 { AccessMode::Read } else { AccessMode::Write };
            for _ in 0..5 {
                let access = discipline
                    .enter_critical_access(ClientId(i), i == 3, mode)
                    .await
                    .expect("shop stays open");
                if inside.fetch_add(1, Ordering::SeqCst) > 0 {
                    overlap.store(true, Ordering::SeqCst);
                }
                tokio::task::yield_now().await;
                inside.fetch_sub(1, Ordering::SeqCst);
                access.leave_critical_access().await;
            }
        }));
    }
    for h in handles {
        h.await.expect("task should not panic");
    }
    assert!(!overlap.load(Ordering::SeqCst), "two clients held the chair at once");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_barrier_keeps_rounds_in_lockstep() {
    const PARTIES: usize = 3;
    const ROUNDS: usize = 9;

    let barrier = Arc::new(TurnBarrier::new(PARTIES));
    let round = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for _ in 0..PARTIES {
        let barrier = Arc::clone(&barrier);
        let round = Arc::clone(&round);
        let seen = Arc::clone(&seen);
        handles.push(tokio::spawn(async move {
            for _ in 0..ROUNDS {
                barrier.start_gate().await.expect("start gate");
                seen.lock().unwrap().push(round.load(Ordering::SeqCst));
                barrier
                    .end_gate_with(|| {
                        round.fetch_add(1, Ordering::SeqCst);
                    })
                    .await
                    .expect("end gate");
            }
        }));
    }
    for h in handles {
        h.await.expect("task should not panic");
    }

    assert_eq!(round.load(Ordering::SeqCst), ROUNDS);
    assert_eq!(barrier.generation(Gate::Start), ROUNDS as u64);
    assert_eq!(barrier.generation(Gate::End), ROUNDS as u64);

    // Everyone observed every round exactly once, and in order.
    let mut seen = seen.lock().unwrap().clone();
    seen.sort_unstable();
    let expected: Vec<usize> = (0..ROUNDS).flat_map(|r| [r; PARTIES]).collect();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn test_log_preserves_order_per_producer_and_blocks_when_full() {
    let sink = Arc::new(MemorySink::new());
    let (producer, consumer) = LogPipeline::spawn(Arc::clone(&sink), 2);

    let mut handles = Vec::new();
    for p in 0..3u64 {
        let producer = producer.clone();
        handles.push(tokio::spawn(async move {
            for n in 0..20 {
                producer
                    .log(LogEvent::server(format!("{n}")).with_client(ClientId(p)))
                    .await
                    .expect("consumer alive");
            }
        }));
    }
    for h in handles {
        h.await.expect("producer should not panic");
    }
    drop(producer);
    assert_eq!(consumer.await.expect("consumer task"), 60);

    let events = sink.events();
    for p in 0..3u64 {
        let ours: Vec<u32> = events
            .iter()
            .filter(|e| e.client_id == Some(ClientId(p)))
            .map(|e| e.message.parse().unwrap())
            .collect();
        assert_eq!(ours, (0..20).collect::<Vec<_>>());
    }
}

#[tokio::test]
async fn test_wait_queue_underflow_and_close() {
    let queue: Arc<WaitQueue<()>> = Arc::new(WaitQueue::new(2, QueuePolicy::fifo()));
    assert!(queue.try_dequeue().is_none());

    let q = Arc::clone(&queue);
    let blocked = tokio::spawn(async move { q.dequeue().await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    queue.close();
    assert!(matches!(blocked.await.unwrap(), Err(SyncError::Closed)));
}
