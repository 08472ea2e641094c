use crate::timeout::TimeoutQueue;
use embassy_time::{Duration, Instant};

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

fn start() -> Instant {
    Instant::from_millis(1_000)
}

#[test]
fn test_empty_queue() {
    let mut queue: TimeoutQueue<u32> = TimeoutQueue::new(start());
    assert!(queue.is_empty());
    assert_eq!(None, queue.time_to_next(start()));
    assert_eq!(None, queue.pop_due(start() + ms(1_000)));
}

#[test]
fn test_fires_in_due_order() {
    let mut queue = TimeoutQueue::new(start());
    queue.add(start(), ms(200), 200);
    queue.add(start(), ms(50), 50);
    queue.add(start(), ms(100), 100);
    assert_eq!(3, queue.len());

    assert_eq!(Some(ms(50)), queue.time_to_next(start()));
    assert_eq!(None, queue.pop_due(start() + ms(49)));
    assert_eq!(Some(50), queue.pop_due(start() + ms(50)));

    assert_eq!(Some(ms(40)), queue.time_to_next(start() + ms(60)));
    assert_eq!(None, queue.pop_due(start() + ms(60)));

    // Serviced late, the next one keeps its due time
    assert_eq!(Some(100), queue.pop_due(start() + ms(120)));
    assert_eq!(Some(ms(80)), queue.time_to_next(start() + ms(120)));
    assert_eq!(Some(200), queue.pop_due(start() + ms(200)));
    assert!(queue.is_empty());
}

#[test]
fn test_equal_times_keep_insertion_order() {
    let mut queue = TimeoutQueue::new(start());
    queue.add(start(), ms(10), 1);
    queue.add(start(), ms(10), 2);

    assert_eq!(Some(1), queue.pop_due(start() + ms(10)));
    assert_eq!(Some(2), queue.pop_due(start() + ms(10)));
}

#[test]
fn test_overdue_head_reports_zero() {
    let mut queue = TimeoutQueue::new(start());
    queue.add(start(), ms(10), 1);
    assert_eq!(Some(ms(0)), queue.time_to_next(start() + ms(500)));
}

#[test]
fn test_add_later_counts_from_last_service() {
    let mut queue = TimeoutQueue::new(start());
    queue.add(start(), ms(100), 1);
    queue.add(start() + ms(30), ms(100), 2);

    assert_eq!(Some(1), queue.pop_due(start() + ms(100)));
    assert_eq!(Some(ms(30)), queue.time_to_next(start() + ms(100)));
    assert_eq!(None, queue.pop_due(start() + ms(129)));
    assert_eq!(Some(2), queue.pop_due(start() + ms(130)));
}

#[test]
fn test_remove_keeps_successor_due_time() {
    let mut queue = TimeoutQueue::new(start());
    queue.add(start(), ms(50), 50);
    queue.add(start(), ms(100), 100);
    queue.add(start(), ms(200), 200);

    assert_eq!(Some(100), queue.remove(|item| *item == 100));
    assert_eq!(None, queue.remove(|item| *item == 100));

    assert_eq!(Some(50), queue.pop_due(start() + ms(50)));
    assert_eq!(Some(ms(150)), queue.time_to_next(start() + ms(50)));
    assert_eq!(Some(200), queue.pop_due(start() + ms(200)));
}

#[test]
fn test_remove_head() {
    let mut queue = TimeoutQueue::new(start());
    queue.add(start(), ms(50), 50);
    queue.add(start(), ms(100), 100);

    assert_eq!(Some(50), queue.remove(|item| *item == 50));
    assert_eq!(Some(ms(100)), queue.time_to_next(start()));
}
