use super::tsc::Tsc;
use super::{Task, Timespec};

#[test]
fn test_diff_borrows_nsec() {
    let a = Timespec::new(10, 100);
    let b = Timespec::new(9, 900_000_000);

    let d = a.diff(&b);
    assert_eq!(d.sec, 0);
    assert_eq!(d.nsec, 100_000_100);
}

#[test]
fn test_add_carries_nsec() {
    let a = Timespec::new(1, 800_000_000);
    let b = Timespec::new(0, 400_000_000);

    let s = a.add(&b);
    assert_eq!(s.sec, 2);
    assert_eq!(s.nsec, 200_000_000);
}

#[test]
fn test_secs_f64_round_trip() {
    let ts = Timespec::from_secs_f64(1000.25);
    assert_eq!(ts.sec, 1000);
    assert_eq!(ts.nsec, 250_000_000);
    assert!((ts.to_secs_f64() - 1000.25).abs() < 1e-9);
}

#[test]
fn test_ordering() {
    let a = Timespec::new(1, 0);
    let b = Timespec::new(1, 1);
    let c = Timespec::new(2, 0);

    assert!(a < b);
    assert!(b < c);
    assert_eq!(a, Timespec::new(1, 0));
}

#[test]
fn test_task_periodic_rate() {
    let task = Task::periodic().unwrap();
    task.set_rate(100.0).unwrap();

    let start = Timespec::mono_now();
    let mut ticks = 0;
    while ticks < 5 {
        ticks += task.wait().unwrap();
    }
    let elapsed = Timespec::mono_now().delta(&start);

    // 5 ticks at 100 Hz take about 50 ms.
    assert!(elapsed >= 0.04, "elapsed {elapsed}");
    assert!(elapsed < 0.5, "elapsed {elapsed}");
}

#[test]
fn test_task_missed_ticks_accumulate() {
    let task = Task::periodic().unwrap();
    task.set_rate(1000.0).unwrap();

    std::thread::sleep(std::time::Duration::from_millis(20));

    // All expirations since arming are reported at once.
    let ticks = task.wait().unwrap();
    assert!(ticks >= 10, "ticks {ticks}");
}

#[test]
fn test_tsc_monotone() {
    let tsc = Tsc::new();

    let a = tsc.now();
    let b = tsc.now();
    assert!(b >= a);

    assert!(tsc.frequency() > 0);
    assert!(tsc.cycles_from_rate(1000.0) > 0);
}
