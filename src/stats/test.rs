use super::{Hist, Metric, StatType, Stats};

#[test]
fn test_hist_moments_welford() {
    let mut h = Hist::with_range(10, 0, 0.0, 10.0);
    for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
        h.put(v);
    }

    assert!((h.mean() - 5.0).abs() < 1e-12);
    // Sample variance with n-1 in the denominator.
    assert!((h.var() - 4.571428571428571).abs() < 1e-9);
    assert!((h.stddev() - h.var().sqrt()).abs() < 1e-12);
    assert_eq!(h.total(), 8);
}

#[test]
fn test_hist_out_of_range() {
    let mut h = Hist::with_range(4, 0, 0.0, 4.0);
    h.put(-1.0);
    h.put(0.5);
    h.put(3.5);
    h.put(10.0);

    assert_eq!(h.lower(), 1);
    assert_eq!(h.higher(), 1);
    assert_eq!(h.buckets()[0], 1);
    assert_eq!(h.buckets()[3], 1);

    assert_eq!(h.highest(), 10.0);
    assert_eq!(h.lowest(), -1.0);
}

#[test]
fn test_hist_warmup_excluded_from_moments() {
    let mut h = Hist::with_range(10, 2, 0.0, 10.0);

    // Two outliers during warmup, then stable values.
    h.put(9.0);
    h.put(9.0);
    for _ in 0..10 {
        h.put(1.0);
    }

    assert_eq!(h.total(), 12);
    assert!((h.mean() - 1.0).abs() < 1e-12);
    assert_eq!(h.buckets().iter().sum::<u64>(), 10);
    // Warmup values are still recorded in the extrema.
    assert_eq!(h.highest(), 9.0);
}

#[test]
fn test_hist_reset() {
    let mut h = Hist::new(10, 0);
    h.put(0.5);
    h.reset();

    assert_eq!(h.total(), 0);
    assert!(h.mean().is_nan());
    assert!(h.last().is_nan());
}

#[test]
fn test_stats_get_by_type() {
    let stats = Stats::new(20, 0);
    stats.update(Metric::Owd, 0.1);
    stats.update(Metric::Owd, 0.3);

    assert!((stats.get(Metric::Owd, StatType::Mean) - 0.2).abs() < 1e-12);
    assert_eq!(stats.get(Metric::Owd, StatType::Last), 0.3);
    assert_eq!(stats.get(Metric::Owd, StatType::Highest), 0.3);
    assert_eq!(stats.get(Metric::Owd, StatType::Total), 2.0);

    // Untouched metric reads as NaN.
    assert!(stats.get(Metric::Gap, StatType::Mean).is_nan());
}

#[test]
fn test_stats_reset_clears_counters() {
    use std::sync::atomic::Ordering;

    let stats = Stats::new(20, 0);
    stats.counters.reorder_dropped.fetch_add(3, Ordering::Relaxed);
    stats.update(Metric::Gap, 1.0);

    stats.reset();

    assert_eq!(stats.counters.reorder_dropped.load(Ordering::Relaxed), 0);
    assert_eq!(stats.get(Metric::Gap, StatType::Total), 0.0);
}

#[test]
fn test_metric_names() {
    assert_eq!(Metric::from_str("owd"), Some(Metric::Owd));
    assert_eq!(Metric::from_str("gap"), Some(Metric::Gap));
    assert_eq!(Metric::from_str("sequence"), Some(Metric::SequenceDistance));
    assert_eq!(Metric::from_str("bogus"), None);
    assert_eq!(StatType::from_str("stddev"), Some(StatType::Stddev));
}
