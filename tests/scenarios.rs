// ==============================================
// W-TINYLFU ADMISSION SCENARIOS (integration)
// ==============================================
//
// End-to-end walks through the window / probation / protected flow of the
// weighted W-TinyLFU. Every scenario uses an exact frequency counter so the
// admission decisions are fully determined by the trace.

use evictsim::config::SimulatorSettings;
use evictsim::ds::SketchKind;
use evictsim::event::AccessEvent;
use evictsim::policy::window_tinylfu::{Segment, VictimSelection, WindowTinyLfu};
use evictsim::traits::Policy;

fn settings(scaled: bool) -> SimulatorSettings {
    SimulatorSettings {
        maximum_size: 100,
        sketch: SketchKind::Perfect,
        scaled,
        ..Default::default()
    }
}

/// Window 20, main 80, protected 64.
fn policy(scaled: bool) -> WindowTinyLfu {
    WindowTinyLfu::new(&settings(scaled), 0.8, VictimSelection::Single).unwrap()
}

fn replay(policy: &mut WindowTinyLfu, trace: &[(u64, u32)]) {
    for &(key, weight) in trace {
        policy.record(AccessEvent::new(key, weight)).unwrap();
        policy.check_invariants().unwrap();
    }
}

/// Keys 1..=8 fill main, 9 and 10 sit in the window.
fn fill(policy: &mut WindowTinyLfu) {
    let trace: Vec<_> = (1..=10).map(|key| (key, 10)).collect();
    replay(policy, &trace);
    assert_eq!(policy.size_main(), 80);
    assert_eq!(policy.size_window(), 20);
}

// ==============================================
// Window
// ==============================================

mod window {
    use super::*;

    #[test]
    fn first_access_lands_in_window() {
        let mut policy = policy(false);
        replay(&mut policy, &[(1, 10)]);

        assert_eq!(policy.segment_of(1), Some(Segment::Window));
        assert_eq!(policy.size_data(), 10);
        assert_eq!(policy.stats().misses(), 1);
        assert_eq!(policy.stats().hits(), 0);
    }

    #[test]
    fn repeat_access_is_a_window_hit() {
        let mut policy = policy(false);
        replay(&mut policy, &[(1, 5), (1, 5)]);

        assert_eq!(policy.segment_of(1), Some(Segment::Window));
        assert_eq!(policy.stats().hits(), 1);
        assert_eq!(policy.stats().misses(), 1);
        assert_eq!(policy.stats().hit_bytes(), 5);
    }
}

// ==============================================
// Admission
// ==============================================

mod admission {
    use super::*;

    #[test]
    fn frequent_candidate_swaps_with_victim() {
        let mut policy = policy(false);
        fill(&mut policy);
        // 9 and 10 reach frequency 3; the window keeps 9 at its head
        replay(&mut policy, &[(9, 10), (9, 10), (10, 10), (10, 10)]);
        let admissions = policy.stats().admissions();
        let evictions = policy.stats().evictions();

        replay(&mut policy, &[(11, 10)]);

        assert!(!policy.contains(1));
        assert_eq!(policy.segment_of(9), Some(Segment::Probation));
        assert_eq!(policy.size_data(), 100);
        assert_eq!(policy.stats().admissions(), admissions + 1);
        assert_eq!(policy.stats().evictions(), evictions + 1);
    }

    #[test]
    fn cold_candidate_is_rejected() {
        let mut policy = policy(false);
        fill(&mut policy);
        // every resident of main reaches frequency 2
        let warm: Vec<_> = (1..=8).map(|key| (key, 10)).collect();
        replay(&mut policy, &warm);
        let size_protected = policy.size_protected();
        let size_main = policy.size_main();
        let rejections = policy.stats().rejections();

        replay(&mut policy, &[(11, 10)]);

        assert!(!policy.contains(9));
        assert_eq!(policy.stats().rejections(), rejections + 1);
        assert_eq!(policy.size_protected(), size_protected);
        assert_eq!(policy.size_main(), size_main);
        assert_eq!(policy.size_window(), 20);
    }
}

// ==============================================
// Scaled Admission
// ==============================================

mod scaled {
    use super::*;

    /// Key 1 (weight 20, frequency 3) heads probation; key 6 (weight 10,
    /// frequency 2) becomes the next candidate.
    fn setup(policy: &mut WindowTinyLfu) {
        replay(policy, &[(1, 20), (1, 20), (1, 20)]);
        let fill: Vec<_> = (2..=5).map(|key| (key, 20)).collect();
        replay(policy, &fill);
        assert_eq!(policy.size_main(), 80);
        // 5 is pushed out by 6 and loses to key 1
        replay(policy, &[(6, 10), (6, 10)]);
        assert!(!policy.contains(5));
        assert_eq!(policy.frequency(6), 2);
        assert_eq!(policy.frequency(1), 3);
    }

    #[test]
    fn frequency_per_byte_admits_lighter_candidate() {
        let mut policy = policy(true);
        setup(&mut policy);

        replay(&mut policy, &[(7, 20)]);

        assert!(!policy.contains(1));
        assert_eq!(policy.segment_of(6), Some(Segment::Probation));
        assert_eq!(policy.size_main(), 70);
    }

    #[test]
    fn raw_frequency_rejects_the_same_candidate() {
        let mut policy = policy(false);
        setup(&mut policy);

        replay(&mut policy, &[(7, 20)]);

        assert!(policy.contains(1));
        assert!(!policy.contains(6));
        assert_eq!(policy.size_main(), 80);
    }
}
