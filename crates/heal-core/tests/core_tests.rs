use heal_core::{
    plan_baseline, sort_newest_first, AttemptOutcome, BaselineDecision, BaselinePolicy, CandidateAttempt,
    CriticalFileSet, RejectReason, Snapshot, SnapshotId, Tag,
};
use time::macros::datetime;

#[test]
fn test_snapshot_has_tag() {
    let snap = Snapshot {
        id: SnapshotId::from_str("a1"),
        time: datetime!(2024-05-01 08:00 UTC),
        tags: vec![Tag::Baseline, Tag::Other("host-a".into())],
        paths: vec!["/srv/data".into()],
    };
    assert!(snap.has_tag(&Tag::Baseline));
    assert!(!snap.has_tag(&Tag::Auto));
}

#[test]
fn test_sort_ignores_input_order() {
    let times = [
        datetime!(2024-05-01 08:00 UTC),
        datetime!(2024-05-03 08:00 UTC),
        datetime!(2024-05-02 08:00 UTC),
        datetime!(2024-04-30 08:00 UTC),
    ];
    let mut snaps: Vec<Snapshot> = times
        .iter()
        .enumerate()
        .map(|(i, t)| Snapshot { id: SnapshotId::from_str(format!("s{i}")), time: *t, tags: vec![], paths: vec![] })
        .collect();
    sort_newest_first(&mut snaps);
    assert!(snaps.windows(2).all(|w| w[0].time >= w[1].time));
    assert_eq!(snaps[0].id.as_str(), "s1");
}

#[test]
fn test_critical_file_set_iter() {
    let set = CriticalFileSet::new(["docs/report_Q1.txt", "docs/users.txt"]);
    let v: Vec<_> = set.iter().map(|p| p.to_string_lossy().into_owned()).collect();
    assert_eq!(v, ["docs/report_Q1.txt", "docs/users.txt"]);
    assert!(!set.is_empty());
}

#[test]
fn test_candidate_attempt_promoted_flag() {
    let snap = Snapshot {
        id: SnapshotId::from_str("c0ffee"),
        time: datetime!(2024-05-01 08:00 UTC),
        tags: vec![Tag::Baseline],
        paths: vec![],
    };
    let ok = CandidateAttempt::new(&snap, "/s/c0ffee".into(), AttemptOutcome::Promoted);
    let bad = CandidateAttempt::new(&snap, "/s/c0ffee".into(), AttemptOutcome::Rejected(RejectReason::DataRootNotFound));
    assert!(ok.is_promoted());
    assert!(!bad.is_promoted());
}

#[test]
fn test_default_policy_is_first_only() {
    assert_eq!(BaselinePolicy::default(), BaselinePolicy::FirstOnly);
    assert_eq!(plan_baseline(BaselinePolicy::default(), 3), BaselineDecision::Skip);
}
