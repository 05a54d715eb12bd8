use crate::BaselinePolicy;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BaselineDecision {
    Create,
    Skip,
}

/// Pure baseline decision for one scheduler tick.
///
/// `existing` is the number of `baseline` snapshots the catalog reported.
/// The imperative shell performs the capture when this returns `Create`.
pub fn plan_baseline(policy: BaselinePolicy, existing: usize) -> BaselineDecision {
    match policy {
        BaselinePolicy::EveryTick => BaselineDecision::Create,
        BaselinePolicy::FirstOnly if existing == 0 => BaselineDecision::Create,
        BaselinePolicy::FirstOnly => BaselineDecision::Skip,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_only_creates_only_when_empty() {
        assert_eq!(plan_baseline(BaselinePolicy::FirstOnly, 0), BaselineDecision::Create);
        assert_eq!(plan_baseline(BaselinePolicy::FirstOnly, 1), BaselineDecision::Skip);
        assert_eq!(plan_baseline(BaselinePolicy::FirstOnly, 12), BaselineDecision::Skip);
    }

    #[test]
    fn every_tick_always_creates() {
        assert_eq!(plan_baseline(BaselinePolicy::EveryTick, 0), BaselineDecision::Create);
        assert_eq!(plan_baseline(BaselinePolicy::EveryTick, 5), BaselineDecision::Create);
    }
}
