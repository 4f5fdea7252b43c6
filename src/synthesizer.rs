//! Partial-progress synthesis: a randomized walk part of the way from one
//! assignment toward another.

use rand::Rng;
use tracing::{debug, error};

use crate::record::AssignmentSnapshot;
use crate::transition::{TransitionError, TransitionPlanner};

impl TransitionPlanner {
    /// Walk `steps` random single-role transitions from `current` toward `target`.
    ///
    /// Each step picks one unfinished pair uniformly at random and advances it
    /// by one legal transition; a pair leaves the candidate list once it reaches
    /// its target role. Extra steps after every pair has finished are no-ops.
    pub fn synthesize_intermediate<R: Rng + ?Sized>(
        &self,
        current: &AssignmentSnapshot,
        target: &AssignmentSnapshot,
        steps: u32,
        rng: &mut R,
    ) -> Result<AssignmentSnapshot, TransitionError> {
        let mut next = current.clone();
        let mut unfinished = self.find_unfinished_pairs(&next, target)?;

        for step in 0..steps {
            if unfinished.is_empty() {
                debug!(step, steps, "all pairs reached target; remaining steps ignored");
                break;
            }
            let idx = rng.random_range(0..unfinished.len());
            let pair = &unfinished[idx];
            let Some(target_role) = target.role(&pair.partition, &pair.host) else {
                error!(partition = %pair.partition, host = %pair.host, "pair missing from target");
                continue;
            };
            let observed = next.role(&pair.partition, &pair.host);
            let Some(stepped) = self.model().next_step(observed, target_role) else {
                error!(
                    partition = %pair.partition,
                    host = %pair.host,
                    current = observed.unwrap_or("<none>"),
                    target = target_role,
                    "failed to compute next role"
                );
                continue;
            };

            // On arrival keep the target's own spelling of the label.
            let reached = stepped.eq_ignore_ascii_case(target_role);
            let role = if reached { target_role } else { stepped }.to_string();
            next.set_role(pair.partition.clone(), pair.host.clone(), role);
            if reached {
                unfinished.swap_remove(idx);
            }
        }

        debug!(
            steps,
            remaining = unfinished.len(),
            matched = next.matching_roles(target),
            "synthesized intermediate assignment"
        );
        Ok(next)
    }
}

/// Number of steps that represent `percentage` percent of `total`,
/// saturating at `u32::MAX`.
pub fn steps_for_percentage(total: u32, percentage: u32) -> u32 {
    let steps = u64::from(total) * u64::from(percentage) / 100;
    u32::try_from(steps).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_model::StateModel;
    use crate::transition::Strictness;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn planner() -> TransitionPlanner {
        TransitionPlanner::new(StateModel::master_slave(), Strictness::Lenient)
    }

    #[test]
    fn synthesizing_past_total_is_a_no_op() {
        let target: AssignmentSnapshot = [("p0", "h0", "MASTER")].into_iter().collect();
        let mut rng = StdRng::seed_from_u64(7);
        let next = planner()
            .synthesize_intermediate(&AssignmentSnapshot::new(), &target, 10, &mut rng)
            .unwrap();
        assert_eq!(next, target);
    }

    #[test]
    fn percentage_rounds_down() {
        assert_eq!(steps_for_percentage(12, 50), 6);
        assert_eq!(steps_for_percentage(7, 50), 3);
        assert_eq!(steps_for_percentage(7, 0), 0);
        assert_eq!(steps_for_percentage(7, 100), 7);
    }

    #[test]
    fn percentage_saturates_instead_of_wrapping() {
        assert_eq!(steps_for_percentage(u32::MAX, 200), u32::MAX);
        assert_eq!(steps_for_percentage(u32::MAX, 100), u32::MAX);
    }
}
