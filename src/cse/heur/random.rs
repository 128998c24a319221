//! Randomized policy for stress runs: shuffle the candidates and perform a
//! uniformly random prefix of them. All randomness comes from the seeded
//! generator, so a given salt reproduces the same decisions.

use crate::cse::{rewrite, CsePass};
use crate::ir::def::Proc;
use crate::rng::Rng;
use crate::vn::VnStore;

pub struct RandomPolicy {
    rng: Rng,
}

impl RandomPolicy {
    pub fn new(seed: u64) -> Self {
        Self { rng: Rng::new(seed) }
    }

    pub fn consider_candidates(&mut self, pass: &mut CsePass, proc: &mut Proc, vn: &mut VnStore) {
        let n = pass.candidate_count;
        if n == 0 {
            return;
        }

        // Inside-out Fisher-Yates permutation of the candidate table.
        let mut tab: Vec<usize> = vec![0; n];
        for i in 0..n {
            let j = self.rng.next(i as u32 + 1) as usize;
            if i != j {
                tab[i] = tab[j];
            }
            tab[j] = pass.cse_tab[i];
        }

        // Perform the first k, k uniform in [1..n].
        let k = self.rng.next(n as u32) as usize + 1;
        for &dsc_id in tab.iter().take(k) {
            pass.attempt += 1;

            if pass.dscs[dsc_id].def_exc_promise.is_none() {
                continue;
            }
            if pass.dscs[dsc_id].use_count == 0 {
                continue;
            }
            // A def-less candidate here means its uses sit in unreachable
            // flow; performing it would produce bad code.
            if pass.dscs[dsc_id].def_count == 0 {
                continue;
            }

            rewrite::perform_cse(pass, proc, vn, dsc_id);
        }
    }
}
