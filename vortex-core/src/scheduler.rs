//! Fair round-robin job scheduler (spec.md §4.5).
//!
//! Interleaves each instrument's job queue, drawing more jobs per round
//! from instruments with longer roll cycles — a crude load-balancing
//! heuristic the spec keeps without requiring a particular weighting
//! (spec.md §9 Open Question).

use crate::planner::DownloadJob;
use std::collections::BTreeMap;
use std::collections::VecDeque;

/// Draws per round for a given roll-cycle length (spec.md §4.5 table).
fn draws_for_cycle_len(len: usize) -> usize {
    match len {
        0 => 1,
        1..=7 => 1,
        8..=10 => 2,
        _ => 3,
    }
}

/// Flatten `plans` (instrument key -> job queue, in drain order — i.e.
/// already reversed by the planner so jobs pop from the tail) into a single
/// fair schedule. `cycle_lens` gives each instrument's roll-cycle length
/// (0 for stocks/forex).
pub fn schedule(
    mut plans: BTreeMap<String, Vec<DownloadJob>>,
    cycle_lens: &BTreeMap<String, usize>,
) -> Vec<DownloadJob> {
    let total: usize = plans.values().map(|v| v.len()).sum();
    let mut queues: BTreeMap<String, VecDeque<DownloadJob>> = plans
        .iter_mut()
        .map(|(k, v)| (k.clone(), std::mem::take(v).into_iter().collect()))
        .collect();

    let mut out = Vec::with_capacity(total);
    while out.len() < total {
        let mut drew_any = false;
        for (key, queue) in queues.iter_mut() {
            let draws = draws_for_cycle_len(cycle_lens.get(key).copied().unwrap_or(0));
            for _ in 0..draws {
                if let Some(job) = queue.pop_front() {
                    out.push(job);
                    drew_any = true;
                } else {
                    break;
                }
            }
        }
        if !drew_any {
            break;
        }
    }
    out
}
