//! Fixed-size worker pool with device-bound worker slots.
//!
//! Each worker is a long-lived loop on a dedicated pool thread. When the plan
//! binds devices, worker `k` owns `devices[k]` and only ever receives trials
//! routed to slot `k`, so two trials on the same device never overlap. CPU
//! workers share a single queue. Outcomes come back over one channel and are
//! handled on the calling thread, which stays the only writer of the run log.

use crossbeam_channel::{bounded, unbounded, Receiver, Select, Sender};
use std::collections::VecDeque;
use tracing::{debug, error};

use ps_planner::WorkerPlan;
use ps_types::{internal_error, SweepResult, TrialError, TrialOutcome, TrialUnit};

/// Units read ahead of the workers, per worker.
const LOOKAHEAD_PER_WORKER: usize = 2;

pub struct WorkerPool<'p> {
    plan: &'p WorkerPlan,
}

impl<'p> WorkerPool<'p> {
    pub fn new(plan: &'p WorkerPlan) -> Self {
        Self { plan }
    }

    fn slot_count(&self) -> usize {
        if self.plan.uses_devices() {
            self.plan.devices().len()
        } else {
            1
        }
    }

    fn slot_for(&self, unit: &TrialUnit) -> usize {
        self.plan.device_slot(unit.index).unwrap_or(0)
    }

    /// Feed `units` to the workers as they become free and hand every outcome
    /// to `on_outcome` in completion order. Items that failed before becoming
    /// a unit are reported straight away. The stream is read at most
    /// `2 * worker_count` units ahead of the workers. Returns once the stream is
    /// exhausted and every worker has drained its queue.
    pub fn run<I, F, G>(&self, units: I, execute: &F, mut on_outcome: G) -> SweepResult<()>
    where
        I: Iterator<Item = Result<TrialUnit, TrialError>>,
        F: Fn(&TrialUnit) -> TrialOutcome + Sync,
        G: FnMut(TrialOutcome),
    {
        let workers = self.plan.worker_count();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("trial-worker-{i}"))
            .build()
            .map_err(|e| internal_error!("cannot start worker pool: {}", e))?;

        // Device slots hold one unit each; a CPU queue holds one per worker.
        let capacity = if self.plan.uses_devices() { 1 } else { workers };
        let (queues, inboxes): (Vec<Sender<TrialUnit>>, Vec<Receiver<TrialUnit>>) =
            (0..self.slot_count()).map(|_| bounded(capacity)).unzip();
        let (outcome_tx, outcome_rx) = unbounded::<TrialOutcome>();

        pool.in_place_scope(move |scope| {
            for worker in 0..workers {
                let inbox = inboxes[worker % inboxes.len()].clone();
                let outcomes = outcome_tx.clone();
                scope.spawn(move |_| {
                    debug!("Worker {} started", worker);
                    for unit in inbox.iter() {
                        if outcomes.send(execute(&unit)).is_err() {
                            break;
                        }
                    }
                    debug!("Worker {} finished", worker);
                });
            }
            drop(inboxes);
            drop(outcome_tx);

            // Units pulled from the stream but not yet handed to a worker,
            // one backlog per slot so a busy device never holds back an idle one.
            let lookahead = LOOKAHEAD_PER_WORKER * workers;
            let mut backlog: Vec<VecDeque<TrialUnit>> =
                (0..queues.len()).map(|_| VecDeque::new()).collect();
            let mut buffered = 0;
            let mut units = units.fuse();
            loop {
                while buffered < lookahead {
                    match units.next() {
                        Some(Ok(unit)) => {
                            backlog[self.slot_for(&unit)].push_back(unit);
                            buffered += 1;
                        }
                        Some(Err(error)) => on_outcome(TrialOutcome::Failed(error)),
                        None => break,
                    }
                }
                if buffered == 0 {
                    break;
                }

                // Offer the head of every non-empty backlog at once.
                let mut offers: Vec<(usize, TrialUnit)> = backlog
                    .iter_mut()
                    .enumerate()
                    .filter_map(|(slot, pending)| pending.pop_front().map(|unit| (slot, unit)))
                    .collect();
                let mut select = Select::new();
                for (slot, _) in &offers {
                    select.send(&queues[*slot]);
                }
                let recv_op = select.recv(&outcome_rx);
                let op = select.select();

                if op.index() == recv_op {
                    let received = op.recv(&outcome_rx);
                    for (slot, unit) in offers {
                        backlog[slot].push_front(unit);
                    }
                    match received {
                        Ok(outcome) => on_outcome(outcome),
                        Err(_) => {
                            error!("All trial workers exited before the stream was exhausted");
                            return Err(internal_error!("all trial workers exited"));
                        }
                    }
                    continue;
                }

                let (slot, unit) = offers.swap_remove(op.index());
                for (other, unit) in offers {
                    backlog[other].push_front(unit);
                }
                buffered -= 1;
                if let Err(rejected) = op.send(&queues[slot], unit) {
                    let unit = rejected.into_inner();
                    on_outcome(TrialOutcome::Failed(TrialError::new(
                        unit.index,
                        "worker slot is no longer running",
                    )));
                }
            }

            // Closing the queues lets workers finish what they hold and exit.
            drop(queues);
            for outcome in outcome_rx.iter() {
                on_outcome(outcome);
            }
            Ok(())
        })
    }
}
