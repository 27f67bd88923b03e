/*!
 * Scheduling Policies
 * Pick the next function for a manual world switch
 */

use super::entry::{ActiveList, ListEntry};
use crate::core::limits::POLICY_SKIP_ROUNDS;
use crate::core::types::{bit, fn_name, FunctionId, FunctionMask, SchedMode, PF_IDX};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Policy selector resolved once per world switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Round-robin with fairness placeholders
    Default,
    /// Activity-driven with a starvation bound
    HybridLiquid,
}

impl PolicyKind {
    pub fn for_mode(mode: SchedMode) -> Self {
        match mode {
            SchedMode::HybridLiquid => PolicyKind::HybridLiquid,
            _ => PolicyKind::Default,
        }
    }

    pub fn build(self) -> Box<dyn SchedulePolicy> {
        match self {
            PolicyKind::Default => Box::new(DefaultPolicy),
            PolicyKind::HybridLiquid => Box::new(HybridLiquidPolicy),
        }
    }
}

/// The decision a policy hands back to the driver loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pick {
    pub function: FunctionId,
    /// µs; the single-function value suppresses the timer
    pub time_slice: u32,
}

/// Inputs to a pick, gathered by the loop under the switch lock
pub struct PolicyContext<'a> {
    pub list: &'a mut ActiveList,
    pub fairness: bool,
    pub pf_active: bool,
    /// Busy-or-timed-out functions that are initialized
    pub status: FunctionMask,
    pub skip_bound: u32,
    /// Grant for an entry configured with the single-function slice
    pub single_fn_grant: u32,
}

impl PolicyContext<'_> {
    /// Rotate an inactive PF away from the head
    fn rotate_idle_pf(&mut self) {
        if self.list.head() == Some(PF_IDX) && !self.pf_active {
            self.list.move_to_tail(PF_IDX);
        }
    }
}

/// Strategy for choosing the next resident function
pub trait SchedulePolicy: Send + Sync {
    fn kind(&self) -> PolicyKind;

    /// `None` only when the list is empty
    fn pick(&self, ctx: &mut PolicyContext<'_>) -> Option<Pick>;
}

/// Head of the list, charged through credit/debit
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultPolicy;

impl SchedulePolicy for DefaultPolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Default
    }

    fn pick(&self, ctx: &mut PolicyContext<'_>) -> Option<Pick> {
        let mut rounds = 0;
        loop {
            ctx.rotate_idle_pf();
            let f = ctx.list.head()?;
            let mut time_slice =
                ctx.list
                    .calculate_time_slice(f, ctx.fairness, ctx.single_fn_grant);

            if time_slice == 0 {
                rounds += 1;
                if rounds < POLICY_SKIP_ROUNDS {
                    debug!("skip scheduling {}", fn_name(f));
                    ctx.list.move_to_tail(f);
                    continue;
                }
                time_slice = ctx.list.entry(f).map_or(0, |e| e.time_slice / 2);
                let acct = match ctx.list.kind(f) {
                    Some(ListEntry::FairnessPlaceholder(_)) => PF_IDX,
                    _ => f,
                };
                if let Some(e) = ctx.list.entry_mut(acct) {
                    e.last_time_slice = time_slice;
                }
                warn!(
                    "{} skipped {} rounds, granting minimum slice {}us",
                    fn_name(f),
                    rounds,
                    time_slice
                );
            }

            let placeholder = ctx.list.entry(f).map_or(false, |e| e.placeholder);
            if ctx.fairness && placeholder {
                debug!("load placeholder {} as PF, time slice = {}", fn_name(f), time_slice);
                ctx.list.move_to_tail(f);
                return Some(Pick {
                    function: PF_IDX,
                    time_slice,
                });
            }
            return Some(Pick {
                function: f,
                time_slice,
            });
        }
    }
}

/// First busy function wins; idle ones are passed over at most `skip_bound` times
#[derive(Debug, Default, Clone, Copy)]
pub struct HybridLiquidPolicy;

impl SchedulePolicy for HybridLiquidPolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::HybridLiquid
    }

    fn pick(&self, ctx: &mut PolicyContext<'_>) -> Option<Pick> {
        ctx.rotate_idle_pf();
        let head = ctx.list.head()?;

        let mut chosen = head;
        if ctx.status != 0 {
            let mut cursor = Some(head);
            while let Some(f) = cursor {
                if ctx.status & bit(f) != 0 {
                    chosen = f;
                    break;
                }
                if ctx.list.is_last(f) {
                    debug!("no busy function found, run the head");
                    chosen = head;
                    break;
                }
                cursor = ctx.list.next(f);
                if f == PF_IDX && !ctx.pf_active {
                    continue;
                }
                let Some(e) = ctx.list.entry_mut(f) else {
                    continue;
                };
                if e.skip_cnt >= ctx.skip_bound {
                    chosen = f;
                    break;
                }
                e.skip_cnt += 1;
            }
        }

        let e = ctx.list.entry_mut(chosen)?;
        e.skip_cnt = 0;
        Some(Pick {
            function: chosen,
            time_slice: e.time_slice,
        })
    }
}
