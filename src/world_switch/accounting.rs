/*!
 * Time-Slice Accounting
 * Residency recording and the fairness credit/debit calculation
 */

use super::entry::ActiveList;
use crate::core::limits::TIME_SLICE_SINGLE_FN;
use crate::core::types::{fn_name, FunctionId, PF_IDX};
use log::debug;

/// How an accounting stop treats the elapsed residency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopPolicy {
    /// Feed the run-length histogram (GFX only)
    pub record_histogram: bool,
    /// Break-point debugging: overruns are never charged
    pub forgive_overrun: bool,
}

impl ActiveList {
    /// Mark `f` resident from `now`
    #[inline]
    pub fn start_record(&mut self, f: FunctionId, now: u64) {
        if let Some(e) = self.entry_mut(f) {
            e.start_ts = now;
        }
    }

    /// Close the residency window of `f`
    ///
    /// Adds the elapsed time to the running total and charges any overrun of the granted
    /// slice as debt, unless the next overrun was forgiven. Returns the elapsed time, or
    /// `None` when `f` was not recording.
    pub fn stop_record(&mut self, f: FunctionId, now: u64, policy: StopPolicy) -> Option<u64> {
        let e = self.entry_mut(f)?;
        if e.start_ts == 0 {
            return None;
        }

        let elapsed = now.saturating_sub(e.start_ts);
        if policy.record_histogram {
            e.run_length().record(elapsed);
        }
        e.total_time += elapsed;

        let overrun = now as i64 - (e.start_ts as i64 + e.last_time_slice as i64);
        if overrun > 0 {
            if e.skip_next_punish || policy.forgive_overrun {
                e.skip_next_punish = false;
            } else {
                e.beyond += overrun;
            }
        }
        e.start_ts = 0;
        Some(elapsed)
    }

    /// Slice to grant `f` on this pick
    ///
    /// Outside fairness mode the configured slice is granted as is. In fairness mode the
    /// outstanding debt is subtracted: a slice eaten entirely is skipped (0), a slice cut
    /// to half or less is raised to half and the shortfall carried, anything else clears
    /// the debt. Placeholders account against the PF and leave it debt-free. A
    /// single-function slice grants `single_fn_grant` and drops the debt.
    pub fn calculate_time_slice(
        &mut self,
        f: FunctionId,
        fairness: bool,
        single_fn_grant: u32,
    ) -> u32 {
        let (placeholder, time_slice) = match self.entry(f) {
            Some(e) => (e.placeholder, e.time_slice as i64),
            None => return 0,
        };
        let min_time_slice = time_slice / 2;
        let acct = if placeholder { PF_IDX } else { f };

        let Some(entry) = self.entry_mut(acct) else {
            return 0;
        };

        if !fairness {
            entry.last_time_slice = entry.time_slice;
            return entry.last_time_slice;
        }

        if entry.time_slice == TIME_SLICE_SINGLE_FN {
            entry.beyond = 0;
            entry.last_time_slice = single_fn_grant;
            return entry.last_time_slice;
        }

        let adjusted = time_slice - entry.beyond;
        if adjusted <= 0 {
            entry.last_time_slice = 0;
            entry.beyond -= entry.time_slice as i64;
            debug!("skip scheduling {}", fn_name(f));
        } else if adjusted <= min_time_slice {
            entry.last_time_slice = min_time_slice as u32;
            entry.beyond = min_time_slice - adjusted;
            debug!("punish {} {}us", fn_name(f), time_slice - min_time_slice);
        } else {
            entry.last_time_slice = adjusted as u32;
            entry.beyond = 0;
            debug!("punish {} {}us", fn_name(f), time_slice - adjusted);
        }

        if placeholder {
            entry.beyond = 0;
        }
        entry.last_time_slice
    }

    /// Forget accumulated accounting for `f`
    pub fn clear_time_slice(&mut self, f: FunctionId) {
        if let Some(e) = self.entry_mut(f) {
            e.beyond = 0;
            e.start_ts = 0;
            e.last_time_slice = 0;
            e.total_time = 0;
            e.skip_next_punish = false;
        }
    }
}
