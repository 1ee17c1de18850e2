use serde::{Deserialize, Serialize};

/// The four compute phases a cut cycles through, in order.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::EnumIter)]
pub enum Phase {
    /// Streaming a weight tile from the weight banks.
    #[default]
    FetchWeight,
    /// Weights resident; waiting out cross-cut synchronization.
    WeightDone,
    /// Streaming input rows through the open K tile.
    FeedInput,
    /// Input tile drained; draining timers and pending output.
    InputDone,
}

/// Mutable per-cut compute state.
///
/// One instance per partition of the bank-by-channel grid; all of it is
/// rebuilt (zeroed) by a Configure word. Counters that the controller's
/// original expressed with a `-1` idle sentinel are `Option` here: `None`
/// means idle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CutState {
    /// Base DRAM rows of the three data streams.
    pub base_row_w: usize,
    pub base_row_in: usize,
    pub base_row_out: usize,

    /// Output rows (M), input depth (N), reduction depth (K).
    pub m: usize,
    pub n: usize,
    pub k: usize,

    // iterators
    pub m_it: usize,
    pub k_tile_it: usize,
    pub n_it: usize,
    pub m_out_it: usize,
    pub n_out_tile_it: usize,

    /// Compute enabled for this cut.
    pub in_pim: bool,
    pub phase: Phase,

    /// Cycles until the fetched input tile is consumed; `None` once the
    /// last tile of the computation has been fed.
    pub in_cnt: Option<u64>,
    /// Cycles until the next output tile becomes writable.
    pub out_cnt: Option<u64>,
    /// VPU drain stall before input feeding may begin.
    pub vpu_cnt: u64,

    // open-row bookkeeping, one flag per stream
    pub in_act_placed: bool,
    pub w_act_placed: bool,
    pub out_act_placed: bool,

    /// Output tiles ready for writeback.
    pub output_valid: i64,
}

impl Default for CutState {
    fn default() -> Self {
        Self {
            base_row_w: 0,
            base_row_in: 0,
            base_row_out: 0,
            m: 0,
            n: 0,
            k: 0,
            m_it: 0,
            k_tile_it: 0,
            n_it: 0,
            m_out_it: 0,
            n_out_tile_it: 0,
            in_pim: false,
            phase: Phase::FetchWeight,
            in_cnt: Some(0),
            out_cnt: None,
            vpu_cnt: 0,
            in_act_placed: false,
            w_act_placed: false,
            out_act_placed: false,
            output_valid: 0,
        }
    }
}

impl CutState {
    /// True iff the cut has all three dimensions loaded.
    #[must_use]
    pub fn dims_loaded(&self) -> bool {
        self.m != 0 && self.n != 0 && self.k != 0
    }

    /// Drop all open-row bookkeeping; the rows are about to be closed by a
    /// refresh.
    pub fn clear_act_placed(&mut self) {
        self.in_act_placed = false;
        self.w_act_placed = false;
        self.out_act_placed = false;
    }

    /// Check the per-tick state invariants. Iterators may sit on the next
    /// tile boundary past their dimension, never beyond it.
    pub fn assert_invariants(&self, m_tile_size: usize, n_tile_size: usize, k_tile_size: usize) {
        let tile_bound = |dim: usize, tile: usize| dim.max(dim.next_multiple_of(tile.max(1)));
        assert!(
            self.m_it <= tile_bound(self.m, m_tile_size),
            "m_it {} out of range (m = {})",
            self.m_it,
            self.m
        );
        assert!(
            self.n_it <= tile_bound(self.n, n_tile_size),
            "n_it {} out of range (n = {})",
            self.n_it,
            self.n
        );
        assert!(
            self.k_tile_it * k_tile_size <= self.k + k_tile_size,
            "k_tile_it {} out of range (k = {})",
            self.k_tile_it,
            self.k
        );
        assert!(self.output_valid >= 0, "output_valid underflow");
    }
}
