use crate::addrdec::AddressCodec;
use crate::command::{Address, Command, CommandKind};
use crate::config::Config;
use crate::controller::ChannelController;
use crate::cut::{CutState, Phase};
use crate::decoder::{LoadKind, PimConfig};
use console::style;
use std::sync::Arc;

/// Processing elements along one PIM row of the full bank grid.
pub const PES_PER_ROW: usize = 128;
/// Processing elements fed by a single bank's I/O.
pub const PES_PER_BANK_IO: usize = 16;
/// Banks folded into one weight fetch under depth-first dataflow.
pub const WEIGHT_BANKS_REDUCE: usize = 16;
/// Largest row tile a Configure word may request.
pub const MAX_M_TILE_SIZE: usize = 2048;

/// A homogeneous set of commands emitted in one tick for one cut.
///
/// Either every command of the batch reaches the controllers or none does;
/// a partial batch would violate the lockstep the in-bank compute relies
/// on.
#[derive(Debug, Default)]
struct Batch {
    cmds: Vec<Command>,
}

impl Batch {
    fn push(&mut self, cmd: Command) {
        self.cmds.push(cmd);
    }

    fn clear(&mut self) {
        self.cmds.clear();
    }

    fn is_empty(&self) -> bool {
        self.cmds.is_empty()
    }

    fn len(&self) -> usize {
        self.cmds.len()
    }

    fn first_kind(&self) -> Option<CommandKind> {
        self.cmds.first().map(|cmd| cmd.kind)
    }
}

/// Per-cut layout of one scheduling cycle, fixed at the top of the tick.
#[derive(Debug, Clone, Copy)]
struct Geometry {
    vcut_no: usize,
    hcut_no: usize,
    cut_height: usize,
    cut_width: usize,
    n_tile_size: usize,
    n_tile_it: usize,
    m_tile_it: usize,
    m_current_tile_size: usize,
    k_tile_size: usize,
    weight_banks_reduce: usize,
}

/// Which channel group of the cut receives the current output tile.
///
/// Output tiles rotate across the vertical cuts so consecutive tiles do
/// not pile onto one channel; single-row results and the fully-split grid
/// pin the group instead.
pub(crate) fn output_channel_group(
    m: usize,
    vcuts: usize,
    vcut_no: usize,
    n_out_tile_it: usize,
) -> usize {
    if m == 1 {
        vcut_no
    } else if vcuts == 16 {
        vcut_no / 2
    } else {
        (vcut_no + n_out_tile_it) % vcuts
    }
}

/// Banks written per channel row of an output batch. Depth-first dataflow
/// reduces into a single bank; otherwise every folded column gets one.
pub(crate) fn output_k_bound(depth_first: bool, mc: usize) -> usize {
    if depth_first {
        1
    } else {
        mc
    }
}

/// The per-cut compute scheduler.
///
/// Holds the engine-wide PIM configuration and one [`CutState`] per
/// partition; [`cycle`](CutEngine::cycle) advances every enabled cut by one
/// clock, emitting at most one weight, input and output batch per cut.
pub struct CutEngine {
    config: Arc<Config>,
    codec: AddressCodec,
    pub pim: Option<PimConfig>,
    pub cuts: Vec<CutState>,
    /// Set once every cut has drained its output; cleared by Configure.
    pub turn_off: bool,
}

impl CutEngine {
    #[must_use]
    pub fn new(config: Arc<Config>, codec: AddressCodec) -> Self {
        Self {
            config,
            codec,
            pim: None,
            cuts: Vec::new(),
            turn_off: false,
        }
    }

    /// Apply a Configure word: all cut state is rebuilt from scratch.
    pub fn configure(&mut self, pim: PimConfig) {
        assert!(
            pim.m_tile_size <= MAX_M_TILE_SIZE,
            "m_tile_size {} exceeds the row tile limit",
            pim.m_tile_size
        );
        self.cuts = vec![CutState::default(); pim.cuts()];
        self.pim = Some(pim);
        self.turn_off = false;
    }

    /// Apply a Load word to the addressed cut.
    pub fn load(&mut self, cut: usize, kind: LoadKind, dim: usize, base_row: usize) {
        assert!(
            cut < self.cuts.len(),
            "load addresses cut {cut} outside the configured grid"
        );
        let state = &mut self.cuts[cut];
        match kind {
            LoadKind::Weight => {
                state.base_row_w = base_row;
                state.m = dim;
            }
            LoadKind::Output => {
                state.base_row_out = base_row;
                state.k = dim;
            }
            LoadKind::Input => {
                state.base_row_in = base_row;
                state.n = dim;
            }
        }
    }

    /// Apply a Compute-Enable word. Returns false when a selected cut is
    /// not fully loaded yet; the word then stays at the queue head.
    pub fn try_enable(&mut self, mask: u64) -> bool {
        let selected = || (0..self.cuts.len()).filter(|i| mask & (1 << i) != 0);
        if selected().any(|i| !self.cuts[i].dims_loaded()) {
            return false;
        }
        for i in selected() {
            self.cuts[i].in_pim = true;
        }
        true
    }

    /// A refresh is pending: the rows the flags refer to are about to be
    /// closed, so every cut re-activates afterwards.
    pub fn drop_open_rows(&mut self) {
        for cut in &mut self.cuts {
            cut.clear_act_placed();
        }
    }

    /// One scheduling cycle over all cuts, ascending index order.
    pub fn cycle<C: ChannelController>(
        &mut self,
        ctrls: &mut [C],
        clk: u64,
        wait_refresh: bool,
        is_in_ref: bool,
    ) {
        if self.pim.is_none() {
            return;
        }
        for i in 0..self.cuts.len() {
            if !self.cuts[i].in_pim || is_in_ref {
                continue;
            }
            self.cut_cycle(i, ctrls, clk, wait_refresh);
        }
    }

    fn geometry(&self, i: usize) -> Geometry {
        let pim = self.pim.as_ref().expect("engine configured");
        let cut = &self.cuts[i];
        let cut_height = self.config.channels / pim.hcuts;
        let n_tile_size = PES_PER_ROW / pim.vcuts;
        let m_tile_it = cut.m_it / pim.m_tile_size;
        Geometry {
            vcut_no: i % pim.vcuts,
            hcut_no: i / pim.vcuts,
            cut_height,
            cut_width: self.config.banks() / pim.vcuts,
            n_tile_size,
            n_tile_it: cut.n_it / n_tile_size,
            m_tile_it,
            m_current_tile_size: if cut.m < pim.m_tile_size * (m_tile_it + 1) {
                cut.m % pim.m_tile_size
            } else {
                pim.m_tile_size
            },
            k_tile_size: (cut_height * PES_PER_BANK_IO).min(cut.k),
            weight_banks_reduce: if pim.depth_first {
                WEIGHT_BANKS_REDUCE
            } else {
                1
            },
        }
    }

    /// Split a grid-wide bank number into its group and place the column
    /// offset within the stream's row range.
    fn bank_address(
        &self,
        channel: usize,
        bank: usize,
        base_row: usize,
        col_offset: usize,
    ) -> Address {
        let bursts = self.config.bursts_per_row();
        Address::new(
            channel,
            0,
            bank / self.config.banks_per_group,
            bank % self.config.banks_per_group,
            base_row + col_offset / bursts,
            col_offset % bursts,
        )
    }

    fn cut_cycle<C: ChannelController>(
        &mut self,
        i: usize,
        ctrls: &mut [C],
        clk: u64,
        wait_refresh: bool,
    ) {
        let pim = *self.pim.as_ref().expect("engine configured");
        let g = self.geometry(i);

        // Writeback is gated on the phase the cut is in when the tick
        // starts, not on transitions made below.
        let output_ready = self.cuts[i].phase == Phase::InputDone;

        let mut w_batch = Batch::default();
        let mut in_batch = Batch::default();
        match self.cuts[i].phase {
            Phase::FetchWeight => {
                w_batch = self.fetch_weight(i, &g, ctrls, clk, wait_refresh);
            }
            Phase::WeightDone => {
                self.cuts[i].phase = Phase::FeedInput;
                self.cuts[i].vpu_cnt = 1;
                if self.cuts.len() == 1 {
                    // Single-tenant: hold until the companion phases clear.
                    let stall = self
                        .cuts
                        .iter()
                        .any(|c| matches!(c.phase, Phase::FetchWeight | Phase::InputDone));
                    if stall {
                        self.cuts[i].phase = Phase::WeightDone;
                    }
                }
            }
            Phase::FeedInput => {
                in_batch = self.feed_input(i, &g, ctrls, clk, wait_refresh);
            }
            Phase::InputDone => {
                let cut = &mut self.cuts[i];
                if let Some(cnt) = cut.in_cnt {
                    let cnt = cnt.saturating_sub(1);
                    cut.in_cnt = Some(cnt);
                    if cnt == 0 && cut.output_valid == 0 {
                        cut.phase = Phase::FetchWeight;
                    }
                }
            }
        }

        // Output wave countdown runs every active cycle, phase-independent.
        {
            let cut = &mut self.cuts[i];
            match cut.out_cnt {
                Some(0) => {
                    cut.output_valid += 1;
                    cut.out_cnt = None;
                }
                Some(cnt) => cut.out_cnt = Some(cnt - 1),
                None => {}
            }
        }

        let out_enable = g.cut_height / pim.vcuts > 0 || g.vcut_no % 2 == 0;
        let mut out_batch = Batch::default();
        if self.cuts[i].output_valid > 0 && output_ready && out_enable {
            out_batch = self.write_output(i, &g, ctrls, clk, wait_refresh);
        }

        for cmd in w_batch.cmds {
            ctrls[cmd.channel()].push_weight(cmd);
        }
        for cmd in in_batch.cmds {
            ctrls[cmd.channel()].push_input(cmd, clk);
        }
        for cmd in out_batch.cmds {
            ctrls[cmd.channel()].push_output(cmd);
        }
    }

    /// Phase 0: stream the weight tile for the current `(N, K)` position
    /// out of the weight banks.
    fn fetch_weight<C: ChannelController>(
        &mut self,
        i: usize,
        g: &Geometry,
        ctrls: &[C],
        clk: u64,
        wait_refresh: bool,
    ) -> Batch {
        let pim = *self.pim.as_ref().expect("engine configured");
        let bursts = self.config.bursts_per_row();
        let mut batch = Batch::default();

        let (n_tile_size_per_bank, banks_per_fetch) = {
            let cut = &self.cuts[i];
            let banks_per_fetch = g.cut_width / g.weight_banks_reduce;
            let per_bank = cut
                .n
                .min((g.n_tile_size - 1) / banks_per_fetch + 1);
            (per_bank, banks_per_fetch)
        };

        {
            let cut = &self.cuts[i];
            let k_tiles = (cut.k - 1) / g.k_tile_size + 1;
            let col_offset = g.n_tile_it * (n_tile_size_per_bank * k_tiles)
                + cut.k_tile_it * n_tile_size_per_bank
                + cut.n_it % g.n_tile_size;
            // A weight row closes once a bank's share of the tile is done
            // or the row runs out of columns.
            let close_span = cut
                .n
                .min(PES_PER_ROW / self.config.banks() * g.weight_banks_reduce);

            for j in 0..g.cut_height {
                for k in 0..banks_per_fetch {
                    let ch = g.hcut_no * g.cut_height + j;
                    let bank = g.vcut_no * g.cut_width + k * g.weight_banks_reduce;
                    let addr = self.bank_address(ch, bank, cut.base_row_w, col_offset);
                    let kind = if (addr.column + 1) % close_span == 0
                        || (addr.column + 1) % bursts == 0
                    {
                        CommandKind::PimReadPrecharge
                    } else {
                        CommandKind::PimRead
                    };
                    let cmd = Command::new(kind, addr, self.codec.encode(&addr));
                    let Some(ready) = ctrls[ch].ready_command(&cmd, clk) else {
                        batch.clear();
                        break;
                    };
                    if batch.first_kind().is_some_and(|first| first != ready.kind) {
                        batch.clear();
                        break;
                    }
                    batch.push(ready);
                }
                if batch.is_empty() {
                    break;
                }
            }
        }

        if batch.is_empty() {
            return batch;
        }

        let cut = &mut self.cuts[i];
        match batch.first_kind().expect("batch not empty") {
            CommandKind::PimActivate => {
                if cut.w_act_placed || wait_refresh {
                    batch.clear();
                    return batch;
                }
                cut.w_act_placed = true;
            }
            first => {
                if first == CommandKind::PimReadPrecharge {
                    cut.w_act_placed = false;
                }
                if pim.depth_first && first == CommandKind::Precharge {
                    // Close the stale rows but count no weight progress.
                    return batch;
                }
                cut.n_it += 1;
                if cut.n_it % n_tile_size_per_bank == 0
                    && (g.n_tile_size == n_tile_size_per_bank || cut.n_it % g.n_tile_size != 0)
                {
                    cut.n_it = g.n_tile_size * g.n_tile_it;
                    cut.phase = Phase::WeightDone;
                }
            }
        }
        batch
    }

    /// Phase 2: feed the input rows of the current `(M, K)` tile to the
    /// in-bank compute.
    fn feed_input<C: ChannelController>(
        &mut self,
        i: usize,
        g: &Geometry,
        ctrls: &[C],
        clk: u64,
        wait_refresh: bool,
    ) -> Batch {
        let pim = *self.pim.as_ref().expect("engine configured");
        let bursts = self.config.bursts_per_row();
        let mc = pim.mc();
        let cut_count = self.cuts.len();

        self.cuts[i].vpu_cnt = self.cuts[i].vpu_cnt.saturating_sub(1);

        let mut batch = Batch::default();
        let mut mixed = false;
        {
            let cut = &self.cuts[i];
            let k_tiles = (cut.k - 1) / g.k_tile_size + 1;
            let col_offset = g.m_tile_it * (pim.m_tile_size * k_tiles)
                + cut.k_tile_it * g.m_current_tile_size
                + cut.m_it % pim.m_tile_size;

            for j in 0..g.cut_height {
                for k in 0..mc {
                    let ch = g.hcut_no * g.cut_height + j;
                    let bank = g.vcut_no * g.cut_width + k * (g.cut_width / mc);
                    let addr = self.bank_address(ch, bank, cut.base_row_in, col_offset);
                    // Keep rows open across tile seams; close only on the
                    // last input row (and, depth-first, the last K tile).
                    let mut close = cut.m_it + 1 == cut.m;
                    if pim.depth_first {
                        close = close && (cut.k_tile_it + 1) * g.k_tile_size >= cut.k;
                    }
                    let kind = if addr.column == bursts - 1 || close {
                        CommandKind::PimReadPrecharge
                    } else {
                        CommandKind::PimRead
                    };
                    let cmd = Command::new(kind, addr, self.codec.encode(&addr));
                    let Some(ready) = ctrls[ch].ready_command(&cmd, clk) else {
                        batch.clear();
                        break;
                    };
                    if batch.first_kind().is_some_and(|first| first != ready.kind) {
                        mixed = true;
                    }
                    batch.push(ready);
                }
            }
        }

        if cut_count > 1 && batch.len() != g.cut_height {
            batch.clear();
            return batch;
        }
        if mixed {
            // Retry as a row-maintenance batch: keep the activates and
            // precharges, drop the reads.
            batch.cmds.retain(|cmd| {
                !matches!(
                    cmd.kind,
                    CommandKind::PimRead | CommandKind::PimReadPrecharge
                )
            });
        }
        if batch.is_empty() {
            return batch;
        }

        let cut = &mut self.cuts[i];
        match batch.first_kind().expect("batch not empty") {
            CommandKind::PimActivate => {
                if (!mixed && cut.in_act_placed) || wait_refresh {
                    batch.clear();
                    return batch;
                }
                cut.in_act_placed = true;
            }
            first => {
                if first == CommandKind::PimReadPrecharge {
                    cut.in_act_placed = false;
                }
                if cut.vpu_cnt != 0 {
                    batch.clear();
                    return batch;
                }
                assert!(
                    pim.m_tile_size > PES_PER_ROW / pim.vcuts,
                    "row tile must exceed the per-cut PE row width"
                );

                if (cut.k_tile_it + 1) * g.k_tile_size >= cut.k
                    && cut.m_it % pim.m_tile_size == 0
                {
                    // First row of the final K tile: schedule the output
                    // wave that will surface this tile's results.
                    let wave = self.config.tccd_l as i64 * (3 + 16) - self.config.trcdwr as i64;
                    cut.out_cnt = Some(wave.max(1) as u64);
                }

                cut.m_it += 1;
                if cut.m_it % pim.m_tile_size == 0 || cut.m_it == cut.m {
                    let drain = self.config.tccd_l as i64
                        * (PES_PER_ROW / (pim.vcuts * mc)).max(PES_PER_BANK_IO) as i64
                        - self.config.trcdrd as i64;
                    cut.in_cnt = Some(drain.max(1) as u64);
                    cut.phase = Phase::InputDone;
                    cut.m_it = pim.m_tile_size * g.m_tile_it;
                    cut.k_tile_it += 1;

                    if cut.k_tile_it * g.k_tile_size >= cut.k {
                        cut.k_tile_it = 0;
                        cut.n_it = g.n_tile_size * (g.n_tile_it + 1);
                        if cut.n_it >= cut.n {
                            cut.n_it = 0;
                            cut.m_it = pim.m_tile_size * (g.m_tile_it + 1);
                            if cut.m_it >= cut.m {
                                log::info!(
                                    "{}",
                                    style(format!("cycle {clk}: cut {i} end of computation"))
                                        .green()
                                );
                                cut.in_cnt = None;
                            }
                        }
                    }
                }
            }
        }
        batch
    }

    /// Output writeback: independent of the compute phase, gated by the
    /// cut being in [`Phase::InputDone`] with a surfaced output tile.
    fn write_output<C: ChannelController>(
        &mut self,
        i: usize,
        g: &Geometry,
        ctrls: &[C],
        clk: u64,
        wait_refresh: bool,
    ) -> Batch {
        let pim = *self.pim.as_ref().expect("engine configured");
        let bursts = self.config.bursts_per_row();
        let mut batch = Batch::default();

        let (m_tile_size_out, m_out_tile_it, m_out, n_tile_size_out, n_out) = {
            let cut = &self.cuts[i];
            let m_tile_size_out = if pim.depth_first {
                (pim.m_tile_size / PES_PER_ROW) * pim.mcf
            } else {
                pim.m_tile_size
            };
            let m_out = if pim.depth_first {
                (cut.m * pim.mcf / PES_PER_ROW).max(1)
            } else {
                cut.m
            };
            let n_tile_size_out = if pim.depth_first {
                PES_PER_ROW
            } else {
                g.n_tile_size
            };
            let n_out = if pim.depth_first { PES_PER_ROW } else { cut.n };
            (
                m_tile_size_out,
                cut.m_out_it / m_tile_size_out,
                m_out,
                n_tile_size_out,
                n_out,
            )
        };

        {
            let cut = &self.cuts[i];
            let vcut_out_no = output_channel_group(cut.m, pim.vcuts, g.vcut_no, cut.n_out_tile_it);
            let m_out_current = if m_out < m_tile_size_out * (m_out_tile_it + 1) {
                m_out % m_tile_size_out
            } else {
                m_tile_size_out
            };
            // This cut's share of the output N tiles, spread over the
            // vertical cuts.
            let n_tile_num = (cut.n - 1) / n_tile_size_out + 1;
            let mut n_tile_num_ch = n_tile_num / pim.vcuts;
            if n_tile_num % pim.vcuts > cut.n_out_tile_it % pim.vcuts {
                n_tile_num_ch += 1;
            }
            let n_tile_it_ch = cut.n_out_tile_it / pim.vcuts;
            let col_offset = m_out_tile_it * (m_tile_size_out * n_tile_num_ch)
                + n_tile_it_ch * m_out_current
                + cut.m_out_it % m_tile_size_out;

            let cut_height_out = if g.cut_height < pim.vcuts {
                1
            } else {
                g.cut_height / pim.vcuts
            };
            let k_bound = output_k_bound(pim.depth_first, pim.mc());

            for j in 0..cut_height_out {
                let ch = g.hcut_no * g.cut_height + vcut_out_no * cut_height_out + j;
                for k in 0..k_bound {
                    let mut bank = g.vcut_no * g.cut_width + k * (g.cut_width / pim.mc());
                    if !pim.depth_first {
                        // Output banks interleave with the input banks.
                        bank += 1;
                    }
                    let addr = self.bank_address(ch, bank, cut.base_row_out, col_offset);
                    let kind = if addr.column == bursts - 1 || cut.m_out_it + 1 == m_out {
                        CommandKind::PimWritePrecharge
                    } else {
                        CommandKind::PimWrite
                    };
                    let cmd = Command::new(kind, addr, self.codec.encode(&addr));
                    let Some(ready) = ctrls[ch].ready_command(&cmd, clk) else {
                        batch.clear();
                        break;
                    };
                    if batch.first_kind().is_some_and(|first| first != ready.kind) {
                        batch.clear();
                        break;
                    }
                    batch.push(ready);
                }
                if batch.is_empty() {
                    break;
                }
            }
        }

        if batch.is_empty() {
            return batch;
        }

        match batch.first_kind().expect("batch not empty") {
            CommandKind::PimActivate => {
                let cut = &mut self.cuts[i];
                if cut.out_act_placed || wait_refresh {
                    batch.clear();
                } else {
                    cut.out_act_placed = true;
                }
            }
            first => {
                let paired = g.cut_height < pim.vcuts;
                let cut = &mut self.cuts[i];
                if first == CommandKind::PimWritePrecharge {
                    cut.out_act_placed = false;
                }
                cut.m_out_it += 1;
                if cut.m_out_it % m_tile_size_out == 0 || cut.m_out_it == m_out {
                    cut.m_out_it = m_tile_size_out * m_out_tile_it;
                    cut.n_out_tile_it += 1;
                    if cut.n_out_tile_it * n_tile_size_out >= n_out {
                        cut.n_out_tile_it = 0;
                        cut.m_out_it = m_tile_size_out * (m_out_tile_it + 1);
                        if cut.m_out_it >= m_out {
                            assert!(
                                cut.in_cnt.is_none(),
                                "output exhausted while input feeding is pending"
                            );
                            log::info!(
                                "{}",
                                style(format!(
                                    "cycle {clk}: output exhausted, cut {i} leaves pim mode"
                                ))
                                .yellow()
                            );
                            cut.in_pim = false;
                            if paired {
                                self.cuts[i + 1].in_pim = false;
                            }
                            self.turn_off = self.cuts.iter().all(|c| !c.in_pim);
                        }
                    }
                    self.cuts[i].output_valid -= 1;
                    if paired {
                        self.cuts[i + 1].output_valid -= 1;
                    }
                }
            }
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::{output_channel_group, output_k_bound, CutEngine};
    use crate::addrdec::AddressCodec;
    use crate::config::Config;
    use crate::decoder::{LoadKind, PimConfig};
    use color_eyre::eyre;
    use std::sync::Arc;

    fn engine() -> eyre::Result<CutEngine> {
        let config = Arc::new(Config::default());
        let codec = AddressCodec::new(&config)?;
        Ok(CutEngine::new(config, codec))
    }

    fn grid(vcuts: usize, hcuts: usize) -> PimConfig {
        PimConfig {
            vcuts,
            hcuts,
            mcf: 1,
            ucf: 1,
            depth_first: false,
            m_tile_size: 256,
            vcuts_next: 1,
            hcuts_next: 1,
            kernel_size: 0,
            stride: 0,
        }
    }

    #[test]
    fn configure_rebuilds_cut_state() -> eyre::Result<()> {
        let mut engine = engine()?;
        engine.configure(grid(2, 2));
        assert_eq!(engine.cuts.len(), 4);

        engine.cuts[3].m_it = 7;
        engine.cuts[3].in_pim = true;
        engine.configure(grid(2, 1));
        assert_eq!(engine.cuts.len(), 2);
        assert!(engine.cuts.iter().all(|c| !c.in_pim && c.m_it == 0));
        Ok(())
    }

    #[test]
    #[should_panic(expected = "row tile limit")]
    fn oversized_row_tile_is_fatal() {
        let mut engine = engine().unwrap();
        let mut pim = grid(1, 1);
        pim.m_tile_size = 4096;
        engine.configure(pim);
    }

    #[test]
    fn enable_requires_loaded_dims() -> eyre::Result<()> {
        let mut engine = engine()?;
        engine.configure(grid(1, 1));

        // Nothing loaded: the word must wait.
        assert!(!engine.try_enable(0b1));
        assert!(!engine.cuts[0].in_pim);

        engine.load(0, LoadKind::Weight, 16, 0);
        engine.load(0, LoadKind::Output, 16, 64);
        assert!(!engine.try_enable(0b1));

        engine.load(0, LoadKind::Input, 16, 128);
        assert!(engine.try_enable(0b1));
        assert!(engine.cuts[0].in_pim);
        Ok(())
    }

    #[test]
    fn zero_mask_enable_is_a_no_op() -> eyre::Result<()> {
        let mut engine = engine()?;
        engine.configure(grid(2, 1));
        assert!(engine.try_enable(0));
        assert!(engine.cuts.iter().all(|c| !c.in_pim));
        Ok(())
    }

    #[test]
    fn mask_bits_above_cut_count_are_ignored() -> eyre::Result<()> {
        let mut engine = engine()?;
        engine.configure(grid(1, 1));
        engine.load(0, LoadKind::Weight, 16, 0);
        engine.load(0, LoadKind::Output, 16, 64);
        engine.load(0, LoadKind::Input, 16, 128);
        assert!(engine.try_enable(0b1011));
        assert!(engine.cuts[0].in_pim);
        Ok(())
    }

    #[test]
    fn load_is_idempotent() -> eyre::Result<()> {
        let mut engine = engine()?;
        engine.configure(grid(1, 1));
        engine.load(0, LoadKind::Input, 32, 512);
        let once = engine.cuts[0].clone();
        engine.load(0, LoadKind::Input, 32, 512);
        assert_eq!(engine.cuts[0].n, once.n);
        assert_eq!(engine.cuts[0].base_row_in, once.base_row_in);
        Ok(())
    }

    #[test]
    fn output_rotation_rules() -> eyre::Result<()> {
        // Plain rotation walks the vertical cuts tile by tile.
        assert_eq!(output_channel_group(16, 4, 1, 0), 1);
        assert_eq!(output_channel_group(16, 4, 1, 1), 2);
        assert_eq!(output_channel_group(16, 4, 3, 2), 1);
        // Single-row results stay put.
        assert_eq!(output_channel_group(1, 4, 3, 2), 3);
        // The fully split grid pairs cuts onto channel groups.
        assert_eq!(output_channel_group(16, 16, 6, 5), 3);
        Ok(())
    }

    #[test]
    fn output_bank_bound() -> eyre::Result<()> {
        assert_eq!(output_k_bound(true, 16), 1);
        assert_eq!(output_k_bound(false, 16), 16);
        assert_eq!(output_k_bound(false, 1), 1);
        Ok(())
    }
}
