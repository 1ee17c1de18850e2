use crate::address;
use crate::command::{Address, Command, CommandKind, Transaction};
use crate::config::Config;
use console::style;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use strum::{EnumCount, IntoEnumIterator};

/// Per-channel issue counters, one slot per command kind, reported each
/// epoch.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ControllerStats {
    issued: [u64; CommandKind::COUNT],
    pub refreshes: u64,
    pub done_reads: u64,
    pub done_writes: u64,
}

impl ControllerStats {
    fn record(&mut self, kind: CommandKind) {
        self.issued[kind as usize] += 1;
    }

    /// Commands of one kind issued on this channel.
    #[must_use]
    pub fn issued(&self, kind: CommandKind) -> u64 {
        self.issued[kind as usize]
    }

    #[must_use]
    pub fn pim_activates(&self) -> u64 {
        self.issued(CommandKind::PimActivate)
    }

    #[must_use]
    pub fn pim_reads(&self) -> u64 {
        self.issued(CommandKind::PimRead) + self.issued(CommandKind::PimReadPrecharge)
    }

    #[must_use]
    pub fn pim_writes(&self) -> u64 {
        self.issued(CommandKind::PimWrite) + self.issued(CommandKind::PimWritePrecharge)
    }

    /// Total PIM commands issued on this channel.
    #[must_use]
    pub fn pim_commands(&self) -> u64 {
        CommandKind::iter()
            .filter(|kind| kind.is_pim())
            .map(|kind| self.issued(kind))
            .sum()
    }
}

/// The contract the scheduling engine relies on, per channel.
///
/// The engine only reads timing state through [`ready_command`] and appends
/// to the three PIM command lanes; the controller owns everything else.
///
/// [`ready_command`]: ChannelController::ready_command
pub trait ChannelController {
    /// Admission test for conventional traffic.
    fn will_accept(&self, addr: address, is_write: bool) -> bool;

    /// Enqueue a conventional transaction.
    fn enqueue(&mut self, trans: Transaction, clk: u64);

    /// The command the controller is ready to issue toward `cmd`: the
    /// command itself, an ACTIVATE or PRECHARGE precursor, or `None` when
    /// timing does not allow anything yet.
    fn ready_command(&self, cmd: &Command, clk: u64) -> Option<Command>;

    /// Pop one completed conventional transaction, if any.
    fn return_done(&mut self, clk: u64) -> Option<(address, bool)>;

    fn in_refresh(&self) -> bool;
    /// Refresh close enough that new row activations should be held back.
    fn refresh_coming(&self) -> bool;
    /// Refresh imminent; all PIM work is suppressed.
    fn refresh_imminent(&self) -> bool;

    /// Broadcast by a Configure word when more than one cut exists.
    fn set_multi_tenant(&mut self, on: bool);

    // PIM command lanes
    fn push_weight(&mut self, cmd: Command);
    fn push_input(&mut self, cmd: Command, release: u64);
    fn push_output(&mut self, cmd: Command);

    /// Advance one memory clock cycle.
    fn tick(&mut self, clk: u64);

    fn stats(&self) -> &ControllerStats;
    fn reset_stats(&mut self);
}

/// Open-row and timing state of a single bank.
#[derive(Debug, Default, Clone)]
struct BankState {
    open_row: Option<usize>,
    act_ok: u64,
    rd_ok: u64,
    wr_ok: u64,
    pre_ok: u64,
}

/// Model channel controller with per-bank JEDEC timing, periodic refresh
/// and fixed-latency conventional completion.
#[derive(Debug)]
pub struct Controller {
    id: usize,
    config: Arc<Config>,
    banks: Vec<BankState>,
    pending: VecDeque<(Transaction, u64)>,
    weight_lane: VecDeque<Command>,
    input_lane: VecDeque<(Command, u64)>,
    output_lane: VecDeque<Command>,
    pub multi_tenant: bool,
    stats: ControllerStats,
    /// The cycle about to be processed; updated by `tick`.
    now: u64,
    was_refreshing: bool,
}

impl Controller {
    #[must_use]
    pub fn new(id: usize, config: Arc<Config>) -> Self {
        let banks = vec![BankState::default(); config.banks()];
        Self {
            id,
            config,
            banks,
            pending: VecDeque::new(),
            weight_lane: VecDeque::new(),
            input_lane: VecDeque::new(),
            output_lane: VecDeque::new(),
            multi_tenant: false,
            stats: ControllerStats::default(),
            now: 0,
            was_refreshing: false,
        }
    }

    fn bank_index(&self, addr: &Address) -> usize {
        (addr.rank * self.config.bankgroups + addr.bankgroup) * self.config.banks_per_group
            + addr.bank
    }

    fn refreshing(&self, clk: u64) -> bool {
        self.config.trefi != 0 && clk >= self.config.trefi && clk % self.config.trefi < self.config.trfc
    }

    /// Cycles until the next refresh begins.
    fn to_next_refresh(&self, clk: u64) -> u64 {
        debug_assert!(self.config.trefi != 0);
        self.config.trefi - clk % self.config.trefi
    }

    fn apply(&mut self, cmd: &Command, clk: u64) {
        let index = self.bank_index(&cmd.addr);
        let config = &self.config;
        let bank = &mut self.banks[index];
        match cmd.kind {
            CommandKind::Activate | CommandKind::PimActivate => {
                bank.open_row = Some(cmd.addr.row);
                bank.rd_ok = clk + config.trcdrd;
                bank.wr_ok = clk + config.trcdwr;
                bank.pre_ok = bank.pre_ok.max(clk + config.tras);
            }
            CommandKind::Read | CommandKind::PimRead => {
                bank.rd_ok = clk + config.tccd_l;
                bank.pre_ok = bank.pre_ok.max(clk + config.trtp);
            }
            CommandKind::PimReadPrecharge => {
                bank.open_row = None;
                bank.act_ok = clk + config.trtp + config.trp;
            }
            CommandKind::Write | CommandKind::PimWrite => {
                bank.wr_ok = clk + config.tccd_l;
                bank.pre_ok = bank
                    .pre_ok
                    .max(clk + config.cwl + config.burst_length as u64 / 2 + config.twr);
            }
            CommandKind::PimWritePrecharge => {
                bank.open_row = None;
                bank.act_ok =
                    clk + config.cwl + config.burst_length as u64 / 2 + config.twr + config.trp;
            }
            CommandKind::Precharge => {
                bank.open_row = None;
                bank.act_ok = clk + config.trp;
            }
        }
        self.stats.record(cmd.kind);
    }
}

impl ChannelController for Controller {
    fn will_accept(&self, _addr: address, _is_write: bool) -> bool {
        self.pending.len() < self.config.trans_queue_depth
    }

    fn enqueue(&mut self, trans: Transaction, clk: u64) {
        let latency = if trans.is_write {
            self.config.write_latency()
        } else {
            self.config.read_latency()
        };
        self.pending.push_back((trans, clk + latency));
    }

    fn ready_command(&self, cmd: &Command, clk: u64) -> Option<Command> {
        if self.refreshing(clk) {
            return None;
        }
        let bank = &self.banks[self.bank_index(&cmd.addr)];
        match bank.open_row {
            None => (clk >= bank.act_ok)
                .then(|| Command::new(CommandKind::PimActivate, cmd.addr, cmd.flat)),
            Some(row) if row == cmd.addr.row => {
                let ready = if cmd.kind.is_read() {
                    clk >= bank.rd_ok
                } else if cmd.kind.is_write() {
                    clk >= bank.wr_ok
                } else {
                    false
                };
                ready.then_some(*cmd)
            }
            Some(_) => (clk >= bank.pre_ok)
                .then(|| Command::new(CommandKind::Precharge, cmd.addr, cmd.flat)),
        }
    }

    fn return_done(&mut self, clk: u64) -> Option<(address, bool)> {
        let (_, ready) = self.pending.front()?;
        if *ready > clk {
            return None;
        }
        let (trans, _) = self.pending.pop_front().expect("front checked");
        if trans.is_write {
            self.stats.done_writes += 1;
        } else {
            self.stats.done_reads += 1;
        }
        Some((trans.addr, trans.is_write))
    }

    fn in_refresh(&self) -> bool {
        self.refreshing(self.now)
    }

    fn refresh_coming(&self) -> bool {
        self.config.trefi != 0 && self.to_next_refresh(self.now) <= self.config.refresh_guard
    }

    fn refresh_imminent(&self) -> bool {
        self.config.trefi != 0 && self.to_next_refresh(self.now) <= self.config.refresh_guard2
    }

    fn set_multi_tenant(&mut self, on: bool) {
        self.multi_tenant = on;
    }

    fn push_weight(&mut self, cmd: Command) {
        self.weight_lane.push_back(cmd);
    }

    fn push_input(&mut self, cmd: Command, release: u64) {
        self.input_lane.push_back((cmd, release));
    }

    fn push_output(&mut self, cmd: Command) {
        self.output_lane.push_back(cmd);
    }

    fn tick(&mut self, clk: u64) {
        let refreshing = self.refreshing(clk);
        if refreshing && !self.was_refreshing {
            log::debug!("{}", style(format!("channel {} refresh", self.id)).red());
            self.stats.refreshes += 1;
        }
        if refreshing {
            // Refresh owns the array: every bank is closed and stays
            // unavailable until tRFC (plus the row-to-row gap) elapses.
            let reopen = clk - clk % self.config.trefi + self.config.trfc + self.config.trp;
            for bank in &mut self.banks {
                bank.open_row = None;
                bank.act_ok = bank.act_ok.max(reopen);
            }
        }
        self.was_refreshing = refreshing;

        while let Some(cmd) = self.weight_lane.pop_front() {
            self.apply(&cmd, clk);
        }
        while let Some(&(_, release)) = self.input_lane.front() {
            if release > clk {
                break;
            }
            let (cmd, _) = self.input_lane.pop_front().expect("front checked");
            self.apply(&cmd, clk);
        }
        while let Some(cmd) = self.output_lane.pop_front() {
            self.apply(&cmd, clk);
        }

        self.now = clk + 1;
    }

    fn stats(&self) -> &ControllerStats {
        &self.stats
    }

    fn reset_stats(&mut self) {
        self.stats = ControllerStats::default();
    }
}

#[cfg(test)]
mod tests {
    use super::{ChannelController, Controller};
    use crate::command::{Address, Command, CommandKind, Transaction};
    use crate::config::Config;
    use color_eyre::eyre;
    use std::sync::Arc;

    fn controller() -> Controller {
        let config = Config {
            trefi: 0,
            ..Config::default()
        };
        Controller::new(0, Arc::new(config))
    }

    fn read_cmd(bank: usize, row: usize, column: usize) -> Command {
        Command::new(
            CommandKind::PimRead,
            Address::new(0, 0, 0, bank, row, column),
            0,
        )
    }

    /// The controller's answer toward `cmd`, as a hard test expectation.
    fn ready(ctrl: &Controller, cmd: &Command, clk: u64) -> eyre::Result<Command> {
        ctrl.ready_command(cmd, clk)
            .ok_or_else(|| eyre::eyre!("nothing ready toward {cmd} at cycle {clk}"))
    }

    #[test]
    fn closed_bank_wants_activate() -> eyre::Result<()> {
        let ctrl = controller();
        let cmd = ready(&ctrl, &read_cmd(0, 7, 0), 0)?;
        assert_eq!(cmd.kind, CommandKind::PimActivate);
        assert_eq!(cmd.addr.row, 7);
        Ok(())
    }

    #[test]
    fn activate_opens_row_after_trcd() -> eyre::Result<()> {
        let mut ctrl = controller();
        let trcdrd = ctrl.config.trcdrd;

        let act = ready(&ctrl, &read_cmd(0, 7, 0), 0)?;
        ctrl.push_weight(act);
        ctrl.tick(0);

        // Row open but tRCD not satisfied yet.
        assert_eq!(ctrl.ready_command(&read_cmd(0, 7, 0), 1), None);
        let cmd = ready(&ctrl, &read_cmd(0, 7, 0), trcdrd)?;
        assert_eq!(cmd.kind, CommandKind::PimRead);
        Ok(())
    }

    #[test]
    fn row_conflict_wants_precharge() -> eyre::Result<()> {
        let mut ctrl = controller();
        let tras = ctrl.config.tras;

        let act = ready(&ctrl, &read_cmd(0, 7, 0), 0)?;
        ctrl.push_weight(act);
        ctrl.tick(0);

        // A different row on the same bank needs a precharge first, and
        // only after tRAS.
        assert_eq!(ctrl.ready_command(&read_cmd(0, 8, 0), 1), None);
        let cmd = ready(&ctrl, &read_cmd(0, 8, 0), tras)?;
        assert_eq!(cmd.kind, CommandKind::Precharge);
        Ok(())
    }

    #[test]
    fn read_precharge_closes_row() -> eyre::Result<()> {
        let mut ctrl = controller();
        let trcdrd = ctrl.config.trcdrd;

        let act = ready(&ctrl, &read_cmd(0, 7, 0), 0)?;
        ctrl.push_weight(act);
        ctrl.tick(0);
        ctrl.push_weight(Command::new(
            CommandKind::PimReadPrecharge,
            Address::new(0, 0, 0, 0, 7, 0),
            0,
        ));
        ctrl.tick(trcdrd);

        let cmd = ready(&ctrl, &read_cmd(0, 7, 0), trcdrd + 100)?;
        assert_eq!(cmd.kind, CommandKind::PimActivate);
        Ok(())
    }

    #[test]
    fn refresh_windows() -> eyre::Result<()> {
        let config = Config {
            trefi: 200,
            trfc: 20,
            refresh_guard: 40,
            refresh_guard2: 10,
            ..Config::default()
        };
        let mut ctrl = Controller::new(0, Arc::new(config));

        ctrl.tick(100);
        assert!(!ctrl.refresh_coming());
        assert!(!ctrl.in_refresh());

        ctrl.tick(165);
        assert!(ctrl.refresh_coming());
        assert!(!ctrl.refresh_imminent());

        ctrl.tick(195);
        assert!(ctrl.refresh_imminent());

        ctrl.tick(205);
        assert!(ctrl.in_refresh());
        assert_eq!(ctrl.ready_command(&read_cmd(0, 7, 0), 206), None);
        Ok(())
    }

    #[test]
    fn conventional_transactions_complete_in_order() -> eyre::Result<()> {
        let mut ctrl = controller();
        let read_latency = ctrl.config.read_latency();

        assert!(ctrl.will_accept(0x80, false));
        ctrl.enqueue(Transaction::read(0x80), 0);
        ctrl.enqueue(Transaction::write(0x100), 0);

        assert_eq!(ctrl.return_done(read_latency - 1), None);
        assert_eq!(ctrl.return_done(read_latency), Some((0x80, false)));
        let write_latency = ctrl.config.write_latency();
        assert_eq!(ctrl.return_done(write_latency), Some((0x100, true)));
        Ok(())
    }
}
