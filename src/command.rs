use crate::address;
use serde::{Deserialize, Serialize};

/// Low-level DRAM command kinds, including the PIM-flavored variants that
/// trigger in-bank compute instead of a host data transfer.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum::EnumIter,
    strum::EnumCount,
    Serialize,
    Deserialize,
)]
pub enum CommandKind {
    Activate,
    Read,
    Write,
    Precharge,
    PimActivate,
    PimRead,
    PimReadPrecharge,
    PimWrite,
    PimWritePrecharge,
}

impl CommandKind {
    #[must_use]
    pub fn is_read(self) -> bool {
        matches!(
            self,
            CommandKind::Read | CommandKind::PimRead | CommandKind::PimReadPrecharge
        )
    }

    #[must_use]
    pub fn is_write(self) -> bool {
        matches!(
            self,
            CommandKind::Write | CommandKind::PimWrite | CommandKind::PimWritePrecharge
        )
    }

    #[must_use]
    pub fn is_activate(self) -> bool {
        matches!(self, CommandKind::Activate | CommandKind::PimActivate)
    }

    /// Commands that drive the in-bank compute path.
    #[must_use]
    pub fn is_pim(self) -> bool {
        matches!(
            self,
            CommandKind::PimActivate
                | CommandKind::PimRead
                | CommandKind::PimReadPrecharge
                | CommandKind::PimWrite
                | CommandKind::PimWritePrecharge
        )
    }

    /// Commands that leave the bank closed once issued.
    #[must_use]
    pub fn closes_row(self) -> bool {
        matches!(
            self,
            CommandKind::Precharge | CommandKind::PimReadPrecharge | CommandKind::PimWritePrecharge
        )
    }
}

/// Logical DRAM location. The column is counted in burst units.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub channel: usize,
    pub rank: usize,
    pub bankgroup: usize,
    pub bank: usize,
    pub row: usize,
    pub column: usize,
}

impl Address {
    #[must_use]
    pub fn new(
        channel: usize,
        rank: usize,
        bankgroup: usize,
        bank: usize,
        row: usize,
        column: usize,
    ) -> Self {
        Self {
            channel,
            rank,
            bankgroup,
            bank,
            row,
            column,
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ch{} ra{} bg{} ba{} ro{} co{}",
            self.channel, self.rank, self.bankgroup, self.bank, self.row, self.column
        )
    }
}

/// A command bound for one channel controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub kind: CommandKind,
    pub addr: Address,
    pub flat: address,
}

impl Command {
    #[must_use]
    pub fn new(kind: CommandKind, addr: Address, flat: address) -> Self {
        Self { kind, addr, flat }
    }

    #[must_use]
    pub fn channel(&self) -> usize {
        self.addr.channel
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} [{}]", self.kind, self.addr)
    }
}

/// A host-visible transaction: a conventional read/write, or a PIM control
/// word riding in the address bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transaction {
    pub addr: address,
    pub is_write: bool,
}

impl Transaction {
    #[must_use]
    pub fn read(addr: address) -> Self {
        Self {
            addr,
            is_write: false,
        }
    }

    #[must_use]
    pub fn write(addr: address) -> Self {
        Self {
            addr,
            is_write: true,
        }
    }

    /// A PIM control word; only the address bits carry information.
    #[must_use]
    pub fn control(word: address) -> Self {
        Self {
            addr: word,
            is_write: false,
        }
    }
}

impl std::fmt::Display for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {:#x}",
            if self.is_write { "WRITE" } else { "READ" },
            self.addr
        )
    }
}
