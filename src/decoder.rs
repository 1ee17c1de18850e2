use crate::address;
use bitvec::{field::BitField, order::Lsb0, view::BitView};
use serde::{Deserialize, Serialize};

// Control-word field widths, LSB first. Any drift here silently
// misconfigures the engine, so every shift below goes through these.
pub const CUT_NO_BITS: usize = 4;
pub const LOAD_TYPE_BITS: usize = 2;
pub const VCUTS_BITS: usize = 3;
pub const HCUTS_BITS: usize = 1;
pub const MCF_BITS: usize = 3;
pub const UCF_BITS: usize = 3;
pub const DF_BITS: usize = 1;
pub const M_TILE_BITS: usize = 4;
pub const KERNEL_BITS: usize = 5;
pub const STRIDE_BITS: usize = 5;
pub const DIM_BITS: usize = 32;
pub const BASE_ROW_BITS: usize = 22;

/// The load type value that marks a word as a Configure instead.
const CONFIGURE_DISCRIMINATOR: u64 = 0b11;

/// Which `(base row, dimension)` pair of a cut a Load word writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadKind {
    /// Weight base row and the M dimension.
    Weight = 0,
    /// Output base row and the K dimension.
    Output = 1,
    /// Input base row and the N dimension.
    Input = 2,
}

/// Partitioning and dataflow parameters carried by a Configure word.
///
/// Power-of-two fields travel as log2 on the wire; this struct stores the
/// expanded values. `vcuts_next`, `hcuts_next`, `kernel_size` and `stride`
/// are decoded for wire compatibility but not consumed by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PimConfig {
    pub vcuts: usize,
    pub hcuts: usize,
    pub mcf: usize,
    pub ucf: usize,
    pub depth_first: bool,
    pub m_tile_size: usize,
    pub vcuts_next: usize,
    pub hcuts_next: usize,
    pub kernel_size: usize,
    pub stride: usize,
}

impl PimConfig {
    /// Number of compute partitions.
    #[must_use]
    pub fn cuts(&self) -> usize {
        self.vcuts * self.hcuts
    }

    /// Combined multi-column folding factor.
    #[must_use]
    pub fn mc(&self) -> usize {
        self.mcf * self.ucf
    }

    #[must_use]
    pub fn multi_tenant(&self) -> bool {
        self.cuts() > 1
    }
}

/// A decoded PIM control word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlWord {
    /// One-hot cut mask; bits above the configured cut count are ignored.
    ComputeEnable { mask: u64 },
    Configure(PimConfig),
    Load {
        cut: usize,
        kind: LoadKind,
        dim: usize,
        base_row: usize,
    },
}

/// Interpret a control word, LSB first.
#[must_use]
pub fn decode(word: address) -> ControlWord {
    let bits = word.view_bits::<Lsb0>();
    if bits[0] {
        return ControlWord::ComputeEnable { mask: word >> 1 };
    }

    let mut at = 1;
    let mut field = |width: usize| -> u64 {
        let value = bits[at..at + width].load::<u64>();
        at += width;
        value
    };

    let cut = field(CUT_NO_BITS) as usize;
    let load_type = field(LOAD_TYPE_BITS);
    if load_type == CONFIGURE_DISCRIMINATOR {
        let vcuts = 1 << field(VCUTS_BITS);
        let hcuts = 1 << field(HCUTS_BITS);
        let mcf = 1 << field(MCF_BITS);
        let ucf = 1 << field(UCF_BITS);
        let depth_first = field(DF_BITS) == 1;
        let m_tile_size = 1 << field(M_TILE_BITS);
        let vcuts_next = 1 << field(VCUTS_BITS);
        let hcuts_next = 1 << field(HCUTS_BITS);
        let kernel_size = field(KERNEL_BITS) as usize;
        let stride = field(STRIDE_BITS) as usize;
        return ControlWord::Configure(PimConfig {
            vcuts,
            hcuts,
            mcf,
            ucf,
            depth_first,
            m_tile_size,
            vcuts_next,
            hcuts_next,
            kernel_size,
            stride,
        });
    }

    let dim = field(DIM_BITS) as usize;
    let base_row = field(BASE_ROW_BITS) as usize;
    let kind = match load_type {
        0 => LoadKind::Weight,
        1 => LoadKind::Output,
        2 => LoadKind::Input,
        _ => unreachable!("load type 3 is the configure discriminator"),
    };
    ControlWord::Load {
        cut,
        kind,
        dim,
        base_row,
    }
}

/// Host-side encoders, the exact inverses of [`decode`].
pub mod encode {
    use super::{
        PimConfig, BASE_ROW_BITS, CONFIGURE_DISCRIMINATOR, CUT_NO_BITS, DF_BITS, DIM_BITS,
        HCUTS_BITS, KERNEL_BITS, LOAD_TYPE_BITS, MCF_BITS, M_TILE_BITS, STRIDE_BITS, UCF_BITS,
        VCUTS_BITS,
    };
    use crate::address;
    use crate::decoder::LoadKind;
    use bitvec::{field::BitField, order::Lsb0, view::BitView};

    #[must_use]
    pub fn compute_enable(mask: u64) -> address {
        (mask << 1) | 1
    }

    #[must_use]
    pub fn configure(config: &PimConfig) -> address {
        let mut word: address = 0;
        let bits = word.view_bits_mut::<Lsb0>();
        let mut at = 1;
        let mut field = |width: usize, value: u64| {
            bits[at..at + width].store::<u64>(value);
            at += width;
        };
        field(CUT_NO_BITS, 0);
        field(LOAD_TYPE_BITS, CONFIGURE_DISCRIMINATOR);
        field(VCUTS_BITS, config.vcuts.ilog2().into());
        field(HCUTS_BITS, config.hcuts.ilog2().into());
        field(MCF_BITS, config.mcf.ilog2().into());
        field(UCF_BITS, config.ucf.ilog2().into());
        field(DF_BITS, u64::from(config.depth_first));
        field(M_TILE_BITS, config.m_tile_size.ilog2().into());
        field(VCUTS_BITS, config.vcuts_next.ilog2().into());
        field(HCUTS_BITS, config.hcuts_next.ilog2().into());
        field(KERNEL_BITS, config.kernel_size as u64);
        field(STRIDE_BITS, config.stride as u64);
        word
    }

    #[must_use]
    pub fn load(cut: usize, kind: LoadKind, dim: usize, base_row: usize) -> address {
        let mut word: address = 0;
        let bits = word.view_bits_mut::<Lsb0>();
        let mut at = 1;
        let mut field = |width: usize, value: u64| {
            bits[at..at + width].store::<u64>(value);
            at += width;
        };
        field(CUT_NO_BITS, cut as u64);
        field(LOAD_TYPE_BITS, kind as u64);
        field(DIM_BITS, dim as u64);
        field(BASE_ROW_BITS, base_row as u64);
        word
    }
}
