use crate::command::Address;
use crate::config::{Config, ConfigError, MAPPING_TOKENS};
use crate::address;

/// One bit field inside the flat address, above the burst offset.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Field {
    pos: u32,
    width: u32,
}

impl Field {
    fn extract(&self, addr: address) -> usize {
        ((addr >> self.pos) & ((1 << self.width) - 1)) as usize
    }

    fn place(&self, value: usize) -> address {
        debug_assert!(value < (1usize << self.width).max(1));
        (value as address) << self.pos
    }
}

/// Maps logical `(channel, rank, bankgroup, bank, row, column)` locations to
/// flat bus addresses and back. Pure and stateless once built.
///
/// The field order comes from the config mapping string, most significant
/// field first; field widths come from the geometry. The low
/// [`Config::shift_bits`] bits address bytes inside one burst and carry no
/// field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressCodec {
    channel: Field,
    rank: Field,
    bankgroup: Field,
    bank: Field,
    row: Field,
    column: Field,
    shift_bits: u32,
}

impl AddressCodec {
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;

        let bad = |reason: &str| ConfigError::BadMapping {
            mapping: config.mapping.clone(),
            reason: reason.to_string(),
        };

        if config.mapping.len() != 12 || !config.mapping.is_ascii() {
            return Err(bad("expected six two-character field tokens"));
        }

        let width_of = |token: &str| -> u32 {
            match token {
                "ch" => config.channels.ilog2(),
                "ra" => config.ranks.ilog2(),
                "bg" => config.bankgroups.ilog2(),
                "ba" => config.banks_per_group.ilog2(),
                "ro" => config.rows.ilog2(),
                "co" => config.bursts_per_row().ilog2(),
                _ => unreachable!(),
            }
        };

        // Walk the string back to front so the last token lands at bit 0.
        let mut fields = [Field::default(); 6];
        let mut seen = [false; 6];
        let mut pos = 0;
        for i in (0..6).rev() {
            let token = &config.mapping[2 * i..2 * i + 2];
            let Some(slot) = MAPPING_TOKENS.iter().position(|t| *t == token) else {
                return Err(bad(&format!("unknown field token {token:?}")));
            };
            if seen[slot] {
                return Err(bad(&format!("duplicate field token {token:?}")));
            }
            seen[slot] = true;
            let width = width_of(token);
            fields[slot] = Field { pos, width };
            pos += width;
        }

        let [channel, rank, bankgroup, bank, row, column] = fields;
        Ok(Self {
            channel,
            rank,
            bankgroup,
            bank,
            row,
            column,
            shift_bits: config.shift_bits(),
        })
    }

    /// Pack a logical location into a flat address.
    #[must_use]
    pub fn encode(&self, addr: &Address) -> address {
        let packed = self.channel.place(addr.channel)
            | self.rank.place(addr.rank)
            | self.bankgroup.place(addr.bankgroup)
            | self.bank.place(addr.bank)
            | self.row.place(addr.row)
            | self.column.place(addr.column);
        packed << self.shift_bits
    }

    /// Unpack a flat address into its logical location.
    #[must_use]
    pub fn decode(&self, flat: address) -> Address {
        let packed = flat >> self.shift_bits;
        Address {
            channel: self.channel.extract(packed),
            rank: self.rank.extract(packed),
            bankgroup: self.bankgroup.extract(packed),
            bank: self.bank.extract(packed),
            row: self.row.extract(packed),
            column: self.column.extract(packed),
        }
    }

    /// Channel owning a flat address; used to route host traffic.
    #[must_use]
    pub fn channel_of(&self, flat: address) -> usize {
        self.channel.extract(flat >> self.shift_bits)
    }
}
