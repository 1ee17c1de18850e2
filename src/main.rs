use clap::Parser;
use color_eyre::eyre::{self, eyre};
use itertools::Itertools;
use pimsim::decoder::{encode, LoadKind, PimConfig};
use pimsim::{ChannelController, Config, JedecDramSystem};
use std::cell::Cell;
use std::rc::Rc;

/// Run a single-cut PIM matrix multiplication to completion.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Options {
    /// Output rows.
    #[arg(short, default_value_t = 16)]
    m: usize,
    /// Input depth.
    #[arg(short, default_value_t = 16)]
    n: usize,
    /// Reduction depth.
    #[arg(short, default_value_t = 16)]
    k: usize,

    /// Row tile size (power of two).
    #[arg(long, default_value_t = 256)]
    m_tile: usize,

    /// Give up after this many cycles.
    #[arg(long, default_value_t = 1_000_000)]
    max_cycles: u64,
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    env_logger::init();

    let options = Options::parse();
    let mut system = JedecDramSystem::new(Config::default())?;

    let writes = Rc::new(Cell::new(0u64));
    let reads = Rc::new(Cell::new(0u64));
    {
        let reads = Rc::clone(&reads);
        let writes = Rc::clone(&writes);
        system.register_callbacks(
            move |_| reads.set(reads.get() + 1),
            move |_| writes.set(writes.get() + 1),
        );
    }

    let pim = PimConfig {
        vcuts: 1,
        hcuts: 1,
        mcf: 1,
        ucf: 1,
        depth_first: false,
        m_tile_size: options.m_tile,
        vcuts_next: 1,
        hcuts_next: 1,
        kernel_size: 1,
        stride: 1,
    };
    let control_stream = [
        encode::configure(&pim),
        encode::load(0, LoadKind::Weight, options.m, 0),
        encode::load(0, LoadKind::Output, options.k, 0x1000),
        encode::load(0, LoadKind::Input, options.n, 0x2000),
        encode::compute_enable(0b1),
    ];
    for word in control_stream {
        assert!(system.will_accept_pim());
        system.submit_pim(word);
    }

    // A little conventional traffic alongside the PIM stream.
    for channel in 0..4 {
        let addr = system
            .codec()
            .encode(&pimsim::Address::new(channel, 0, 0, 0, 4096, 0));
        if system.will_accept(addr, channel % 2 == 0) {
            system.submit(addr, channel % 2 == 0);
        }
    }

    while !system.turned_off() {
        if system.clk() >= options.max_cycles {
            return Err(eyre!(
                "computation did not finish within {} cycles",
                options.max_cycles
            ));
        }
        system.tick();
    }

    println!(
        "{}x{}x{} matmul finished after {} cycles",
        options.m,
        options.n,
        options.k,
        system.clk()
    );
    let per_channel = system
        .ctrls
        .iter()
        .map(|ctrl| {
            let stats = ctrl.stats();
            format!(
                "act {} rd {} wr {} ref {}",
                stats.pim_activates(),
                stats.pim_reads(),
                stats.pim_writes(),
                stats.refreshes
            )
        })
        .join("\n  ");
    println!("per-channel pim commands:\n  {per_channel}");
    println!(
        "host callbacks: {} reads, {} writes",
        reads.get(),
        writes.get()
    );
    Ok(())
}
