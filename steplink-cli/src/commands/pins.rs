//! Single-pin access.

use anyhow::{Result, bail};
use console::style;
use log::info;
use steplink::{Pin, PinMode};

use crate::config::Config;
use crate::{Cli, connect};

fn pin(index: u8, inverted: bool) -> Pin {
    if inverted {
        Pin::inverted(index)
    } else {
        Pin::new(index)
    }
}

fn level_name(level: bool) -> &'static str {
    if level { "high" } else { "low" }
}

/// Read a pin and print its logical level to stdout.
pub(crate) fn cmd_read_pin(cli: &Cli, config: &Config, index: u8, inverted: bool) -> Result<()> {
    let mut link = connect(cli, config)?;
    let Some(level) = link.read_pin(pin(index, inverted))? else {
        bail!("controller did not report pin {index}");
    };
    println!("{}", level_name(level));
    Ok(())
}

/// Switch a pin to `mode`.
pub(crate) fn cmd_set_pin(
    cli: &Cli,
    config: &Config,
    index: u8,
    mode: PinMode,
    inverted: bool,
) -> Result<()> {
    let mut link = connect(cli, config)?;
    if link.set_pin_mode(pin(index, inverted), mode)? {
        info!("Pin {index} set to {mode:?}");
    } else {
        eprintln!(
            "{} pin {index} already {mode:?}",
            style("•").dim()
        );
    }
    Ok(())
}
