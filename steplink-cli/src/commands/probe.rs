//! Capability probe.

use anyhow::{Context, Result};
use console::style;
use steplink::{Capabilities, Port};

use crate::config::Config;
use crate::{Cli, connect};

fn capability_rows(caps: &Capabilities) -> [(&'static str, String); 7] {
    [
        ("Protocol version", caps.protocol_version.to_string()),
        ("Digital pins", caps.digital_pins.to_string()),
        ("Analog inputs", caps.analog_inputs.to_string()),
        ("Motors", caps.motors.to_string()),
        ("Buffers", caps.buffers.to_string()),
        ("Fragments per buffer", caps.fragments_per_buffer.to_string()),
        (
            "Bytes per fragment",
            format!(
                "{} ({} samples)",
                caps.bytes_per_fragment,
                caps.samples_per_fragment()
            ),
        ),
    ]
}

/// Handshake, negotiate and print what the controller reported.
pub(crate) fn cmd_probe(cli: &Cli, config: &Config, json: bool) -> Result<()> {
    let link = connect(cli, config)?;
    let caps = link
        .capabilities()
        .context("controller did not report capabilities")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&caps)?);
        return Ok(());
    }

    eprintln!(
        "{} {}",
        style("✓").green().bold(),
        style(link.port().name()).cyan()
    );
    for (label, value) in capability_rows(&caps) {
        println!("  {}{value}", style(format!("{label:<22}")).bold());
    }
    Ok(())
}
