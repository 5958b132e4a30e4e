//! Serial port listing.

use anyhow::{Context, Result};
use console::style;
use steplink::PortInfo;

fn port_json(port: &PortInfo) -> serde_json::Value {
    serde_json::json!({
        "name": port.name,
        "vid": port.vid,
        "pid": port.pid,
        "product": port.product,
    })
}

/// List serial ports; JSON goes to stdout, the human listing to stderr.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let ports = steplink::list_ports().context("failed to enumerate serial ports")?;

    if json {
        let ports: Vec<serde_json::Value> = ports.iter().map(port_json).collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&ports).unwrap_or_default()
        );
        return Ok(());
    }

    eprintln!("{}", style("Serial ports").bold().underlined());

    if ports.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return Ok(());
    }

    for port in &ports {
        let vid_pid = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" ({vid:04X}:{pid:04X})")
        } else {
            String::new()
        };
        let product = port
            .product
            .as_deref()
            .map(|p| format!(" - {}", style(p).dim()))
            .unwrap_or_default();

        eprintln!(
            "  {} {}{}{}",
            style("•").green(),
            style(&port.name).cyan(),
            vid_pid,
            product
        );
    }
    Ok(())
}
