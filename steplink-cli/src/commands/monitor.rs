//! Event monitor.
//!
//! Pushes the configured machine to the controller, then services the link
//! until Ctrl-C and prints every event the controller reports.

use anyhow::{Context, Result};
use console::style;
use log::{info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::Duration;
use steplink::{LinkDriver, LinkEvent, MotionState, NativePort};

use crate::config::Config;
use crate::{Cli, connect};

/// Poll interval of the service loop.
const SERVICE_INTERVAL: Duration = Duration::from_millis(100);

fn describe(event: &LinkEvent) -> String {
    match event {
        LinkEvent::Limit {
            axis,
            motor,
            position,
            pending_callbacks,
        } => format!(
            "limit    axis {axis} motor {motor} at {position:.3} ({pending_callbacks} callbacks dropped)"
        ),
        LinkEvent::Sense {
            axis,
            motor,
            rising,
        } => format!(
            "sense    axis {axis} motor {motor} {}",
            if *rising { "rising" } else { "falling" }
        ),
        LinkEvent::Temperature { sensor, raw } => format!("temp     sensor {sensor} raw {raw}"),
        LinkEvent::FragmentsAvailable { free } => format!("credit   {free} fragments free"),
    }
}

fn configure(link: &mut LinkDriver<NativePort>, config: &Config) -> Result<()> {
    link.push_globals(config.globals.led, config.globals.step_time())
        .context("failed to push global settings")?;

    let topology = config.to_topology()?;
    let motors = topology.motor_count();
    link.push_topology(topology)
        .context("failed to push motor topology")?;
    info!("Pushed {motors} motors on {} axes", config.axis.len());

    for sensor in &config.sensor {
        link.setup_temperature(sensor)
            .with_context(|| format!("failed to set up sensor {}", sensor.id))?;
    }
    Ok(())
}

/// Run the monitor until interrupted.
pub(crate) fn cmd_monitor(cli: &Cli, config: &Config) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("failed to install Ctrl-C handler")?;

    let mut link = connect(cli, config)?;
    configure(&mut link, config)?;

    let (tx, rx) = mpsc::channel();
    link.set_consumer(Box::new(tx));

    eprintln!("{}", style("Monitoring, press Ctrl-C to exit").dim());

    while running.load(Ordering::SeqCst) {
        link.service(SERVICE_INTERVAL)
            .context("link lost")?;
        for event in rx.try_iter() {
            if matches!(event, LinkEvent::Limit { .. }) {
                println!("{}", style(describe(&event)).yellow());
            } else {
                println!("{}", describe(&event));
            }
        }
    }

    if link.motion_state() == MotionState::Running && !link.stop()? {
        warn!("Controller did not confirm stop");
    }
    eprintln!("{}", style("Monitor closed").dim());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_events() {
        let limit = LinkEvent::Limit {
            axis: 1,
            motor: 0,
            position: 12.5,
            pending_callbacks: 2,
        };
        assert_eq!(
            describe(&limit),
            "limit    axis 1 motor 0 at 12.500 (2 callbacks dropped)"
        );
        assert_eq!(
            describe(&LinkEvent::Sense {
                axis: 0,
                motor: 1,
                rising: false
            }),
            "sense    axis 0 motor 1 falling"
        );
        assert_eq!(
            describe(&LinkEvent::Temperature { sensor: 3, raw: 512 }),
            "temp     sensor 3 raw 512"
        );
        assert_eq!(
            describe(&LinkEvent::FragmentsAvailable { free: 7 }),
            "credit   7 fragments free"
        );
    }
}
