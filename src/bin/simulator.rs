use clap::{App, Arg};
use pancore::radio::{SimulatedQuake, MAX_MT_SIZE};
use pancore::uplink::UplinkProducer;
use pancore::{FlightAgent, FlightConfig};
use std::time::Duration;
use tokio::time;
use tracing::{error, info, warn, Level};

/// An uplink to hand the modem at a given control cycle.
struct ScriptedUplink {
    cycle: u32,
    name: String,
    value: String,
}

fn parse_uplink(spec: &str) -> Result<ScriptedUplink, String> {
    let (cycle, assignment) = spec
        .split_once(':')
        .ok_or_else(|| format!("expected CYCLE:NAME=VALUE, got `{spec}`"))?;
    let (name, value) = assignment
        .split_once('=')
        .ok_or_else(|| format!("expected CYCLE:NAME=VALUE, got `{spec}`"))?;
    let cycle = cycle.trim().parse().map_err(|_| format!("invalid cycle in `{spec}`"))?;
    Ok(ScriptedUplink {
        cycle,
        name: name.trim().to_string(),
        value: value.trim().to_string(),
    })
}

fn validate_period(value: String) -> Result<(), String> {
    match value.parse::<u64>() {
        Ok(0) => Err("Period must be at least 1 ms".to_string()),
        Ok(_) => Ok(()),
        Err(_) => Err("Period must be a number".to_string()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("pancore-sim")
        .version("0.1.0")
        .author("Space Systems Engineering Team")
        .about("🛰️  Runs the flight stack against a simulated Quake modem")
        .arg(
            Arg::with_name("cycles")
                .short("n")
                .long("cycles")
                .value_name("N")
                .help("Control cycles to run (0 runs until Ctrl+C)")
                .takes_value(true)
                .default_value("0")
                .validator(|v| v.parse::<u32>().map(|_| ()).map_err(|_| "Cycles must be a number".to_string())),
        )
        .arg(
            Arg::with_name("period")
                .short("p")
                .long("period")
                .value_name("MS")
                .help("Control cycle period in ms (defaults to the configured value)")
                .takes_value(true)
                .validator(validate_period),
        )
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("Flight configuration (JSON)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("uplink")
                .short("u")
                .long("uplink")
                .value_name("CYCLE:NAME=VALUE")
                .help("Queue a field update for the satellite at a control cycle, repeatable")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Increase log verbosity, repeatable")
                .multiple(true),
        )
        .get_matches();

    let level = match matches.occurrences_of("verbose") {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).with_writer(std::io::stderr).init();

    let mut config = match matches.value_of("config") {
        Some(path) => FlightConfig::load(path)?,
        None => FlightConfig::default(),
    };
    let cycles: u32 = matches.value_of("cycles").unwrap_or("0").parse()?;
    if let Some(period) = matches.value_of("period") {
        config.control_cycle_ms = period.parse()?;
        config.validate()?;
    }
    let period_ms = config.control_cycle_ms;
    let mut script = matches
        .values_of("uplink")
        .into_iter()
        .flatten()
        .map(parse_uplink)
        .collect::<Result<Vec<_>, _>>()?;
    script.sort_by_key(|uplink| uplink.cycle);

    let modem = SimulatedQuake::new(config.simulation.clone());
    let mut agent = FlightAgent::new(config, modem.clone())?;
    info!("🚀 Flight stack running, {} ms control cycle", period_ms);

    let mut interval = time::interval(Duration::from_millis(period_ms));
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }

        agent.step();
        let cycle = agent.cycle();

        while script.first().is_some_and(|uplink| uplink.cycle <= cycle) {
            let uplink = script.remove(0);
            let mut producer = UplinkProducer::new(agent.registry());
            let packet = producer
                .add_str(&uplink.name, &uplink.value)
                .and_then(|()| producer.to_packet(MAX_MT_SIZE));
            match packet {
                Ok(packet) if modem.queue_uplink(&packet) => {
                    info!("📤 Queued uplink {}={} ({} bytes)", uplink.name, uplink.value, packet.len());
                }
                Ok(_) => warn!("Modem uplink queue full, dropped {}={}", uplink.name, uplink.value),
                Err(e) => error!("❌ Cannot build uplink {}={}: {}", uplink.name, uplink.value, e),
            }
        }

        for packet in modem.take_delivered() {
            println!("{}", serde_json::to_string(&packet)?);
        }

        if cycles != 0 && cycle >= cycles {
            break;
        }
    }

    let stats = modem.stats();
    info!(
        "Simulation stopped at cycle {} in {:?}: {} MO delivered, {} MT delivered, {} timeouts, {} CRC errors",
        agent.cycle(),
        agent.radio_mode(),
        stats.mo_delivered,
        stats.mt_delivered,
        stats.timeouts_injected,
        stats.crc_errors_injected
    );
    Ok(())
}
