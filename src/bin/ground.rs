use clap::{App, Arg, ArgMatches, SubCommand};
use colored::*;
use pancore::downlink::{chunk_count, decode_snapshot};
use pancore::radio::{SimulatedQuake, SimulationConfig, MAX_MT_SIZE};
use pancore::uplink::{index_bits, UplinkProducer};
use pancore::{FlightAgent, FlightConfig};
use serde_json::json;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("pancore-ground")
        .version("0.1.0")
        .author("Space Systems Engineering Team")
        .about("🛰️  Ground tooling for the pancore radio link")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("Flight configuration (JSON)")
                .takes_value(true)
                .global(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "table"])
                .default_value("table")
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("layout")
                .about("📋 Show the field layout")
                .long_about("Lists every downlinked field with its width and offset, and every uplink index"),
        )
        .subcommand(
            SubCommand::with_name("uplink")
                .about("📤 Build an uplink packet")
                .arg(
                    Arg::with_name("set")
                        .short("s")
                        .long("set")
                        .value_name("NAME=VALUE")
                        .help("Field assignment, repeatable")
                        .takes_value(true)
                        .multiple(true)
                        .number_of_values(1)
                        .required(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("downlink")
                .about("📥 Decode a downlink snapshot")
                .arg(
                    Arg::with_name("hex")
                        .help("Snapshot bytes in hex, chunks concatenated")
                        .required(true),
                ),
        )
        .get_matches();

    let config = match matches.value_of("config") {
        Some(path) => FlightConfig::load(path)?,
        None => FlightConfig::default(),
    };
    let format = matches.value_of("format").unwrap_or("table");

    // A flight stack built from the same config has the same layout as the satellite
    let agent = FlightAgent::new(config, SimulatedQuake::new(SimulationConfig::ideal()))?;

    match matches.subcommand() {
        ("layout", Some(_)) => print_layout(&agent, format),
        ("uplink", Some(sub)) => build_uplink(&agent, sub, format)?,
        ("downlink", Some(sub)) => decode_downlink(&agent, sub, format)?,
        _ => println!("{}", "No command specified. Use --help for usage information.".yellow()),
    }
    Ok(())
}

fn print_layout(agent: &FlightAgent, format: &str) {
    let registry = agent.registry();
    let packet_size = agent.config().radio.packet_size;
    let snapshot_bits = registry.snapshot_bits();
    let snap_size = snapshot_bits.div_ceil(8);

    if format == "json" {
        let fields: Vec<_> = registry
            .readable_fields()
            .iter()
            .map(|field| {
                json!({
                    "name": field.name(),
                    "bits": field.bitsize(),
                    "uplink_index": registry.writable_index(field.name()),
                })
            })
            .collect();
        let layout = json!({
            "fields": fields,
            "index_bits": index_bits(registry.writable_fields().len()),
            "snapshot_bits": snapshot_bits,
            "snapshot_bytes": snap_size,
            "packets": chunk_count(snap_size, packet_size),
        });
        println!("{layout:#}");
        return;
    }

    println!("{}", "📋 Field Layout".bright_blue().bold());
    println!("{:<36} {:>6} {:>8} {:>7}", "FIELD".bright_white(), "BITS", "OFFSET", "INDEX");
    let mut offset = 0;
    for field in registry.readable_fields() {
        let index = registry
            .writable_index(field.name())
            .map_or_else(|| "-".to_string(), |i| i.to_string());
        println!("{:<36} {:>6} {:>8} {:>7}", field.name(), field.bitsize(), offset, index.bright_cyan());
        offset += field.bitsize();
    }
    println!();
    println!(
        "Uplink index width: {} bits ({} writable fields)",
        index_bits(registry.writable_fields().len()).to_string().bright_cyan(),
        registry.writable_fields().len()
    );
    println!(
        "Snapshot: {} bits, {} bytes, {} packet(s) of {} bytes",
        snapshot_bits,
        snap_size,
        chunk_count(snap_size, packet_size).to_string().bright_cyan(),
        packet_size
    );
}

fn build_uplink(agent: &FlightAgent, matches: &ArgMatches<'_>, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut producer = UplinkProducer::new(agent.registry());
    for assignment in matches.values_of("set").into_iter().flatten() {
        let Some((name, value)) = assignment.split_once('=') else {
            return Err(format!("expected NAME=VALUE, got `{assignment}`").into());
        };
        if let Err(e) = producer.add_str(name.trim(), value.trim()) {
            eprintln!("{} {}", "❌".red(), e.to_string().bright_red());
            return Err(e.into());
        }
    }

    let packet = producer.to_packet(MAX_MT_SIZE)?;
    let encoded = hex::encode(&packet);
    if format == "json" {
        println!("{}", json!({ "bits": producer.bitsize(), "bytes": packet.len(), "hex": encoded }));
    } else {
        println!("{} {} bits in {} bytes", "✅".green(), producer.bitsize(), packet.len());
        println!("{}", encoded.bright_cyan());
    }
    Ok(())
}

fn decode_downlink(agent: &FlightAgent, matches: &ArgMatches<'_>, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let data = parse_hex(matches.value_of("hex").unwrap_or_default())?;
    let registry = agent.registry();
    let decoded = decode_snapshot(registry.readable_fields(), &data);

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&decoded)?);
        return Ok(());
    }

    println!("{}", "📥 Downlink Snapshot".bright_blue().bold());
    for field in &decoded {
        match &field.value {
            Some(value) => println!("{:<36} {}", field.name, value.bright_white()),
            None => println!("{:<36} {}", field.name, "invalid".bright_red()),
        }
    }
    if decoded.len() < registry.readable_fields().len() {
        println!(
            "{} Snapshot truncated after {} of {} fields",
            "⚠️".yellow(),
            decoded.len(),
            registry.readable_fields().len()
        );
    }
    Ok(())
}

/// Accepts chunks pasted with spaces or line breaks between them.
fn parse_hex(text: &str) -> Result<Vec<u8>, hex::FromHexError> {
    let digits: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(digits)
}
