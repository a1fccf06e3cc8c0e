use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use robot_comm as comm;
use robot_comm::ProtocolState;
use robot_transport::{MockRemote, MockTransport};

#[derive(Parser, Debug)]
#[command(
    name = "rc",
    version,
    about = "Robot communication CLI",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Order {
    Big,
    Little,
}

impl From<Order> for comm::ByteOrder {
    fn from(o: Order) -> Self {
        match o {
            Order::Big => comm::ByteOrder::Big,
            Order::Little => comm::ByteOrder::Little,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Parse a format string and print its fields
    FormatParse {
        /// Format string, e.g. %i%f{2}%c{5}
        format: String,
        /// Reject unknown codes and bad lengths
        #[arg(long, action = ArgAction::SetTrue)]
        strict: bool,
        /// Print the fields as JSON
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// Decode hex bytes with a format string
    Decode {
        #[arg(long)]
        format: String,
        /// Payload as compact hex, e.g. 0000002a
        #[arg(long)]
        hex: String,
        #[arg(long, value_enum, default_value_t = Order::Big)]
        order: Order,
    },
    /// Encode values with a format string and print hex
    Encode {
        #[arg(long)]
        format: String,
        #[arg(long, value_enum, default_value_t = Order::Big)]
        order: Order,
        /// One value per field
        values: Vec<String>,
    },
    /// Validate robot profile YAML (file or directory)
    ProfileValidate {
        #[arg(long)]
        file: Option<String>,
        #[arg(long)]
        dir: Option<String>,
        /// Print the parsed profiles as JSON
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// List robots and their declared protocols from a profile directory
    ProfileList {
        #[arg(long, default_value = "configs/robots")]
        dir: String,
    },
    /// Run one robot connection over the mock transport, feeding it a hex payload
    RunMock {
        /// Robot profile YAML
        #[arg(long)]
        file: String,
        /// Protocol implementation to use
        #[arg(long, default_value = "format")]
        protocol: String,
        /// Bytes the mock robot sends, as compact hex
        #[arg(long, default_value = "")]
        hex: String,
        /// Optional command key to send while the link is up
        #[arg(long)]
        send_key: Option<String>,
        /// Values for the command, one per field
        #[arg(long = "value")]
        values: Vec<String>,
        /// How long to wait for the receive loop to drain
        #[arg(long, default_value_t = 1000)]
        wait_ms: u64,
        /// Print Prometheus metrics at the end
        #[arg(long, action = ArgAction::SetTrue)]
        metrics: bool,
    },
}

fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::FormatParse {
            format,
            strict,
            json,
        } => format_parse(&format, strict, json),
        Commands::Decode { format, hex, order } => decode(&format, &hex, order),
        Commands::Encode {
            format,
            order,
            values,
        } => encode(&format, order, &values),
        Commands::ProfileValidate { file, dir, json } => {
            profile_validate(file.as_deref(), dir.as_deref(), json)
        }
        Commands::ProfileList { dir } => profile_list(&dir),
        Commands::RunMock {
            file,
            protocol,
            hex,
            send_key,
            values,
            wait_ms,
            metrics,
        } => run_mock(
            &file,
            &protocol,
            &hex,
            send_key.as_deref(),
            &values,
            wait_ms,
            metrics,
        ),
    }
}

fn setup_tracing() {
    // Best-effort; avoid panics if already set
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[derive(Serialize)]
struct FieldRow {
    #[serde(rename = "type")]
    field_type: comm::FieldType,
    length: i64,
}

fn format_parse(format: &str, strict: bool, json: bool) -> Result<()> {
    let mode = if strict {
        comm::ParseMode::Strict
    } else {
        comm::ParseMode::Lenient
    };
    let spec = comm::FormatSpec::parse_with(format, mode)
        .with_context(|| format!("parsing format {format:?}"))?;
    if json {
        let rows: Vec<FieldRow> = spec
            .fields()
            .iter()
            .map(|f| FieldRow {
                field_type: f.field_type,
                length: f.length(),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    for (i, f) in spec.fields().iter().enumerate() {
        println!("{i}\t{f}");
    }
    Ok(())
}

fn decode(format: &str, hex: &str, order: Order) -> Result<()> {
    let spec = comm::FormatSpec::parse(format);
    let data = parse_hex_compact(hex)?;
    let value = spec
        .decode_bytes(&data, order.into())
        .with_context(|| format!("decoding {} bytes with {format:?}", data.len()))?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn encode(format: &str, order: Order, values: &[String]) -> Result<()> {
    let spec = comm::FormatSpec::parse(format);
    let values = parse_values(&spec, values)?;
    let bytes = spec.encode(&values, order.into())?;
    println!("{}", to_hex(&bytes));
    Ok(())
}

fn parse_hex_compact(s: &str) -> Result<Vec<u8>> {
    let t = s.trim();
    if t.len() % 2 != 0 {
        return Err(anyhow::anyhow!("odd hex length"));
    }
    let mut out = Vec::with_capacity(t.len() / 2);
    for pair in t.as_bytes().chunks(2) {
        let text = std::str::from_utf8(pair).map_err(|e| anyhow::anyhow!("invalid hex: {e}"))?;
        let hx = u8::from_str_radix(text, 16).map_err(|e| anyhow::anyhow!("invalid hex: {e}"))?;
        out.push(hx);
    }
    Ok(out)
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Turn CLI words into field values, guided by the field types of `spec`.
fn parse_values(spec: &comm::FormatSpec, raw: &[String]) -> Result<Vec<comm::FieldValue>> {
    if raw.len() != spec.len() {
        return Err(anyhow::anyhow!(
            "format has {} fields, got {} values",
            spec.len(),
            raw.len()
        ));
    }
    spec.fields()
        .iter()
        .zip(raw)
        .map(|(f, s)| {
            let v = match f.field_type {
                comm::FieldType::Char => comm::FieldValue::Text(s.clone()),
                comm::FieldType::Float | comm::FieldType::Double => comm::FieldValue::Double(
                    s.parse()
                        .with_context(|| format!("{s:?} is not a number for {f}"))?,
                ),
                _ => comm::FieldValue::Long(
                    s.parse()
                        .with_context(|| format!("{s:?} is not an integer for {f}"))?,
                ),
            };
            Ok(v)
        })
        .collect()
}

fn profile_validate(file: Option<&str>, dir: Option<&str>, json: bool) -> Result<()> {
    match (file, dir) {
        (Some(f), None) => {
            let profile = comm::load_profile_file(f)?;
            println!(
                "ok: {} ({} protocols)",
                profile.name,
                profile.protocols.len()
            );
            if json {
                println!("{}", serde_json::to_string_pretty(&profile)?);
            }
        }
        (None, Some(d)) => {
            let reg = comm::load_profiles_dir(d)?;
            println!("ok: loaded {} robots", reg.len());
            if json {
                println!("{}", serde_json::to_string_pretty(&reg.robots)?);
            }
        }
        _ => {
            return Err(anyhow::anyhow!("provide --file <path> or --dir <dir>"));
        }
    }
    Ok(())
}

fn profile_list(dir: &str) -> Result<()> {
    let reg = comm::load_profiles_dir(dir)?;
    let mut names: Vec<_> = reg.robots.keys().collect();
    names.sort();
    for name in names {
        let Some(p) = reg.lookup_robot(name) else {
            continue;
        };
        for c in p.declared_communication_protocols() {
            println!(
                "{name}\tprotocol={}\ttransport={}\treceive={}\tcommands={}",
                c.implementation,
                c.transport,
                c.receive.len(),
                c.commands.len()
            );
        }
    }
    Ok(())
}

fn run_mock(
    file: &str,
    protocol: &str,
    hex: &str,
    send_key: Option<&str>,
    values: &[String],
    wait_ms: u64,
    print_metrics: bool,
) -> Result<()> {
    let profile = comm::load_profile_file(file)?;
    let robot = profile.name.clone();
    let cfg = profile
        .protocol(protocol)
        .ok_or_else(|| anyhow::anyhow!("robot {robot} declares no protocol {protocol}"))?;
    let transport_kind = cfg.transport.clone();
    let command_spec = match send_key {
        Some(key) => {
            let dp = cfg
                .commands
                .iter()
                .find(|d| d.key == key)
                .ok_or_else(|| anyhow::anyhow!("no command {key:?} for protocol {protocol}"))?;
            let spec = comm::FormatSpec::parse_with(&dp.format, cfg.parse_mode())
                .with_context(|| format!("parsing command format for {key:?}"))?;
            Some(spec)
        }
        None => None,
    };
    let payload = parse_hex_compact(hex)?;

    let mut profiles = comm::ProfileRegistry::default();
    profiles.insert(profile);

    // Whatever transport the profile names, the CLI runs it over a mock link whose far
    // end is captured when the factory runs.
    let remote_slot: Arc<Mutex<Option<MockRemote>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&remote_slot);
    let mut registry = comm::ConnectionRegistry::new();
    registry.register(&transport_kind, protocol, move |desc, ctx| {
        let transport = MockTransport::new(desc.robot_name());
        if let Ok(mut s) = slot.lock() {
            *s = Some(transport.remote());
        }
        comm::format_connection(desc, ctx, transport)
    });
    let ctx = comm::CommContext::new(profiles, registry)?;

    let desc = comm::ConnectionDescriptor::new(&robot, &transport_kind, protocol);
    let conn = ctx.connect(&desc)?;
    let remote = remote_slot
        .lock()
        .map_err(|_| anyhow::anyhow!("mock remote lock poisoned"))?
        .clone()
        .ok_or_else(|| anyhow::anyhow!("factory did not create a mock transport"))?;

    if !conn.start()? {
        return Err(anyhow::anyhow!("{desc}: no transport bound"));
    }
    info!(connection = %desc, bytes = payload.len(), "feeding mock payload");
    remote.push(&payload);

    // Commands go out while the link is up; it closes once the robot hangs up.
    if let (Some(key), Some(spec)) = (send_key, command_spec) {
        let values = parse_values(&spec, values)?;
        let msg = comm::DatapoolMessage::new(key, comm::DecodedValue::Sequence(values))
            .stamped(Some(time::OffsetDateTime::now_utc()));
        let n = conn.send(&msg)?;
        println!("sent {n} message(s)");
        for frame in remote.sent() {
            println!("tx {}", to_hex(&frame));
        }
    }
    remote.hang_up();

    let deadline = Instant::now() + Duration::from_millis(wait_ms);
    while conn.state() == ProtocolState::Receiving && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    if conn.state() == ProtocolState::Receiving {
        warn!(connection = %desc, "receive loop still running after {wait_ms} ms");
    }

    let snapshot = ctx
        .datapools()
        .get(&robot)
        .map(|p| p.snapshot())
        .unwrap_or_default();
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    conn.stop()?;
    if print_metrics {
        print!("{}", ctx.metrics().encode_text());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_compact() {
        assert_eq!(parse_hex_compact("00ff2a").unwrap(), vec![0x00, 0xff, 0x2a]);
        assert!(parse_hex_compact("abc").is_err());
        assert!(parse_hex_compact("zz").is_err());
        assert!(parse_hex_compact("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_values_follow_field_types() {
        let spec = comm::FormatSpec::parse("%i%f%c{3}");
        let vals = parse_values(&spec, &["7".into(), "1.5".into(), "ab".into()]).unwrap();
        assert_eq!(
            vals,
            vec![
                comm::FieldValue::Long(7),
                comm::FieldValue::Double(1.5),
                comm::FieldValue::Text("ab".into()),
            ]
        );
        assert!(parse_values(&spec, &["x".into(), "1".into(), "a".into()]).is_err());
        assert!(parse_values(&spec, &["1".into()]).is_err());
    }

    #[test]
    fn test_cli_parses_run_mock() {
        let cli = Cli::try_parse_from([
            "rc", "run-mock", "--file", "arm.yaml", "--hex", "0000002a", "--send-key", "j",
            "--value", "3",
        ])
        .unwrap();
        match cli.command {
            Commands::RunMock {
                file,
                hex,
                send_key,
                values,
                ..
            } => {
                assert_eq!(file, "arm.yaml");
                assert_eq!(hex, "0000002a");
                assert_eq!(send_key.as_deref(), Some("j"));
                assert_eq!(values, vec!["3".to_string()]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
