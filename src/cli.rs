use anyhow::Result;

use crate::exports::ExportFormat;

const DEFAULT_WATCH_SECONDS: u64 = 60;
const MAX_WATCH_SECONDS: u64 = 24 * 3600;

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum CliCommand {
    Scan { full: bool, json: bool },
    Watch { seconds: u64, interface: Option<String> },
    Devices,
    Export { format: ExportFormat },
    ClearCache,
    Interfaces,
    Help,
    Version,
}

pub(crate) fn version_text() -> String {
    format!("lanlens {}", env!("CARGO_PKG_VERSION"))
}

pub(crate) fn usage_text() -> String {
    format!(
        "{version}
Local network device discovery and classification

Usage:
  lanlens [scan] [--full] [--json]
  lanlens watch [--seconds <N>] [--interface <NAME>]
  lanlens devices
  lanlens export --format <json|csv>
  lanlens clear-cache
  lanlens interfaces
  lanlens --help
  lanlens --version

Options:
      --full              Scan: all ports, banners and reverse DNS
      --json              Scan: print the device list as JSON
      --seconds <N>       Watch: passive listening time (default: {default_seconds})
  -i, --interface <NAME>  Watch: capture ARP on this interface
  -f, --format <FORMAT>   Export: json or csv
  -h, --help              Show this help text
  -V, --version           Show version",
        version = version_text(),
        default_seconds = DEFAULT_WATCH_SECONDS
    )
}

fn parse_seconds_arg(raw: &str) -> Result<u64> {
    raw.parse::<u64>()
        .ok()
        .filter(|v| *v > 0 && *v <= MAX_WATCH_SECONDS)
        .ok_or_else(|| {
            anyhow::anyhow!(
                "Invalid value for --seconds: '{}'. Expected 1..={}.\n\n{}",
                raw,
                MAX_WATCH_SECONDS,
                usage_text()
            )
        })
}

fn parse_format_arg(raw: &str) -> Result<ExportFormat> {
    raw.parse::<ExportFormat>()
        .map_err(|e| anyhow::anyhow!("{}\n\n{}", e, usage_text()))
}

fn flag_value<'a>(arg: &'a str, flag: &str) -> Result<&'a str> {
    let value = arg.split_once('=').map(|(_, v)| v).unwrap_or_default();
    if value.is_empty() {
        return Err(anyhow::anyhow!("Missing value for {}.\n\n{}", flag, usage_text()));
    }
    Ok(value)
}

pub(crate) fn parse_cli_args<I, S>(args: I) -> Result<CliCommand>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut iter = args.into_iter();
    let _program_name = iter.next();

    let mut command: Option<String> = None;
    let mut full = false;
    let mut json = false;
    let mut seconds: Option<u64> = None;
    let mut format: Option<ExportFormat> = None;
    let mut interface: Option<String> = None;

    while let Some(arg) = iter.next() {
        let arg = arg.as_ref();
        match arg {
            "-h" | "--help" | "help" => return Ok(CliCommand::Help),
            "-V" | "--version" | "version" => return Ok(CliCommand::Version),
            "scan" | "watch" | "devices" | "export" | "clear-cache" | "interfaces" => {
                if command.as_deref().is_some_and(|existing| existing != arg) {
                    return Err(anyhow::anyhow!(
                        "Multiple commands provided. Use only one command.\n\n{}",
                        usage_text()
                    ));
                }
                command = Some(arg.to_string());
            }
            "--full" => full = true,
            "--json" => json = true,
            "--seconds" => {
                let value = iter.next().ok_or_else(|| {
                    anyhow::anyhow!("Missing value for --seconds.\n\n{}", usage_text())
                })?;
                seconds = Some(parse_seconds_arg(value.as_ref())?);
            }
            "-i" | "--interface" => {
                let value = iter.next().ok_or_else(|| {
                    anyhow::anyhow!("Missing value for --interface.\n\n{}", usage_text())
                })?;
                interface = Some(value.as_ref().to_string());
            }
            "-f" | "--format" => {
                let value = iter.next().ok_or_else(|| {
                    anyhow::anyhow!("Missing value for --format.\n\n{}", usage_text())
                })?;
                format = Some(parse_format_arg(value.as_ref())?);
            }
            _ if arg.starts_with("--seconds=") => {
                seconds = Some(parse_seconds_arg(flag_value(arg, "--seconds")?)?);
            }
            _ if arg.starts_with("--interface=") => {
                interface = Some(flag_value(arg, "--interface")?.to_string());
            }
            _ if arg.starts_with("--format=") => {
                format = Some(parse_format_arg(flag_value(arg, "--format")?)?);
            }
            _ => {
                return Err(anyhow::anyhow!(
                    "Unknown argument: {arg}\n\n{}",
                    usage_text()
                ));
            }
        }
    }

    let command = command.as_deref().unwrap_or("scan");
    if command != "scan" && (full || json) {
        return Err(anyhow::anyhow!(
            "--full/--json are only valid with scan.\n\n{}",
            usage_text()
        ));
    }
    if command != "watch" && (seconds.is_some() || interface.is_some()) {
        return Err(anyhow::anyhow!(
            "--seconds/--interface are only valid with watch.\n\n{}",
            usage_text()
        ));
    }
    if command != "export" && format.is_some() {
        return Err(anyhow::anyhow!(
            "--format is only valid with export.\n\n{}",
            usage_text()
        ));
    }

    match command {
        "scan" => Ok(CliCommand::Scan { full, json }),
        "watch" => Ok(CliCommand::Watch {
            seconds: seconds.unwrap_or(DEFAULT_WATCH_SECONDS),
            interface,
        }),
        "devices" => Ok(CliCommand::Devices),
        "export" => {
            let format = format.ok_or_else(|| {
                anyhow::anyhow!("export requires --format json|csv.\n\n{}", usage_text())
            })?;
            Ok(CliCommand::Export { format })
        }
        "clear-cache" => Ok(CliCommand::ClearCache),
        "interfaces" => Ok(CliCommand::Interfaces),
        other => Err(anyhow::anyhow!("Unknown command: {other}\n\n{}", usage_text())),
    }
}
