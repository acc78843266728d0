use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, Command};
use devflow_core::config::DevflowConfig;
use devflow_core::simulator::{run_simulator, SimulatorConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn cli() -> Command {
    Command::new("devflow-sim")
        .version(devflow_core::VERSION)
        .about("DevFlow sync engine consistency simulator")
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Run concurrent clients against an in-memory store and check invariants")
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("clients")
                        .long("clients")
                        .default_value("8")
                        .value_parser(value_parser!(usize))
                        .help("Number of concurrent clients"),
                )
                .arg(
                    Arg::new("ops")
                        .long("ops")
                        .default_value("200")
                        .value_parser(value_parser!(u64))
                        .help("Operations per client"),
                )
                .arg(
                    Arg::new("projects")
                        .long("projects")
                        .default_value("4")
                        .value_parser(value_parser!(usize))
                        .help("Number of shared projects"),
                )
                .arg(
                    Arg::new("latency-ms")
                        .long("latency-ms")
                        .default_value("0")
                        .value_parser(value_parser!(u64))
                        .help("Simulated store latency per call"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("TOML file with retry/validation/chat/directory settings"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the report as JSON"),
                ),
        )
        .subcommand(Command::new("config").about("Print the default configuration as TOML"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    match matches.subcommand() {
        Some(("simulate", args)) => {
            let devflow = match args.get_one::<PathBuf>("config") {
                Some(path) => DevflowConfig::from_file(path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => DevflowConfig::default(),
            };
            let config = SimulatorConfig {
                seed: args.get_one::<u64>("seed").copied().unwrap_or(42),
                clients: args.get_one::<usize>("clients").copied().unwrap_or(8),
                ops_per_client: args.get_one::<u64>("ops").copied().unwrap_or(200),
                projects: args.get_one::<usize>("projects").copied().unwrap_or(4),
                latency_ms: args.get_one::<u64>("latency-ms").copied().unwrap_or(0),
                devflow,
            };

            let report = run_simulator(config).await.context("simulator setup failed")?;
            if args.get_flag("json") {
                println!("{}", report.to_json()?);
            } else {
                println!("{}", report.generate_text());
            }
            std::process::exit(if report.passed() { 0 } else { 1 });
        }
        Some(("config", _)) => {
            let text = toml::to_string_pretty(&DevflowConfig::default())?;
            print!("{text}");
        }
        _ => {
            cli().print_help()?;
        }
    }
    Ok(())
}
