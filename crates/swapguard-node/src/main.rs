use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use swapguard_htlc::{
    verify, Clock, PartyId, PayoutSplit, Recipient, Secret, SecretHash, SystemClock,
};
use swapguard_node::{init_tracing, simulate, NodeConfig, Scenario, SimulationOptions};
use tracing::info;

/// Lengths `secret generate` accepts on the command line
const SECRET_LENGTHS: std::ops::RangeInclusive<i64> = 16..=64;

fn cli() -> Command {
    Command::new("swapguard")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Supervised hash-time-locked cross-chain swaps")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Config file (default: ./swapguard.toml if present)"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .global(true)
                .help("Log filter when RUST_LOG is unset (overrides [logging].level)"),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("secret")
                .about("Generate, hash and verify swap secrets")
                .subcommand_required(true)
                .subcommand(
                    Command::new("generate").about("Generate a random secret").arg(
                        Arg::new("length")
                            .long("length")
                            .value_parser(value_parser!(u8).range(SECRET_LENGTHS))
                            .help("Secret length in bytes, 16-64 (default: [swap].secret_length)"),
                    ),
                )
                .subcommand(
                    Command::new("hash")
                        .about("Print the commitment of a hex secret")
                        .arg(Arg::new("secret").required(true)),
                )
                .subcommand(
                    Command::new("verify")
                        .about("Check a hex secret against a hex commitment")
                        .arg(Arg::new("secret").required(true))
                        .arg(Arg::new("hash").required(true)),
                ),
        )
        .subcommand(
            Command::new("plan")
                .about("Compute both leg deadlines for a swap opened now")
                .arg(
                    Arg::new("now")
                        .long("now")
                        .value_parser(value_parser!(u64))
                        .help("Opening time in POSIX milliseconds (default: system clock)"),
                ),
        )
        .subcommand(
            Command::new("split")
                .about("Distribute a claim across basis-point recipients")
                .arg(
                    Arg::new("amount")
                        .long("amount")
                        .required(true)
                        .value_parser(value_parser!(u64)),
                )
                .arg(
                    Arg::new("recipient")
                        .long("recipient")
                        .short('r')
                        .required(true)
                        .action(ArgAction::Append)
                        .help("PARTY=BASIS_POINTS, repeatable; shares must total 10000"),
                )
                .arg(
                    Arg::new("min-payout")
                        .long("min-payout")
                        .default_value("0")
                        .value_parser(value_parser!(u64)),
                )
                .arg(
                    Arg::new("depositor")
                        .long("depositor")
                        .default_value("depositor")
                        .help("Party receiving dropped shares and rounding dust"),
                ),
        )
        .subcommand(
            Command::new("simulate")
                .about("Run a supervised two-leg swap against in-memory ledgers")
                .arg(
                    Arg::new("scenario")
                        .long("scenario")
                        .default_value("happy")
                        .value_parser(value_parser!(Scenario))
                        .help("happy, stall or flaky"),
                )
                .arg(
                    Arg::new("step-ms")
                        .long("step-ms")
                        .default_value("60000")
                        .value_parser(value_parser!(u64))
                        .help("Simulated milliseconds per tick"),
                )
                .arg(
                    Arg::new("tick-ms")
                        .long("tick-ms")
                        .default_value("10")
                        .value_parser(value_parser!(u64))
                        .help("Real milliseconds between ticks"),
                )
                .arg(
                    Arg::new("amount")
                        .long("amount")
                        .default_value("5000000")
                        .value_parser(value_parser!(u64))
                        .help("Amount locked on each leg"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the full report as JSON"),
                ),
        )
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let matches = cli().get_matches();

    let config_path = matches.get_one::<PathBuf>("config").map(PathBuf::as_path);
    let mut config =
        NodeConfig::load_or_default(config_path).context("failed to load configuration")?;
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.logging.level.clone_from(level);
    }
    init_tracing(&config.logging).context("failed to initialise logging")?;

    match matches.subcommand() {
        Some(("secret", args)) => secret_command(&config, args),
        Some(("plan", args)) => {
            let now = match args.get_one::<u64>("now") {
                Some(now) => *now,
                None => SystemClock.now_ms(),
            };
            let plan = config.plan(now).context("invalid swap timeouts")?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
            Ok(ExitCode::SUCCESS)
        }
        Some(("split", args)) => split_command(args),
        Some(("simulate", args)) => simulate_command(&config, args).await,
        _ => bail!("no command given"),
    }
}

fn secret_command(config: &NodeConfig, args: &ArgMatches) -> Result<ExitCode> {
    match args.subcommand() {
        Some(("generate", sub)) => {
            let length = sub
                .get_one::<u8>("length")
                .map_or(config.swap.secret_length, |n| usize::from(*n));
            let secret = Secret::generate(length).context("failed to generate secret")?;
            println!("secret: {}", secret.to_hex());
            println!("hash:   {}", secret.commitment());
            Ok(ExitCode::SUCCESS)
        }
        Some(("hash", sub)) => {
            let secret = parse_secret(sub)?;
            println!("{}", secret.commitment());
            Ok(ExitCode::SUCCESS)
        }
        Some(("verify", sub)) => {
            let secret = parse_secret(sub)?;
            let text = sub.get_one::<String>("hash").context("missing hash")?;
            let hash: SecretHash = text.parse().context("invalid commitment")?;
            if verify(&secret, &hash) {
                println!("ok");
                Ok(ExitCode::SUCCESS)
            } else {
                println!("mismatch");
                Ok(ExitCode::FAILURE)
            }
        }
        _ => bail!("unknown secret command"),
    }
}

fn parse_secret(args: &ArgMatches) -> Result<Secret> {
    let text = args.get_one::<String>("secret").context("missing secret")?;
    Secret::from_hex(text).context("invalid secret")
}

fn split_command(args: &ArgMatches) -> Result<ExitCode> {
    let amount = args.get_one::<u64>("amount").copied().context("missing amount")?;
    let min_payout = args.get_one::<u64>("min-payout").copied().unwrap_or(0);
    let depositor = args
        .get_one::<String>("depositor")
        .map_or_else(|| PartyId::from("depositor"), |d| PartyId::from(d.as_str()));

    let mut recipients = Vec::new();
    for entry in args.get_many::<String>("recipient").into_iter().flatten() {
        let (party, points) = entry
            .split_once('=')
            .with_context(|| format!("recipient `{entry}` is not PARTY=BASIS_POINTS"))?;
        let points: u32 = points
            .parse()
            .with_context(|| format!("invalid basis points in `{entry}`"))?;
        recipients.push(Recipient::new(party, points));
    }

    let split = PayoutSplit::new(recipients, min_payout).context("invalid split")?;
    let distribution = split.distribute(amount, &depositor);
    println!("{}", serde_json::to_string_pretty(&distribution.payouts)?);
    if distribution.returned > 0 {
        info!(
            returned = distribution.returned,
            depositor = %depositor,
            "remainder returned to depositor"
        );
    }
    Ok(ExitCode::SUCCESS)
}

async fn simulate_command(config: &NodeConfig, args: &ArgMatches) -> Result<ExitCode> {
    let defaults = SimulationOptions::default();
    let options = SimulationOptions {
        scenario: args.get_one::<Scenario>("scenario").copied().unwrap_or_default(),
        step_ms: args.get_one::<u64>("step-ms").copied().unwrap_or(defaults.step_ms),
        tick: args
            .get_one::<u64>("tick-ms")
            .map_or(defaults.tick, |ms| Duration::from_millis(*ms)),
        amount: args.get_one::<u64>("amount").copied().unwrap_or(defaults.amount),
        ..defaults
    };

    let report = simulate(config, &options).await.context("simulation failed")?;

    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("scenario:         {}", report.scenario);
        println!("secret hash:      {}", report.secret_hash);
        for (label, leg) in [
            ("initiator leg", &report.initiator_leg),
            ("counterparty leg", &report.counterparty_leg),
        ] {
            println!(
                "{label:<17} {} on {} (deadline {}, depositor {})",
                leg.state, leg.chain, leg.deadline, leg.depositor
            );
        }
        for balance in &report.balances {
            println!(
                "balance:          {} {} = {}",
                balance.chain, balance.party, balance.amount
            );
        }
        println!("restarts:         {}", report.restarts());
        for process in report.abandoned() {
            println!("abandoned:        {process}");
        }
    }

    Ok(if report.is_settled() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
