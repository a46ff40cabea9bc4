use keyswap::BinaryKeyCodec;
use keyswap::migration::version::read_repo_version;
use keyswap::offline;
use std::path::Path;
use tracing::metadata::LevelFilter;
use tracing_subscriber::EnvFilter;

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args: Vec<String> = std::env::args().collect();
    init_tracing(verbosity(&args));
    let args: Vec<String> = args
        .into_iter()
        .filter(|a| a != "-v" && a != "-vv")
        .collect();
    if args.len() < 2 {
        print_usage();
        return Err("missing command".into());
    }
    match args[1].as_str() {
        "log" => match args.get(2).map(String::as_str) {
            Some("inspect") => cmd_log_inspect(&args[3..]),
            Some("pairs") => cmd_log_pairs(&args[3..]),
            Some(other) => Err(format!("unknown log command: {other}")),
            None => Err("missing log subcommand".into()),
        },
        "version" => match args.get(2).map(String::as_str) {
            Some("show") => cmd_version_show(&args[3..]),
            Some(other) => Err(format!("unknown version command: {other}")),
            None => Err("missing version subcommand".into()),
        },
        other => {
            print_usage();
            Err(format!("unknown top-level command: {other}"))
        }
    }
}

fn cmd_log_inspect(args: &[String]) -> Result<(), String> {
    let log = parse_flag_value(args, "--log").ok_or("--log is required")?;
    let report = offline::inspect_migration_log(Path::new(&log), &BinaryKeyCodec)
        .map_err(|e| format!("inspect log: {e}"))?;
    if args.iter().any(|a| a == "--json") {
        let json =
            serde_json::to_string_pretty(&report).map_err(|e| format!("encode report: {e}"))?;
        println!("{json}");
    } else {
        println!(
            "{}\t{}\t{}\t{}\t{}",
            if report.ok() { "ok" } else { "invalid" },
            report.entries,
            report.distinct_targets,
            report.duplicate_lines,
            report.sha256_hex
        );
        for group in &report.collapse_groups {
            println!("collapse\t{}\t{}", group.new_key, group.old_keys.len());
        }
        for bad in &report.invalid_lines {
            println!("invalid\t{}\t{}", bad.line, bad.message);
        }
    }
    if report.ok() {
        Ok(())
    } else {
        Err("migration log has invalid lines".into())
    }
}

fn cmd_log_pairs(args: &[String]) -> Result<(), String> {
    let log = parse_flag_value(args, "--log").ok_or("--log is required")?;
    let swaps = offline::planned_swaps(Path::new(&log), &BinaryKeyCodec)
        .map_err(|e| format!("read log: {e}"))?;
    for swap in swaps {
        println!("{}\t{}", swap.old, swap.new);
    }
    Ok(())
}

fn cmd_version_show(args: &[String]) -> Result<(), String> {
    let repo = parse_flag_value(args, "--repo").ok_or("--repo is required")?;
    let version =
        read_repo_version(Path::new(&repo)).map_err(|e| format!("read version: {e}"))?;
    println!("{version}");
    Ok(())
}

fn parse_flag_value(args: &[String], flag: &str) -> Option<String> {
    for idx in 0..args.len() {
        if args[idx] == flag {
            return args.get(idx + 1).cloned();
        }
    }
    None
}

fn verbosity(args: &[String]) -> u8 {
    if args.iter().any(|a| a == "-vv") {
        2
    } else if args.iter().any(|a| a == "-v") {
        1
    } else {
        0
    }
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        _ => LevelFilter::DEBUG,
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn print_usage() {
    eprintln!("usage:");
    eprintln!("  keyswap log inspect --log <path> [--json] [-v|-vv]");
    eprintln!("  keyswap log pairs --log <path> [-v|-vv]");
    eprintln!("  keyswap version show --repo <repo-dir>");
}
