//! Coordinator command-line tool.
//!
//! Subcommands:
//!
//! * `demo [root]` — run a simulated end-to-end flight (start, handshake,
//!   telemetry, archive) against the given data directory.
//! * `verify <file>` — verify a persisted ledger file and print the
//!   verdict.
//! * `list [root]` — list archived flights.
//! * `reset [root]` — move all ledger files into a backup directory and
//!   restart flight numbering.

use serde_json::{json, Map, Value};
use skyledger::{
    derive_response, verify_file, AuthOutcome, LedgerManager, LedgerStore, TelemetryAck,
    UavRegistry,
};
use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

const DEFAULT_ROOT: &str = "data";

fn main() -> ExitCode {
    tracing_subscriber::fmt().init();

    let args: Vec<String> = env::args().skip(1).collect();
    let result = match args.first().map(String::as_str) {
        Some("demo") => run_demo(root_arg(&args)),
        Some("verify") => match args.get(1) {
            Some(file) => {
                run_verify(Path::new(file));
                Ok(())
            }
            None => {
                eprintln!("usage: skyledger verify <file>");
                return ExitCode::FAILURE;
            }
        },
        Some("list") => run_list(root_arg(&args)),
        Some("reset") => run_reset(root_arg(&args)),
        _ => {
            eprintln!("usage: skyledger <demo|verify|list|reset> [args]");
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn root_arg(args: &[String]) -> PathBuf {
    args.get(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ROOT))
}

fn demo_registry() -> UavRegistry {
    UavRegistry::from_entries([
        ("UAV_A1", "K_LongTerm_A1"),
        ("UAV_B2", "K_LongTerm_B2"),
        ("UAV_C3", "K_LongTerm_C3"),
        ("UAV_D4", "K_LongTerm_D4"),
    ])
}

fn run_demo(root: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let uav_id = "UAV_A1";
    let long_term_key = "K_LongTerm_A1";

    let store = LedgerStore::open(&root)?;
    let manager = LedgerManager::new(store, demo_registry());

    println!("skyledger demo (data dir: {})", root.display());
    let flight = manager.start_flight(uav_id, Some("demo"))?;
    println!(
        "flight {} started, genesis {}",
        flight.flight_id,
        &flight.genesis_hash[..16]
    );

    // handshake: the device side shares this library, so writer and
    // verifier can never disagree on the derivations
    let challenge = manager.auth_step1(flight.flight_id, uav_id)?;
    let response = derive_response(long_term_key, challenge.rand);
    match manager.auth_step2(flight.flight_id, uav_id, &response)? {
        AuthOutcome::Success { session_key } => {
            println!("authenticated, session key {session_key}");
        }
        AuthOutcome::Failure { reason } => {
            return Err(format!("handshake failed: {reason}").into());
        }
    }

    for step in 0..5u32 {
        let t = f64::from(step);
        let mut payload = Map::new();
        payload.insert("x_pos".to_string(), json!(2.0 * t));
        payload.insert("y_pos".to_string(), json!(1.5 * t));
        payload.insert("z_alt".to_string(), json!(-10.0));
        payload.insert("vel_mag".to_string(), json!(2.5));
        match manager.submit_telemetry(flight.flight_id, payload)? {
            TelemetryAck::Received { pending } => {
                println!("telemetry {step}: pooled ({pending} pending)");
            }
            TelemetryAck::BlockSealed { block_hash } => {
                println!("telemetry {step}: block sealed {}", &block_hash[..16]);
            }
        }
    }

    manager.end_flight(flight.flight_id)?;
    let archive_name = format!("Flight_{}", flight.flight_id);
    let (verdict, chain) = manager.archived_chain(&archive_name);
    println!(
        "archived {archive_name}: {} blocks, secured={} ({})",
        chain.len(),
        verdict.secured,
        verdict.message
    );
    Ok(())
}

fn run_verify(path: &Path) {
    let (verdict, chain) = verify_file(path);
    println!("file:    {}", path.display());
    println!("blocks:  {}", chain.len());
    println!("secured: {}", verdict.secured);
    println!("message: {}", verdict.message);
    if let Some(hash) = verdict.last_hash {
        println!("hash:    {hash}");
    }
}

fn run_list(root: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let store = LedgerStore::open(&root)?;
    let archives = store.list_archives()?;
    if archives.is_empty() {
        println!("no archived flights under {}", root.display());
        return Ok(());
    }
    for archive in archives {
        println!(
            "{:<12} uav={:<10} operator={:<12} blocks={}",
            archive.name, archive.uav_id, archive.operator, archive.blocks
        );
    }
    Ok(())
}

fn run_reset(root: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let store = LedgerStore::open(&root)?;
    let report = store.reset()?;
    println!(
        "moved {} archived and {} active ledgers to {}",
        report.archived_moved,
        report.active_moved,
        report.backup_dir.display()
    );
    if report.counter_removed {
        println!("flight counter removed; numbering restarts at 1");
    }
    Ok(())
}
