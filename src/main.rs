use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use rm_xochitl_kbdpatch::{run_apply, run_check, Config, Outcome};

/// Patch one on-screen-keyboard layout inside the xochitl binary, in place.
#[derive(Parser, Debug)]
#[command(name = "rm-xochitl-kbdpatch", version)]
struct Args {
    /// Locale whose layout to replace (currently de_DE)
    #[arg(long)]
    locale: String,

    /// Override layout JSON (UTF-8/UTF-16; BOM tolerated)
    #[arg(long)]
    json: PathBuf,

    /// Target binary to patch
    #[arg(long, default_value = "/usr/bin/xochitl")]
    target: PathBuf,

    /// Backup file (default: <target>.orig alongside the target)
    #[arg(long)]
    backup: Option<PathBuf>,

    /// Safety cap for decoded candidate payloads, in bytes
    #[arg(long, default_value_t = rm_xochitl_kbdpatch::decode::DEFAULT_DECODE_CAP)]
    decode_cap: usize,

    /// Check-only mode: exit 0 if already in the desired state, 2 if a
    /// patch would change the file. Never writes.
    #[arg(long)]
    check: bool,

    /// Diagnostic detail (candidate offsets, scores, compression level)
    #[arg(long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    let cfg = Config {
        locale: args.locale,
        override_json: args.json,
        target: args.target,
        backup: args.backup,
        decode_cap: args.decode_cap,
    };

    let result = if args.check {
        run_check(&cfg)
    } else {
        run_apply(&cfg)
    };

    match result {
        Ok(Outcome::AlreadyPatched) => {
            println!("[kbdpatch] UNCHANGED (already in desired state)");
            ExitCode::SUCCESS
        }
        Ok(Outcome::PatchNeeded) => {
            println!("[kbdpatch] patch needed");
            ExitCode::from(2)
        }
        Ok(Outcome::Patched { sha256 }) => {
            println!("[kbdpatch] PATCHED OK sha256={sha256}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("[kbdpatch] ERROR: {e}");
            ExitCode::from(1)
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
