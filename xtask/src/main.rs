//! Build automation tasks for the tds-wire workspace.
//!
//! Run with `cargo run --manifest-path xtask/Cargo.toml -- <command>`.
//!
//! ## Available Commands
//!
//! - `ci`: Run all CI checks (format, lint, test, doc)
//! - `fmt`: Check/apply code formatting
//! - `clippy`: Run clippy lints
//! - `test`: Run all tests, once per feature set of `tds-types`
//! - `doc`: Generate documentation
//! - `bench`: Run benchmarks
//! - `fuzz`: Run fuzz targets (requires cargo-fuzz + nightly)

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use xshell::{Shell, cmd};

/// Fuzz targets defined in `fuzz/Cargo.toml`.
const FUZZ_TARGETS: &[&str] = &["parse_packet", "parse_prelogin", "dispatch_reply", "decode_value"];

#[derive(Parser)]
#[command(name = "xtask", about = "Build automation for tds-wire")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run all checks (format, lint, test, doc)
    Ci,
    /// Run cargo fmt (--check by default, --fix to apply)
    Fmt {
        /// Apply formatting fixes
        #[arg(long)]
        fix: bool,
    },
    /// Run clippy with all features
    Clippy,
    /// Run all tests
    Test {
        /// Test a specific package
        #[arg(short, long)]
        package: Option<String>,
    },
    /// Generate documentation
    Doc {
        /// Open documentation in browser
        #[arg(long)]
        open: bool,
    },
    /// Run benchmarks
    Bench {
        /// Benchmark filter pattern
        filter: Option<String>,
    },
    /// Run fuzz targets (requires cargo-fuzz + nightly)
    Fuzz {
        /// Fuzz target to run; all targets when omitted
        target: Option<String>,
        /// Maximum runtime per target in seconds
        #[arg(long, default_value = "60")]
        max_time: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;
    sh.change_dir(workspace_root()?);

    match cli.command {
        Command::Ci => {
            fmt(&sh, false)?;
            clippy(&sh)?;
            test(&sh, None)?;
            doc(&sh, false)?;
            println!("\n✅ All CI checks passed!");
        }
        Command::Fmt { fix } => fmt(&sh, fix)?,
        Command::Clippy => clippy(&sh)?,
        Command::Test { package } => test(&sh, package.as_deref())?,
        Command::Doc { open } => doc(&sh, open)?,
        Command::Bench { filter } => bench(&sh, filter.as_deref())?,
        Command::Fuzz { target, max_time } => fuzz(&sh, target.as_deref(), max_time)?,
    }

    Ok(())
}

fn workspace_root() -> Result<PathBuf> {
    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    manifest_dir
        .parent()
        .map(PathBuf::from)
        .context("xtask is not inside the workspace")
}

fn fmt(sh: &Shell, fix: bool) -> Result<()> {
    if fix {
        cmd!(sh, "cargo fmt --all").run()?;
    } else {
        cmd!(sh, "cargo fmt --all -- --check").run()?;
        println!("✅ Formatting check passed.");
    }
    Ok(())
}

fn clippy(sh: &Shell) -> Result<()> {
    cmd!(sh, "cargo clippy --workspace --all-features --all-targets -- -D warnings").run()?;
    println!("✅ Clippy check passed.");
    Ok(())
}

fn test(sh: &Shell, package: Option<&str>) -> Result<()> {
    if let Some(pkg) = package {
        cmd!(sh, "cargo test -p {pkg} --all-features").run()?;
    } else {
        cmd!(sh, "cargo test --workspace --all-features").run()?;
        // the value decoders must also build without the optional type crates
        cmd!(sh, "cargo test -p tds-types --no-default-features").run()?;
    }
    println!("✅ All tests passed.");
    Ok(())
}

fn doc(sh: &Shell, open: bool) -> Result<()> {
    let _rustdocflags = sh.push_env("RUSTDOCFLAGS", "-D warnings");
    if open {
        cmd!(sh, "cargo doc --workspace --all-features --no-deps --open").run()?;
    } else {
        cmd!(sh, "cargo doc --workspace --all-features --no-deps").run()?;
    }
    println!("✅ Documentation generated.");
    Ok(())
}

fn bench(sh: &Shell, filter: Option<&str>) -> Result<()> {
    if let Some(f) = filter {
        cmd!(sh, "cargo bench --workspace -- {f}").run()?;
    } else {
        cmd!(sh, "cargo bench --workspace").run()?;
    }
    Ok(())
}

fn fuzz(sh: &Shell, target: Option<&str>, max_time: u64) -> Result<()> {
    let targets: Vec<&str> = match target {
        Some(t) if FUZZ_TARGETS.contains(&t) => vec![t],
        Some(t) => bail!("unknown fuzz target {t}; available: {}", FUZZ_TARGETS.join(", ")),
        None => FUZZ_TARGETS.to_vec(),
    };

    let _dir = sh.push_dir("fuzz");
    let max_time = format!("-max_total_time={max_time}");
    for target in targets {
        println!("Running fuzz target: {target}");
        cmd!(sh, "cargo +nightly fuzz run {target} -- {max_time}").run()?;
    }
    Ok(())
}
