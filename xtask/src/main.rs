//! Developer tasks for the mongo-pool workspace.
//!
//! Run with `cargo xtask <command>`. Checks run once per feature set, so the
//! driver-free core and the MongoDB collaborator are both compiled in CI.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use xshell::{Shell, cmd};

const CRATE: &str = "mongo-pool";

#[derive(Parser)]
#[command(name = "xtask", about = "Developer tasks for mongo-pool")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Format check, then lint, test and doc every feature set
    Ci,
    /// Check formatting
    Fmt,
    /// Lint one feature set, or all of them
    Clippy {
        #[arg(long, value_enum)]
        features: Option<Features>,
    },
    /// Run the offline test suites for one feature set, or all of them
    Test {
        #[arg(long, value_enum)]
        features: Option<Features>,
    },
    /// Run the ignored MongoDB tests (uses MONGO_URI, otherwise Docker)
    Live,
    /// Build the API docs
    Doc,
    /// Run the pool benchmarks
    Bench {
        /// Only run benchmarks whose name contains this filter
        filter: Option<String>,
    },
}

/// Feature sets the crate is checked under.
#[derive(Clone, Copy, ValueEnum)]
enum Features {
    /// Pool core only, no MongoDB driver
    Core,
    /// Default features, including the MongoDB collaborator
    Mongodb,
}

impl Features {
    const ALL: [Features; 2] = [Features::Core, Features::Mongodb];

    fn name(self) -> &'static str {
        match self {
            Features::Core => "core",
            Features::Mongodb => "mongodb",
        }
    }

    fn cargo_args(self) -> &'static [&'static str] {
        match self {
            Features::Core => &["--no-default-features"],
            Features::Mongodb => &[],
        }
    }

    fn selected(choice: Option<Features>) -> Vec<Features> {
        choice.map_or_else(|| Self::ALL.to_vec(), |one| vec![one])
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;
    sh.change_dir(workspace_root()?);

    match cli.command {
        Command::Ci => {
            fmt(&sh)?;
            for features in Features::ALL {
                clippy(&sh, features)?;
                test(&sh, features)?;
            }
            doc(&sh)?;
            println!("ci: all feature sets passed");
        }
        Command::Fmt => fmt(&sh)?,
        Command::Clippy { features } => {
            for features in Features::selected(features) {
                clippy(&sh, features)?;
            }
        }
        Command::Test { features } => {
            for features in Features::selected(features) {
                test(&sh, features)?;
            }
        }
        Command::Live => live(&sh)?,
        Command::Doc => doc(&sh)?,
        Command::Bench { filter } => bench(&sh, filter.as_deref())?,
    }

    Ok(())
}

fn workspace_root() -> Result<PathBuf> {
    let output = std::process::Command::new("cargo")
        .args(["locate-project", "--workspace", "--message-format=plain"])
        .output()
        .context("failed to run cargo locate-project")?;
    if !output.status.success() {
        bail!("cargo locate-project exited with {}", output.status);
    }

    let manifest = String::from_utf8(output.stdout).context("invalid UTF-8 in cargo output")?;
    PathBuf::from(manifest.trim())
        .parent()
        .map(PathBuf::from)
        .context("workspace manifest has no parent directory")
}

fn fmt(sh: &Shell) -> Result<()> {
    println!("fmt: checking");
    cmd!(sh, "cargo fmt --all -- --check").run()?;
    Ok(())
}

fn clippy(sh: &Shell, features: Features) -> Result<()> {
    println!("clippy: {}", features.name());
    let args = features.cargo_args();
    cmd!(sh, "cargo clippy -p {CRATE} {args...} --all-targets -- -D warnings").run()?;
    Ok(())
}

fn test(sh: &Shell, features: Features) -> Result<()> {
    println!("test: {}", features.name());
    let args = features.cargo_args();
    cmd!(sh, "cargo test -p {CRATE} {args...}").run()?;
    Ok(())
}

fn live(sh: &Shell) -> Result<()> {
    match std::env::var("MONGO_URI") {
        Ok(uri) => println!("live: using {uri}"),
        Err(_) => println!("live: MONGO_URI not set, starting a mongo container"),
    }
    cmd!(
        sh,
        "cargo test -p {CRATE} --test live_mongodb -- --ignored --test-threads=1"
    )
    .run()?;
    Ok(())
}

fn doc(sh: &Shell) -> Result<()> {
    println!("doc: building");
    cmd!(sh, "cargo doc -p {CRATE} --no-deps")
        .env("RUSTDOCFLAGS", "-D warnings")
        .run()?;
    Ok(())
}

fn bench(sh: &Shell, filter: Option<&str>) -> Result<()> {
    let filter: Vec<&str> = filter.into_iter().collect();
    cmd!(sh, "cargo bench -p {CRATE} --bench pool -- {filter...}").run()?;
    Ok(())
}
