//! CLI flags: just enough to locate the config file and override the
//! handful of flags an operator reaches for at the command line. Business
//! logic beyond flag parsing belongs in `config`/`main`, not here.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = env!("CARGO_PKG_NAME"), author, version, about = env!("CARGO_PKG_DESCRIPTION"))]
pub struct Cli {
    /// Path to the TOML config file. Missing file falls back to defaults.
    #[arg(long, default_value = "node.toml")]
    pub config: PathBuf,

    /// Overrides `node.data-dir` from the config file.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// `RUST_LOG`-style filter used when `RUST_LOG` itself is unset.
    #[arg(long, default_value = "info")]
    pub log_level: String,
}
