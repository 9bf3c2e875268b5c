use crate::session::Config;
use crate::store::DEFAULT_SCOPE;
use clap::{ArgAction, Parser};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "rmr",
    version,
    about = "Run a formatter or linter, review its changes hunk by hunk, and remember the ones you reject",
    after_help = "Rejected hunks are undone and remembered; on later runs the same change \
                  (same file, same old and new text) is undone automatically."
)]
pub struct Cli {
    /// Keep rejections for this tool separate from other tools' (e.g. "black").
    #[arg(long, value_name = "ID", default_value = DEFAULT_SCOPE)]
    pub tool_id: String,

    /// Forget remembered rejections that no longer match anything the tool produces.
    #[arg(long)]
    pub autopurge: bool,

    /// Path of the rejection store (default: <git-dir>/rmr/rejections.db).
    #[arg(long, value_name = "PATH")]
    pub store: Option<PathBuf>,

    /// Use a line prompt instead of the full-screen review.
    #[arg(long)]
    pub plain: bool,

    /// Keep every new change without asking; remembered rejections still apply.
    #[arg(long, conflicts_with = "plain")]
    pub accept_all: bool,

    /// Print the remembered rejections and exit.
    #[arg(long, conflicts_with = "forget")]
    pub list: bool,

    /// Forget every remembered rejection for the tool id and exit.
    #[arg(long)]
    pub forget: bool,

    /// Increase log verbosity (-v, -vv, -vvv). RMR_LOG overrides.
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Formatter or linter to run, followed by its arguments.
    #[arg(
        value_name = "TOOL",
        trailing_var_arg = true,
        allow_hyphen_values = true,
        required_unless_present_any = ["list", "forget"],
        conflicts_with_all = ["list", "forget"]
    )]
    pub tool: Vec<String>,
}

impl Cli {
    pub fn config(&self, working_dir: PathBuf) -> Config {
        Config {
            working_dir,
            store_path: self.store.clone(),
            scope: self.tool_id.clone(),
            autopurge: self.autopurge,
        }
    }
}

/// Parse CLI arguments.
pub fn parse_args() -> Cli {
    Cli::parse()
}
