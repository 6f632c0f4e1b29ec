use clap::{Parser, Subcommand};

mod cmd;

use cmd::matches::MatchesCommand;
use cmd::report::ReportCommand;

#[derive(Parser, Debug)]
#[command(
    name = "capgains",
    version,
    about = "Calculate UK Capital Gains Tax (CGT) and investment income"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Calculate and display per-tax-year summaries
    Report(ReportCommand),
    /// List the share identification audit trail
    Matches(MatchesCommand),
}

fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Command::Report(cmd) => cmd.exec(),
        Command::Matches(cmd) => cmd.exec(),
    }
}
