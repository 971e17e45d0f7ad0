use std::path::PathBuf;

use marrow::debugger::Debugger;
use marrow::errors::DebuggerError;
use marrow::ui::cli::CliUi;

use clap::Parser;
use tracing::debug;

/// Launch the marrow debugger with the interactive CLI
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// The program to launch as debuggee
    #[clap(short, long)]
    run: PathBuf,
}

fn main() -> Result<(), DebuggerError> {
    setup_logger();
    debug!("set up the logger");

    let args = Args::parse();

    let ui = CliUi::build()?;
    let mut debugger: Debugger<_> = Debugger::build(ui)?;
    debugger.run(&args.run, &[])?;
    debugger.run_debugger()?;
    debugger.cleanup()?;

    Ok(())
}

fn setup_logger() {
    // construct a subscriber that prints formatted traces to stdout
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .without_time()
        .finish();
    // use that subscriber to process traces emitted after this point
    tracing::subscriber::set_global_default(subscriber).expect("could not setup logger");
}
