use std::path::PathBuf;

use marrow::debugger::Debugger;
use marrow::errors::DebuggerError;
use marrow::ui::json::JsonUI;

use clap::Parser;
use tracing::debug;

/// Launch the marrow debugger with the JSON line protocol
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

    let ui = JsonUI::build()?;
    let mut debugger: Debugger<_> = Debugger::build(ui)?;
    debugger.run(&args.run, &[])?;
    debugger.run_debugger()?;
    debugger.cleanup()?;

    Ok(())
}

fn setup_logger() {
    // logs go to stderr so stdout stays a clean JSON stream
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_writer(std::io::stderr)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("could not setup logger");
}
