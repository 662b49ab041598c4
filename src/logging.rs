use anyhow::Result;
use tracing_subscriber::fmt;

// Events go to stderr; stdout carries CLI output or the JSON-RPC stream.
pub fn init(verbose: bool) -> Result<()> {
    if !verbose {
        return Ok(());
    }
    let _ = fmt()
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .try_init();
    Ok(())
}
