use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use floe::memory::BlockRepository;
use floe::net::parse_addr;
use log::info;

#[derive(Debug, Parser)]
struct Cli {
    /// Listen for clients at address, `A.B.C.D[:port]`
    address: String,
    /// Directory spilled pages are written to
    dir: PathBuf,
    /// Number of pages kept resident in RAM
    #[arg(long, default_value_t = 10)]
    pages: usize,
    /// Page size in bytes
    #[arg(long, default_value_t = 4 * 1024 * 1024)]
    page_size: u32,
    /// Session worker threads
    #[arg(long, default_value_t = 2)]
    threads: usize,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let addr = parse_addr(&cli.address)?;
    let repo = Arc::new(BlockRepository::bind(
        addr,
        cli.pages,
        cli.page_size,
        cli.dir,
        cli.threads,
    )?);

    let handle = Arc::clone(&repo);
    ctrlc::set_handler(move || {
        info!("shutting down repository");
        handle.request_stop();
    })
    .expect("failed to set Ctrl-C signal handler.");

    repo.start()?;
    info!("repository ready on port {}", repo.port());
    repo.join();
    Ok(())
}
