use clap::Parser;
use notes_cli::Cli;
use notes_cli::run_main;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run_main(cli))
}
