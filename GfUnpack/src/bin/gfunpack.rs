//! gfunpack command-line entry point

fn main() -> anyhow::Result<()> {
    gfunpack::cli::run_cli()
}
