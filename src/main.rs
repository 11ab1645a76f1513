use clap::Parser;

fn main() -> anyhow::Result<()> {
    areawatch_lib::run(areawatch_lib::cli::CliArgs::parse())
}
