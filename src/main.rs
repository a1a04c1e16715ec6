use anyhow::Result;

fn main() -> Result<()> {
    crossmotif::cli::main()
}
