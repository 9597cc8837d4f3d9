use anyhow::Result;

fn main() -> Result<()> {
    loglens_cli::main_entry()
}
