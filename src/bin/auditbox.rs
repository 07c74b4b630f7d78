use anyhow::Result;

fn main() -> Result<()> {
    auditbox::cli::run()
}
