#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = redink::run().await {
        eprintln!("redink fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
