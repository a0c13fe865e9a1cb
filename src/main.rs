#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dirfleet::cli::run_cli().await
}
