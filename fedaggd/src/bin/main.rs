#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fedaggd::run().await
}
