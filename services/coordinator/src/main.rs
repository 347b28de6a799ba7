use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    coordinator_service::run().await
}
