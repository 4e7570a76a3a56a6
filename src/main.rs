#[tokio::main]
async fn main() -> eyre::Result<()> {
    gemini_relay::relay::run().await
}
