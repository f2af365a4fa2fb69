#[tokio::main]
async fn main() -> anyhow::Result<()> {
    live_ops_dashboard_lib::run().await
}
