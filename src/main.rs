#[tokio::main]
async fn main() -> anyhow::Result<()> {
    studywatch_lib::run().await
}
