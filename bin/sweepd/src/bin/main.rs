use clap::Parser;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> eyre::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = sweepd::SweepdArgs::parse();
    sweepd::run(args).await
}
