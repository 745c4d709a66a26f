use dojo_billing::{config::Config, Application};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dojo_core::telemetry::init_tracing("info,dojo_billing=debug");

    dojo_billing::services::init_metrics();

    let config = Config::from_env().expect("Failed to load configuration");
    let application = Application::build(config).await?;
    application.run_until_stopped().await?;

    Ok(())
}
