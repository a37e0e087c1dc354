use modwire_client::{ClientConfig, ModbusClient};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "127.0.0.1".to_owned());
    let port = args.next().map(|p| p.parse()).transpose()?.unwrap_or(502);

    let client = ModbusClient::tcp(
        ClientConfig::default()
            .with_host(host)
            .with_port(port)
            .with_retry_delay(Duration::from_secs(2)),
    );

    let completion = client.read_holding_registers(0, 4, None)?.await?;
    println!("holding registers: {:?}", completion.registers().unwrap_or_default());
    println!(
        "waited {:?}, transferred in {:?}",
        completion.metrics.wait_time(),
        completion.metrics.transfer_time()
    );

    let coils = client.read_coils(0, 8, None)?.await?;
    println!("coils: {:?}", coils.coils().unwrap_or_default());
    Ok(())
}
