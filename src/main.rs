use std::sync::Arc;

use vexv5_link::config::ConnectionConfig;
use vexv5_link::connection::Connection;
use vexv5_link::device::V5Device;
use vexv5_link::ports::NativeBackend;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => ConnectionConfig::from_toml_str(&std::fs::read_to_string(path)?)?,
        None => ConnectionConfig::default(),
    };

    let connection = Connection::new(Arc::new(NativeBackend::new()), config);
    connection.connect(false).await?;

    let device = V5Device::new(connection.clone());

    if let Some(version) = device.system_version().await? {
        println!("System version: {}", version.version);
    }

    device.set_value("teamnumber", "123").await?;
    if let Some(team) = device.get_value("teamnumber").await? {
        println!("Team number: {}", team);
    }

    if let Some(programs) = device.list_programs().await? {
        for program in programs {
            println!(
                "{} ({} bytes, slot {:?})",
                program.name, program.size, program.slot
            );
        }
    }

    connection.close().await;
    Ok(())
}
