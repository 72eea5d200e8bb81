pub mod channels;
pub mod config;
pub mod crc;
pub mod dispatcher;
pub mod error;
pub mod mqtt;
pub mod options;
pub mod output;
pub mod port;
pub mod prelude;
pub mod protocol;
pub mod result;
pub mod scheduler;
pub mod trigger;

const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::config::LoopSetting;
use crate::dispatcher::Dispatcher;
use crate::mqtt::Mqtt;
use crate::output::{Formatter, Outputs};
use crate::prelude::*;
use crate::scheduler::Scheduler;

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

fn parse_level(level: &str) -> Result<log::LevelFilter> {
    log::LevelFilter::from_str(level).map_err(|_| anyhow!("unknown log level {}", level))
}

/// The backend passes everything; `log::set_max_level` does the filtering so
/// the config file can still change the level after startup.
fn init_logging(level: log::LevelFilter) {
    let _ = env_logger::Builder::new()
        .filter_level(log::LevelFilter::Trace)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .try_init();
    log::set_max_level(level);
}

pub async fn app() -> Result<()> {
    let options = Options::new();

    init_logging(parse_level(options.loglevel().unwrap_or("info"))?);
    info!("powermon {} starting", CARGO_PKG_VERSION);

    let config = ConfigWrapper::from_config(Config::load(&options.config_file)?);

    match options.loglevel() {
        Some(level) => config.set_loglevel(level),
        None => log::set_max_level(parse_level(&config.loglevel())?),
    }
    if options.once {
        config.set_loop_setting(LoopSetting::Once);
    }

    if options.list_commands {
        return list_commands(&config);
    }

    if let Some(code) = &options.command {
        return run_single(config, code).await;
    }

    run(config, options.runtime).await
}

fn list_commands(config: &ConfigWrapper) -> Result<()> {
    for device in config.devices() {
        let protocol = Protocol::new(device.port().protocol(), device.model())?;
        println!("{} ({}):", device.name(), protocol.id());
        for (code, description) in protocol.list_commands() {
            println!("  {:<12} {}", code, description);
        }
    }
    Ok(())
}

/// `--command`: one dispatch against the first device, printed as simple.
async fn run_single(config: ConfigWrapper, code: &str) -> Result<()> {
    let device = config
        .devices()
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("no device configured"))?;
    let channels = Channels::new();

    let (mqtt, mqtt_handle) = start_mqtt(&config, &channels).await;

    let protocol = Protocol::new(device.port().protocol(), device.model())?;
    let port = port::from_config(&device, &config, &channels);
    let mut dispatcher = Dispatcher::new(device.name(), protocol, port);

    let result = dispatcher.run_command(code).await;
    dispatcher.disconnect().await;

    let formatter = Formatter::new(&config::Output::default())?;
    output::screen::display(&formatter.format(&result)?);

    mqtt.stop();
    if let Err(e) = mqtt_handle.await {
        error!("Error waiting for mqtt task: {}", e);
    }
    Ok(())
}

async fn start_mqtt(config: &ConfigWrapper, channels: &Channels) -> (Mqtt, JoinHandle<()>) {
    let mqtt = Mqtt::new(config.clone(), channels.clone());
    let mqtt_clone = mqtt.clone();
    let handle = tokio::spawn(async move {
        if let Err(e) = mqtt_clone.start().await {
            error!("MQTT task failed: {}", e);
        }
    });

    // the client must be listening before devices start publishing
    if config.mqtt().enabled() {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while channels.to_mqtt.receiver_count() == 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    (mqtt, handle)
}

/// Runs every device's scheduler until they finish, ctrl-c, or the runtime limit.
pub async fn run(config: ConfigWrapper, runtime: Option<u64>) -> Result<()> {
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl+c: {}", e);
            return;
        }
        info!("ctrl+c received, stopping");
        let _ = shutdown_tx_clone.send(());
    });

    if let Some(seconds) = runtime {
        let shutdown_tx_clone = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            info!("runtime limit of {}s reached, stopping", seconds);
            let _ = shutdown_tx_clone.send(());
        });
    }

    info!("Initializing channels...");
    let channels = Channels::new();

    info!("  Creating Outputs...");
    let outputs = Outputs::new(config.clone(), channels.clone());
    let outputs_handle = tokio::spawn(async move {
        if let Err(e) = outputs.start().await {
            error!("Outputs task failed: {}", e);
        }
    });

    info!("  Creating MQTT client...");
    let (mqtt, mqtt_handle) = start_mqtt(&config, &channels).await;

    info!("  Creating Schedulers...");
    let mut scheduler_handles = Vec::new();
    for device in config.devices() {
        let (adhoc_tx, adhoc_rx) = mpsc::channel(scheduler::ADHOC_QUEUE);
        let scheduler = Scheduler::from_config(&config, &channels, &device, adhoc_rx)?;

        if config.mqtt().enabled() {
            let topic = config.mqtt().adhoc_topic(device.name());
            tokio::spawn(mqtt::forward_adhoc(channels.clone(), topic, adhoc_tx));
        }

        let shutdown_rx = shutdown_tx.subscribe();
        scheduler_handles.push(tokio::spawn(async move {
            let device = scheduler.device().to_owned();
            if let Err(e) = scheduler.start(shutdown_rx).await {
                error!("{}: scheduler failed: {}", device, e);
            }
        }));
    }

    for handle in scheduler_handles {
        if let Err(e) = handle.await {
            error!("Error waiting for scheduler task: {}", e);
        }
    }

    info!("Stopping all components...");
    Outputs::stop(&channels);
    if let Err(e) = outputs_handle.await {
        error!("Error waiting for outputs task: {}", e);
    }
    mqtt.stop();
    if let Err(e) = mqtt_handle.await {
        error!("Error waiting for mqtt task: {}", e);
    }

    info!("Shutdown complete");
    Ok(())
}
