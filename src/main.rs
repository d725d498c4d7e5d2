mod common;
mod device_config;
mod device_controller;
mod driver;
mod entity;
mod mqtt_client;
mod util;

use std::error::Error;
use std::thread;
use std::time::{Duration, Instant};

use dotenv::dotenv;
use tokio_util::sync::CancellationToken;

use common::clock::{Clock, SystemClock};
use common::logger::init_logger;
use common::mqtt::PahoTransport;
use common::setting::Settings;
use common::storage::{FsStorage, Storage};
use common::transport::Transport;
use device_config::credential::CredentialBundle;
use device_controller::device_manager::DeviceManager;
use driver::device::dummy_board::DummyBoard;
use driver::traits::peripherals::Peripherals;
use entity::bo::connection_state_bo::ConnectionState;
use entity::bo::provisioning_bo::ProvisioningOutcome;

const LOG_TAG: &str = "main";

// pause before the next attempt after a failed connect or restart
const RECONNECT_DELAY: Duration = Duration::from_secs(10);

fn main() -> Result<(), Box<dyn Error>> {
    // check env file
    dotenv().ok();

    // load settings
    let settings = Settings::get();

    // set up logger
    init_logger()?;
    info!(LOG_TAG, "settings loaded, env: {:?}", settings.env.env);
    debug!(LOG_TAG, "settings: {:?}", settings);

    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || handler_token.cancel())?;

    let storage = FsStorage::new(&settings.storage.root_dir)?;
    let transport = PahoTransport::new(&settings.storage.root_dir, settings);
    let mut manager = DeviceManager::new(transport, storage, DummyBoard::new(), SystemClock, settings);

    if settings.storage.reset_on_start {
        manager.reset();
    }

    // a failed network join is retried by the restart path of the run loop
    match manager.initialize(&CredentialBundle::from_settings(&settings.bootstrap)) {
        Ok(report) if !report.is_complete() => {
            warn!(LOG_TAG, "{} credential files could not be written", report.failed.len());
        }
        Ok(_) => {}
        Err(e) => error!(LOG_TAG, "initialization incomplete: {}", e),
    }
    if !manager.is_configured() {
        error!(LOG_TAG, "no device configuration, provide {} and start again", settings.bootstrap.device_config);
        return Ok(());
    }
    if !manager.is_up_to_date() {
        warn!(LOG_TAG, "module firmware is older than 2.2, please update");
    }
    if settings.provisioning.reprovision {
        manager.reprovision();
    }

    run(&mut manager, &cancel);

    manager.disconnect();
    info!(LOG_TAG, "shut down");
    Ok(())
}

/// keep the hub session alive, publish telemetry every send interval and serve inbound messages in between
fn run<T: Transport, S: Storage, P: Peripherals, C: Clock>(
    manager: &mut DeviceManager<T, S, P, C>,
    cancel: &CancellationToken,
) {
    while !cancel.is_cancelled() {
        if !manager.is_status_ok() || manager.state() == ConnectionState::Disconnected {
            warn!(LOG_TAG, "connection state {}, restarting", manager.state());
            if let Err(e) = manager.restart() {
                error!(LOG_TAG, "restart failed: {}", e);
                thread::sleep(RECONNECT_DELAY);
                continue;
            }
        }

        if manager.needs_provisioning() {
            match manager.provision(cancel) {
                Ok(ProvisioningOutcome::Assigned { hub_address }) => info!(LOG_TAG, "provisioned to {}", hub_address),
                Ok(outcome) => {
                    error!(LOG_TAG, "provisioning ended with {:?}, exiting", outcome);
                    return;
                }
                Err(e) => {
                    error!(LOG_TAG, "provisioning failed: {}", e);
                    thread::sleep(RECONNECT_DELAY);
                    continue;
                }
            }
        }

        // a failed subscribe closes the connection, so both are retried together
        if manager.state() != ConnectionState::BrokerConnected {
            if !(manager.connect() && manager.subscribe_to_topics()) {
                thread::sleep(RECONNECT_DELAY);
                continue;
            }
            manager.publish_properties();
            if let Some(voltage) = manager.last_battery_voltage() {
                info!(LOG_TAG, "battery voltage {:.2} V reported", voltage);
            }
        }

        manager.publish_sensor_data();

        let next_publish = Instant::now() + manager.telemetry_send_interval();
        while Instant::now() < next_publish
            && !cancel.is_cancelled()
            && manager.state() == ConnectionState::BrokerConnected
        {
            manager.process_cloud_message();
        }
    }
}
