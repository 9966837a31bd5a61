//! OCPP-J Node - CLI running either side of OCPP 1.6 JSON
//!
//! # Usage
//!
//! ```bash
//! # Central system on ws://0.0.0.0:9000/ocpp/<charge point id>
//! ocppj-node central-system --port 9000 --path ocpp
//!
//! # Charge point connecting to it as CP001
//! ocppj-node charge-point --url ws://localhost:9000/ocpp --id CP001
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use ocppj_core::ocpp16::{
    self, AuthorizationStatus, AuthorizeConfirmation, AuthorizeRequest, AvailabilityStatus,
    BootNotificationConfirmation, BootNotificationRequest, ChangeAvailabilityConfirmation,
    ChangeAvailabilityRequest, ChargePointStatus, ClearCacheConfirmation, ClearCacheRequest,
    DataTransferConfirmation, DataTransferRequest, DataTransferStatus, GenericStatus,
    HeartbeatConfirmation, HeartbeatRequest, IdTagInfo, RegistrationStatus, ResetConfirmation,
    ResetRequest, StartTransactionConfirmation, StartTransactionRequest,
    StatusNotificationConfirmation, StatusNotificationRequest, StopTransactionConfirmation,
    StopTransactionRequest, UnlockConnectorConfirmation, UnlockConnectorRequest, UnlockStatus,
};
use ocppj_core::{
    CentralSystem, ChargePoint, DispatcherConfig, EndpointId, HandlerError, Timestamp, WsConfig,
};
use serde_json::{json, Value};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Retry interval when the central system answers a boot with interval 0
const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// OCPP 1.6 JSON central system or charge point
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Request timeout in seconds
    #[arg(long, default_value = "30", global = true)]
    request_timeout: u64,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accept charge point connections
    CentralSystem {
        /// Listen address
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,

        /// Listen port
        #[arg(short, long, default_value = "9000")]
        port: u16,

        /// Path prefix before the charge point id
        #[arg(long, default_value = "ocpp")]
        path: String,

        /// Heartbeat interval handed out in BootNotification, in seconds
        #[arg(long, default_value = "60")]
        heartbeat_interval: i64,
    },

    /// Connect to a central system
    ChargePoint {
        /// Central system WebSocket URL (without charge point id)
        #[arg(short, long, default_value = "ws://localhost:9000/ocpp")]
        url: String,

        /// Charge point identity (appended to URL)
        #[arg(short, long, default_value = "CP001")]
        id: String,

        /// Vendor name
        #[arg(long, default_value = "Elektrokombinacija")]
        vendor: String,

        /// Model name
        #[arg(long, default_value = "EK3-OCPP")]
        model: String,

        /// Number of connectors to report
        #[arg(long, default_value = "1")]
        connectors: i64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Setup logging
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = DispatcherConfig::default()
        .with_request_timeout(Duration::from_secs(args.request_timeout));

    match args.command {
        Command::CentralSystem {
            bind,
            port,
            path,
            heartbeat_interval,
        } => {
            let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
            run_central_system(addr, &path, heartbeat_interval, config).await
        }
        Command::ChargePoint {
            url,
            id,
            vendor,
            model,
            connectors,
        } => {
            run_charge_point(&url, &id, vendor, model, connectors, config).await;
            Ok(())
        }
    }
}

async fn run_central_system(
    addr: SocketAddr,
    path: &str,
    heartbeat_interval: i64,
    config: DispatcherConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let next_transaction = Arc::new(AtomicI64::new(1));

    let central_system = CentralSystem::builder(ocpp16::registry()?)
        .config(config)
        .on_request(move |id: EndpointId, boot: BootNotificationRequest| async move {
            info!(
                "BootNotification from {}: {} {}",
                id, boot.charge_point_vendor, boot.charge_point_model
            );
            Ok::<_, HandlerError>(BootNotificationConfirmation {
                current_time: Timestamp::now(),
                interval: heartbeat_interval,
                status: RegistrationStatus::Accepted,
            })
        })
        .on_request(|_id: EndpointId, _heartbeat: HeartbeatRequest| async move {
            Ok::<_, HandlerError>(HeartbeatConfirmation {
                current_time: Timestamp::now(),
            })
        })
        .on_request(|id: EndpointId, request: AuthorizeRequest| async move {
            info!("Authorize {} from {}", request.id_tag, id);
            Ok::<_, HandlerError>(AuthorizeConfirmation {
                id_tag_info: IdTagInfo::new(AuthorizationStatus::Accepted),
            })
        })
        .on_request(move |id: EndpointId, request: StartTransactionRequest| {
            let transaction_id = next_transaction.fetch_add(1, Ordering::SeqCst);
            async move {
                info!(
                    "Transaction {} started on {} connector {}",
                    transaction_id, id, request.connector_id
                );
                Ok::<_, HandlerError>(StartTransactionConfirmation {
                    id_tag_info: IdTagInfo::new(AuthorizationStatus::Accepted),
                    transaction_id,
                })
            }
        })
        .on_request(|id: EndpointId, request: StopTransactionRequest| async move {
            info!("Transaction {} stopped on {}", request.transaction_id, id);
            Ok::<_, HandlerError>(StopTransactionConfirmation::default())
        })
        .on_request(|id: EndpointId, request: StatusNotificationRequest| async move {
            info!(
                "Connector {} on {} is {:?} ({:?})",
                request.connector_id, id, request.status, request.error_code
            );
            Ok::<_, HandlerError>(StatusNotificationConfirmation {})
        })
        .on("MeterValues", |id: EndpointId, payload: Value| async move {
            info!("MeterValues from {}: {}", id, payload);
            Ok::<_, HandlerError>(json!({}))
        })
        .on_request(|id: EndpointId, request: DataTransferRequest| async move {
            warn!("DataTransfer from {} for unknown vendor {}", id, request.vendor_id);
            Ok::<_, HandlerError>(DataTransferConfirmation {
                status: DataTransferStatus::UnknownVendorId,
                data: None,
            })
        })
        .build();

    info!("Starting central system on {}", addr);
    central_system.listen(addr, path).await?;
    Ok(())
}

async fn run_charge_point(
    url: &str,
    id: &str,
    vendor: String,
    model: String,
    connectors: i64,
    config: DispatcherConfig,
) {
    let registry = match ocpp16::registry() {
        Ok(registry) => registry,
        Err(e) => {
            error!("Failed to build registry: {}", e);
            return;
        }
    };

    let charge_point = ChargePoint::builder(id, registry)
        .config(config)
        .ws_config(WsConfig::default())
        .on_request(|_id: EndpointId, request: ResetRequest| async move {
            info!("Reset requested: {:?}", request.kind);
            Ok::<_, HandlerError>(ResetConfirmation {
                status: GenericStatus::Accepted,
            })
        })
        .on_request(|_id: EndpointId, request: ChangeAvailabilityRequest| async move {
            info!(
                "Connector {} availability set to {:?}",
                request.connector_id, request.kind
            );
            Ok::<_, HandlerError>(ChangeAvailabilityConfirmation {
                status: AvailabilityStatus::Accepted,
            })
        })
        .on_request(|_id: EndpointId, _request: ClearCacheRequest| async move {
            info!("Authorization cache cleared");
            Ok::<_, HandlerError>(ClearCacheConfirmation {
                status: GenericStatus::Accepted,
            })
        })
        .on_request(|_id: EndpointId, request: UnlockConnectorRequest| async move {
            info!("Unlocking connector {}", request.connector_id);
            Ok::<_, HandlerError>(UnlockConnectorConfirmation {
                status: UnlockStatus::Unlocked,
            })
        })
        .build();

    let boot = BootNotificationRequest::new(model, vendor);
    charge_point
        .run_with_session(url, move |cp| session(cp, boot.clone(), connectors))
        .await;
}

/// Boot, report connectors, then heartbeat at the accepted interval
async fn session(charge_point: ChargePoint, boot: BootNotificationRequest, connectors: i64) {
    let interval = loop {
        match charge_point.call(&boot).await {
            Ok(confirmation) => {
                let interval = interval_or_default(confirmation.interval);
                match confirmation.status {
                    RegistrationStatus::Accepted => {
                        info!("Boot accepted, heartbeat every {:?}", interval);
                        break interval;
                    }
                    status => {
                        warn!("Boot {:?}, retrying in {:?}", status, interval);
                        tokio::time::sleep(interval).await;
                    }
                }
            }
            Err(e) => {
                error!("BootNotification failed: {}", e);
                tokio::time::sleep(DEFAULT_RETRY_INTERVAL).await;
            }
        }
    };

    for connector_id in 0..=connectors {
        let request = StatusNotificationRequest::new(connector_id, ChargePointStatus::Available);
        if let Err(e) = charge_point.status_notification(&request).await {
            warn!("StatusNotification for connector {} failed: {}", connector_id, e);
        }
    }

    loop {
        tokio::time::sleep(interval).await;
        match charge_point.heartbeat().await {
            Ok(confirmation) => info!("Heartbeat acknowledged at {}", confirmation.current_time),
            Err(e) => warn!("Heartbeat failed: {}", e),
        }
    }
}

fn interval_or_default(seconds: i64) -> Duration {
    if seconds > 0 {
        Duration::from_secs(seconds as u64)
    } else {
        DEFAULT_RETRY_INTERVAL
    }
}
