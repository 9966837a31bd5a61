//! OCPP 1.6 Core profile schemas
//!
//! Field limits follow the CiStringNType definitions of OCPP 1.6 JSON.
//! Every payload is strict: a field the schema does not declare is rejected.

use crate::schema::{ActionDefinition, FieldKind, PayloadSchema, Profile};
use crate::types::Role;

use super::CORE_PROFILE;

// ============================================================================
// Enumerations
// ============================================================================

pub const REGISTRATION_STATUS: &[&str] = &["Accepted", "Pending", "Rejected"];

pub const AUTHORIZATION_STATUS: &[&str] = &["Accepted", "Blocked", "Expired", "Invalid", "ConcurrentTx"];

pub const CHARGE_POINT_ERROR_CODE: &[&str] = &[
    "ConnectorLockFailure",
    "EVCommunicationError",
    "GroundFailure",
    "HighTemperature",
    "InternalError",
    "LocalListConflict",
    "NoError",
    "OtherError",
    "OverCurrentFailure",
    "PowerMeterFailure",
    "PowerSwitchFailure",
    "ReaderFailure",
    "ResetFailure",
    "UnderVoltage",
    "OverVoltage",
    "WeakSignal",
];

pub const CHARGE_POINT_STATUS: &[&str] = &[
    "Available",
    "Preparing",
    "Charging",
    "SuspendedEVSE",
    "SuspendedEV",
    "Finishing",
    "Reserved",
    "Unavailable",
    "Faulted",
];

pub const DATA_TRANSFER_STATUS: &[&str] = &["Accepted", "Rejected", "UnknownMessageId", "UnknownVendorId"];

pub const STOP_REASON: &[&str] = &[
    "EmergencyStop",
    "EVDisconnected",
    "HardReset",
    "Local",
    "Other",
    "PowerLoss",
    "Reboot",
    "Remote",
    "SoftReset",
    "UnlockCommand",
    "DeAuthorized",
];

pub const AVAILABILITY_TYPE: &[&str] = &["Inoperative", "Operative"];

pub const AVAILABILITY_STATUS: &[&str] = &["Accepted", "Rejected", "Scheduled"];

pub const CONFIGURATION_STATUS: &[&str] = &["Accepted", "Rejected", "RebootRequired", "NotSupported"];

pub const GENERIC_STATUS: &[&str] = &["Accepted", "Rejected"];

pub const RESET_TYPE: &[&str] = &["Hard", "Soft"];

pub const UNLOCK_STATUS: &[&str] = &["Unlocked", "UnlockFailed", "NotSupported"];

pub const READING_CONTEXT: &[&str] = &[
    "Interruption.Begin",
    "Interruption.End",
    "Other",
    "Sample.Clock",
    "Sample.Periodic",
    "Transaction.Begin",
    "Transaction.End",
    "Trigger",
];

pub const VALUE_FORMAT: &[&str] = &["Raw", "SignedData"];

pub const MEASURAND: &[&str] = &[
    "Current.Export",
    "Current.Import",
    "Current.Offered",
    "Energy.Active.Export.Register",
    "Energy.Active.Import.Register",
    "Energy.Reactive.Export.Register",
    "Energy.Reactive.Import.Register",
    "Energy.Active.Export.Interval",
    "Energy.Active.Import.Interval",
    "Energy.Reactive.Export.Interval",
    "Energy.Reactive.Import.Interval",
    "Frequency",
    "Power.Active.Export",
    "Power.Active.Import",
    "Power.Factor",
    "Power.Offered",
    "Power.Reactive.Export",
    "Power.Reactive.Import",
    "RPM",
    "SoC",
    "Temperature",
    "Voltage",
];

pub const PHASE: &[&str] = &[
    "L1", "L2", "L3", "N", "L1-N", "L2-N", "L3-N", "L1-L2", "L2-L3", "L3-L1",
];

pub const LOCATION: &[&str] = &["Body", "Cable", "EV", "Inlet", "Outlet"];

pub const UNIT_OF_MEASURE: &[&str] = &[
    "Wh", "kWh", "varh", "kvarh", "W", "kW", "VA", "kVA", "var", "kvar", "A", "V", "Celsius",
    "Fahrenheit", "K", "Percent",
];

// ============================================================================
// Shared structures
// ============================================================================

fn id_token() -> FieldKind {
    FieldKind::string(20)
}

fn id_tag_info() -> FieldKind {
    FieldKind::object(
        PayloadSchema::strict()
            .required("status", FieldKind::one_of(AUTHORIZATION_STATUS))
            .optional("expiryDate", FieldKind::timestamp())
            .optional("parentIdTag", id_token()),
    )
}

fn sampled_value() -> FieldKind {
    FieldKind::object(
        PayloadSchema::strict()
            .required("value", FieldKind::any_string())
            .optional("context", FieldKind::one_of(READING_CONTEXT))
            .optional("format", FieldKind::one_of(VALUE_FORMAT))
            .optional("measurand", FieldKind::one_of(MEASURAND))
            .optional("phase", FieldKind::one_of(PHASE))
            .optional("location", FieldKind::one_of(LOCATION))
            .optional("unit", FieldKind::one_of(UNIT_OF_MEASURE)),
    )
}

fn meter_value() -> FieldKind {
    FieldKind::object(
        PayloadSchema::strict()
            .required("timestamp", FieldKind::timestamp())
            .required("sampledValue", FieldKind::list_of(sampled_value())),
    )
}

fn status_only(values: &'static [&'static str]) -> PayloadSchema {
    PayloadSchema::strict().required("status", FieldKind::one_of(values))
}

// ============================================================================
// Charge point → central system
// ============================================================================

pub fn authorize() -> ActionDefinition {
    ActionDefinition::new(
        "Authorize",
        PayloadSchema::strict().required("idTag", id_token()),
        PayloadSchema::strict().required("idTagInfo", id_tag_info()),
    )
    .received_by(Role::CentralSystem)
}

pub fn boot_notification() -> ActionDefinition {
    ActionDefinition::new(
        "BootNotification",
        PayloadSchema::strict()
            .required("chargePointVendor", FieldKind::string(20))
            .required("chargePointModel", FieldKind::string(20))
            .optional("chargePointSerialNumber", FieldKind::string(25))
            .optional("chargeBoxSerialNumber", FieldKind::string(25))
            .optional("firmwareVersion", FieldKind::string(50))
            .optional("iccid", FieldKind::string(20))
            .optional("imsi", FieldKind::string(20))
            .optional("meterType", FieldKind::string(25))
            .optional("meterSerialNumber", FieldKind::string(25)),
        PayloadSchema::strict()
            .required("currentTime", FieldKind::timestamp())
            .required("interval", FieldKind::non_negative_integer())
            .required("status", FieldKind::one_of(REGISTRATION_STATUS)),
    )
    .received_by(Role::CentralSystem)
}

/// Vendor-specific exchange, allowed in both directions
pub fn data_transfer() -> ActionDefinition {
    ActionDefinition::new(
        "DataTransfer",
        PayloadSchema::strict()
            .required("vendorId", FieldKind::string(255))
            .optional("messageId", FieldKind::string(50))
            .optional("data", FieldKind::any_string()),
        PayloadSchema::strict()
            .required("status", FieldKind::one_of(DATA_TRANSFER_STATUS))
            .optional("data", FieldKind::any_string()),
    )
    .received_by(Role::CentralSystem)
    .received_by(Role::ChargePoint)
}

pub fn heartbeat() -> ActionDefinition {
    ActionDefinition::new(
        "Heartbeat",
        PayloadSchema::strict(),
        PayloadSchema::strict().required("currentTime", FieldKind::timestamp()),
    )
    .received_by(Role::CentralSystem)
}

pub fn meter_values() -> ActionDefinition {
    ActionDefinition::new(
        "MeterValues",
        PayloadSchema::strict()
            .required("connectorId", FieldKind::non_negative_integer())
            .optional("transactionId", FieldKind::integer())
            .required("meterValue", FieldKind::list_of(meter_value())),
        PayloadSchema::strict(),
    )
    .received_by(Role::CentralSystem)
}

pub fn start_transaction() -> ActionDefinition {
    ActionDefinition::new(
        "StartTransaction",
        PayloadSchema::strict()
            .required("connectorId", FieldKind::positive_integer())
            .required("idTag", id_token())
            .required("meterStart", FieldKind::integer())
            .optional("reservationId", FieldKind::integer())
            .required("timestamp", FieldKind::timestamp()),
        PayloadSchema::strict()
            .required("idTagInfo", id_tag_info())
            .required("transactionId", FieldKind::integer()),
    )
    .received_by(Role::CentralSystem)
}

pub fn status_notification() -> ActionDefinition {
    ActionDefinition::new(
        "StatusNotification",
        PayloadSchema::strict()
            .required("connectorId", FieldKind::non_negative_integer())
            .required("errorCode", FieldKind::one_of(CHARGE_POINT_ERROR_CODE))
            .optional("info", FieldKind::string(50))
            .required("status", FieldKind::one_of(CHARGE_POINT_STATUS))
            .optional("timestamp", FieldKind::timestamp())
            .optional("vendorId", FieldKind::string(255))
            .optional("vendorErrorCode", FieldKind::string(50)),
        PayloadSchema::strict(),
    )
    .received_by(Role::CentralSystem)
}

pub fn stop_transaction() -> ActionDefinition {
    ActionDefinition::new(
        "StopTransaction",
        PayloadSchema::strict()
            .optional("idTag", id_token())
            .required("meterStop", FieldKind::integer())
            .required("timestamp", FieldKind::timestamp())
            .required("transactionId", FieldKind::integer())
            .optional("reason", FieldKind::one_of(STOP_REASON))
            .optional("transactionData", FieldKind::array_of(meter_value())),
        PayloadSchema::strict().optional("idTagInfo", id_tag_info()),
    )
    .received_by(Role::CentralSystem)
}

// ============================================================================
// Central system → charge point
// ============================================================================

pub fn change_availability() -> ActionDefinition {
    ActionDefinition::new(
        "ChangeAvailability",
        PayloadSchema::strict()
            .required("connectorId", FieldKind::non_negative_integer())
            .required("type", FieldKind::one_of(AVAILABILITY_TYPE)),
        status_only(AVAILABILITY_STATUS),
    )
    .received_by(Role::ChargePoint)
}

pub fn change_configuration() -> ActionDefinition {
    ActionDefinition::new(
        "ChangeConfiguration",
        PayloadSchema::strict()
            .required("key", FieldKind::string(50))
            .required("value", FieldKind::string(500)),
        status_only(CONFIGURATION_STATUS),
    )
    .received_by(Role::ChargePoint)
}

pub fn clear_cache() -> ActionDefinition {
    ActionDefinition::new("ClearCache", PayloadSchema::strict(), status_only(GENERIC_STATUS))
        .received_by(Role::ChargePoint)
}

pub fn get_configuration() -> ActionDefinition {
    let key_value = PayloadSchema::strict()
        .required("key", FieldKind::string(50))
        .required("readonly", FieldKind::boolean())
        .optional("value", FieldKind::string(500));

    ActionDefinition::new(
        "GetConfiguration",
        PayloadSchema::strict().optional("key", FieldKind::array_of(FieldKind::string(50))),
        PayloadSchema::strict()
            .optional("configurationKey", FieldKind::array_of(FieldKind::object(key_value)))
            .optional("unknownKey", FieldKind::array_of(FieldKind::string(50))),
    )
    .received_by(Role::ChargePoint)
}

pub fn remote_start_transaction() -> ActionDefinition {
    ActionDefinition::new(
        "RemoteStartTransaction",
        PayloadSchema::strict()
            .optional("connectorId", FieldKind::positive_integer())
            .required("idTag", id_token())
            // Smart Charging structure, checked by that profile
            .optional("chargingProfile", FieldKind::object(PayloadSchema::permissive())),
        status_only(GENERIC_STATUS),
    )
    .received_by(Role::ChargePoint)
}

pub fn remote_stop_transaction() -> ActionDefinition {
    ActionDefinition::new(
        "RemoteStopTransaction",
        PayloadSchema::strict().required("transactionId", FieldKind::integer()),
        status_only(GENERIC_STATUS),
    )
    .received_by(Role::ChargePoint)
}

pub fn reset() -> ActionDefinition {
    ActionDefinition::new(
        "Reset",
        PayloadSchema::strict().required("type", FieldKind::one_of(RESET_TYPE)),
        status_only(GENERIC_STATUS),
    )
    .received_by(Role::ChargePoint)
}

pub fn unlock_connector() -> ActionDefinition {
    ActionDefinition::new(
        "UnlockConnector",
        PayloadSchema::strict().required("connectorId", FieldKind::positive_integer()),
        status_only(UNLOCK_STATUS),
    )
    .received_by(Role::ChargePoint)
}

/// Every Core profile action
pub fn profile() -> Profile {
    [
        authorize(),
        boot_notification(),
        data_transfer(),
        heartbeat(),
        meter_values(),
        start_transaction(),
        status_notification(),
        stop_transaction(),
        change_availability(),
        change_configuration(),
        clear_cache(),
        get_configuration(),
        remote_start_transaction(),
        remote_stop_transaction(),
        reset(),
        unlock_connector(),
    ]
    .into_iter()
    .fold(Profile::new(CORE_PROFILE), Profile::with_action)
}
