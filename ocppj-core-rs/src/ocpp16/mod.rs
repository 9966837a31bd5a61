//! OCPP 1.6 JSON catalog
//!
//! - `catalog`: schemas for every Core profile action
//! - `types`: typed serde payloads for the commonly driven actions

pub mod catalog;
pub mod types;

use std::sync::Arc;

use crate::registry::{Registry, RegistryError};
use crate::schema::Profile;

pub use types::*;

/// Name of the OCPP 1.6 Core profile
pub const CORE_PROFILE: &str = "Core";

/// Every action of the Core profile
pub fn core_profile() -> Profile {
    catalog::profile()
}

/// Registry holding the Core profile
pub fn registry() -> Result<Arc<Registry>, RegistryError> {
    let registry = Registry::builder().register_profile(core_profile())?.build();
    Ok(Arc::new(registry))
}
