//! Conversion between records and the string values held by the store.
//!
//! Jobs and payloads are stored as JSON. A job target is not a record: it is
//! the machine's bare boot id, so it round-trips through [`machine_from_value`]
//! and [`machine_to_value`] untouched.

use hive_core::Machine;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;

pub fn encode<T: Serialize>(record: &T) -> Result<String> {
    Ok(serde_json::to_string(record)?)
}

pub fn decode<T: DeserializeOwned>(value: &str) -> Result<T> {
    Ok(serde_json::from_str(value)?)
}

pub fn machine_from_value(value: &str) -> Machine {
    Machine::new(value)
}

pub fn machine_to_value(machine: &Machine) -> &str {
    &machine.boot_id
}
