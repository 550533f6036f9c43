use std::time::Duration;

pub const DEFAULT_ADAPTER_PORT: u16 = 1820;
pub const DEFAULT_W1_DEVICES_PATH: &str = "/sys/bus/w1/devices";

/// Fixed delay between a lost connection and the next connect attempt.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Aggregate master list, either at the devices root or inside a bus master directory.
pub const MASTER_SLAVES_FILE: &str = "w1_master_slaves";
/// Per-bus master directories are named with this prefix followed by the bus number.
pub const BUS_MASTER_PREFIX: &str = "w1_bus_master";
pub const SLAVE_STATUS_FILE: &str = "w1_slave";

/// Written by the kernel into an empty master list.
pub const NO_SLAVES_PLACEHOLDER: &str = "not found.";
