use std::{error::Error, fmt};

const MAX_ADDRESS_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressError {
    address: String,
    message: &'static str,
}

impl AddressError {
    fn new(address: &str, message: &'static str) -> Self {
        Self {
            address: address.to_owned(),
            message,
        }
    }
}

impl fmt::Display for AddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sensor address {:?} {}", self.address, self.message)
    }
}

impl Error for AddressError {}

/// A 1-wire device address such as `28-0316a2794cff`, safe to join onto the
/// devices root as a single path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SensorAddress(String);

impl SensorAddress {
    pub fn new(value: impl Into<String>) -> Result<Self, AddressError> {
        let value = value.into();
        if value.is_empty() || value.len() > MAX_ADDRESS_LEN {
            return Err(AddressError::new(
                &value,
                "must be between 1 and 64 characters",
            ));
        }

        if value == "." || value == ".." {
            return Err(AddressError::new(&value, "is not a device name"));
        }

        if !value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
        {
            return Err(AddressError::new(
                &value,
                "contains invalid characters (allowed: a-z, A-Z, 0-9, '-', '_', '.')",
            ));
        }

        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SensorAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
