use std::{
    error::Error,
    fmt, io,
    path::{Path, PathBuf},
};

use lib::{
    constants::{BUS_MASTER_PREFIX, MASTER_SLAVES_FILE, NO_SLAVES_PLACEHOLDER, SLAVE_STATUS_FILE},
    protocol::SensorAddress,
};
use tokio::fs;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct BusError {
    path: PathBuf,
    source: io::Error,
}

impl BusError {
    fn new(path: &Path, source: io::Error) -> Self {
        Self {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to read {}: {}", self.path.display(), self.source)
    }
}

impl Error for BusError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.source)
    }
}

/// Read-only view of the kernel's 1-wire device tree.
#[derive(Debug, Clone)]
pub struct SensorBus {
    root: PathBuf,
}

impl SensorBus {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the raw status text of one sensor, or an empty string if it
    /// cannot be read. Read failures are reported to the controller as an
    /// empty payload, never as an error.
    pub async fn read_sensor(&self, address: &str) -> String {
        let address = match SensorAddress::new(address) {
            Ok(address) => address,
            Err(err) => {
                warn!("refusing sensor read: {}", err);
                return String::new();
            }
        };

        let path = self.root.join(address.as_str()).join(SLAVE_STATUS_FILE);
        match fs::read_to_string(&path).await {
            Ok(raw) => {
                debug!("read from {}: {:?}", path.display(), raw);
                raw
            }
            Err(err) => {
                warn!("read from {} failed: {}", path.display(), err);
                String::new()
            }
        }
    }

    /// Lists every address named by the aggregate master list and the
    /// per-bus master lists, in directory name order.
    pub async fn enumerate(&self) -> Result<Vec<String>, BusError> {
        let mut addresses = Vec::new();
        for path in self.master_lists().await? {
            debug!("reading {}", path.display());
            let content = fs::read_to_string(&path)
                .await
                .map_err(|err| BusError::new(&path, err))?;
            addresses.extend(parse_master_list(&content));
        }
        Ok(addresses)
    }

    async fn master_lists(&self) -> Result<Vec<PathBuf>, BusError> {
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|err| BusError::new(&self.root, err))?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| BusError::new(&self.root, err))?
        {
            names.push(entry.file_name());
        }
        names.sort();

        Ok(names
            .iter()
            .filter_map(|name| {
                let name = name.to_str()?;
                if name == MASTER_SLAVES_FILE {
                    Some(self.root.join(name))
                } else if is_bus_master(name) {
                    Some(self.root.join(name).join(MASTER_SLAVES_FILE))
                } else {
                    None
                }
            })
            .collect())
    }
}

fn is_bus_master(name: &str) -> bool {
    name.strip_prefix(BUS_MASTER_PREFIX)
        .is_some_and(|bus| !bus.is_empty() && bus.bytes().all(|b| b.is_ascii_digit()))
}

fn parse_master_list(content: &str) -> impl Iterator<Item = String> + '_ {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && *line != NO_SLAVES_PLACEHOLDER)
        .map(str::to_owned)
}
