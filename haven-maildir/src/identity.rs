use std::{
    fmt::Write,
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use haven_common::{fs::IoClass, internal};

const MACHINE_ID: &str = "/etc/machine-id";

/// The installation identity and delivery counter shared by every
/// transaction in the process.
#[derive(Debug)]
pub struct DeliveryIdentity {
    id: String,
    counter: AtomicU64,
}

impl DeliveryIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            counter: AtomicU64::new(0),
        }
    }

    /// Uses `configured` if given, then `/etc/machine-id`, then a random id.
    pub async fn load(configured: Option<&str>) -> Self {
        if let Some(id) = configured {
            return Self::new(id);
        }

        match tokio::fs::read_to_string(MACHINE_ID).await {
            Ok(id) if !id.trim().is_empty() => {
                internal!(level = INFO, "Using unique {MACHINE_ID}: {}", id.trim());
                Self::new(id.trim())
            }
            Ok(_) => Self::random("it is empty"),
            Err(err) if IoClass::of(&err) == IoClass::Missing => Self::random("it was not found"),
            Err(err) => {
                internal!(level = ERROR, "Error reading {MACHINE_ID}: {err}");
                Self::random("it could not be read")
            }
        }
    }

    fn random(why: &str) -> Self {
        let id = hex(&rand::random::<[u8; 12]>());
        internal!(
            level = WARN,
            "Not using {MACHINE_ID} because {why}, using random id: {id}"
        );
        Self::new(id)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// A file name no other delivery on this host will produce:
    /// `<id>.<pid>.<counter>.<millis>.<random>`.
    pub fn unique_name(&self) -> String {
        let sequence = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_millis());

        format!(
            "{}.{}.{sequence}.{millis}.{}",
            self.id,
            std::process::id(),
            hex(&rand::random::<[u8; 12]>())
        )
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, byte| {
        let _ = write!(out, "{byte:02x}");
        out
    })
}
