use serde::{Deserialize, Serialize};

/// Who a bearer token speaks for: a parent account or a paired child device.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Parent,
    Device,
}
