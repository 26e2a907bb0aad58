use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;

/// Address and port of one side of a hook
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    pub ip: Option<IpAddr>,
    pub port: u16,
}

/// One `hook=` line: where the session is seen and how it is translated
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Hook {
    /// Hook point, e.g. "pre" or "post"
    pub hook: String,
    /// Direction, "org" or "reply"
    pub dir: String,
    /// Action, e.g. "snat", "dnat" or "noop"
    pub act: String,
    pub src: Endpoint,
    pub dst: Endpoint,
    pub nat: Endpoint,
}

/// Source, destination and translated endpoints in the original direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Peers {
    pub src: Endpoint,
    pub dst: Endpoint,
    pub nat: Endpoint,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Basics {
    pub protocol: u16,
    pub state_l: u8,
    pub state_r: u8,
    pub duration: u64,
    pub expire: u64,
    pub timeout: u64,
}

/// Byte, packet and error counters per direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub bytes_org: u64,
    pub packets_org: u64,
    pub errors_org: u64,
    pub valid_org: bool,
    pub bytes_rev: u64,
    pub packets_rev: u64,
    pub errors_rev: u64,
    pub valid_rev: bool,
}

/// Speed in bytes per second; tx is the original (upload) direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Rate {
    pub tx_bps: u64,
    pub rx_bps: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Npu {
    pub offload_org: u8,
    pub offload_rev: u8,
    pub nturbo_org: u8,
    pub nturbo_rev: u8,
    pub in_npu_org: Option<u8>,
    pub in_npu_fwd: Option<u8>,
    pub out_npu_org: Option<u8>,
    pub out_npu_fwd: Option<u8>,
    pub flag_org: u8,
    pub flag_rev: u8,
}

/// Reasons why the session is not offloaded
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NpuError {
    pub no_offload_reason: String,
    pub kernel_org: String,
    pub kernel_rev: String,
    pub driver_org: String,
    pub driver_rev: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Policy {
    pub id: u32,
    pub vdom: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Other {
    pub ha_id: u8,
    pub helper: String,
    pub shaping_policy_id: u32,
    pub tunnel_in: String,
    pub tunnel_out: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Shaping {
    pub shaper_org: String,
    pub shaper_rev: String,
    pub shaper_ip: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Macs {
    pub src: String,
    pub dst: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Interfaces {
    pub in_org: u32,
    pub out_org: u32,
    pub in_rev: u32,
    pub out_rev: u32,
    pub next_hop_org: Option<IpAddr>,
    pub next_hop_rev: Option<IpAddr>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Auth {
    pub user: String,
    pub server: String,
    pub info: u64,
}

/// Value stored in the open-ended custom map, usually by plugins
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CustomValue {
    Text(String),
    Unsigned(u64),
    Float(f64),
    Empty,
}

impl fmt::Display for CustomValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CustomValue::Text(s) => write!(f, "{}", s),
            CustomValue::Unsigned(n) => write!(f, "{}", n),
            CustomValue::Float(n) => write!(f, "{}", n),
            CustomValue::Empty => Ok(()),
        }
    }
}

/// One parsed session.
///
/// Every group is `Some` exactly when it was part of the field request used
/// for parsing. Consumers that did not request a group must not rely on it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Session {
    pub serial: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hooks: Option<Vec<Hook>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub states: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub basics: Option<Basics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<Stats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<Rate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub npu: Option<Npu>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub npu_error: Option<NpuError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<Policy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub other: Option<Other>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shaping: Option<Shaping>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub macs: Option<Macs>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interfaces: Option<Interfaces>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<Auth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom: Option<HashMap<String, CustomValue>>,
}

impl Session {
    /// Endpoints of the hook in the original direction.
    ///
    /// Returns `None` when hooks were not parsed. A session without an
    /// `org` hook yields empty endpoints.
    pub fn peers(&self) -> Option<Peers> {
        let hooks = self.hooks.as_ref()?;
        let peers = hooks
            .iter()
            .find(|h| h.dir == "org")
            .map(|h| Peers {
                src: h.src,
                dst: h.dst,
                nat: h.nat,
            })
            .unwrap_or_default();
        Some(peers)
    }

    pub fn custom_value(&self, key: &str) -> Option<&CustomValue> {
        self.custom.as_ref()?.get(key)
    }

    /// Store a custom value; ignored when the custom group was not requested
    pub fn set_custom(&mut self, key: impl Into<String>, value: CustomValue) -> bool {
        match self.custom.as_mut() {
            Some(map) => {
                map.insert(key.into(), value);
                true
            }
            None => false,
        }
    }
}
