use crate::request::{FieldGroup, FieldRequest};
use std::net::IpAddr;
use std::str::FromStr;
use tracing::trace;

mod entities;

pub use entities::{
    Auth, Basics, CustomValue, Endpoint, Hook, Interfaces, Macs, Npu, NpuError, Other, Peers,
    Policy, Rate, Session, Shaping, Stats,
};

const BASICS_PREFIX: &str = "session info:";
const STATS_PREFIX: &str = "statistic(bytes/packets/allow_err):";
const TX_SPEED_MARKER: &str = "tx speed(Bps/kbps):";
const RX_SPEED_MARKER: &str = "rx speed(Bps/kbps):";
const NPU_INFO_PREFIX: &str = "npu info:";
const NO_OFFLOAD_PREFIX: &str = "no_ofld_reason:";
const OFFLOAD_FAIL_PREFIX: &str = "ofld_fail_reason(kernel, drv):";

/// Parses one raw session record into a `Session`.
///
/// Only the groups enabled in `request` are extracted; the others stay `None`.
/// Malformed values never fail the record, they fall back to zero values.
pub fn parse_session(raw: &[u8], request: &FieldRequest) -> Session {
    let text = String::from_utf8_lossy(raw);
    let mut session = empty_session(request);

    if request.contains(FieldGroup::Plain) {
        session.plain = Some(text.clone().into_owned());
    }

    for line in text.lines() {
        let line = line.trim();
        if !line.is_empty() {
            parse_line(line, &mut session);
        }
    }

    session
}

/// Creates a session with every requested group present but empty
fn empty_session(request: &FieldRequest) -> Session {
    fn group<T: Default>(request: &FieldRequest, group: FieldGroup) -> Option<T> {
        request.contains(group).then(T::default)
    }

    Session {
        serial: 0,
        plain: None,
        hooks: group(request, FieldGroup::Peers),
        states: group(request, FieldGroup::States),
        basics: group(request, FieldGroup::Basics),
        stats: group(request, FieldGroup::Stats),
        rate: group(request, FieldGroup::Rate),
        npu: group(request, FieldGroup::Npu),
        npu_error: group(request, FieldGroup::NpuError),
        policy: group(request, FieldGroup::Policy),
        other: group(request, FieldGroup::Other),
        shaping: group(request, FieldGroup::Shaping),
        macs: group(request, FieldGroup::Macs),
        interfaces: group(request, FieldGroup::Interfaces),
        auth: group(request, FieldGroup::Auth),
        custom: group(request, FieldGroup::Custom),
    }
}

fn parse_line(line: &str, session: &mut Session) {
    if let Some(rest) = line.strip_prefix(BASICS_PREFIX) {
        if let Some(basics) = session.basics.as_mut() {
            parse_basics(rest, basics);
        }
    } else if let Some(rest) = line.strip_prefix(STATS_PREFIX) {
        if let Some(stats) = session.stats.as_mut() {
            parse_stats(rest, stats);
        }
    } else if line.starts_with(TX_SPEED_MARKER) {
        if let Some(rate) = session.rate.as_mut() {
            rate.tx_bps = speed_after(line, TX_SPEED_MARKER);
            rate.rx_bps = speed_after(line, RX_SPEED_MARKER);
        }
    } else if let Some(rest) = line.strip_prefix(NPU_INFO_PREFIX) {
        if let Some(npu) = session.npu.as_mut() {
            parse_npu_info(rest, npu);
        }
    } else if let Some(rest) = line.strip_prefix(NO_OFFLOAD_PREFIX) {
        if let Some(npu_error) = session.npu_error.as_mut() {
            npu_error.no_offload_reason = rest.trim().to_string();
        }
    } else if let Some(rest) = line.strip_prefix(OFFLOAD_FAIL_PREFIX) {
        if let Some(npu_error) = session.npu_error.as_mut() {
            parse_offload_failure(rest, npu_error);
        }
    } else if line.starts_with("hook=") {
        if let Some(hooks) = session.hooks.as_mut() {
            hooks.push(parse_hook(line));
        }
    } else if let Some(rest) = line.strip_prefix("state=") {
        if let Some(states) = session.states.as_mut() {
            states.extend(rest.split_whitespace().map(str::to_string));
        }
    } else {
        for (key, value) in pairs(line) {
            apply_pair(key, value, session);
        }
    }
}

/// Generic `key=value` assignments that may appear on any line
fn apply_pair(key: &str, value: &str, session: &mut Session) {
    match key {
        "serial" => session.serial = u64::from_str_radix(value, 16).unwrap_or(0),
        "policy_id" => {
            if let Some(policy) = session.policy.as_mut() {
                policy.id = number(key, value);
            }
        }
        "vd" => {
            if let Some(policy) = session.policy.as_mut() {
                policy.vdom = number(key, value);
            }
        }
        "ha_id" | "helper" | "shaping_policy_id" | "tunnel" => {
            if let Some(other) = session.other.as_mut() {
                match key {
                    "ha_id" => other.ha_id = number(key, value),
                    "helper" => other.helper = value.to_string(),
                    "shaping_policy_id" => other.shaping_policy_id = number(key, value),
                    _ => {
                        if let Some((out, inbound)) = value.split_once('/') {
                            other.tunnel_out = out.to_string();
                            other.tunnel_in = inbound.to_string();
                        }
                    }
                }
            }
        }
        "origin-shaper" | "reply-shaper" | "per_ip_shaper" => {
            if let Some(shaping) = session.shaping.as_mut() {
                let slot = match key {
                    "origin-shaper" => &mut shaping.shaper_org,
                    "reply-shaper" => &mut shaping.shaper_rev,
                    _ => &mut shaping.shaper_ip,
                };
                *slot = value.to_string();
            }
        }
        "src_mac" | "dst_mac" => {
            if let Some(macs) = session.macs.as_mut() {
                if key == "src_mac" {
                    macs.src = value.to_string();
                } else {
                    macs.dst = value.to_string();
                }
            }
        }
        "dev" => {
            if let Some(interfaces) = session.interfaces.as_mut() {
                parse_devices(value, interfaces);
            }
        }
        "gwy" => {
            if let Some(interfaces) = session.interfaces.as_mut() {
                let mut hops = value.split('/');
                interfaces.next_hop_org = hops.next().and_then(|ip| ip.parse::<IpAddr>().ok());
                interfaces.next_hop_rev = hops.next().and_then(|ip| ip.parse::<IpAddr>().ok());
            }
        }
        "user" | "auth_server" | "auth_info" => {
            if let Some(auth) = session.auth.as_mut() {
                match key {
                    "user" => auth.user = value.to_string(),
                    "auth_server" => auth.server = value.to_string(),
                    _ => auth.info = number(key, value),
                }
            }
        }
        "in_npu" | "out_npu" => {
            if let Some(npu) = session.npu.as_mut() {
                let nums = slash_numbers(value);
                let org = npu_id(nums.first().copied());
                let fwd = npu_id(nums.get(1).copied());
                if key == "in_npu" {
                    npu.in_npu_org = org;
                    npu.in_npu_fwd = fwd;
                } else {
                    npu.out_npu_org = org;
                    npu.out_npu_fwd = fwd;
                }
            }
        }
        _ => {}
    }
}

fn parse_basics(rest: &str, basics: &mut Basics) {
    for (key, value) in pairs(rest) {
        match key {
            "proto" => basics.protocol = number(key, value),
            "proto_state" => {
                let mut digits = value.chars().filter_map(|c| c.to_digit(16));
                basics.state_l = digits.next().unwrap_or(0) as u8;
                basics.state_r = digits.next().unwrap_or(0) as u8;
            }
            "duration" => basics.duration = number(key, value),
            "expire" => basics.expire = number(key, value),
            "timeout" => basics.timeout = number(key, value),
            _ => {}
        }
    }
}

fn parse_stats(rest: &str, stats: &mut Stats) {
    for (key, value) in pairs(rest) {
        let nums = slash_numbers(value);
        if nums.len() != 3 {
            continue;
        }
        match key {
            "org" => {
                stats.bytes_org = nums[0];
                stats.packets_org = nums[1];
                stats.errors_org = nums[2];
                stats.valid_org = true;
            }
            "reply" => {
                stats.bytes_rev = nums[0];
                stats.packets_rev = nums[1];
                stats.errors_rev = nums[2];
                stats.valid_rev = true;
            }
            _ => {}
        }
    }
}

fn parse_npu_info(rest: &str, npu: &mut Npu) {
    for (key, value) in pairs(rest) {
        let nums = slash_numbers(value);
        let org = nums.first().copied().unwrap_or(0) as u8;
        let rev = nums.get(1).copied().unwrap_or(0) as u8;
        match key {
            "offload" => (npu.offload_org, npu.offload_rev) = (org, rev),
            "ips_offload" => (npu.nturbo_org, npu.nturbo_rev) = (org, rev),
            "flag" => (npu.flag_org, npu.flag_rev) = (org, rev),
            _ => {}
        }
    }
}

fn parse_offload_failure(rest: &str, npu_error: &mut NpuError) {
    let parts: Vec<&str> = rest.trim().split(", ").collect();
    if parts.len() != 2 {
        return;
    }
    if let Some((org, rev)) = parts[0].split_once('/') {
        npu_error.kernel_org = org.to_string();
        npu_error.kernel_rev = rev.to_string();
    }
    if let Some((org, rev)) = parts[1].split_once('/') {
        npu_error.driver_org = org.to_string();
        npu_error.driver_rev = rev.to_string();
    }
}

/// `dev=35->22/22->35`: in->out for the original and the reply direction
fn parse_devices(value: &str, interfaces: &mut Interfaces) {
    for (i, direction) in value.split('/').take(2).enumerate() {
        let mut ids = direction.split("->").map(|id| number::<u32>("dev", id));
        let inbound = ids.next().unwrap_or(0);
        let outbound = ids.next().unwrap_or(0);
        if i == 0 {
            interfaces.in_org = inbound;
            interfaces.out_org = outbound;
        } else {
            interfaces.in_rev = inbound;
            interfaces.out_rev = outbound;
        }
    }
}

/// `hook=post dir=org act=snat 10.0.0.1:6050->10.0.0.2:443(10.1.1.1:6050)`
fn parse_hook(line: &str) -> Hook {
    let mut hook = Hook::default();

    for token in line.split_whitespace() {
        match token.split_once('=') {
            Some(("hook", value)) => hook.hook = value.to_string(),
            Some(("dir", value)) => hook.dir = value.to_string(),
            Some(("act", value)) => hook.act = value.to_string(),
            _ if token.contains("->") => {
                if parse_flow(token, &mut hook).is_none() {
                    trace!("Cannot parse hook flow \"{}\"", token);
                }
            }
            _ => {}
        }
    }

    hook
}

fn parse_flow(token: &str, hook: &mut Hook) -> Option<()> {
    let (src, rest) = token.split_once("->")?;
    let (dst, nat) = match rest.split_once('(') {
        Some((dst, nat)) => (dst, nat.trim_end_matches(')')),
        None => (rest, ""),
    };

    hook.src = endpoint(src)?;
    hook.dst = endpoint(dst)?;
    if !nat.is_empty() {
        hook.nat = endpoint(nat)?;
    }
    Some(())
}

fn endpoint(text: &str) -> Option<Endpoint> {
    let (ip, port) = text.rsplit_once(':')?;
    Some(Endpoint {
        ip: ip.parse().ok(),
        port: port.parse().ok()?,
    })
}

/// Extracts the bytes-per-second figure following `marker`, e.g. `4/0`
fn speed_after(line: &str, marker: &str) -> u64 {
    line.find(marker)
        .and_then(|pos| line[pos + marker.len()..].split_whitespace().next())
        .and_then(|value| value.split('/').next())
        .map(|bps| number("speed", bps))
        .unwrap_or(0)
}

/// Splits `a=1 b=2, c=3` into key/value pairs; tokens without `=` are skipped
fn pairs(line: &str) -> impl Iterator<Item = (&str, &str)> {
    line.split_whitespace()
        .filter_map(|token| token.trim_end_matches(',').split_once('='))
}

/// Parses `1/2/3` style values; `0x` prefixed parts are hexadecimal
fn slash_numbers(value: &str) -> Vec<u64> {
    value
        .split('/')
        .map(|part| {
            let part = part.trim();
            match part.strip_prefix("0x") {
                Some(hex) => u64::from_str_radix(hex, 16).unwrap_or(0),
                None => {
                    let digits: String = part.chars().filter(char::is_ascii_digit).collect();
                    number("slash", &digits)
                }
            }
        })
        .collect()
}

/// NPU ids are stored one-based, zero meaning "not set"
fn npu_id(raw: Option<u64>) -> Option<u8> {
    match raw {
        Some(id) if id > 0 => Some((id - 1) as u8),
        _ => None,
    }
}

fn number<T: FromStr + Default>(key: &str, value: &str) -> T {
    value.parse().unwrap_or_else(|_| {
        trace!("Cannot parse \"{}\" value \"{}\"", key, value);
        T::default()
    })
}
