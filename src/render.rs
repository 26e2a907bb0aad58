//! Output templates
//!
//! A template is plain text with `${name}` or `${name:spec}` placeholders.
//! The spec is `[-][#][0][width][x|d|s]`: left align, `0x` prefix, zero
//! padding, minimal width and the form (hexadecimal, decimal or text).
//! Empty text values render as `-`.

use crate::filter::field::Counter;
use crate::parser::{CustomValue, Session};
use crate::request::{FieldGroup, FieldRequest};
use regex::Regex;
use std::net::IpAddr;
use std::sync::LazyLock;
use thiserror::Error;

pub const DEFAULT_FORMAT: &str = "${default_basic} ${default_hw}, ${default_rate}, ${default_counts}";

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^:}]+)(?::([^}]*))?\}").expect("valid placeholder regex"));
static SPEC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(-)?(#)?(0)?(\d+)?([xds])?$").expect("valid spec regex"));

const MACROS: [(&str, &str); 7] = [
    (
        "${default_basics}",
        "${serial:08x}: ${vdom:3d}/${policy:-5s} ${proto:-4s} ${state[l]:11s}/${state[r]:-11s} ${sap:-21s} -> ${dap:-21s}",
    ),
    (
        "${default_basic}",
        "${serial:08x}: ${vdom:3d}/${policy:-5s} ${proto:-4s} ${state[l]:11s}/${state[r]:-11s} ${sap:-21s} -> ${dap:-21s}",
    ),
    (
        "${default_hw}",
        "OFF(${offload[o]}/${offload[r]}), NTB(${nturbo[o]}/${nturbo[r]}) FLG(${npuflag[o]:#02x}/${npuflag[r]:#02x})",
    ),
    ("${default_rate}", "RATE(up:${rate[u]:15s}, down:${rate[d]:15s})"),
    ("${default_counts}", "COUNTS(org:${count[o]:15s}, rev:${count[r]:15s})"),
    ("${default_macs}", "${mac[i]:17s} -> ${mac[o]:17s}"),
    ("${default_nooff}", "${nooff[ko]}/${nooff[kr]},${nooff[do]}/${nooff[dr]}"),
];

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Unknown template field: '{0}'")]
    UnknownField(String),

    #[error("Invalid format spec '{spec}' for field '{field}'")]
    InvalidSpec { field: String, spec: String },

    #[error("Unclosed placeholder in template: '{0}'")]
    Unclosed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Form {
    Default,
    Hex,
    Decimal,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Spec {
    left: bool,
    alternate: bool,
    zero: bool,
    width: usize,
    form: Form,
}

impl Spec {
    fn parse(field: &str, spec: &str) -> Result<Self, TemplateError> {
        let invalid = || TemplateError::InvalidSpec {
            field: field.to_string(),
            spec: spec.to_string(),
        };
        let caps = SPEC_RE.captures(spec).ok_or_else(invalid)?;

        let width = match caps.get(4) {
            Some(w) => w.as_str().parse().map_err(|_| invalid())?,
            None => 0,
        };
        let form = match caps.get(5).map(|m| m.as_str()) {
            Some("x") => Form::Hex,
            Some("d") => Form::Decimal,
            Some("s") => Form::Text,
            _ => Form::Default,
        };

        Ok(Spec {
            left: caps.get(1).is_some(),
            alternate: caps.get(2).is_some(),
            zero: caps.get(3).is_some(),
            width,
            form,
        })
    }
}

/// What a placeholder renders
#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    Serial,
    Proto,
    StateLeft,
    StateRight,
    Duration,
    Expire,
    Timeout,
    SourceAddress,
    DestinationAddress,
    TranslatedAddress,
    SourcePort,
    DestinationPort,
    TranslatedPort,
    SourceEndpoint,
    DestinationEndpoint,
    TranslatedEndpoint,
    RateUp,
    RateDown,
    RateSum,
    NpuFlagOrg,
    NpuFlagRev,
    OffloadOrg,
    OffloadRev,
    NturboOrg,
    NturboRev,
    InNpuOrg,
    InNpuFwd,
    OutNpuOrg,
    OutNpuFwd,
    NoOffloadReason,
    KernelFailOrg,
    KernelFailRev,
    DriverFailOrg,
    DriverFailRev,
    Count(Counter),
    CountsOrg,
    CountsRev,
    Policy,
    Vdom,
    Helper,
    HaId,
    ShapingPolicy,
    TunnelIn,
    TunnelOut,
    States,
    ShaperOrg,
    ShaperRev,
    ShaperPerIp,
    MacSource,
    MacDestination,
    IfaceInOrg,
    IfaceOutOrg,
    IfaceInRev,
    IfaceOutRev,
    NextHopOrg,
    NextHopRev,
    User,
    AuthServer,
    AuthInfo,
    Custom(String),
    Plain,
    Newline,
}

impl Slot {
    fn lookup(name: &str) -> Option<Slot> {
        if let Some(key) = name
            .strip_prefix("custom[")
            .and_then(|rest| rest.strip_suffix(']'))
        {
            return Some(Slot::Custom(key.to_string()));
        }

        let slot = match name {
            "serial" => Slot::Serial,
            "proto" | "protocol" => Slot::Proto,
            "state[l]" => Slot::StateLeft,
            "state[r]" => Slot::StateRight,
            "duration" => Slot::Duration,
            "expire" => Slot::Expire,
            "timeout" => Slot::Timeout,
            "sa" => Slot::SourceAddress,
            "da" => Slot::DestinationAddress,
            "na" => Slot::TranslatedAddress,
            "sp" => Slot::SourcePort,
            "dp" => Slot::DestinationPort,
            "np" => Slot::TranslatedPort,
            "sap" => Slot::SourceEndpoint,
            "dap" => Slot::DestinationEndpoint,
            "nap" => Slot::TranslatedEndpoint,
            "rate[u]" => Slot::RateUp,
            "rate[d]" => Slot::RateDown,
            "rate[sum]" => Slot::RateSum,
            "npuflag[o]" => Slot::NpuFlagOrg,
            "npuflag[r]" => Slot::NpuFlagRev,
            "offload[o]" => Slot::OffloadOrg,
            "offload[r]" => Slot::OffloadRev,
            "nturbo[o]" => Slot::NturboOrg,
            "nturbo[r]" => Slot::NturboRev,
            "innpu[o]" => Slot::InNpuOrg,
            "innpu[f]" => Slot::InNpuFwd,
            "outnpu[o]" => Slot::OutNpuOrg,
            "outnpu[f]" => Slot::OutNpuFwd,
            "nooff[no]" => Slot::NoOffloadReason,
            "nooff[ko]" => Slot::KernelFailOrg,
            "nooff[kr]" => Slot::KernelFailRev,
            "nooff[do]" => Slot::DriverFailOrg,
            "nooff[dr]" => Slot::DriverFailRev,
            "count[ob]" => Slot::Count(Counter::BytesOrg),
            "count[op]" => Slot::Count(Counter::PacketsOrg),
            "count[oe]" => Slot::Count(Counter::ErrorsOrg),
            "count[rb]" => Slot::Count(Counter::BytesRev),
            "count[rp]" => Slot::Count(Counter::PacketsRev),
            "count[re]" => Slot::Count(Counter::ErrorsRev),
            "count[o]" => Slot::CountsOrg,
            "count[r]" => Slot::CountsRev,
            "policy" => Slot::Policy,
            "vdom" => Slot::Vdom,
            "helper" => Slot::Helper,
            "haid" => Slot::HaId,
            "shapingpolicy" => Slot::ShapingPolicy,
            "tunnel[i]" => Slot::TunnelIn,
            "tunnel[o]" => Slot::TunnelOut,
            "state" => Slot::States,
            "shaper[o]" => Slot::ShaperOrg,
            "shaper[r]" => Slot::ShaperRev,
            "shaper[ip]" => Slot::ShaperPerIp,
            "mac[i]" | "mac[src]" => Slot::MacSource,
            "mac[o]" | "mac[dst]" => Slot::MacDestination,
            "iface[oi]" | "iface[io]" => Slot::IfaceInOrg,
            "iface[oo]" => Slot::IfaceOutOrg,
            "iface[ri]" | "iface[ir]" => Slot::IfaceInRev,
            "iface[ro]" | "iface[or]" => Slot::IfaceOutRev,
            "nexthop[o]" | "nh[o]" => Slot::NextHopOrg,
            "nexthop[r]" | "nh[r]" => Slot::NextHopRev,
            "user" => Slot::User,
            "authserver" => Slot::AuthServer,
            "authinfo" => Slot::AuthInfo,
            "plain" => Slot::Plain,
            "newline" => Slot::Newline,
            _ => return None,
        };
        Some(slot)
    }

    fn group(&self) -> Option<FieldGroup> {
        use Slot::*;
        let group = match self {
            Serial | Newline => return None,
            Proto | StateLeft | StateRight | Duration | Expire | Timeout => FieldGroup::Basics,
            SourceAddress | DestinationAddress | TranslatedAddress | SourcePort
            | DestinationPort | TranslatedPort | SourceEndpoint | DestinationEndpoint
            | TranslatedEndpoint => FieldGroup::Peers,
            RateUp | RateDown | RateSum => FieldGroup::Rate,
            NpuFlagOrg | NpuFlagRev | OffloadOrg | OffloadRev | NturboOrg | NturboRev
            | InNpuOrg | InNpuFwd | OutNpuOrg | OutNpuFwd => FieldGroup::Npu,
            NoOffloadReason | KernelFailOrg | KernelFailRev | DriverFailOrg | DriverFailRev => {
                FieldGroup::NpuError
            }
            Count(_) | CountsOrg | CountsRev => FieldGroup::Stats,
            Policy | Vdom => FieldGroup::Policy,
            Helper | HaId | ShapingPolicy | TunnelIn | TunnelOut => FieldGroup::Other,
            States => FieldGroup::States,
            ShaperOrg | ShaperRev | ShaperPerIp => FieldGroup::Shaping,
            MacSource | MacDestination => FieldGroup::Macs,
            IfaceInOrg | IfaceOutOrg | IfaceInRev | IfaceOutRev | NextHopOrg | NextHopRev => {
                FieldGroup::Interfaces
            }
            User | AuthServer | AuthInfo => FieldGroup::Auth,
            Custom(_) => FieldGroup::Custom,
            Plain => FieldGroup::Plain,
        };
        Some(group)
    }

    fn default_form(&self) -> Form {
        match self {
            Slot::Serial | Slot::NpuFlagOrg | Slot::NpuFlagRev => Form::Hex,
            _ => Form::Decimal,
        }
    }

    fn value(&self, session: &Session, form: Form) -> Value {
        use Slot::*;

        let basics = session.basics.unwrap_or_default();
        let peers = session.peers().unwrap_or_default();
        let rate = session.rate.unwrap_or_default();
        let npu = session.npu.unwrap_or_default();
        let stats = session.stats.unwrap_or_default();
        let policy = session.policy.unwrap_or_default();
        let interfaces = session.interfaces.unwrap_or_default();
        let text_form = form == Form::Text;

        match self {
            Serial => Value::Number(session.serial),
            Proto if text_form => Value::Text(protocol_name(basics.protocol)),
            Proto => Value::Number(basics.protocol.into()),
            StateLeft if text_form => Value::Text(state_name(basics.protocol, basics.state_l)),
            StateLeft => Value::Number(basics.state_l.into()),
            StateRight if text_form => Value::Text(state_name(basics.protocol, basics.state_r)),
            StateRight => Value::Number(basics.state_r.into()),
            Duration => Value::Number(basics.duration),
            Expire => Value::Number(basics.expire),
            Timeout => Value::Number(basics.timeout),
            SourceAddress => address(peers.src.ip),
            DestinationAddress => address(peers.dst.ip),
            TranslatedAddress => address(peers.nat.ip),
            SourcePort => Value::Number(peers.src.port.into()),
            DestinationPort => Value::Number(peers.dst.port.into()),
            TranslatedPort => Value::Number(peers.nat.port.into()),
            SourceEndpoint => endpoint(peers.src.ip, peers.src.port),
            DestinationEndpoint => endpoint(peers.dst.ip, peers.dst.port),
            TranslatedEndpoint => endpoint(peers.nat.ip, peers.nat.port),
            RateUp => speed(rate.tx_bps, text_form),
            RateDown => speed(rate.rx_bps, text_form),
            RateSum => speed(rate.tx_bps.saturating_add(rate.rx_bps), text_form),
            NpuFlagOrg => Value::Number(npu.flag_org.into()),
            NpuFlagRev => Value::Number(npu.flag_rev.into()),
            OffloadOrg => Value::Number(npu.offload_org.into()),
            OffloadRev => Value::Number(npu.offload_rev.into()),
            NturboOrg => Value::Number(npu.nturbo_org.into()),
            NturboRev => Value::Number(npu.nturbo_rev.into()),
            InNpuOrg => npu_id(npu.in_npu_org),
            InNpuFwd => npu_id(npu.in_npu_fwd),
            OutNpuOrg => npu_id(npu.out_npu_org),
            OutNpuFwd => npu_id(npu.out_npu_fwd),
            NoOffloadReason => text(session.npu_error.as_ref().map(|e| &e.no_offload_reason)),
            KernelFailOrg => text(session.npu_error.as_ref().map(|e| &e.kernel_org)),
            KernelFailRev => text(session.npu_error.as_ref().map(|e| &e.kernel_rev)),
            DriverFailOrg => text(session.npu_error.as_ref().map(|e| &e.driver_org)),
            DriverFailRev => text(session.npu_error.as_ref().map(|e| &e.driver_rev)),
            Count(counter) => {
                let (valid, value) = match counter {
                    Counter::BytesOrg => (stats.valid_org, stats.bytes_org),
                    Counter::PacketsOrg => (stats.valid_org, stats.packets_org),
                    Counter::ErrorsOrg => (stats.valid_org, stats.errors_org),
                    Counter::BytesRev => (stats.valid_rev, stats.bytes_rev),
                    Counter::PacketsRev => (stats.valid_rev, stats.packets_rev),
                    Counter::ErrorsRev => (stats.valid_rev, stats.errors_rev),
                };
                if valid {
                    Value::Number(value)
                } else {
                    Value::Text("?".to_string())
                }
            }
            CountsOrg => counters(
                stats.valid_org,
                [stats.bytes_org, stats.packets_org, stats.errors_org],
            ),
            CountsRev => counters(
                stats.valid_rev,
                [stats.bytes_rev, stats.packets_rev, stats.errors_rev],
            ),
            Policy if text_form && u64::from(policy.id) == crate::filter::compare::INTERNAL_POLICY => {
                Value::Text("i".to_string())
            }
            Policy => Value::Number(policy.id.into()),
            Vdom => Value::Number(policy.vdom.into()),
            Helper => text(session.other.as_ref().map(|o| &o.helper)),
            HaId => Value::Number(session.other.as_ref().map_or(0, |o| o.ha_id.into())),
            ShapingPolicy => {
                let id = session.other.as_ref().map_or(0, |o| o.shaping_policy_id);
                if text_form && id == 0 {
                    Value::Text(String::new())
                } else {
                    Value::Number(id.into())
                }
            }
            TunnelIn => text(session.other.as_ref().map(|o| &o.tunnel_in)),
            TunnelOut => text(session.other.as_ref().map(|o| &o.tunnel_out)),
            States => Value::Text(
                session
                    .states
                    .as_ref()
                    .map(|states| states.join(","))
                    .unwrap_or_default(),
            ),
            ShaperOrg => text(session.shaping.as_ref().map(|s| &s.shaper_org)),
            ShaperRev => text(session.shaping.as_ref().map(|s| &s.shaper_rev)),
            ShaperPerIp => text(session.shaping.as_ref().map(|s| &s.shaper_ip)),
            MacSource => text(session.macs.as_ref().map(|m| &m.src)),
            MacDestination => text(session.macs.as_ref().map(|m| &m.dst)),
            IfaceInOrg => Value::Number(interfaces.in_org.into()),
            IfaceOutOrg => Value::Number(interfaces.out_org.into()),
            IfaceInRev => Value::Number(interfaces.in_rev.into()),
            IfaceOutRev => Value::Number(interfaces.out_rev.into()),
            NextHopOrg => address(interfaces.next_hop_org),
            NextHopRev => address(interfaces.next_hop_rev),
            User => text(session.auth.as_ref().map(|a| &a.user)),
            AuthServer => text(session.auth.as_ref().map(|a| &a.server)),
            AuthInfo => Value::Number(session.auth.as_ref().map_or(0, |a| a.info)),
            Custom(key) => match session.custom_value(key) {
                Some(CustomValue::Unsigned(n)) => Value::Number(*n),
                Some(value) => Value::Text(value.to_string()),
                None => Value::Text(String::new()),
            },
            Plain => Value::Text(
                session
                    .plain
                    .as_deref()
                    .map(|p| p.trim_matches('\n').to_string())
                    .unwrap_or_default(),
            ),
            Newline => Value::Raw("\n"),
        }
    }
}

enum Value {
    Number(u64),
    Text(String),
    /// Emitted verbatim, even when empty
    Raw(&'static str),
}

fn text(value: Option<&String>) -> Value {
    Value::Text(value.cloned().unwrap_or_default())
}

fn address(ip: Option<IpAddr>) -> Value {
    Value::Text(ip.map(|ip| ip.to_string()).unwrap_or_default())
}

fn endpoint(ip: Option<IpAddr>, port: u16) -> Value {
    match ip {
        Some(ip) => Value::Text(format!("{}:{}", ip, port)),
        None => Value::Text(String::new()),
    }
}

fn npu_id(id: Option<u8>) -> Value {
    match id {
        Some(id) => Value::Number(id.into()),
        None => Value::Text(String::new()),
    }
}

fn counters(valid: bool, values: [u64; 3]) -> Value {
    if !valid {
        return Value::Text("?/?/?".to_string());
    }
    Value::Text(format!("{}/{}/{}", values[0], values[1], values[2]))
}

fn speed(bytes_per_sec: u64, human: bool) -> Value {
    if human {
        Value::Text(human_rate(bytes_per_sec))
    } else {
        Value::Number(bytes_per_sec)
    }
}

/// Bit rate with an automatically chosen decimal unit
pub fn human_rate(bytes_per_sec: u64) -> String {
    let bits = bytes_per_sec as f64 * 8.0;
    let (divide, unit) = [
        (1e12, "Tbps"),
        (1e9, "Gbps"),
        (1e6, "Mbps"),
        (1e3, "Kbps"),
    ]
    .into_iter()
    .find(|(limit, _)| bits > *limit)
    .unwrap_or((1.0, "bps"));

    format!("{:.3} {}", bits / divide, unit)
}

pub fn protocol_name(protocol: u16) -> String {
    match protocol {
        1 => "ICMP".to_string(),
        6 => "TCP".to_string(),
        17 => "UDP".to_string(),
        41 => "IPv6".to_string(),
        47 => "GRE".to_string(),
        50 => "ESP".to_string(),
        other => other.to_string(),
    }
}

/// Connection state names as the appliance numbers them
pub fn state_name(protocol: u16, state: u8) -> String {
    let name = match (protocol, state) {
        (6, 0) => "NONE",
        (6, 1) => "ESTABLISHED",
        (6, 2) => "SYN_SENT",
        (6, 3) => "SYN_RECV",
        (6, 4) => "FIN_WAIT",
        (6, 5) => "TIME_WAIT",
        (6, 6) => "CLOSE",
        (6, 7) => "CLOSE_WAIT",
        (6, 8) => "LAST_ACK",
        (6, 9) => "LISTEN",
        (6, _) => "UNKNOWN",
        (17, 0) => "SEEN",
        (17, 1) => "UNSEEN",
        (17, _) => "UNKNOWN",
        _ => return state.to_string(),
    };
    name.to_string()
}

#[derive(Debug, Clone)]
enum Part {
    Literal(String),
    Placeholder { slot: Slot, spec: Spec },
}

/// A compiled output template
#[derive(Debug, Clone)]
pub struct Template {
    source: String,
    parts: Vec<Part>,
}

impl Template {
    /// Compiles `format`, adding the session data it reads to `request`
    pub fn compile(format: &str, request: &mut FieldRequest) -> Result<Self, TemplateError> {
        let expanded = expand_macros(format);
        let mut parts = Vec::new();
        let mut needed = FieldRequest::new();
        let mut last = 0;

        for caps in PLACEHOLDER_RE.captures_iter(&expanded) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            push_literal(&mut parts, &expanded[last..whole.start()])?;
            last = whole.end();

            let name = name.as_str().trim();
            let slot =
                Slot::lookup(name).ok_or_else(|| TemplateError::UnknownField(name.to_string()))?;
            let spec = Spec::parse(name, caps.get(2).map_or("", |m| m.as_str()))?;
            if let Some(group) = slot.group() {
                needed.request(group);
            }
            parts.push(Part::Placeholder { slot, spec });
        }
        push_literal(&mut parts, &expanded[last..])?;

        request.merge(&needed);
        Ok(Template {
            source: format.to_string(),
            parts,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn format(&self, session: &Session) -> String {
        let mut out = String::new();
        self.format_into(session, &mut out);
        out
    }

    pub fn format_into(&self, session: &Session, out: &mut String) {
        for part in &self.parts {
            match part {
                Part::Literal(text) => out.push_str(text),
                Part::Placeholder { slot, spec } => {
                    let form = match spec.form {
                        Form::Default => slot.default_form(),
                        form => form,
                    };
                    render_value(slot.value(session, form), form, spec, out);
                }
            }
        }
    }
}

fn expand_macros(format: &str) -> String {
    MACROS
        .iter()
        .fold(format.to_string(), |text, (name, body)| text.replace(name, body))
}

fn push_literal(parts: &mut Vec<Part>, text: &str) -> Result<(), TemplateError> {
    if text.contains("${") {
        return Err(TemplateError::Unclosed(text.to_string()));
    }
    if !text.is_empty() {
        parts.push(Part::Literal(text.to_string()));
    }
    Ok(())
}

fn render_value(value: Value, form: Form, spec: &Spec, out: &mut String) {
    let (prefix, body, numeric) = match value {
        Value::Raw(raw) => {
            out.push_str(raw);
            return;
        }
        Value::Number(n) if form == Form::Hex => {
            (if spec.alternate { "0x" } else { "" }, format!("{:x}", n), true)
        }
        Value::Number(n) => ("", n.to_string(), true),
        Value::Text(t) if t.is_empty() => ("", "-".to_string(), false),
        Value::Text(t) => ("", t, false),
    };

    let len = prefix.len() + body.chars().count();
    let fill = spec.width.saturating_sub(len);

    if fill == 0 {
        out.push_str(prefix);
        out.push_str(&body);
    } else if spec.left {
        out.push_str(prefix);
        out.push_str(&body);
        out.extend(std::iter::repeat_n(' ', fill));
    } else if spec.zero && numeric {
        out.push_str(prefix);
        out.extend(std::iter::repeat_n('0', fill));
        out.push_str(&body);
    } else {
        out.extend(std::iter::repeat_n(' ', fill));
        out.push_str(prefix);
        out.push_str(&body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{Basics, Endpoint, Hook, Stats};

    fn session() -> Session {
        Session {
            serial: 0xd7c5,
            hooks: Some(vec![Hook {
                dir: "org".to_string(),
                src: Endpoint {
                    ip: Some("10.0.0.1".parse().unwrap()),
                    port: 60504,
                },
                dst: Endpoint {
                    ip: Some("10.0.0.2".parse().unwrap()),
                    port: 443,
                },
                ..Hook::default()
            }]),
            basics: Some(Basics {
                protocol: 6,
                state_l: 1,
                ..Basics::default()
            }),
            stats: Some(Stats {
                bytes_org: 5104,
                packets_org: 61,
                errors_org: 1,
                valid_org: true,
                ..Stats::default()
            }),
            ..Session::default()
        }
    }

    fn render(format: &str) -> String {
        let mut request = FieldRequest::new();
        Template::compile(format, &mut request).unwrap().format(&session())
    }

    #[test]
    fn test_specs() {
        assert_eq!(render("${serial}"), "d7c5");
        assert_eq!(render("${serial:08x}"), "0000d7c5");
        assert_eq!(render("${serial:d}"), "55237");
        assert_eq!(render("[${dp:-5}]"), "[443  ]");
        assert_eq!(render("[${dp:5}]"), "[  443]");
        assert_eq!(render("${proto:#04x}"), "0x06");
        assert_eq!(render("${proto:s}/${state[l]:s}"), "TCP/ESTABLISHED");
    }

    #[test]
    fn test_composite_fields() {
        assert_eq!(render("${sap} -> ${dap}"), "10.0.0.1:60504 -> 10.0.0.2:443");
        assert_eq!(render("${count[o]} ${count[r]}"), "5104/61/1 ?/?/?");
        assert_eq!(render("${count[rb]}"), "?");
        assert_eq!(render("${nap}|${helper}"), "-|-");
        assert_eq!(render("a${newline}b"), "a\nb");
    }

    #[test]
    fn test_human_rate() {
        assert_eq!(human_rate(0), "0.000 bps");
        assert_eq!(human_rate(1_250_000), "10.000 Mbps");
        assert_eq!(human_rate(200), "1.600 Kbps");
    }

    #[test]
    fn test_requests_groups() {
        let mut request = FieldRequest::new();
        Template::compile(DEFAULT_FORMAT, &mut request).unwrap();
        for group in [
            FieldGroup::Basics,
            FieldGroup::Peers,
            FieldGroup::Policy,
            FieldGroup::Npu,
            FieldGroup::Rate,
            FieldGroup::Stats,
        ] {
            assert!(request.contains(group), "missing {}", group.name());
        }
        assert!(!request.contains(FieldGroup::Plain));
    }

    #[test]
    fn test_errors() {
        let mut request = FieldRequest::new();
        assert!(matches!(
            Template::compile("${nope}", &mut request),
            Err(TemplateError::UnknownField(_))
        ));
        assert!(matches!(
            Template::compile("${serial:q}", &mut request),
            Err(TemplateError::InvalidSpec { .. })
        ));
        assert!(matches!(
            Template::compile("${serial", &mut request),
            Err(TemplateError::Unclosed(_))
        ));
        assert!(request.is_empty());
    }
}
