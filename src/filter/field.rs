//! Field selectors available in filter conditions
//!
//! Selectors are grouped by the kind of value they read so that every
//! comparison is checked for its value type when the filter is compiled.
//! Selectors covering several roles (`host`, `port`, `npuflag`, ...) call the
//! comparison once per role and combine the results.

use super::compare::NumberDialect;
use super::error::FilterParseError;
use crate::parser::Session;
use crate::request::FieldGroup;
use std::net::IpAddr;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Address(AddressField),
    Number(NumberField),
    Text(TextField),
    Rate(RateField),
    /// `custom <name>`, the type is only known per session
    Custom,
}

impl FromStr for Field {
    type Err = FilterParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use AddressField as A;
        use NumberField as N;
        use RateField as R;
        use TextField as T;

        let field = match s.to_lowercase().as_str() {
            "host" => Field::Address(A::Host),
            "shost" => Field::Address(A::SourceHost),
            "dhost" => Field::Address(A::DestinationHost),
            "nhost" => Field::Address(A::TranslatedHost),
            "nexthop" | "nh" => Field::Address(A::NextHop),
            "nexthop[o]" | "nh[o]" => Field::Address(A::NextHopOrg),
            "nexthop[r]" | "nh[r]" => Field::Address(A::NextHopRev),

            "port" => Field::Number(N::Port),
            "sport" => Field::Number(N::SourcePort),
            "dport" => Field::Number(N::DestinationPort),
            "nport" => Field::Number(N::TranslatedPort),
            "policy" => Field::Number(N::Policy),
            "vdom" => Field::Number(N::Vdom),
            "status" => Field::Number(N::Status),
            "status[l]" => Field::Number(N::StatusLeft),
            "status[r]" => Field::Number(N::StatusRight),
            "proto" | "protocol" => Field::Number(N::Protocol),
            "serial" | "session" => Field::Number(N::Serial),
            "npuflag" => Field::Number(N::NpuFlag),
            "npuflag[o]" => Field::Number(N::NpuFlagOrg),
            "npuflag[r]" => Field::Number(N::NpuFlagRev),
            "offload" | "offloaded" => Field::Number(N::Offload),
            "offload[o]" | "offloaded[o]" => Field::Number(N::OffloadOrg),
            "offload[r]" | "offloaded[r]" => Field::Number(N::OffloadRev),
            "nturbo" => Field::Number(N::Nturbo),
            "nturbo[o]" => Field::Number(N::NturboOrg),
            "nturbo[r]" => Field::Number(N::NturboRev),
            "innpu[o]" => Field::Number(N::InNpuOrg),
            "innpu[f]" => Field::Number(N::InNpuFwd),
            "outnpu[o]" => Field::Number(N::OutNpuOrg),
            "outnpu[f]" => Field::Number(N::OutNpuFwd),
            "count[ob]" | "stats[ob]" => Field::Number(N::Count(Counter::BytesOrg)),
            "count[op]" | "stats[op]" => Field::Number(N::Count(Counter::PacketsOrg)),
            "count[oe]" | "stats[oe]" => Field::Number(N::Count(Counter::ErrorsOrg)),
            "count[rb]" | "stats[rb]" => Field::Number(N::Count(Counter::BytesRev)),
            "count[rp]" | "stats[rp]" => Field::Number(N::Count(Counter::PacketsRev)),
            "count[re]" | "stats[re]" => Field::Number(N::Count(Counter::ErrorsRev)),
            "shapingpolicy" => Field::Number(N::ShapingPolicy),
            "iface" => Field::Number(N::Iface),
            "iface[oi]" | "iface[io]" => Field::Number(N::IfaceInOrg),
            "iface[oo]" => Field::Number(N::IfaceOutOrg),
            "iface[ri]" | "iface[ir]" => Field::Number(N::IfaceInRev),
            "iface[ro]" | "iface[or]" => Field::Number(N::IfaceOutRev),
            "authinfo" => Field::Number(N::AuthInfo),

            "helper" => Field::Text(T::Helper),
            "state" => Field::Text(T::State),
            "nooff[no]" => Field::Text(T::NoOffloadReason),
            "nooff[ko]" => Field::Text(T::KernelFailOrg),
            "nooff[kr]" => Field::Text(T::KernelFailRev),
            "nooff[do]" => Field::Text(T::DriverFailOrg),
            "nooff[dr]" => Field::Text(T::DriverFailRev),
            "tunnel" => Field::Text(T::Tunnel),
            "tunnel[i]" => Field::Text(T::TunnelIn),
            "tunnel[o]" => Field::Text(T::TunnelOut),
            "shaper" => Field::Text(T::Shaper),
            "shaper[o]" => Field::Text(T::ShaperOrg),
            "shaper[r]" => Field::Text(T::ShaperRev),
            "shaper[ip]" | "shaper[pip]" => Field::Text(T::ShaperPerIp),
            "mac" => Field::Text(T::Mac),
            "mac[i]" | "mac[src]" | "smac" => Field::Text(T::MacSource),
            "mac[o]" | "mac[dst]" | "dmac" => Field::Text(T::MacDestination),
            "user" => Field::Text(T::User),
            "authserver" => Field::Text(T::AuthServer),

            "rate" => Field::Rate(R::Either),
            "rate[u]" | "upload" => Field::Rate(R::Upload),
            "rate[d]" | "download" => Field::Rate(R::Download),
            "rate[sum]" => Field::Rate(R::Sum),

            "custom" => Field::Custom,
            _ => return Err(FilterParseError::UnknownField(s.to_string())),
        };
        Ok(field)
    }
}

impl Field {
    /// Session data the selector reads; `None` for data that is always parsed
    pub fn group(self) -> Option<FieldGroup> {
        match self {
            Field::Address(field) => Some(field.group()),
            Field::Number(field) => field.group(),
            Field::Text(field) => Some(field.group()),
            Field::Rate(_) => Some(FieldGroup::Rate),
            Field::Custom => Some(FieldGroup::Custom),
        }
    }
}

fn any<T, const N: usize>(values: [T; N], check: impl FnMut(T) -> bool) -> bool {
    values.into_iter().any(check)
}

fn all<T, const N: usize>(values: [T; N], check: impl FnMut(T) -> bool) -> bool {
    values.into_iter().all(check)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressField {
    /// Source, destination or translated address
    Host,
    SourceHost,
    DestinationHost,
    TranslatedHost,
    NextHop,
    NextHopOrg,
    NextHopRev,
}

impl AddressField {
    fn group(self) -> FieldGroup {
        match self {
            AddressField::NextHop | AddressField::NextHopOrg | AddressField::NextHopRev => {
                FieldGroup::Interfaces
            }
            _ => FieldGroup::Peers,
        }
    }

    /// Runs `check` on the addresses this selector covers.
    ///
    /// Returns `None` when the group holding them was not parsed.
    pub fn test(
        self,
        session: &Session,
        mut check: impl FnMut(Option<IpAddr>) -> bool,
    ) -> Option<bool> {
        let result = match self {
            AddressField::Host => {
                let peers = session.peers()?;
                any([peers.src.ip, peers.dst.ip, peers.nat.ip], check)
            }
            AddressField::SourceHost => check(session.peers()?.src.ip),
            AddressField::DestinationHost => check(session.peers()?.dst.ip),
            AddressField::TranslatedHost => check(session.peers()?.nat.ip),
            AddressField::NextHop => {
                let interfaces = session.interfaces.as_ref()?;
                any(
                    [interfaces.next_hop_org, interfaces.next_hop_rev],
                    check,
                )
            }
            AddressField::NextHopOrg => check(session.interfaces.as_ref()?.next_hop_org),
            AddressField::NextHopRev => check(session.interfaces.as_ref()?.next_hop_rev),
        };
        Some(result)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    BytesOrg,
    PacketsOrg,
    ErrorsOrg,
    BytesRev,
    PacketsRev,
    ErrorsRev,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberField {
    Port,
    SourcePort,
    DestinationPort,
    TranslatedPort,
    Policy,
    Vdom,
    /// Either side of the connection state
    Status,
    StatusLeft,
    StatusRight,
    Protocol,
    Serial,
    /// Both directions must match
    NpuFlag,
    NpuFlagOrg,
    NpuFlagRev,
    /// Both directions must match
    Offload,
    OffloadOrg,
    OffloadRev,
    /// Both directions must match
    Nturbo,
    NturboOrg,
    NturboRev,
    InNpuOrg,
    InNpuFwd,
    OutNpuOrg,
    OutNpuFwd,
    /// Never matches when the direction has no statistics
    Count(Counter),
    ShapingPolicy,
    Iface,
    IfaceInOrg,
    IfaceOutOrg,
    IfaceInRev,
    IfaceOutRev,
    AuthInfo,
}

impl NumberField {
    fn group(self) -> Option<FieldGroup> {
        use NumberField::*;
        let group = match self {
            Port | SourcePort | DestinationPort | TranslatedPort => FieldGroup::Peers,
            Policy | Vdom => FieldGroup::Policy,
            Status | StatusLeft | StatusRight | Protocol => FieldGroup::Basics,
            Serial => return None,
            NpuFlag | NpuFlagOrg | NpuFlagRev | Offload | OffloadOrg | OffloadRev | Nturbo
            | NturboOrg | NturboRev | InNpuOrg | InNpuFwd | OutNpuOrg | OutNpuFwd => {
                FieldGroup::Npu
            }
            Count(_) => FieldGroup::Stats,
            ShapingPolicy => FieldGroup::Other,
            Iface | IfaceInOrg | IfaceOutOrg | IfaceInRev | IfaceOutRev => FieldGroup::Interfaces,
            AuthInfo => FieldGroup::Auth,
        };
        Some(group)
    }

    pub fn dialect(self) -> NumberDialect {
        match self {
            NumberField::Status | NumberField::StatusLeft | NumberField::StatusRight => {
                NumberDialect::Status
            }
            NumberField::Protocol => NumberDialect::Protocol,
            NumberField::Policy => NumberDialect::Policy,
            _ => NumberDialect::Plain,
        }
    }

    /// Runs `check` on the values this selector covers.
    ///
    /// Returns `None` when the group holding them was not parsed.
    pub fn test(self, session: &Session, mut check: impl FnMut(u64) -> bool) -> Option<bool> {
        use NumberField::*;

        let npu = || session.npu.as_ref();
        let npu_id = |id: Option<u8>, check: &mut dyn FnMut(u64) -> bool| {
            id.is_some_and(|id| check(u64::from(id)))
        };

        let result = match self {
            Port => {
                let peers = session.peers()?;
                any(
                    [peers.src.port, peers.dst.port, peers.nat.port].map(u64::from),
                    check,
                )
            }
            SourcePort => check(session.peers()?.src.port.into()),
            DestinationPort => check(session.peers()?.dst.port.into()),
            TranslatedPort => check(session.peers()?.nat.port.into()),
            Policy => check(session.policy.as_ref()?.id.into()),
            Vdom => check(session.policy.as_ref()?.vdom.into()),
            Status => {
                let basics = session.basics.as_ref()?;
                any([basics.state_l, basics.state_r].map(u64::from), check)
            }
            StatusLeft => check(session.basics.as_ref()?.state_l.into()),
            StatusRight => check(session.basics.as_ref()?.state_r.into()),
            Protocol => check(session.basics.as_ref()?.protocol.into()),
            Serial => check(session.serial),
            NpuFlag => {
                let npu = npu()?;
                all([npu.flag_org, npu.flag_rev].map(u64::from), check)
            }
            NpuFlagOrg => check(npu()?.flag_org.into()),
            NpuFlagRev => check(npu()?.flag_rev.into()),
            Offload => {
                let npu = npu()?;
                all([npu.offload_org, npu.offload_rev].map(u64::from), check)
            }
            OffloadOrg => check(npu()?.offload_org.into()),
            OffloadRev => check(npu()?.offload_rev.into()),
            Nturbo => {
                let npu = npu()?;
                all([npu.nturbo_org, npu.nturbo_rev].map(u64::from), check)
            }
            NturboOrg => check(npu()?.nturbo_org.into()),
            NturboRev => check(npu()?.nturbo_rev.into()),
            InNpuOrg => npu_id(npu()?.in_npu_org, &mut check),
            InNpuFwd => npu_id(npu()?.in_npu_fwd, &mut check),
            OutNpuOrg => npu_id(npu()?.out_npu_org, &mut check),
            OutNpuFwd => npu_id(npu()?.out_npu_fwd, &mut check),
            Count(counter) => {
                let stats = session.stats.as_ref()?;
                let (valid, value) = match counter {
                    Counter::BytesOrg => (stats.valid_org, stats.bytes_org),
                    Counter::PacketsOrg => (stats.valid_org, stats.packets_org),
                    Counter::ErrorsOrg => (stats.valid_org, stats.errors_org),
                    Counter::BytesRev => (stats.valid_rev, stats.bytes_rev),
                    Counter::PacketsRev => (stats.valid_rev, stats.packets_rev),
                    Counter::ErrorsRev => (stats.valid_rev, stats.errors_rev),
                };
                valid && check(value)
            }
            ShapingPolicy => check(session.other.as_ref()?.shaping_policy_id.into()),
            Iface => {
                let interfaces = session.interfaces.as_ref()?;
                any(
                    [
                        interfaces.in_org,
                        interfaces.out_org,
                        interfaces.in_rev,
                        interfaces.out_rev,
                    ]
                    .map(u64::from),
                    check,
                )
            }
            IfaceInOrg => check(session.interfaces.as_ref()?.in_org.into()),
            IfaceOutOrg => check(session.interfaces.as_ref()?.out_org.into()),
            IfaceInRev => check(session.interfaces.as_ref()?.in_rev.into()),
            IfaceOutRev => check(session.interfaces.as_ref()?.out_rev.into()),
            AuthInfo => check(session.auth.as_ref()?.info),
        };
        Some(result)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextField {
    Helper,
    /// Any of the state flag words
    State,
    NoOffloadReason,
    KernelFailOrg,
    KernelFailRev,
    DriverFailOrg,
    DriverFailRev,
    Tunnel,
    TunnelIn,
    TunnelOut,
    Shaper,
    ShaperOrg,
    ShaperRev,
    ShaperPerIp,
    Mac,
    MacSource,
    MacDestination,
    User,
    AuthServer,
}

impl TextField {
    fn group(self) -> FieldGroup {
        use TextField::*;
        match self {
            Helper | Tunnel | TunnelIn | TunnelOut => FieldGroup::Other,
            State => FieldGroup::States,
            NoOffloadReason | KernelFailOrg | KernelFailRev | DriverFailOrg | DriverFailRev => {
                FieldGroup::NpuError
            }
            Shaper | ShaperOrg | ShaperRev | ShaperPerIp => FieldGroup::Shaping,
            Mac | MacSource | MacDestination => FieldGroup::Macs,
            User | AuthServer => FieldGroup::Auth,
        }
    }

    /// Runs `check` on the texts this selector covers.
    ///
    /// Returns `None` when the group holding them was not parsed.
    pub fn test(self, session: &Session, mut check: impl FnMut(&str) -> bool) -> Option<bool> {
        use TextField::*;

        let result = match self {
            Helper => check(&session.other.as_ref()?.helper),
            State => session.states.as_ref()?.iter().any(|s| check(s)),
            NoOffloadReason => check(&session.npu_error.as_ref()?.no_offload_reason),
            KernelFailOrg => check(&session.npu_error.as_ref()?.kernel_org),
            KernelFailRev => check(&session.npu_error.as_ref()?.kernel_rev),
            DriverFailOrg => check(&session.npu_error.as_ref()?.driver_org),
            DriverFailRev => check(&session.npu_error.as_ref()?.driver_rev),
            Tunnel => {
                let other = session.other.as_ref()?;
                any([&other.tunnel_in, &other.tunnel_out], |s| check(s))
            }
            TunnelIn => check(&session.other.as_ref()?.tunnel_in),
            TunnelOut => check(&session.other.as_ref()?.tunnel_out),
            Shaper => {
                let shaping = session.shaping.as_ref()?;
                any(
                    [&shaping.shaper_org, &shaping.shaper_rev, &shaping.shaper_ip],
                    |s| check(s),
                )
            }
            ShaperOrg => check(&session.shaping.as_ref()?.shaper_org),
            ShaperRev => check(&session.shaping.as_ref()?.shaper_rev),
            ShaperPerIp => check(&session.shaping.as_ref()?.shaper_ip),
            Mac => {
                let macs = session.macs.as_ref()?;
                any([&macs.src, &macs.dst], |s| check(s))
            }
            MacSource => check(&session.macs.as_ref()?.src),
            MacDestination => check(&session.macs.as_ref()?.dst),
            User => check(&session.auth.as_ref()?.user),
            AuthServer => check(&session.auth.as_ref()?.server),
        };
        Some(result)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateField {
    /// Upload or download
    Either,
    Upload,
    Download,
    Sum,
}

impl RateField {
    /// Runs `check` on the speeds in bytes per second
    pub fn test(self, session: &Session, mut check: impl FnMut(u64) -> bool) -> Option<bool> {
        let rate = session.rate.as_ref()?;
        let result = match self {
            RateField::Either => any([rate.tx_bps, rate.rx_bps], check),
            RateField::Upload => check(rate.tx_bps),
            RateField::Download => check(rate.rx_bps),
            RateField::Sum => check(rate.tx_bps.saturating_add(rate.rx_bps)),
        };
        Some(result)
    }
}
