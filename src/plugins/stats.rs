//! Traffic statistics over the sessions that pass the filter
//!
//! ```text
//! -p stats                                  tables on stderr, sessions still printed
//! -p 'stats|srcprefix=16,dstprefix=32,hide' only the tables
//! -p 'stats|complex,top=20'                 network and port pairs too
//! -p 'stats|file=report.json,hide'          JSON report instead of tables
//! ```

use super::counter::{Counter, summary_table};
use super::{PluginArgs, PluginError, SessionHook};
use crate::parser::Session;
use crate::render::{human_rate, protocol_name};
use crate::request::{FieldGroup, FieldRequest};
use comfy_table::{Cell, Table};
use ipnet::IpNet;
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

const DEFAULT_PREFIX_LEN: u8 = 24;
const DEFAULT_TOP: usize = 14;
const INTERNAL_POLICY: u32 = u32::MAX;
const NO_SOURCE_NAT: &str = "No source NAT";

const PROTO_TCP: u16 = 6;
const PROTO_UDP: u16 = 17;

/// Upper bounds in seconds of the session time buckets
const DURATION_BUCKETS: [(u64, &str); 11] = [
    (10, "Less than 10 seconds"),
    (60, "Between 10 and 60 seconds"),
    (300, "Between 1 and 5 minutes"),
    (900, "Between 5 and 15 minutes"),
    (3600, "Between 15 minutes and 1 hour"),
    (3 * 3600, "Between 1 hour and 3 hours"),
    (6 * 3600, "Between 3 hours and 6 hours"),
    (12 * 3600, "Between 6 hours and 12 hours"),
    (24 * 3600, "Between 12 hours and 24 hours"),
    (48 * 3600, "Between 24 hours and 48 hours"),
    (7 * 24 * 3600, "Between 2 and 7 days"),
];
const LONGEST_DURATION: &str = "More than 7 days";

/// How a value is printed in the tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    Sessions,
    Rate,
    Bytes,
    Packets,
    Errors,
}

impl Unit {
    fn header(self) -> &'static str {
        match self {
            Unit::Sessions => "Sessions",
            Unit::Rate => "Rate",
            Unit::Bytes => "Bytes",
            Unit::Packets => "Packets",
            Unit::Errors => "Errors",
        }
    }

    fn format(self, value: u64) -> String {
        match self {
            Unit::Rate => human_rate(value),
            Unit::Bytes => human_bytes(value),
            _ => value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Row {
    pub label: String,
    pub value: u64,
}

/// One counter, reduced to its largest entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Section {
    pub title: String,
    pub unit: Unit,
    /// Distinct keys seen
    pub unique: usize,
    pub rows: Vec<Row>,
    /// Sum of the entries that did not make it into `rows`
    pub others: u64,
}

impl Section {
    pub fn value(&self, label: &str) -> Option<u64> {
        self.rows.iter().find(|row| row.label == label).map(|row| row.value)
    }

    pub fn labels(&self) -> Vec<&str> {
        self.rows.iter().map(|row| row.label.as_str()).collect()
    }

    fn table(&self) -> Table {
        let mut table = summary_table(&self.title, self.unit.header());
        for row in &self.rows {
            table.add_row(vec![Cell::new(&row.label), Cell::new(self.unit.format(row.value))]);
        }
        if self.others > 0 {
            table.add_row(vec![
                Cell::new(format!("Others ({} more)", self.unique - self.rows.len())),
                Cell::new(self.unit.format(self.others)),
            ]);
        }
        table
    }
}

/// Everything counted during the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsReport {
    pub config: String,
    pub total_sessions: u64,
    pub matched_sessions: u64,
    pub sections: Vec<Section>,
}

impl StatsReport {
    pub fn section(&self, title: &str) -> Option<&Section> {
        self.sections.iter().find(|section| section.title == title)
    }

    fn overview(&self) -> Table {
        let mut table = summary_table("Session statistics", "Value");
        table.add_row(vec![Cell::new("Total sessions"), Cell::new(self.total_sessions)]);
        table.add_row(vec![
            Cell::new("Sessions matching filter"),
            Cell::new(self.matched_sessions),
        ]);
        table.add_row(vec![Cell::new("Configuration"), Cell::new(&self.config)]);
        table
    }

    /// Overview plus one table per non-empty section
    pub fn tables(&self) -> Vec<Table> {
        let mut tables = vec![self.overview()];
        tables.extend(
            self.sections
                .iter()
                .filter(|section| section.unique > 0)
                .map(Section::table),
        );
        tables
    }

    pub fn write_json(&self, path: &Path) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.write_all(b"\n")?;
        writer.flush()
    }
}

/// Offload state of both directions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum Offload {
    Both,
    Original,
    Reverse,
    Neither,
}

impl Offload {
    fn of(org: u8, rev: u8) -> Self {
        match (org > 0, rev > 0) {
            (true, true) => Offload::Both,
            (true, false) => Offload::Original,
            (false, true) => Offload::Reverse,
            (false, false) => Offload::Neither,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Offload::Both => "Both directions",
            Offload::Original => "Only original direction",
            Offload::Reverse => "Only reverse direction",
            Offload::Neither => "No direction",
        }
    }
}

/// Ports and states of one transport protocol
#[derive(Debug, Default)]
struct Transport {
    src_ports: Counter<u16>,
    dst_ports: Counter<u16>,
    srcdst_ports: Counter<(u16, u16)>,
    state_l: Counter<u8>,
    state_r: Counter<u8>,
    state_lr: Counter<(u8, u8)>,
}

/// Session count and traffic volume per key
#[derive(Debug)]
struct Traffic<K> {
    sessions: Counter<K>,
    rate: Counter<K>,
    bytes: Counter<K>,
    packets: Counter<K>,
    errors: Counter<K>,
}

impl<K> Default for Traffic<K> {
    fn default() -> Self {
        Traffic {
            sessions: Counter::default(),
            rate: Counter::default(),
            bytes: Counter::default(),
            packets: Counter::default(),
            errors: Counter::default(),
        }
    }
}

impl<K: Eq + std::hash::Hash + Ord + Clone> Traffic<K> {
    fn add(&mut self, key: K, rate: u64, bytes: u64, packets: u64, errors: u64) {
        self.sessions.add_one(key.clone());
        self.rate.add(key.clone(), rate);
        self.bytes.add(key.clone(), bytes);
        self.packets.add(key.clone(), packets);
        self.errors.add(key, errors);
    }
}

#[derive(Debug, Default)]
struct Counters {
    total: u64,
    matched: u64,
    protocols: Counter<u16>,
    vdoms: Counter<u32>,
    policies: Counter<(u32, u32)>,
    states: Counter<String>,
    helpers: Counter<String>,
    users: Counter<String>,
    tcp: Transport,
    udp: Transport,
    src_nets: Traffic<IpNet>,
    dst_nets: Traffic<IpNet>,
    srcdst_nets: Traffic<(IpNet, IpNet)>,
    in_org: Counter<u32>,
    out_org: Counter<u32>,
    in_rev: Counter<u32>,
    out_rev: Counter<u32>,
    next_hop_org: Counter<Option<IpAddr>>,
    next_hop_rev: Counter<Option<IpAddr>>,
    durations: Counter<usize>,
    ttls: Counter<u64>,
    offload_npu: Counter<Offload>,
    offload_nturbo: Counter<Offload>,
    offload_fail: Counter<String>,
    offload_fail_org: Counter<String>,
    offload_fail_rev: Counter<String>,
    tunnels_in: Counter<String>,
    tunnels_out: Counter<String>,
    shapers_org: Counter<String>,
    shapers_rev: Counter<String>,
    shapers_ip: Counter<String>,
    snat_ip: Counter<Option<IpAddr>>,
    snat_port: Counter<u16>,
    snat_ip_port: Counter<(Option<IpAddr>, u16)>,
}

#[derive(Debug)]
pub struct SessionStats {
    src_prefix: u8,
    dst_prefix: u8,
    complex: bool,
    top: usize,
    hide: bool,
    file: Option<PathBuf>,
    counters: Mutex<Counters>,
}

impl SessionStats {
    pub fn new(src_prefix: u8, dst_prefix: u8, complex: bool, request: &mut FieldRequest) -> Self {
        request.request_many(&[
            FieldGroup::Peers,
            FieldGroup::Basics,
            FieldGroup::States,
            FieldGroup::Stats,
            FieldGroup::Rate,
            FieldGroup::Npu,
            FieldGroup::NpuError,
            FieldGroup::Policy,
            FieldGroup::Other,
            FieldGroup::Shaping,
            FieldGroup::Interfaces,
            FieldGroup::Auth,
        ]);
        SessionStats {
            src_prefix,
            dst_prefix,
            complex,
            top: DEFAULT_TOP,
            hide: false,
            file: None,
            counters: Mutex::new(Counters::default()),
        }
    }

    pub fn from_args(args: &PluginArgs, request: &mut FieldRequest) -> Result<Self, PluginError> {
        args.allow_only(&["srcprefix", "dstprefix", "complex", "top", "hide", "file"])?;
        let src_prefix = prefix_arg(args, "srcprefix")?;
        let dst_prefix = prefix_arg(args, "dstprefix")?;
        let top = args.parsed("top", DEFAULT_TOP)?;
        if top == 0 {
            return Err(invalid(args, "top", "0"));
        }

        let mut stats = Self::new(src_prefix, dst_prefix, args.flag("complex"), request);
        stats.top = top;
        stats.hide = args.flag("hide");
        stats.file = match (args.flag("file"), args.value("file")) {
            (false, _) => None,
            (true, Some(path)) if !path.is_empty() => Some(PathBuf::from(path)),
            (true, _) => return Err(invalid(args, "file", "")),
        };
        Ok(stats)
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn config(&self) -> String {
        let mut config = format!("srcprefix={},dstprefix={}", self.src_prefix, self.dst_prefix);
        if self.complex {
            config.push_str(",complex");
        }
        config
    }

    fn count(&self, counters: &mut Counters, session: &Session) {
        let peers = session.peers().unwrap_or_default();
        let basics = session.basics.unwrap_or_default();
        let stats = session.stats.unwrap_or_default();
        let rate = session.rate.unwrap_or_default();

        counters.protocols.add_one(basics.protocol);

        if let Some(policy) = session.policy {
            counters.vdoms.add_one(policy.vdom);
            counters.policies.add_one((policy.vdom, policy.id));
        }

        let transport = match basics.protocol {
            PROTO_TCP => Some(&mut counters.tcp),
            PROTO_UDP => Some(&mut counters.udp),
            _ => None,
        };
        if let Some(transport) = transport {
            transport.src_ports.add_one(peers.src.port);
            transport.dst_ports.add_one(peers.dst.port);
            if self.complex {
                transport.srcdst_ports.add_one((peers.src.port, peers.dst.port));
            }
            transport.state_l.add_one(basics.state_l);
            transport.state_r.add_one(basics.state_r);
            transport.state_lr.add_one((basics.state_l, basics.state_r));
        }

        let src_net = peers.src.ip.and_then(|ip| network(ip, self.src_prefix));
        let dst_net = peers.dst.ip.and_then(|ip| network(ip, self.dst_prefix));
        if let Some(net) = src_net {
            counters.src_nets.add(
                net,
                rate.tx_bps,
                stats.bytes_org,
                stats.packets_org,
                stats.errors_org,
            );
        }
        if let Some(net) = dst_net {
            counters.dst_nets.add(
                net,
                rate.rx_bps,
                stats.bytes_rev,
                stats.packets_rev,
                stats.errors_rev,
            );
        }
        if let (true, Some(src), Some(dst)) = (self.complex, src_net, dst_net) {
            counters.srcdst_nets.add(
                (src, dst),
                rate.tx_bps.saturating_add(rate.rx_bps),
                stats.bytes_org.saturating_add(stats.bytes_rev),
                stats.packets_org.saturating_add(stats.packets_rev),
                stats.errors_org.saturating_add(stats.errors_rev),
            );
        }

        let snat_ip = peers.nat.ip.filter(|ip| !ip.is_unspecified());
        counters.snat_ip.add_one(snat_ip);
        counters.snat_port.add_one(peers.nat.port);
        if self.complex {
            counters.snat_ip_port.add_one((snat_ip, peers.nat.port));
        }

        if let Some(interfaces) = session.interfaces {
            counters.in_org.add_one(interfaces.in_org);
            counters.out_org.add_one(interfaces.out_org);
            counters.in_rev.add_one(interfaces.in_rev);
            counters.out_rev.add_one(interfaces.out_rev);
            counters.next_hop_org.add_one(interfaces.next_hop_org);
            counters.next_hop_rev.add_one(interfaces.next_hop_rev);
        }

        if session.basics.is_some() {
            counters.durations.add_one(duration_bucket(basics.duration));
            counters.ttls.add_one(basics.timeout);
        }

        for state in session.states.iter().flatten() {
            counters.states.add_one(state.clone());
        }
        if let Some(other) = &session.other {
            counters.helpers.add_one(other.helper.clone());
            if !other.tunnel_in.is_empty() {
                counters.tunnels_in.add_one(other.tunnel_in.clone());
            }
            if !other.tunnel_out.is_empty() {
                counters.tunnels_out.add_one(other.tunnel_out.clone());
            }
        }
        if let Some(auth) = &session.auth {
            counters.users.add_one(auth.user.clone());
        }

        if let Some(npu) = session.npu {
            counters.offload_npu.add_one(Offload::of(npu.offload_org, npu.offload_rev));
            counters.offload_nturbo.add_one(Offload::of(npu.nturbo_org, npu.nturbo_rev));
        }
        if let Some(error) = &session.npu_error {
            if !error.no_offload_reason.is_empty() {
                counters.offload_fail.add_one(error.no_offload_reason.clone());
            }
            if !error.kernel_org.is_empty() && !error.driver_org.is_empty() {
                counters
                    .offload_fail_org
                    .add_one(format!("{}/{}", error.kernel_org, error.driver_org));
            }
            if !error.kernel_rev.is_empty() && !error.driver_rev.is_empty() {
                counters
                    .offload_fail_rev
                    .add_one(format!("{}/{}", error.kernel_rev, error.driver_rev));
            }
        }

        if let Some(shaping) = &session.shaping {
            counters.shapers_org.add_one(shaping.shaper_org.clone());
            counters.shapers_rev.add_one(shaping.shaper_rev.clone());
            counters.shapers_ip.add_one(shaping.shaper_ip.clone());
        }
    }

    pub fn report(&self) -> StatsReport {
        let c = self.lock();
        let top = self.top;
        let mut sections = vec![
            section("Protocols", &c.protocols, top, |p| protocol_name(*p)),
            section("VDOMs", &c.vdoms, top, u32::to_string),
            section("Policies", &c.policies, top, |(vdom, id)| {
                policy_label(*vdom, *id)
            }),
            section("State flags", &c.states, top, text_label),
            section("Helpers", &c.helpers, top, text_label),
            section("Users", &c.users, top, text_label),
        ];

        let transports: [(&str, &Transport, fn(u8) -> String); 2] = [
            ("TCP", &c.tcp, tcp_state_name),
            ("UDP", &c.udp, udp_state_name),
        ];
        for (name, transport, names) in transports {
            sections.push(section(
                &format!("{} source ports", name),
                &transport.src_ports,
                top,
                u16::to_string,
            ));
            sections.push(section(
                &format!("{} destination ports", name),
                &transport.dst_ports,
                top,
                u16::to_string,
            ));
            if self.complex {
                sections.push(section(
                    &format!("{} source + destination ports", name),
                    &transport.srcdst_ports,
                    top,
                    |(src, dst)| format!("{} -> {}", src, dst),
                ));
            }
            sections.push(section(
                &format!("{} client to firewall session state", name),
                &transport.state_l,
                top,
                |s| names(*s),
            ));
            sections.push(section(
                &format!("{} firewall to server session state", name),
                &transport.state_r,
                top,
                |s| names(*s),
            ));
            sections.push(section(
                &format!("{} combined session state", name),
                &transport.state_lr,
                top,
                |(l, r)| format!("{} / {}", names(*l), names(*r)),
            ));
        }

        sections.extend(traffic_sections(
            &c.src_nets,
            [
                "Source networks",
                "Upload rate from source networks",
                "Bytes sent from source networks",
                "Packets sent from source networks",
                "Errors from source networks",
            ],
            top,
            IpNet::to_string,
        ));
        sections.extend(traffic_sections(
            &c.dst_nets,
            [
                "Destination networks",
                "Download rate from destination networks",
                "Bytes received from destination networks",
                "Packets received from destination networks",
                "Errors from destination networks",
            ],
            top,
            IpNet::to_string,
        ));
        if self.complex {
            sections.extend(traffic_sections(
                &c.srcdst_nets,
                [
                    "Source + destination networks",
                    "Summary rate between source+destination networks",
                    "Bytes exchanged between source+destination networks",
                    "Packets exchanged between source+destination networks",
                    "Errors summary between source+destination networks",
                ],
                top,
                |(src, dst)| format!("{} <-> {}", src, dst),
            ));
        }

        sections.extend([
            section(
                "Incoming interface in original direction",
                &c.in_org,
                top,
                u32::to_string,
            ),
            section(
                "Outgoing interface in original direction",
                &c.out_org,
                top,
                u32::to_string,
            ),
            section(
                "Incoming interface in reverse direction",
                &c.in_rev,
                top,
                u32::to_string,
            ),
            section(
                "Outgoing interface in reverse direction",
                &c.out_rev,
                top,
                u32::to_string,
            ),
            section("Next hop in original direction", &c.next_hop_org, top, address_label),
            section("Next hop in reverse direction", &c.next_hop_rev, top, address_label),
            sorted_section("Session time", &c.durations, |bucket| {
                duration_label(*bucket).to_string()
            }),
            sorted_section("Session TTLs", &c.ttls, u64::to_string),
            section("NPU offload", &c.offload_npu, top, |o| o.label().to_string()),
            section("nTurbo offload", &c.offload_nturbo, top, |o| {
                o.label().to_string()
            }),
            section("NPU offload fail generic", &c.offload_fail, top, text_label),
            section(
                "NPU offload fail in original direction",
                &c.offload_fail_org,
                top,
                text_label,
            ),
            section(
                "NPU offload fail in reverse direction",
                &c.offload_fail_rev,
                top,
                text_label,
            ),
            section("Incoming from tunnel", &c.tunnels_in, top, text_label),
            section("Outgoing to tunnel", &c.tunnels_out, top, text_label),
            section("Shaper in original direction", &c.shapers_org, top, text_label),
            section("Shaper in reverse direction", &c.shapers_rev, top, text_label),
            section("Per-IP shaper", &c.shapers_ip, top, text_label),
            section("IP used as source NAT", &c.snat_ip, top, |ip| {
                ip.map_or_else(|| NO_SOURCE_NAT.to_string(), |ip| ip.to_string())
            }),
            section("Port used as source NAT", &c.snat_port, top, |port| match port {
                0 => NO_SOURCE_NAT.to_string(),
                port => port.to_string(),
            }),
        ]);
        if self.complex {
            sections.push(section(
                "IP/port combination used as source NAT",
                &c.snat_ip_port,
                top,
                |(ip, port)| match ip {
                    Some(ip) if *port != 0 => format!("{}:{}", ip, port),
                    _ => NO_SOURCE_NAT.to_string(),
                },
            ));
        }

        StatsReport {
            config: self.config(),
            total_sessions: c.total,
            matched_sessions: c.matched,
            sections,
        }
    }
}

impl SessionHook for SessionStats {
    fn name(&self) -> &str {
        "stats"
    }

    fn before_filter(&self, _session: &mut Session) -> bool {
        self.lock().total += 1;
        false
    }

    fn after_filter(&self, session: &mut Session) -> bool {
        let mut counters = self.lock();
        counters.matched += 1;
        self.count(&mut counters, session);
        self.hide
    }

    fn on_finished(&self) {
        let report = self.report();
        match &self.file {
            Some(path) => match report.write_json(path) {
                Ok(()) => info!("Statistics written to {}", path.display()),
                Err(err) => warn!("Cannot write statistics to {}: {}", path.display(), err),
            },
            None => {
                for table in report.tables() {
                    eprintln!("{}", table);
                }
            }
        }
    }
}

fn invalid(args: &PluginArgs, parameter: &str, value: &str) -> PluginError {
    PluginError::InvalidParameter {
        plugin: args.plugin().to_string(),
        parameter: parameter.to_string(),
        value: value.to_string(),
    }
}

fn prefix_arg(args: &PluginArgs, key: &str) -> Result<u8, PluginError> {
    let prefix = args.parsed(key, DEFAULT_PREFIX_LEN)?;
    if !(1..=32).contains(&prefix) {
        return Err(invalid(args, key, &prefix.to_string()));
    }
    Ok(prefix)
}

fn network(ip: IpAddr, prefix: u8) -> Option<IpNet> {
    IpNet::new(ip, prefix).ok().map(|net| net.trunc())
}

fn section<K: Eq + std::hash::Hash + Ord + Clone>(
    title: &str,
    counter: &Counter<K>,
    top: usize,
    label: impl Fn(&K) -> String,
) -> Section {
    measured(title, Unit::Sessions, counter, top, label)
}

fn measured<K: Eq + std::hash::Hash + Ord + Clone>(
    title: &str,
    unit: Unit,
    counter: &Counter<K>,
    top: usize,
    label: impl Fn(&K) -> String,
) -> Section {
    let (entries, others) = counter.top(top);
    Section {
        title: title.to_string(),
        unit,
        unique: counter.len(),
        rows: entries
            .iter()
            .map(|(key, value)| Row {
                label: label(key),
                value: *value,
            })
            .collect(),
        others,
    }
}

/// Every entry, in key order
fn sorted_section<K: Eq + std::hash::Hash + Ord + Clone>(
    title: &str,
    counter: &Counter<K>,
    label: impl Fn(&K) -> String,
) -> Section {
    Section {
        title: title.to_string(),
        unit: Unit::Sessions,
        unique: counter.len(),
        rows: counter
            .by_key()
            .iter()
            .map(|(key, value)| Row {
                label: label(key),
                value: *value,
            })
            .collect(),
        others: 0,
    }
}

fn traffic_sections<K: Eq + std::hash::Hash + Ord + Clone>(
    traffic: &Traffic<K>,
    titles: [&str; 5],
    top: usize,
    label: impl Fn(&K) -> String,
) -> Vec<Section> {
    let [sessions, rate, bytes, packets, errors] = titles;
    vec![
        measured(sessions, Unit::Sessions, &traffic.sessions, top, &label),
        measured(rate, Unit::Rate, &traffic.rate, top, &label),
        measured(bytes, Unit::Bytes, &traffic.bytes, top, &label),
        measured(packets, Unit::Packets, &traffic.packets, top, &label),
        measured(errors, Unit::Errors, &traffic.errors, top, &label),
    ]
}

fn policy_label(vdom: u32, id: u32) -> String {
    if id == INTERNAL_POLICY {
        format!("{} / (i)", vdom)
    } else {
        format!("{} / {}", vdom, id)
    }
}

#[allow(clippy::ptr_arg)]
fn text_label(text: &String) -> String {
    if text.is_empty() {
        "[none]".to_string()
    } else {
        text.clone()
    }
}

fn address_label(ip: &Option<IpAddr>) -> String {
    ip.map_or_else(|| "[none]".to_string(), |ip| ip.to_string())
}

fn duration_bucket(seconds: u64) -> usize {
    DURATION_BUCKETS
        .iter()
        .position(|(limit, _)| seconds <= *limit)
        .unwrap_or(DURATION_BUCKETS.len())
}

fn duration_label(bucket: usize) -> &'static str {
    DURATION_BUCKETS
        .get(bucket)
        .map_or(LONGEST_DURATION, |(_, label)| label)
}

fn tcp_state_name(state: u8) -> String {
    const NAMES: [&str; 12] = [
        "NONE",
        "ESTABLISHED",
        "SYN_SENT",
        "SYN_RECV",
        "FIN_WAIT1",
        "FIN_WAIT2",
        "TIME_WAIT",
        "CLOSE",
        "CLOSE_WAIT",
        "LAST_ACK",
        "LISTEN",
        "CLOSING",
    ];
    NAMES
        .get(state as usize)
        .map_or_else(|| state.to_string(), |name| name.to_string())
}

fn udp_state_name(state: u8) -> String {
    match state {
        0 => "UNSEEN".to_string(),
        1 => "SEEN".to_string(),
        other => other.to_string(),
    }
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [(f64, &str); 4] = [(1e12, "TB"), (1e9, "GB"), (1e6, "MB"), (1e3, "kB")];
    let value = bytes as f64;
    UNITS
        .iter()
        .find(|(divide, _)| value >= *divide)
        .map_or_else(
            || format!("{} B", bytes),
            |(divide, unit)| format!("{:.2} {}", value / divide, unit),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{
        Auth, Basics, Endpoint, Hook, Interfaces, Npu, NpuError, Other, Policy, Rate, Shaping,
        Stats,
    };
    use tempfile::tempdir;

    struct Flow {
        proto: u16,
        src: &'static str,
        sport: u16,
        dst: &'static str,
        dport: u16,
    }

    fn endpoint(ip: &str, port: u16) -> Endpoint {
        Endpoint {
            ip: Some(ip.parse().unwrap()),
            port,
        }
    }

    fn session(flow: Flow) -> Session {
        Session {
            hooks: Some(vec![Hook {
                dir: "org".to_string(),
                src: endpoint(flow.src, flow.sport),
                dst: endpoint(flow.dst, flow.dport),
                nat: endpoint("0.0.0.0", 0),
                ..Hook::default()
            }]),
            basics: Some(Basics {
                protocol: flow.proto,
                state_l: 1,
                state_r: 1,
                duration: 5,
                timeout: 3600,
                ..Basics::default()
            }),
            stats: Some(Stats {
                bytes_org: 1000,
                packets_org: 10,
                errors_org: 1,
                bytes_rev: 4000,
                packets_rev: 20,
                errors_rev: 0,
                ..Stats::default()
            }),
            rate: Some(Rate {
                tx_bps: 100,
                rx_bps: 300,
            }),
            policy: Some(Policy { id: 4, vdom: 0 }),
            states: Some(vec!["may_dirty".to_string(), "npu".to_string()]),
            interfaces: Some(Interfaces {
                in_org: 35,
                out_org: 22,
                in_rev: 22,
                out_rev: 35,
                next_hop_org: Some("10.0.0.254".parse().unwrap()),
                next_hop_rev: None,
            }),
            npu: Some(Npu::default()),
            npu_error: Some(NpuError::default()),
            other: Some(Other::default()),
            shaping: Some(Shaping::default()),
            auth: Some(Auth::default()),
            ..Session::default()
        }
    }

    fn tcp(src: &'static str, sport: u16, dst: &'static str, dport: u16) -> Session {
        session(Flow {
            proto: 6,
            src,
            sport,
            dst,
            dport,
        })
    }

    fn udp(src: &'static str, sport: u16, dst: &'static str, dport: u16) -> Session {
        session(Flow {
            proto: 17,
            src,
            sport,
            dst,
            dport,
        })
    }

    fn plugin(data: &str) -> SessionStats {
        let mut request = FieldRequest::new();
        SessionStats::from_args(&PluginArgs::parse("stats", data), &mut request).unwrap()
    }

    /// Runs every session through both hook points
    fn feed(stats: &SessionStats, sessions: Vec<Session>) -> StatsReport {
        for mut session in sessions {
            stats.before_filter(&mut session);
            stats.after_filter(&mut session);
        }
        stats.report()
    }

    fn rows(report: &StatsReport, title: &str) -> Vec<(String, u64)> {
        report
            .section(title)
            .unwrap_or_else(|| panic!("missing section {}", title))
            .rows
            .iter()
            .map(|row| (row.label.clone(), row.value))
            .collect()
    }

    fn row(label: &str, value: u64) -> (String, u64) {
        (label.to_string(), value)
    }

    #[test]
    fn test_requests_groups() {
        let mut request = FieldRequest::new();
        SessionStats::new(24, 24, false, &mut request);
        for group in [
            FieldGroup::Peers,
            FieldGroup::Basics,
            FieldGroup::States,
            FieldGroup::Stats,
            FieldGroup::Rate,
            FieldGroup::Npu,
            FieldGroup::NpuError,
            FieldGroup::Policy,
            FieldGroup::Other,
            FieldGroup::Shaping,
            FieldGroup::Interfaces,
            FieldGroup::Auth,
        ] {
            assert!(request.contains(group), "{:?} not requested", group);
        }
        assert!(!request.contains(FieldGroup::Plain));
    }

    #[test]
    fn test_parameters() {
        let stats = plugin("srcprefix=16, dstprefix=32, complex, top=3, hide");
        assert_eq!(stats.config(), "srcprefix=16,dstprefix=32,complex");
        assert_eq!(stats.top, 3);
        assert!(stats.hide);
        assert_eq!(plugin("").config(), "srcprefix=24,dstprefix=24");

        let mut request = FieldRequest::new();
        for data in ["srcprefix=0", "dstprefix=33", "top=0", "top=-1", "file", "srcprefix=x"] {
            assert!(
                matches!(
                    SessionStats::from_args(&PluginArgs::parse("stats", data), &mut request),
                    Err(PluginError::InvalidParameter { .. })
                ),
                "{} accepted",
                data
            );
        }
        assert!(matches!(
            SessionStats::from_args(&PluginArgs::parse("stats", "directory=x"), &mut request),
            Err(PluginError::UnknownParameter { .. })
        ));
    }

    #[test]
    fn test_totals_and_hide() {
        let stats = plugin("hide");
        let mut first = tcp("10.0.0.1", 1000, "192.0.2.1", 443);
        let mut second = tcp("10.0.0.2", 1000, "192.0.2.1", 443);
        assert!(!stats.before_filter(&mut first));
        assert!(!stats.before_filter(&mut second));
        assert!(stats.after_filter(&mut first));

        let report = stats.report();
        assert_eq!(report.total_sessions, 2);
        assert_eq!(report.matched_sessions, 1);
        assert!(!plugin("").after_filter(&mut second));
    }

    #[test]
    fn test_protocols() {
        let report = feed(
            &plugin(""),
            vec![
                tcp("10.0.0.1", 1, "192.0.2.1", 443),
                tcp("10.0.0.1", 2, "192.0.2.1", 443),
                udp("10.0.0.1", 3, "192.0.2.53", 53),
            ],
        );
        assert_eq!(rows(&report, "Protocols"), [row("TCP", 2), row("UDP", 1)]);
    }

    #[test]
    fn test_vdoms_and_policies() {
        let mut internal = tcp("10.0.0.1", 1, "192.0.2.1", 443);
        internal.policy = Some(Policy {
            id: u32::MAX,
            vdom: 3,
        });
        let mut other_vdom = tcp("10.0.0.1", 2, "192.0.2.1", 443);
        other_vdom.policy = Some(Policy { id: 7, vdom: 3 });

        let report = feed(
            &plugin(""),
            vec![
                internal,
                other_vdom,
                tcp("10.0.0.1", 3, "192.0.2.1", 443),
                tcp("10.0.0.1", 4, "192.0.2.1", 443),
            ],
        );
        assert_eq!(rows(&report, "VDOMs"), [row("0", 2), row("3", 2)]);
        assert_eq!(
            rows(&report, "Policies"),
            [row("0 / 4", 2), row("3 / 7", 1), row("3 / (i)", 1)]
        );
    }

    #[test]
    fn test_ports_by_protocol() {
        let mut icmp = tcp("10.0.0.1", 0, "192.0.2.1", 0);
        icmp.basics = Some(Basics {
            protocol: 1,
            ..Basics::default()
        });

        let report = feed(
            &plugin("complex"),
            vec![
                tcp("10.0.0.1", 40000, "192.0.2.1", 443),
                tcp("10.0.0.2", 40001, "192.0.2.1", 443),
                tcp("10.0.0.2", 40001, "192.0.2.1", 22),
                udp("10.0.0.1", 5353, "192.0.2.53", 53),
                icmp,
            ],
        );

        assert_eq!(
            rows(&report, "TCP destination ports"),
            [row("443", 2), row("22", 1)]
        );
        assert_eq!(
            rows(&report, "TCP source ports"),
            [row("40001", 2), row("40000", 1)]
        );
        assert_eq!(
            rows(&report, "TCP source + destination ports"),
            [row("40000 -> 443", 1), row("40001 -> 22", 1), row("40001 -> 443", 1)]
        );
        assert_eq!(rows(&report, "UDP destination ports"), [row("53", 1)]);
        assert_eq!(rows(&report, "UDP source ports"), [row("5353", 1)]);
        assert_eq!(
            rows(&report, "UDP source + destination ports"),
            [row("5353 -> 53", 1)]
        );
        // ICMP has no ports to count
        assert_eq!(report.section("TCP source ports").unwrap().unique, 2);
        assert!(report.section("ICMP source ports").is_none());
    }

    #[test]
    fn test_port_pairs_need_complex() {
        let report = feed(&plugin(""), vec![tcp("10.0.0.1", 1, "192.0.2.1", 443)]);
        assert!(report.section("TCP source + destination ports").is_none());
        assert!(report.section("Source + destination networks").is_none());
        assert!(report.section("IP/port combination used as source NAT").is_none());
    }

    #[test]
    fn test_session_states() {
        let mut closing = tcp("10.0.0.1", 1, "192.0.2.1", 443);
        if let Some(basics) = closing.basics.as_mut() {
            basics.state_l = 4;
            basics.state_r = 11;
        }
        let mut unseen = udp("10.0.0.1", 2, "192.0.2.53", 53);
        if let Some(basics) = unseen.basics.as_mut() {
            basics.state_l = 0;
        }

        let report = feed(
            &plugin(""),
            vec![closing, tcp("10.0.0.1", 3, "192.0.2.1", 443), unseen],
        );
        assert_eq!(
            rows(&report, "TCP client to firewall session state"),
            [row("ESTABLISHED", 1), row("FIN_WAIT1", 1)]
        );
        assert_eq!(
            rows(&report, "TCP firewall to server session state"),
            [row("ESTABLISHED", 1), row("CLOSING", 1)]
        );
        assert_eq!(
            rows(&report, "TCP combined session state"),
            [row("ESTABLISHED / ESTABLISHED", 1), row("FIN_WAIT1 / CLOSING", 1)]
        );
        assert_eq!(
            rows(&report, "UDP combined session state"),
            [row("UNSEEN / SEEN", 1)]
        );
    }

    #[test]
    fn test_state_flags_helpers_users() {
        let mut ftp = tcp("10.0.0.1", 1, "192.0.2.1", 21);
        ftp.states = Some(vec!["log".to_string(), "npu".to_string()]);
        ftp.other = Some(Other {
            helper: "ftp".to_string(),
            ..Other::default()
        });
        ftp.auth = Some(Auth {
            user: "Admin".to_string(),
            ..Auth::default()
        });

        let report = feed(&plugin(""), vec![ftp, tcp("10.0.0.1", 2, "192.0.2.1", 443)]);
        assert_eq!(
            rows(&report, "State flags"),
            [row("npu", 2), row("log", 1), row("may_dirty", 1)]
        );
        assert_eq!(rows(&report, "Helpers"), [row("[none]", 1), row("ftp", 1)]);
        assert_eq!(rows(&report, "Users"), [row("[none]", 1), row("Admin", 1)]);
    }

    #[test]
    fn test_source_and_destination_networks() {
        let report = feed(
            &plugin("srcprefix=16,dstprefix=32"),
            vec![
                tcp("10.1.2.3", 1, "192.0.2.1", 443),
                tcp("10.1.200.4", 2, "192.0.2.1", 443),
                tcp("10.2.0.1", 3, "192.0.2.9", 443),
            ],
        );

        assert_eq!(
            rows(&report, "Source networks"),
            [row("10.1.0.0/16", 2), row("10.2.0.0/16", 1)]
        );
        assert_eq!(
            rows(&report, "Destination networks"),
            [row("192.0.2.1/32", 2), row("192.0.2.9/32", 1)]
        );
        assert_eq!(
            rows(&report, "Upload rate from source networks"),
            [row("10.1.0.0/16", 200), row("10.2.0.0/16", 100)]
        );
        assert_eq!(
            rows(&report, "Download rate from destination networks"),
            [row("192.0.2.1/32", 600), row("192.0.2.9/32", 300)]
        );
        assert_eq!(
            rows(&report, "Bytes sent from source networks")[0],
            row("10.1.0.0/16", 2000)
        );
        assert_eq!(
            rows(&report, "Bytes received from destination networks")[0],
            row("192.0.2.1/32", 8000)
        );
        assert_eq!(
            rows(&report, "Packets sent from source networks")[0],
            row("10.1.0.0/16", 20)
        );
        assert_eq!(
            rows(&report, "Errors from source networks")[0],
            row("10.1.0.0/16", 2)
        );
        assert_eq!(
            rows(&report, "Errors from destination networks"),
            [row("192.0.2.1/32", 0), row("192.0.2.9/32", 0)]
        );
    }

    #[test]
    fn test_network_pairs() {
        let report = feed(
            &plugin("complex,dstprefix=24"),
            vec![
                tcp("10.1.1.3", 1, "192.0.2.1", 443),
                tcp("10.1.1.4", 2, "192.0.2.200", 80),
                tcp("10.1.9.1", 3, "192.0.2.1", 443),
            ],
        );
        assert_eq!(
            rows(&report, "Source + destination networks"),
            [
                row("10.1.1.0/24 <-> 192.0.2.0/24", 2),
                row("10.1.9.0/24 <-> 192.0.2.0/24", 1)
            ]
        );
        assert_eq!(
            rows(&report, "Summary rate between source+destination networks")[0],
            row("10.1.1.0/24 <-> 192.0.2.0/24", 800)
        );
        assert_eq!(
            rows(&report, "Bytes exchanged between source+destination networks")[0],
            row("10.1.1.0/24 <-> 192.0.2.0/24", 10_000)
        );
        assert_eq!(
            rows(&report, "Packets exchanged between source+destination networks")[0],
            row("10.1.1.0/24 <-> 192.0.2.0/24", 60)
        );
        assert_eq!(
            rows(&report, "Errors summary between source+destination networks")[0],
            row("10.1.1.0/24 <-> 192.0.2.0/24", 2)
        );
    }

    #[test]
    fn test_source_nat() {
        let mut natted = tcp("10.0.0.1", 1000, "192.0.2.1", 443);
        if let Some(hooks) = natted.hooks.as_mut() {
            hooks[0].nat = endpoint("198.51.100.7", 61000);
        }

        let report = feed(
            &plugin("complex"),
            vec![natted, tcp("10.0.0.2", 1000, "192.0.2.1", 443)],
        );
        assert_eq!(
            rows(&report, "IP used as source NAT"),
            [row(NO_SOURCE_NAT, 1), row("198.51.100.7", 1)]
        );
        assert_eq!(
            rows(&report, "Port used as source NAT"),
            [row(NO_SOURCE_NAT, 1), row("61000", 1)]
        );
        assert_eq!(
            rows(&report, "IP/port combination used as source NAT"),
            [row(NO_SOURCE_NAT, 1), row("198.51.100.7:61000", 1)]
        );
    }

    #[test]
    fn test_interfaces_and_next_hops() {
        let report = feed(
            &plugin(""),
            vec![
                tcp("10.0.0.1", 1, "192.0.2.1", 443),
                tcp("10.0.0.1", 2, "192.0.2.1", 443),
            ],
        );
        assert_eq!(
            rows(&report, "Incoming interface in original direction"),
            [row("35", 2)]
        );
        assert_eq!(
            rows(&report, "Outgoing interface in original direction"),
            [row("22", 2)]
        );
        assert_eq!(
            rows(&report, "Incoming interface in reverse direction"),
            [row("22", 2)]
        );
        assert_eq!(
            rows(&report, "Outgoing interface in reverse direction"),
            [row("35", 2)]
        );
        assert_eq!(
            rows(&report, "Next hop in original direction"),
            [row("10.0.0.254", 2)]
        );
        assert_eq!(rows(&report, "Next hop in reverse direction"), [row("[none]", 2)]);
    }

    #[test]
    fn test_durations_and_ttls() {
        let durations = [0u64, 10, 11, 3600, 3601, 7 * 24 * 3600, 7 * 24 * 3600 + 1];
        let sessions = durations
            .iter()
            .map(|duration| {
                let mut s = tcp("10.0.0.1", 1, "192.0.2.1", 443);
                if let Some(basics) = s.basics.as_mut() {
                    basics.duration = *duration;
                    basics.timeout = if *duration > 60 { 300 } else { 3600 };
                }
                s
            })
            .collect();

        let report = feed(&plugin(""), sessions);
        assert_eq!(
            rows(&report, "Session time"),
            [
                row("Less than 10 seconds", 2),
                row("Between 10 and 60 seconds", 1),
                row("Between 15 minutes and 1 hour", 1),
                row("Between 1 hour and 3 hours", 1),
                row("Between 2 and 7 days", 1),
                row("More than 7 days", 1),
            ]
        );
        assert_eq!(rows(&report, "Session TTLs"), [row("300", 4), row("3600", 3)]);
    }

    #[test]
    fn test_offload() {
        let offloaded = |org: u8, rev: u8, turbo: u8| {
            let mut s = tcp("10.0.0.1", 1, "192.0.2.1", 443);
            s.npu = Some(Npu {
                offload_org: org,
                offload_rev: rev,
                nturbo_org: turbo,
                nturbo_rev: turbo,
                ..Npu::default()
            });
            s
        };
        let mut failed = offloaded(0, 0, 0);
        failed.npu_error = Some(NpuError {
            no_offload_reason: "redir-to-av".to_string(),
            kernel_org: "1".to_string(),
            driver_org: "2".to_string(),
            kernel_rev: "3".to_string(),
            driver_rev: String::new(),
        });

        let report = feed(
            &plugin(""),
            vec![
                offloaded(8, 8, 1),
                offloaded(8, 8, 0),
                offloaded(8, 0, 0),
                offloaded(0, 8, 0),
                failed,
            ],
        );
        assert_eq!(
            rows(&report, "NPU offload"),
            [
                row("Both directions", 2),
                row("Only original direction", 1),
                row("Only reverse direction", 1),
                row("No direction", 1),
            ]
        );
        assert_eq!(
            rows(&report, "nTurbo offload"),
            [row("No direction", 4), row("Both directions", 1)]
        );
        assert_eq!(rows(&report, "NPU offload fail generic"), [row("redir-to-av", 1)]);
        assert_eq!(
            rows(&report, "NPU offload fail in original direction"),
            [row("1/2", 1)]
        );
        // both parts are needed
        assert!(rows(&report, "NPU offload fail in reverse direction").is_empty());
    }

    #[test]
    fn test_tunnels_and_shapers() {
        let mut tunnelled = tcp("10.0.0.1", 1, "192.0.2.1", 443);
        tunnelled.other = Some(Other {
            tunnel_in: "vpn-hq".to_string(),
            ..Other::default()
        });
        tunnelled.shaping = Some(Shaping {
            shaper_org: "guarantee-100k".to_string(),
            shaper_rev: String::new(),
            shaper_ip: "per-ip-1M".to_string(),
        });

        let report = feed(&plugin(""), vec![tunnelled, tcp("10.0.0.2", 1, "192.0.2.1", 443)]);
        assert_eq!(rows(&report, "Incoming from tunnel"), [row("vpn-hq", 1)]);
        assert!(rows(&report, "Outgoing to tunnel").is_empty());
        assert_eq!(
            rows(&report, "Shaper in original direction"),
            [row("[none]", 1), row("guarantee-100k", 1)]
        );
        assert_eq!(rows(&report, "Shaper in reverse direction"), [row("[none]", 2)]);
        assert_eq!(
            rows(&report, "Per-IP shaper"),
            [row("[none]", 1), row("per-ip-1M", 1)]
        );
    }

    #[test]
    fn test_top_limit_and_others() {
        let sessions = (0..5u16)
            .flat_map(|port| (0..=port).map(move |_| tcp("10.0.0.1", 1, "192.0.2.1", 1000 + port)))
            .collect();
        let report = feed(&plugin("top=2"), sessions);

        let section = report.section("TCP destination ports").unwrap();
        assert_eq!(section.labels(), ["1004", "1003"]);
        assert_eq!(section.unique, 5);
        // 1 + 2 + 3 sessions on the other ports
        assert_eq!(section.others, 6);
    }

    #[test]
    fn test_tables() {
        let report = feed(&plugin(""), vec![tcp("10.0.0.1", 1, "192.0.2.1", 443)]);
        let tables = report.tables();
        let text: String = tables.iter().map(|t| t.to_string()).collect();

        assert!(text.contains("Sessions matching filter"));
        assert!(text.contains("srcprefix=24,dstprefix=24"));
        assert!(text.contains("TCP destination ports"));
        assert!(text.contains("Bytes sent from source networks"));
        assert!(text.contains("1.00 kB"));
        // empty counters get no table
        assert!(!text.contains("UDP destination ports"));
        assert!(!text.contains("Incoming from tunnel"));
    }

    #[test]
    fn test_json_report() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("stats.json");
        let stats = plugin(&format!("file={},hide", path.display()));
        feed(&stats, vec![udp("10.0.0.1", 5353, "192.0.2.53", 53)]);
        stats.on_finished();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["matched_sessions"], 1);
        let protocols = value["sections"]
            .as_array()
            .unwrap()
            .iter()
            .find(|s| s["title"] == "Protocols")
            .unwrap();
        assert_eq!(protocols["unit"], "sessions");
        assert_eq!(protocols["rows"][0]["label"], "UDP");
        assert_eq!(protocols["rows"][0]["value"], 1);
    }

    #[test]
    fn test_human_bytes() {
        assert_eq!(human_bytes(999), "999 B");
        assert_eq!(human_bytes(1000), "1.00 kB");
        assert_eq!(human_bytes(2_500_000), "2.50 MB");
        assert_eq!(human_bytes(3_000_000_000_000), "3.00 TB");
    }
}
