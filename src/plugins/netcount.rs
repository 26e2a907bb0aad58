//! Counts distinct source networks
//!
//! ```text
//! -p netcount                    /24 networks, sessions still printed
//! -p 'netcount|prefixlen=8,hide' only the summary is printed
//! ```
//!
//! Each session's network is stored as custom field `srcnet`, so it can be
//! filtered on with `custom srcnet = 10.1.1.0/24`.

use super::counter::{Counter, summary_table};
use super::{PluginArgs, PluginError, SessionHook};
use crate::parser::{CustomValue, Session};
use crate::request::{FieldGroup, FieldRequest};
use comfy_table::{Cell, Table};
use ipnet::IpNet;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const SOURCE_NETWORK_KEY: &str = "srcnet";

const DEFAULT_PREFIX_LEN: u8 = 24;
const TOP_NETWORKS: usize = 10;

#[derive(Debug, Default)]
struct Counts {
    total: u64,
    before_filter: Counter<IpNet>,
    after_filter: Counter<IpNet>,
}

/// Totals reported when the run ends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetCountSummary {
    pub total_sessions: u64,
    pub prefix_len: u8,
    pub unique_networks: usize,
    pub unique_matching: usize,
    /// Most frequent matching networks, largest first
    pub top_matching: Vec<(IpNet, u64)>,
}

#[derive(Debug)]
pub struct NetCount {
    prefix_len: u8,
    hide: bool,
    counts: Mutex<Counts>,
}

impl NetCount {
    pub fn new(prefix_len: u8, hide: bool, request: &mut FieldRequest) -> Self {
        request.request_many(&[FieldGroup::Peers, FieldGroup::Custom]);
        NetCount {
            prefix_len,
            hide,
            counts: Mutex::new(Counts::default()),
        }
    }

    pub fn from_args(args: &PluginArgs, request: &mut FieldRequest) -> Result<Self, PluginError> {
        args.allow_only(&["prefixlen", "hide"])?;
        let prefix_len = args.parsed("prefixlen", DEFAULT_PREFIX_LEN)?;
        if prefix_len > 32 {
            return Err(PluginError::InvalidParameter {
                plugin: "netcount".to_string(),
                parameter: "prefixlen".to_string(),
                value: prefix_len.to_string(),
            });
        }
        Ok(Self::new(prefix_len, args.flag("hide"), request))
    }

    fn lock(&self) -> MutexGuard<'_, Counts> {
        self.counts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn network(&self, session: &Session) -> Option<IpNet> {
        let ip = session.peers()?.src.ip?;
        IpNet::new(ip, self.prefix_len).ok().map(|net| net.trunc())
    }

    pub fn summary(&self) -> NetCountSummary {
        let counts = self.lock();
        NetCountSummary {
            total_sessions: counts.total,
            prefix_len: self.prefix_len,
            unique_networks: counts.before_filter.len(),
            unique_matching: counts.after_filter.len(),
            top_matching: counts.after_filter.top(TOP_NETWORKS).0,
        }
    }
}

impl SessionHook for NetCount {
    fn name(&self) -> &str {
        "netcount"
    }

    fn before_filter(&self, session: &mut Session) -> bool {
        let network = self.network(session);
        if let Some(net) = network {
            session.set_custom(SOURCE_NETWORK_KEY, CustomValue::Text(net.to_string()));
        }

        let mut counts = self.lock();
        counts.total += 1;
        if let Some(net) = network {
            counts.before_filter.add_one(net);
        }
        // hiding here would skip after_filter
        false
    }

    fn after_filter(&self, session: &mut Session) -> bool {
        if let Some(net) = self.network(session) {
            self.lock().after_filter.add_one(net);
        }
        self.hide
    }

    fn on_finished(&self) {
        eprintln!("{}", render_summary(&self.summary()));
    }
}

fn render_summary(summary: &NetCountSummary) -> Table {
    let mut table = summary_table("Source networks", "Value");

    table.add_row(vec![Cell::new("Total sessions"), Cell::new(summary.total_sessions)]);
    table.add_row(vec![
        Cell::new("Network prefix length"),
        Cell::new(summary.prefix_len),
    ]);
    table.add_row(vec![
        Cell::new("Total unique networks"),
        Cell::new(summary.unique_networks),
    ]);
    table.add_row(vec![
        Cell::new("Unique networks matching filter"),
        Cell::new(summary.unique_matching),
    ]);
    for (net, count) in &summary.top_matching {
        table.add_row(vec![Cell::new(net), Cell::new(count)]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{Endpoint, Hook};
    use std::collections::HashMap;

    fn session(src: &str) -> Session {
        Session {
            hooks: Some(vec![Hook {
                dir: "org".to_string(),
                src: Endpoint {
                    ip: Some(src.parse().unwrap()),
                    port: 1000,
                },
                ..Hook::default()
            }]),
            custom: Some(HashMap::new()),
            ..Session::default()
        }
    }

    #[test]
    fn test_requests_groups() {
        let mut request = FieldRequest::new();
        NetCount::new(24, false, &mut request);
        assert!(request.contains(FieldGroup::Peers));
        assert!(request.contains(FieldGroup::Custom));
    }

    #[test]
    fn test_counts_networks() {
        let mut request = FieldRequest::new();
        let plugin = NetCount::new(16, true, &mut request);

        for src in ["10.1.1.1", "10.1.200.7", "10.2.0.1", "192.168.5.5"] {
            let mut s = session(src);
            assert!(!plugin.before_filter(&mut s));
            if src.starts_with("10.1.") {
                assert!(plugin.after_filter(&mut s));
            }
        }

        let summary = plugin.summary();
        assert_eq!(summary.total_sessions, 4);
        assert_eq!(summary.unique_networks, 3);
        assert_eq!(summary.unique_matching, 1);
        assert_eq!(
            summary.top_matching,
            vec![("10.1.0.0/16".parse::<IpNet>().unwrap(), 2)]
        );
    }

    #[test]
    fn test_stores_source_network() {
        let mut request = FieldRequest::new();
        let plugin = NetCount::new(24, false, &mut request);
        let mut s = session("10.1.1.77");
        plugin.before_filter(&mut s);
        assert_eq!(
            s.custom_value(SOURCE_NETWORK_KEY),
            Some(&CustomValue::Text("10.1.1.0/24".to_string()))
        );
        assert!(!plugin.after_filter(&mut s));
    }

    #[test]
    fn test_rejects_long_prefix() {
        let mut request = FieldRequest::new();
        let args = PluginArgs::parse("netcount", "prefixlen=33");
        assert!(matches!(
            NetCount::from_args(&args, &mut request),
            Err(PluginError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_summary_table() {
        let mut request = FieldRequest::new();
        let plugin = NetCount::new(24, false, &mut request);
        plugin.before_filter(&mut session("10.0.0.1"));
        let text = render_summary(&plugin.summary()).to_string();
        assert!(text.contains("Total sessions"));
        assert!(text.contains("Unique networks matching filter"));
    }
}
