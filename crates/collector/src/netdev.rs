//! Network device collector
//!
//! Reads `/proc/net/dev` and emits receive/transmit byte and packet
//! counters per interface, skipping the loopback device.

use sc_agent_types::{MetricFamily, MetricKind, MetricValue, Sample};

use crate::procfs::ProcPaths;
use crate::registry::{Collector, MetricDescriptor};
use crate::CollectError;

const NET_DEV_FILE: &str = "net/dev";

pub struct NetDevCollector {
    procfs: ProcPaths,
}

impl NetDevCollector {
    pub fn new(procfs: ProcPaths) -> Self {
        Self { procfs }
    }
}

#[derive(Debug, PartialEq)]
struct InterfaceStats {
    device: String,
    rx_bytes: f64,
    rx_packets: f64,
    tx_bytes: f64,
    tx_packets: f64,
}

/// Parse `/proc/net/dev`. The first two lines are headers; data lines are
/// `iface: rx_bytes rx_packets ... (8 rx cols) tx_bytes tx_packets ...`.
fn parse_net_dev(contents: &str) -> Vec<InterfaceStats> {
    let mut stats = Vec::new();
    for line in contents.lines().skip(2) {
        let Some((device, rest)) = line.split_once(':') else {
            continue;
        };
        let device = device.trim();
        if device == "lo" {
            continue;
        }

        let fields: Vec<&str> = rest.split_whitespace().collect();
        if fields.len() < 10 {
            continue;
        }
        let parse = |idx: usize| fields[idx].parse::<f64>();
        let (Ok(rx_bytes), Ok(rx_packets), Ok(tx_bytes), Ok(tx_packets)) =
            (parse(0), parse(1), parse(8), parse(9))
        else {
            continue;
        };

        stats.push(InterfaceStats {
            device: device.to_string(),
            rx_bytes,
            rx_packets,
            tx_bytes,
            tx_packets,
        });
    }
    stats
}

impl Collector for NetDevCollector {
    fn name(&self) -> &'static str {
        "netdev"
    }

    fn describe(&self) -> Vec<MetricDescriptor> {
        vec![
            MetricDescriptor {
                name: "node_network_receive_bytes_total",
                kind: MetricKind::Counter,
                help: "Network device statistic receive_bytes.",
                variable_labels: &["device"],
            },
            MetricDescriptor {
                name: "node_network_transmit_bytes_total",
                kind: MetricKind::Counter,
                help: "Network device statistic transmit_bytes.",
                variable_labels: &["device"],
            },
            MetricDescriptor {
                name: "node_network_receive_packets_total",
                kind: MetricKind::Counter,
                help: "Network device statistic receive_packets.",
                variable_labels: &["device"],
            },
            MetricDescriptor {
                name: "node_network_transmit_packets_total",
                kind: MetricKind::Counter,
                help: "Network device statistic transmit_packets.",
                variable_labels: &["device"],
            },
        ]
    }

    fn collect(&self) -> Result<Vec<MetricFamily>, CollectError> {
        let contents = self.procfs.read(NET_DEV_FILE)?;
        let stats = parse_net_dev(&contents);

        let mut rx_bytes = MetricFamily::new(
            "node_network_receive_bytes_total",
            MetricKind::Counter,
            "Network device statistic receive_bytes.",
        );
        let mut tx_bytes = MetricFamily::new(
            "node_network_transmit_bytes_total",
            MetricKind::Counter,
            "Network device statistic transmit_bytes.",
        );
        let mut rx_packets = MetricFamily::new(
            "node_network_receive_packets_total",
            MetricKind::Counter,
            "Network device statistic receive_packets.",
        );
        let mut tx_packets = MetricFamily::new(
            "node_network_transmit_packets_total",
            MetricKind::Counter,
            "Network device statistic transmit_packets.",
        );

        for stat in stats {
            let sample = |value: f64| {
                Sample::new(MetricValue::Counter(value)).with_label("device", stat.device.clone())
            };
            rx_bytes.samples.push(sample(stat.rx_bytes));
            tx_bytes.samples.push(sample(stat.tx_bytes));
            rx_packets.samples.push(sample(stat.rx_packets));
            tx_packets.samples.push(sample(stat.tx_packets));
        }

        Ok(vec![rx_bytes, tx_bytes, rx_packets, tx_packets])
    }
}
