//! Disk statistics collector
//!
//! Reads `/proc/diskstats` and emits read/write completion and byte
//! counters per physical device. Virtual devices (`loop*`, `ram*`, `dm-*`)
//! are skipped.

use sc_agent_types::{MetricFamily, MetricKind, MetricValue, Sample};

use crate::procfs::ProcPaths;
use crate::registry::{Collector, MetricDescriptor};
use crate::CollectError;

const DISKSTATS_FILE: &str = "diskstats";

/// Bytes per sector as reported by the kernel in diskstats.
const SECTOR_SIZE: f64 = 512.0;

pub struct DiskStatsCollector {
    procfs: ProcPaths,
}

impl DiskStatsCollector {
    pub fn new(procfs: ProcPaths) -> Self {
        Self { procfs }
    }
}

#[derive(Debug, PartialEq)]
struct DiskStats {
    device: String,
    reads_completed: f64,
    read_sectors: f64,
    writes_completed: f64,
    write_sectors: f64,
}

/// True for device names the collector ignores.
fn is_virtual_device(name: &str) -> bool {
    name.starts_with("loop") || name.starts_with("ram") || name.starts_with("dm-")
}

/// Parse `/proc/diskstats`. Columns after major/minor/name: reads
/// completed, reads merged, sectors read, read ms, writes completed,
/// writes merged, sectors written, ... Short or malformed lines are
/// skipped.
fn parse_diskstats(contents: &str) -> Vec<DiskStats> {
    let mut stats = Vec::new();
    for line in contents.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 10 {
            continue;
        }
        let device = fields[2];
        if is_virtual_device(device) {
            continue;
        }

        let parse = |idx: usize| fields[idx].parse::<f64>();
        let (Ok(reads_completed), Ok(read_sectors), Ok(writes_completed), Ok(write_sectors)) =
            (parse(3), parse(5), parse(7), parse(9))
        else {
            continue;
        };

        stats.push(DiskStats {
            device: device.to_string(),
            reads_completed,
            read_sectors,
            writes_completed,
            write_sectors,
        });
    }
    stats
}

impl Collector for DiskStatsCollector {
    fn name(&self) -> &'static str {
        "diskstats"
    }

    fn describe(&self) -> Vec<MetricDescriptor> {
        vec![
            MetricDescriptor {
                name: "node_disk_reads_completed_total",
                kind: MetricKind::Counter,
                help: "The total number of reads completed successfully.",
                variable_labels: &["device"],
            },
            MetricDescriptor {
                name: "node_disk_writes_completed_total",
                kind: MetricKind::Counter,
                help: "The total number of writes completed successfully.",
                variable_labels: &["device"],
            },
            MetricDescriptor {
                name: "node_disk_read_bytes_total",
                kind: MetricKind::Counter,
                help: "The total number of bytes read successfully.",
                variable_labels: &["device"],
            },
            MetricDescriptor {
                name: "node_disk_written_bytes_total",
                kind: MetricKind::Counter,
                help: "The total number of bytes written successfully.",
                variable_labels: &["device"],
            },
        ]
    }

    fn collect(&self) -> Result<Vec<MetricFamily>, CollectError> {
        let contents = self.procfs.read(DISKSTATS_FILE)?;
        let stats = parse_diskstats(&contents);

        let mut reads = MetricFamily::new(
            "node_disk_reads_completed_total",
            MetricKind::Counter,
            "The total number of reads completed successfully.",
        );
        let mut writes = MetricFamily::new(
            "node_disk_writes_completed_total",
            MetricKind::Counter,
            "The total number of writes completed successfully.",
        );
        let mut read_bytes = MetricFamily::new(
            "node_disk_read_bytes_total",
            MetricKind::Counter,
            "The total number of bytes read successfully.",
        );
        let mut written_bytes = MetricFamily::new(
            "node_disk_written_bytes_total",
            MetricKind::Counter,
            "The total number of bytes written successfully.",
        );

        for stat in stats {
            let sample = |value: f64| {
                Sample::new(MetricValue::Counter(value)).with_label("device", stat.device.clone())
            };
            reads.samples.push(sample(stat.reads_completed));
            writes.samples.push(sample(stat.writes_completed));
            read_bytes
                .samples
                .push(sample(stat.read_sectors * SECTOR_SIZE));
            written_bytes
                .samples
                .push(sample(stat.write_sectors * SECTOR_SIZE));
        }

        Ok(vec![reads, writes, read_bytes, written_bytes])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const DISKSTATS: &str = "\
   8       0 sda 1000 12 2048 500 2000 24 4096 900 0 600 1400\n\
   8       1 sda1 900 10 1800 450 1900 20 3800 850 0 550 1300\n\
   7       0 loop0 5 0 10 1 0 0 0 0 0 1 1\n\
   1       0 ram0 1 0 2 0 0 0 0 0 0 0 0\n\
 253       0 dm-0 800 0 1600 400 1700 0 3400 800 0 500 1200\n";

    fn proc_with_diskstats(contents: &str) -> (TempDir, ProcPaths) {
        let dir = TempDir::new().unwrap();
        let mut f = std::fs::File::create(dir.path().join("diskstats")).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        let procfs = ProcPaths::with_root(dir.path());
        (dir, procfs)
    }

    #[test]
    fn test_skips_virtual_devices() {
        let stats = parse_diskstats(DISKSTATS);
        let devices: Vec<_> = stats.iter().map(|s| s.device.as_str()).collect();
        assert_eq!(devices, vec!["sda", "sda1"]);
    }

    #[test]
    fn test_sector_to_byte_conversion() {
        let (_dir, procfs) = proc_with_diskstats(DISKSTATS);
        let families = DiskStatsCollector::new(procfs).collect().unwrap();

        let read_bytes = families
            .iter()
            .find(|f| f.name == "node_disk_read_bytes_total")
            .unwrap();
        let sda = read_bytes
            .samples
            .iter()
            .find(|s| s.labels["device"] == "sda")
            .unwrap();
        assert_eq!(sda.value, MetricValue::Counter(2048.0 * 512.0));

        let written_bytes = families
            .iter()
            .find(|f| f.name == "node_disk_written_bytes_total")
            .unwrap();
        let sda = written_bytes
            .samples
            .iter()
            .find(|s| s.labels["device"] == "sda")
            .unwrap();
        assert_eq!(sda.value, MetricValue::Counter(4096.0 * 512.0));
    }

    #[test]
    fn test_four_families_per_collection() {
        let (_dir, procfs) = proc_with_diskstats(DISKSTATS);
        let families = DiskStatsCollector::new(procfs).collect().unwrap();
        assert_eq!(families.len(), 4);
        for family in &families {
            assert_eq!(family.kind, MetricKind::Counter);
            assert_eq!(family.samples.len(), 2);
        }
    }

    #[test]
    fn test_short_lines_skipped() {
        let stats = parse_diskstats("8 0 sda 1000\n");
        assert!(stats.is_empty());
    }
}
