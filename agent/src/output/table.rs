//! Human-readable output
//!
//! Snapshots print as aligned tables; streamed events print one line each.

use anyhow::Result;
use latscope_shared::utils::scsi::opcode_name;
use latscope_shared::utils::time::{nanos_to_micros, nanos_to_millis_f64};
use latscope_shared::{DiscreteEvent, Outcome};
use std::io::Write;

use crate::engine::Diagnostics;
use crate::exporter::{Presenter, Snapshot};

pub struct TablePresenter<W: Write + Send> {
    writer: W,
    header_written: bool,
}

impl<W: Write + Send> TablePresenter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            header_written: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// One line describing a streamed operation
pub fn describe(event: &DiscreteEvent) -> String {
    let latency = format!("{:>10.3}ms", nanos_to_millis_f64(event.delta_ns));

    match &event.outcome {
        Outcome::ScsiCommand {
            device,
            opcode,
            result,
        } => {
            let name = opcode_name(*opcode)
                .map(str::to_string)
                .unwrap_or_else(|| format!("0x{:02X}", opcode));
            let status = if event.outcome.is_success() {
                "OK".to_string()
            } else {
                format!("ERR 0x{:x}", result)
            };
            format!("{:<12} {:<24} {} {}", device.to_string(), name, latency, status)
        }
        Outcome::TcpReceive { usage_percent } => format!(
            "RX {:<20} {:>7} {:<16} {} rcvbuf {}%",
            event.key.to_string(),
            event.pid,
            event.comm.to_string(),
            latency,
            usage_percent
        ),
        Outcome::TcpTransmit => format!(
            "TX {:<20} {:>7} {:<16} {}",
            event.key.to_string(),
            event.pid,
            event.comm.to_string(),
            latency
        ),
        Outcome::Handshake {
            daddr,
            dport,
            handshake_ns,
            ttfb_ns,
            ..
        } => format!(
            "{:>7} {:<16} {:>21} handshake {:>8}us ttfb {:>8}us",
            event.pid,
            event.comm.to_string(),
            format!("{}:{}", daddr, dport),
            nanos_to_micros(*handshake_ns),
            nanos_to_micros(*ttfb_ns)
        ),
    }
}

impl<W: Write + Send> Presenter for TablePresenter<W> {
    fn snapshot(&mut self, snapshot: &Snapshot) -> Result<()> {
        writeln!(self.writer)?;
        write!(self.writer, "{}", snapshot.report)?;

        let dropped = snapshot.diagnostics.total_dropped();
        if dropped > 0 {
            writeln!(self.writer, "({} records dropped)", dropped)?;
        }
        self.writer.flush()?;
        Ok(())
    }

    fn event(&mut self, event: &DiscreteEvent) -> Result<()> {
        if !self.header_written {
            writeln!(self.writer, "{:<12} LATENCY", "OPERATION")?;
            self.header_written = true;
        }
        writeln!(self.writer, "{}", describe(event))?;
        self.writer.flush()?;
        Ok(())
    }

    fn finish(&mut self, diagnostics: &Diagnostics) -> Result<()> {
        writeln!(
            self.writer,
            "\norphans {}  clock anomalies {}  dropped {}",
            diagnostics.orphans,
            diagnostics.clock_anomalies,
            diagnostics.total_dropped()
        )?;
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use latscope_shared::{Comm, CorrelationKey, CorrelationState, ScsiAddr};
    use std::net::Ipv4Addr;

    #[test]
    fn test_describe_scsi_command() {
        let device = ScsiAddr {
            host: 2,
            channel: 0,
            id: 0,
            lun: 0,
        };
        let event = DiscreteEvent {
            timestamp: 0,
            key: CorrelationKey::ScsiCommand {
                device,
                opcode: 0x35,
            },
            delta_ns: 2_500_000,
            pid: 0,
            comm: Comm::default(),
            outcome: Outcome::ScsiCommand {
                device,
                opcode: 0x35,
                result: 0x2,
            },
        };

        let line = describe(&event);
        assert!(line.starts_with("2:0:0:0"));
        assert!(line.contains("2.500ms"));
        assert!(line.ends_with("ERR 0x2"));
    }

    #[test]
    fn test_describe_handshake() {
        let event = DiscreteEvent {
            timestamp: 0,
            key: CorrelationKey::Socket { sock: 1 },
            delta_ns: 400_000,
            pid: 31,
            comm: Comm::from("curl"),
            outcome: Outcome::Handshake {
                daddr: Ipv4Addr::new(10, 0, 0, 1),
                dport: 80,
                handshake_ns: 150_000,
                ttfb_ns: 400_000,
                since_established_ns: 250_000,
                state: CorrelationState::Complete,
            },
        };

        let line = describe(&event);
        assert!(line.contains("10.0.0.1:80"));
        assert!(line.contains("150us"));
        assert!(line.contains("400us"));
    }

    #[test]
    fn test_finish_prints_counters() {
        let mut presenter = TablePresenter::new(Vec::new());
        presenter
            .finish(&Diagnostics {
                orphans: 3,
                events_dropped: 2,
                ..Default::default()
            })
            .unwrap();

        let output = String::from_utf8(presenter.into_inner()).unwrap();
        assert!(output.contains("orphans 3"));
        assert!(output.contains("dropped 2"));
    }
}
