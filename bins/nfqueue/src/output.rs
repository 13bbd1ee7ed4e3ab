//! Output formatting for packets and log entries.

use std::io::{self, Write};

use nfnl::nflog::LogEntry;
use nfnl::nfqueue::Packet;
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Print one queued packet.
pub fn print_packet(packet: &Packet, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let value = json!({
                "queue": packet.queue_num(),
                "id": packet.id(),
                "hw_protocol": packet.hw_protocol(),
                "hook": packet.hook(),
                "mark": packet.mark(),
                "indev": packet.indev(),
                "outdev": packet.outdev(),
                "len": packet.payload().len(),
            });
            println!("{value}");
        }
        OutputFormat::Text => {
            let mut line = format!(
                "queue {} id {} proto 0x{:04x} hook {} len {}",
                packet.queue_num(),
                packet.id(),
                packet.hw_protocol(),
                packet.hook(),
                packet.payload().len()
            );
            if let Some(dev) = packet.indev() {
                line.push_str(&format!(" in {dev}"));
            }
            if let Some(dev) = packet.outdev() {
                line.push_str(&format!(" out {dev}"));
            }
            if let Some(mark) = packet.mark() {
                line.push_str(&format!(" mark 0x{mark:x}"));
            }
            println!("{line}");
        }
    }
}

/// Print one log entry.
pub fn print_entry(entry: &LogEntry, format: OutputFormat, prefix_only: bool) -> io::Result<()> {
    let mut out = io::stdout().lock();
    let prefix = entry.prefix.as_deref().unwrap_or("");

    if prefix_only {
        return match format {
            OutputFormat::Json => writeln!(out, "{}", json!({ "prefix": prefix })),
            OutputFormat::Text => writeln!(out, "{prefix}"),
        };
    }

    match format {
        OutputFormat::Json => {
            let value = json!({
                "entry": entry,
                "ipv4": entry.ipv4(),
            });
            writeln!(out, "{value}")
        }
        OutputFormat::Text => {
            write!(out, "group {} ", entry.group)?;
            if !prefix.is_empty() {
                write!(out, "{prefix:?} ")?;
            }
            match entry.ipv4() {
                Some(ip) => {
                    write!(out, "{} ", ip.src)?;
                    if let Some(port) = ip.src_port {
                        write!(out, "port {port} ")?;
                    }
                    write!(out, "> {} ", ip.dst)?;
                    if let Some(port) = ip.dst_port {
                        write!(out, "port {port} ")?;
                    }
                    writeln!(out, "proto {} len {}", ip.protocol, ip.total_len)
                }
                None => writeln!(out, "len {}", entry.payload.len()),
            }
        }
    }
}
