//! Statistics display and formatting

use crate::loopback::LinkSnapshot;
use srt_buffers::stats::BufferSize;
use std::time::Duration;

/// Format bytes in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format bandwidth in human-readable form
pub fn format_bandwidth(bps: u64) -> String {
    const KBPS: u64 = 1000;
    const MBPS: u64 = KBPS * 1000;
    const GBPS: u64 = MBPS * 1000;

    if bps >= GBPS {
        format!("{:.2} Gbps", bps as f64 / GBPS as f64)
    } else if bps >= MBPS {
        format!("{:.2} Mbps", bps as f64 / MBPS as f64)
    } else if bps >= KBPS {
        format!("{:.2} Kbps", bps as f64 / KBPS as f64)
    } else {
        format!("{} bps", bps)
    }
}

/// Format duration in human-readable form
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Display link statistics
pub fn display_link_stats(snapshot: &LinkSnapshot) {
    let stats = &snapshot.stats;
    println!("\n┌─────────────────────────────────────────────────────────────┐");
    println!("│ LINK STATISTICS                                             │");
    println!("├─────────────────────────────────────────────────────────────┤");
    println!(
        "│ Elapsed:  {}                                              ",
        format_duration(snapshot.elapsed)
    );
    println!(
        "│ Messages: {} sent / {} delivered / {} dropped          ",
        stats.messages_sent, stats.messages_delivered, stats.messages_dropped
    );
    println!(
        "│ Packets:  {} sent / {} received / {} retransmitted     ",
        stats.packets_sent, stats.packets_received, stats.packets_retransmitted
    );
    println!(
        "│ Loss:     {} lost / {} rejected / {} skipped / {} NAK ranges",
        stats.packets_lost, stats.packets_rejected, stats.packets_skipped, stats.nak_ranges
    );
    println!(
        "│ Data:     {} delivered                                  ",
        format_bytes(stats.bytes_delivered)
    );
    println!("├─────────────────────────────────────────────────────────────┤");
    println!("│ BUFFERS                                                     │");
    println!("├─────────────────────────────────────────────────────────────┤");
    println!(
        "│ Send:     {} (avg {}), input rate {}",
        format_buffer(&snapshot.send_buffer),
        format_buffer(&snapshot.send_avg),
        format_bandwidth(snapshot.input_rate * 8)
    );
    println!(
        "│ Receive:  {}",
        format_buffer(&snapshot.recv_buffer)
    );
    println!(
        "│ Losses:   {} pending retransmission / {} awaited",
        snapshot.send_loss, snapshot.recv_loss
    );
    println!("│ {}", snapshot.fullness);
    println!("└─────────────────────────────────────────────────────────────┘");
}

/// Format a buffer occupancy snapshot
pub fn format_buffer(size: &BufferSize) -> String {
    format!(
        "{} pkts, {}, {} ms",
        size.packets,
        format_bytes(size.bytes as u64),
        size.timespan_ms
    )
}

/// Display compact stats on one line (for continuous updates)
pub fn display_compact_stats(snapshot: &LinkSnapshot) {
    let stats = &snapshot.stats;
    let secs = snapshot.elapsed.as_secs_f64();
    let throughput_bps = if secs > 0.0 {
        (stats.bytes_delivered as f64 * 8.0 / secs) as u64
    } else {
        0
    };

    print!(
        "\r[{:8}] Delivered: {} | Rate: {} | Lost: {} | Rexmit: {} | Recv buf: {} pkts         ",
        format_duration(snapshot.elapsed),
        format_bytes(stats.bytes_delivered),
        format_bandwidth(throughput_bps),
        stats.packets_lost,
        stats.packets_retransmitted,
        snapshot.recv_buffer.packets
    );

    use std::io::Write;
    let _ = std::io::stdout().flush();
}
