//! Wire response encoding.

use std::fmt::Write as _;

use crate::error::{EngineError, WireErrorClass};
use crate::store::entry::WIRE_FLAGS;
use crate::store::Stats;

pub fn stored() -> &'static [u8] {
    b"STORED\r\n"
}

pub fn deleted() -> &'static [u8] {
    b"DELETED\r\n"
}

pub fn not_found() -> &'static [u8] {
    b"NOT_FOUND\r\n"
}

pub fn ok() -> &'static [u8] {
    b"OK\r\n"
}

pub fn end() -> &'static [u8] {
    b"END\r\n"
}

/// `VALUE <key> <flags> <bytes>\r\n<data>\r\n`, flags always `0`.
pub fn value_block(key: &[u8], data: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(b"VALUE ");
    out.extend_from_slice(key);
    out.extend_from_slice(format!(" {WIRE_FLAGS} {}\r\n", data.len()).as_bytes());
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
}

pub fn engine_error(err: &EngineError, out: &mut Vec<u8>) {
    match err.wire_class() {
        WireErrorClass::NotFound => out.extend_from_slice(not_found()),
        class => {
            let _ = write!(
                StringSink(out),
                "{class} {err}\r\n"
            );
        }
    }
}

pub fn protocol_error(message: &str, out: &mut Vec<u8>) {
    let _ = write!(StringSink(out), "ERROR {message}\r\n");
}

pub fn client_error(message: &str, out: &mut Vec<u8>) {
    let _ = write!(StringSink(out), "CLIENT_ERROR {message}\r\n");
}

/// Renders the full `stats`/`END` block.
pub fn stats_block(stats: &Stats, out: &mut Vec<u8>) {
    stat_line("pid", stats.pid as u64, out);
    stat_line("uptime", stats.uptime_secs, out);
    stat_line("curr_items", stats.curr_items, out);
    stat_line("bytes", stats.bytes, out);
    stat_line("limit_maxbytes", stats.limit_maxbytes, out);
    stat_line("cmd_get", stats.cmd_get, out);
    stat_line("cmd_set", stats.cmd_set, out);
    stat_line("get_hits", stats.get_hits, out);
    stat_line("get_misses", stats.get_misses, out);
    stat_str("version", stats.version, out);
    stat_str("storage_mode", stats.storage_mode, out);
    stat_line("resize_in_progress", stats.resize_in_progress, out);
    stat_line("bloom_bits", stats.bloom_bits, out);
    stat_line("bloom_fill_pct", stats.bloom_fill_pct, out);
    out.extend_from_slice(end());
}

fn stat_line(name: &str, value: u64, out: &mut Vec<u8>) {
    let _ = write!(StringSink(out), "STAT {name} {value}\r\n");
}

fn stat_str(name: &str, value: &str, out: &mut Vec<u8>) {
    let _ = write!(StringSink(out), "STAT {name} {value}\r\n");
}

/// Lets `write!` target a `Vec<u8>` directly without an intermediate
/// `String` allocation for every line.
struct StringSink<'a>(&'a mut Vec<u8>);

impl std::fmt::Write for StringSink<'_> {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        self.0.extend_from_slice(s.as_bytes());
        Ok(())
    }
}
