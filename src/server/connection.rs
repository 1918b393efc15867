//! Per-connection read/write loop.
//!
//! Reads accumulate in a growing `BytesMut`; the parser is fed the whole
//! buffer and hands back complete commands, which supports pipelining
//! without any extra bookkeeping here. Responses accumulate in a plain
//! `Vec<u8>` output buffer and are flushed to the socket once they cross
//! a high-water mark, so a pipelined burst of `get`s doesn't do a syscall
//! per command.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::protocol::{response, Command, Parser};
use crate::store::Engine;

/// Flush the output buffer once it grows past this many bytes, rather
/// than on every response.
const HIGH_WATER_MARK: usize = 256 * 1024;

const INITIAL_READ_CAPACITY: usize = 8 * 1024;

pub async fn handle(
    mut socket: TcpStream,
    engine: Arc<Engine>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let mut read_buf = BytesMut::with_capacity(INITIAL_READ_CAPACITY);
    let mut write_buf: Vec<u8> = Vec::with_capacity(4 * 1024);
    let mut parser = Parser::new();

    loop {
        loop {
            match parser.parse(&mut read_buf) {
                Ok(Some(command)) => {
                    let is_quit = matches!(command, Command::Quit);
                    dispatch(&engine, command, &mut write_buf);
                    if is_quit {
                        flush(&mut socket, &mut write_buf).await?;
                        return Ok(());
                    }
                    if write_buf.len() >= HIGH_WATER_MARK {
                        flush(&mut socket, &mut write_buf).await?;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    debug!(component = "connection", %err, "protocol error");
                    if err.is_client_error() {
                        response::client_error(&err.to_string(), &mut write_buf);
                    } else {
                        response::protocol_error(&err.to_string(), &mut write_buf);
                    }
                    break;
                }
            }
        }

        flush(&mut socket, &mut write_buf).await?;

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                // Let the client's most recent command (already flushed
                // above) stand; just stop accepting more input.
                return Ok(());
            }
            read = socket.read_buf(&mut read_buf) => {
                match read {
                    Ok(0) => return Ok(()), // EOF
                    Ok(_) => {}
                    Err(err) => {
                        warn!(component = "connection", %err, "read failed");
                        return Err(err);
                    }
                }
            }
        }
    }
}

async fn flush(socket: &mut TcpStream, write_buf: &mut Vec<u8>) -> std::io::Result<()> {
    if write_buf.is_empty() {
        return Ok(());
    }
    socket.write_all(write_buf).await?;
    write_buf.clear();
    Ok(())
}

fn dispatch(engine: &Engine, command: Command, out: &mut Vec<u8>) {
    match command {
        Command::Get { key } => match engine.get(&key) {
            Some(value) => {
                response::value_block(&key, &value, out);
                out.extend_from_slice(response::end());
            }
            None => out.extend_from_slice(response::end()),
        },
        Command::Set { key, flags: _, exptime, data, noreply } => {
            let result = engine.set(&key, &data, exptime);
            if !noreply {
                match result {
                    Ok(()) => out.extend_from_slice(response::stored()),
                    Err(err) => response::engine_error(&err, out),
                }
            }
        }
        Command::Delete { key, noreply } => {
            let removed = engine.delete(&key);
            if !noreply {
                out.extend_from_slice(if removed { response::deleted() } else { response::not_found() });
            }
        }
        Command::Stats => response::stats_block(&engine.stats(), out),
        Command::FlushAll => {
            engine.flush_all();
            out.extend_from_slice(response::ok());
        }
        Command::Quit => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EngineConfig;

    fn engine() -> Arc<Engine> {
        Arc::new(Engine::new(EngineConfig { shard_count: 4, max_memory_bytes: None }))
    }

    #[test]
    fn get_miss_renders_end_only() {
        let engine = engine();
        let mut out = Vec::new();
        dispatch(&engine, Command::Get { key: b"x".to_vec() }, &mut out);
        assert_eq!(out, b"END\r\n");
    }

    #[test]
    fn set_then_get_renders_value_block() {
        let engine = engine();
        let mut out = Vec::new();
        dispatch(
            &engine,
            Command::Set { key: b"k".to_vec(), flags: 0, exptime: 0, data: b"v".to_vec(), noreply: false },
            &mut out,
        );
        assert_eq!(out, b"STORED\r\n");
        out.clear();
        dispatch(&engine, Command::Get { key: b"k".to_vec() }, &mut out);
        assert_eq!(out, b"VALUE k 0 1\r\nv\r\nEND\r\n");
    }

    #[test]
    fn noreply_set_emits_nothing() {
        let engine = engine();
        let mut out = Vec::new();
        dispatch(
            &engine,
            Command::Set { key: b"k".to_vec(), flags: 0, exptime: 0, data: b"v".to_vec(), noreply: true },
            &mut out,
        );
        assert!(out.is_empty());
    }

    #[test]
    fn delete_missing_key_is_not_found() {
        let engine = engine();
        let mut out = Vec::new();
        dispatch(&engine, Command::Delete { key: b"x".to_vec(), noreply: false }, &mut out);
        assert_eq!(out, b"NOT_FOUND\r\n");
    }
}
