//! CLI surface and resolved runtime configuration.

use clap::Parser;

use crate::store::EngineConfig;

/// Logging mode: human-readable in development, JSON lines in
/// production.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Env {
    Dev,
    Prod,
}

/// Command-line arguments accepted by the binary.
#[derive(Debug, Parser)]
#[command(author, version, about = "sharded in-memory cache engine")]
pub struct Args {
    /// TCP port to listen on.
    #[arg(short, long, default_value_t = 11211)]
    pub port: u16,

    /// Soft memory ceiling across all shards, in megabytes.
    #[arg(short = 'm', long = "memory-mb", default_value_t = 64)]
    pub memory_mb: usize,

    /// Detach from the controlling terminal and run in the background.
    #[arg(short, long, default_value_t = false)]
    pub daemonize: bool,

    /// Number of shards in the store.
    #[arg(long, default_value_t = 64)]
    pub shards: usize,

    /// Logging mode.
    #[arg(long, value_enum, default_value_t = Env::Dev)]
    pub env: Env,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub daemonize: bool,
    pub env: Env,
    pub engine: EngineConfig,
}

/// Detaches the process from its controlling terminal: double fork,
/// new session, `chdir("/")`, and stdio redirected to `/dev/null`. Must
/// run before the tokio runtime is built — forking a multi-threaded
/// process is not safe.
pub fn daemonize() -> std::io::Result<()> {
    unsafe {
        match libc::fork() {
            -1 => return Err(std::io::Error::last_os_error()),
            0 => {}
            _ => std::process::exit(0),
        }

        if libc::setsid() == -1 {
            return Err(std::io::Error::last_os_error());
        }

        match libc::fork() {
            -1 => return Err(std::io::Error::last_os_error()),
            0 => {}
            _ => std::process::exit(0),
        }

        let root = std::ffi::CString::new("/").expect("no interior nul");
        libc::chdir(root.as_ptr());

        let dev_null = std::ffi::CString::new("/dev/null").expect("no interior nul");
        let fd = libc::open(dev_null.as_ptr(), libc::O_RDWR);
        if fd >= 0 {
            libc::dup2(fd, libc::STDIN_FILENO);
            libc::dup2(fd, libc::STDOUT_FILENO);
            libc::dup2(fd, libc::STDERR_FILENO);
            if fd > libc::STDERR_FILENO {
                libc::close(fd);
            }
        }
    }
    Ok(())
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Config {
            port: args.port,
            daemonize: args.daemonize,
            env: args.env,
            engine: EngineConfig {
                shard_count: args.shards.max(1),
                max_memory_bytes: Some(args.memory_mb * 1024 * 1024),
            },
        }
    }
}
