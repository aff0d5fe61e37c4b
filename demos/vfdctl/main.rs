//! `vfdctl` — a small CLI exercising [`vfd_mamont::Context`] end to end.
//!
//! Stands in for the "rest of the database" consumer the core spec treats
//! as an external collaborator (`spec.md` §1): it loads a config, opens a
//! process-lifetime `Context`, and drives a handful of operations a real
//! host would issue (open/write/close, an LRU-eviction walkthrough, and
//! an orphaned-temp-file sweep) from the command line.

use std::io;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use vfd_mamont::{Config, Context, RemoteFs, RemoteFsConnector};

#[derive(Parser)]
#[command(name = "vfdctl", about = "Drive the VFD layer from the command line")]
struct Cli {
    /// Path to a TOML config file; falls back to `Config::default()`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Open a local path, optionally write a payload, then close it.
    Open {
        path: String,
        #[arg(long)]
        create: bool,
        #[arg(long)]
        write: Option<String>,
    },
    /// Open N scratch files under a tight `max_safe_fds` budget and show
    /// which ones get LRU-evicted and transparently re-opened, matching
    /// `spec.md` §8 scenario 1.
    EvictionDemo {
        #[arg(long, default_value_t = 3)]
        max_safe_fds: usize,
        #[arg(long, default_value_t = 4)]
        files: usize,
    },
    /// Sweep orphaned `pgsql_tmp_*` files left behind by a prior,
    /// uncleanly-ended process.
    Sweep,
}

/// The remote back-end is an out-of-scope collaborator this demo does not
/// wire up — every remote path fails fast and loudly rather than pretend
/// to succeed.
struct NoRemoteConnector;

impl RemoteFsConnector for NoRemoteConnector {
    fn connect(&self, protocol: &str, host: &str, port: u16) -> io::Result<Box<dyn RemoteFs>> {
        Err(io::Error::other(format!(
            "vfdctl has no remote back-end wired up (tried {protocol}://{host}:{port})"
        )))
    }
}

type DynError = Box<dyn std::error::Error>;

fn main() -> Result<(), DynError> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    let mut ctx = Context::new(config, Box::new(NoRemoteConnector));
    ctx.init_file_access()?;

    match cli.command {
        Command::Open { path, create, write } => run_open(&mut ctx, &path, create, write),
        Command::EvictionDemo { max_safe_fds, files } => run_eviction_demo(&mut ctx, max_safe_fds, files),
        Command::Sweep => run_sweep(&ctx),
    }
}

fn run_open(ctx: &mut Context, path: &str, create: bool, write: Option<String>) -> Result<(), DynError> {
    let mut flags = libc::O_RDWR;
    if create {
        flags |= libc::O_CREAT;
    }
    let file = ctx.path_open(path, flags, 0o600, vfd_mamont::TOP_LEVEL_SUBXACT)?;
    if let Some(payload) = write {
        let n = ctx.file_write(file, payload.as_bytes())?;
        println!("wrote {n} bytes to {path}");
    }
    ctx.file_close(file)?;
    println!("closed {path}");
    Ok(())
}

fn run_eviction_demo(ctx: &mut Context, max_safe_fds: usize, files: usize) -> Result<(), DynError> {
    ctx.set_max_safe_fds(max_safe_fds);
    let dir = tempfile::TempDir::new()?;
    println!("scratch dir: {} (max_safe_fds={max_safe_fds})", dir.path().display());

    let mut handles = Vec::new();
    for i in 0..files {
        let path = dir.path().join(format!("f{i}")).to_string_lossy().into_owned();
        let file = ctx.path_open(&path, libc::O_CREAT | libc::O_RDWR, 0o600, 0)?;
        ctx.file_write(file, format!("payload-{i}").as_bytes())?;
        println!("opened f{i}");
        handles.push((path, file));
    }

    // Opening more files than `max_safe_fds` forces earlier handles to
    // have been LRU-evicted by now — the next read transparently
    // re-opens and reseeks each one regardless.
    for (path, file) in &handles {
        ctx.file_seek(*file, 0, vfd_mamont::SeekFrom::Set)?;
        let mut buf = vec![0u8; 32];
        let n = ctx.file_read(*file, &mut buf)?;
        println!("re-read {path}: {:?}", String::from_utf8_lossy(&buf[..n]));
    }

    for (_, file) in handles {
        ctx.file_close(file)?;
    }
    Ok(())
}

fn run_sweep(ctx: &Context) -> Result<(), DynError> {
    let removed = ctx.remove_pg_temp_files()?;
    println!("removed {removed} orphaned temp file(s)");
    Ok(())
}
