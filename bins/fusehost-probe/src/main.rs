use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use fusehost::{get_context, DirFiller, FileSystem, FsResult, Host, HostConfig};
use fusehost_logging::LogConfig;
use fusehost_types::{Stat, Statfs, Timespec};
use serde::{Deserialize, Serialize};

/// Mounts a tiny read-only filesystem to check that the FUSE stack on this
/// machine works.
#[derive(Parser, Debug)]
#[command(name = "fusehost-probe", version, about)]
struct Args {
    /// Directory (or drive letter on Windows) to mount on
    mountpoint: Option<String>,

    /// Native mount options, comma separated; repeatable
    #[arg(short = 'o', value_name = "OPTIONS")]
    options: Vec<String>,

    /// Enable native debug output
    #[arg(short, long)]
    debug: bool,

    /// Serve requests from a single thread
    #[arg(short, long)]
    single_threaded: bool,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Dump default configuration and exit
    #[arg(long)]
    dump_default_config: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct ProbeConfig {
    log: LogConfig,
    host: HostConfig,
}

impl ProbeConfig {
    fn load(path: Option<&PathBuf>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}

const README: &[u8] = b"mounted by fusehost-probe\n";

/// Root directory holding a single read-only `README`.
struct ProbeFs {
    started: Timespec,
}

impl ProbeFs {
    fn new() -> Self {
        ProbeFs {
            started: Timespec::now(),
        }
    }

    fn owned(&self, mut st: Stat) -> Stat {
        st.set_times(self.started);
        if let Some(ctx) = get_context() {
            st.uid = *ctx.uid;
            st.gid = *ctx.gid;
        }
        st
    }
}

impl FileSystem for ProbeFs {
    fn init(&self) {
        tracing::info!("probe filesystem ready");
    }

    fn destroy(&self) {
        tracing::info!("probe filesystem released");
    }

    fn statfs(&self, _path: &str) -> FsResult<Statfs> {
        Ok(Statfs {
            bsize: 4096,
            frsize: 4096,
            blocks: 1,
            files: 2,
            namemax: 255,
            ..Default::default()
        })
    }

    fn getattr(&self, path: &str, _fh: Option<u64>) -> FsResult<Stat> {
        match path {
            "/" => Ok(self.owned(Stat::directory(0o555))),
            "/README" => Ok(self.owned(Stat::regular(0o444, README.len() as i64))),
            _ => Err(libc::ENOENT),
        }
    }

    fn open(&self, path: &str, flags: i32) -> FsResult<u64> {
        if path != "/README" {
            return Err(libc::ENOENT);
        }
        if flags & (libc::O_WRONLY | libc::O_RDWR) != 0 {
            return Err(libc::EACCES);
        }
        Ok(0)
    }

    fn read(&self, path: &str, buf: &mut [u8], offset: i64, _fh: u64) -> FsResult<usize> {
        if path != "/README" {
            return Err(libc::ENOENT);
        }
        let start = usize::try_from(offset).map_err(|_| libc::EINVAL)?.min(README.len());
        let n = buf.len().min(README.len() - start);
        buf[..n].copy_from_slice(&README[start..start + n]);
        Ok(n)
    }

    fn release(&self, _path: &str, _fh: u64) -> FsResult<()> {
        Ok(())
    }

    fn opendir(&self, path: &str) -> FsResult<u64> {
        match path {
            "/" => Ok(0),
            _ => Err(libc::ENOENT),
        }
    }

    fn readdir(&self, path: &str, fill: &mut DirFiller<'_>, _offset: i64, _fh: u64) -> FsResult<()> {
        if path != "/" {
            return Err(libc::ENOENT);
        }
        for name in [".", "..", "README"] {
            if !fill(name, None, 0) {
                break;
            }
        }
        Ok(())
    }

    fn releasedir(&self, _path: &str, _fh: u64) -> FsResult<()> {
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.dump_default_config {
        print!("{}", toml::to_string_pretty(&ProbeConfig::default())?);
        return Ok(());
    }

    let config = ProbeConfig::load(args.config.as_ref())?;
    let _guard = fusehost_logging::init_logging(&config.log).context("initializing logging")?;

    let mut options: Vec<&str> = Vec::new();
    if args.debug {
        options.push("-d");
    }
    if args.single_threaded {
        options.push("-s");
    }
    for o in &args.options {
        options.extend(["-o", o.as_str()]);
    }

    let mountpoint = args.mountpoint.unwrap_or_default();
    tracing::info!(mountpoint = %mountpoint, ?options, "starting fusehost probe");

    let host = Host::with_config(ProbeFs::new(), config.host);
    if !host.mount(&mountpoint, &options) {
        bail!("mount of {mountpoint:?} failed");
    }
    tracing::info!("probe unmounted cleanly");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_tree() {
        let fs = ProbeFs::new();
        assert!(fs.getattr("/", None).unwrap().is_dir());
        assert_eq!(fs.getattr("/README", None).unwrap().size, README.len() as i64);
        assert_eq!(fs.getattr("/missing", None), Err(libc::ENOENT));
        assert_eq!(fs.open("/README", libc::O_RDWR), Err(libc::EACCES));

        let mut buf = [0u8; 64];
        let n = fs.read("/README", &mut buf, 8, 0).unwrap();
        assert_eq!(&buf[..n], &README[8..]);

        let mut names = Vec::new();
        fs.readdir("/", &mut |name: &str, _: Option<&Stat>, _: i64| {
            names.push(name.to_string());
            true
        }, 0, 0)
        .unwrap();
        assert_eq!(names, vec![".", "..", "README"]);
    }

    #[test]
    fn test_config_sections() {
        let config: ProbeConfig = toml::from_str(
            r#"
            [log]
            level = "debug"

            [host]
            direct_io = true
            options = ["-o", "fsname=probe"]
            "#,
        )
        .unwrap();
        assert_eq!(config.log.level, "debug");
        assert!(config.host.direct_io);
        assert!(config.host.signal_unmount);
        assert_eq!(config.host.options, vec!["-o", "fsname=probe"]);
    }

    #[test]
    fn test_cli_collects_options() {
        let args = Args::parse_from(["fusehost-probe", "/mnt/p", "-o", "ro", "-o", "allow_other", "-d"]);
        assert_eq!(args.mountpoint.as_deref(), Some("/mnt/p"));
        assert_eq!(args.options, vec!["ro", "allow_other"]);
        assert!(args.debug && !args.single_threaded);
    }
}
