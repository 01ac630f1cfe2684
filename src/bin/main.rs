//! This is the main entry point of the volume shell.
//!
//! The program opens a FAT32 image and provides an interactive command-line interface to
//! browse and edit it, check its consistency and repair it. With `-c`, the given commands
//! are run and the program exits.

use clap::Parser;
use fat_repair::commands::{Command, HELP};
use fat_repair::traits::LayoutDisplay;
use fat_repair::{
    DirCursor, FATError, FATVol, FormatOptions, RootCluster, VolumeConfig, format_volume,
};
use log::{error, info, warn};
use std::{
    fs::File,
    io::{self, BufRead, Write},
    path::Path,
};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// FAT32 image to open
    image: String,
    /// Run the given commands, separated by ';', then exit
    #[clap(short)]
    command: Option<String>,
    #[clap(short, long)]
    quiet: bool,
    /// Increase the log level, repeat for more
    #[clap(short, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Refuse every change to the image
    #[clap(long)]
    read_only: bool,
    /// Use the root cluster stored in the boot sector instead of cluster 2
    #[clap(long)]
    honor_root_cluster: bool,
    /// Ignore long names whose checksum doesn't match their short record
    #[clap(long)]
    strict_lfn: bool,
    /// Directory of the root collecting the clusters recovered by `fix`
    #[clap(long, value_name = "NAME", default_value = "LOSTFOUND")]
    recovery_dir: String,
    /// Create an empty volume with that many clusters before opening the image
    #[clap(long, value_name = "CLUSTERS")]
    mkfs: Option<u32>,
}

/// Represents the runtime state of the program.
struct RunState {
    /// The opened volume.
    vol: FATVol<File>,
    /// The current directory.
    cwd: DirCursor,
    /// Absolute path of the current directory, for the prompt.
    path: String,
}

fn main() {
    let args = Args::parse();
    if let Err(err) = stderrlog::new()
        .module(module_path!())
        .module("fat_repair")
        .quiet(args.quiet)
        .verbosity(args.verbose as usize + 1)
        .init()
    {
        eprintln!("Logger setup failed: {err}");
    }

    if let Some(clusters) = args.mkfs {
        if let Err(err) = mkfs(Path::new(&args.image), clusters) {
            error!("{}: {err}", args.image);
            std::process::exit(1);
        }
    }

    let root_cluster = if args.honor_root_cluster {
        RootCluster::BootSector
    } else {
        RootCluster::Fixed
    };
    let config = VolumeConfig::default()
        .with_read_only(args.read_only)
        .with_root_cluster(root_cluster)
        .with_lfn_checksum(args.strict_lfn)
        .with_recovery_dir(&args.recovery_dir);

    let mut run_state = match open(Path::new(&args.image), config) {
        Ok(run_state) => run_state,
        Err(err) => {
            error!("{}: {err}", args.image);
            std::process::exit(1);
        }
    };

    if let Some(commands) = args.command {
        let mut failed = false;
        for line in commands.split(';') {
            match Command::from_string(line) {
                Command::Quit => break,
                cmd => failed |= !run(&mut run_state, cmd),
            }
        }
        std::process::exit(failed as i32);
    }

    let stdin = io::stdin();
    loop {
        print!("{}> ", run_state.path);
        if io::stdout().flush().is_err() {
            break;
        }

        let mut s = String::new();
        match stdin.lock().read_line(&mut s) {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                error!("Failed to read command: {err}");
                break;
            }
        }

        match Command::from_string(&s) {
            Command::Quit => break,
            cmd => {
                run(&mut run_state, cmd);
            }
        }
    }
}

fn mkfs(path: &Path, clusters: u32) -> Result<(), FATError> {
    let mut file = File::create(path)?;
    let geometry = format_volume(&mut file, &FormatOptions::default().with_clusters(clusters))?;
    info!(
        "Formatted {} with {clusters} clusters of {} bytes",
        path.display(),
        geometry.cluster_size()
    );
    Ok(())
}

fn open(path: &Path, config: VolumeConfig) -> Result<RunState, FATError> {
    let mut vol = FATVol::open(path, config)?;
    if !vol.is_writable() {
        warn!("{} is read-only, changes will be refused", path.display());
    }
    let cwd = vol.root_cursor()?;

    Ok(RunState {
        vol,
        cwd,
        path: String::from("/"),
    })
}

/// Runs one command, logging its failure. Returns whether it succeeded.
fn run(run_state: &mut RunState, cmd: Command) -> bool {
    let result = match cmd {
        Command::Ls { long, path } => list(run_state, long, path.as_deref()),
        Command::Cd(path) => change_dir(run_state, &path),
        Command::Md(path) => in_parent(run_state, &path, |vol, dir, name| {
            vol.create_dir(dir, name).map(|_| ())
        }),
        Command::Cf(path) => in_parent(run_state, &path, |vol, dir, name| {
            vol.create_file(dir, name, 0, 0).map(|_| ())
        }),
        Command::Rm(path) => in_parent(run_state, &path, |vol, dir, name| {
            let entry = dir.find(name)?.clone();
            vol.remove(dir, &entry)
        }),
        Command::Cat(path) => cat(run_state, &path),
        Command::Import { host, dir } => import(run_state, Path::new(&host), dir.as_deref()),
        Command::Export { path, host } => export(run_state, &path, Path::new(&host)),
        Command::Fschk => check(run_state),
        Command::Fix => run_state.vol.repair().and_then(|report| {
            println!("{report}");
            run_state.vol.refresh(&mut run_state.cwd)
        }),
        Command::Layout => {
            match run_state.vol.display_layout(3) {
                Ok(layout) => print!("{layout}"),
                Err(e) => error!("Print layout error: {e}"),
            }
            Ok(())
        }
        Command::Bpb => {
            print!("{}", run_state.vol.bpb());
            Ok(())
        }
        Command::Help => {
            println!("{HELP}");
            Ok(())
        }
        Command::Quit | Command::Empty => Ok(()),
        Command::Unknown(s) => {
            error!("Unknown command: {s:?}");
            return false;
        }
        Command::Invalid(s) => {
            error!("{s}");
            return false;
        }
    };

    match result {
        Ok(()) => true,
        Err(err) => {
            error!("{err}");
            false
        }
    }
}

/// Splits a path into its parent directory and last component.
fn split_path(path: &str) -> (&str, &str) {
    let path = path.trim_end_matches('/');
    match path.rsplit_once('/') {
        Some(("", name)) => ("/", name),
        Some((parent, name)) => (parent, name),
        None => ("", path),
    }
}

/// Opens a cursor on the directory designated by `path`, relative to the current one.
fn cursor_at(run_state: &mut RunState, path: &str) -> Result<DirCursor, FATError> {
    if path.is_empty() {
        return Ok(run_state.cwd.clone());
    }
    let dir = run_state.vol.resolve(&run_state.cwd, path)?;
    run_state.vol.change_dir(&dir)
}

/// Applies `op` to the last component of `path` inside its parent directory.
fn in_parent<F>(run_state: &mut RunState, path: &str, op: F) -> Result<(), FATError>
where
    F: FnOnce(&mut FATVol<File>, &mut DirCursor, &str) -> Result<(), FATError>,
{
    let (parent, name) = split_path(path);
    let mut dir = cursor_at(run_state, parent)?;
    op(&mut run_state.vol, &mut dir, name)?;
    run_state.vol.refresh(&mut run_state.cwd)
}

fn list(run_state: &mut RunState, long: bool, path: Option<&str>) -> Result<(), FATError> {
    let dir = cursor_at(run_state, path.unwrap_or(""))?;
    for entry in dir.entries() {
        if long {
            println!("{entry}");
        } else {
            println!("{}", entry.name());
        }
    }
    Ok(())
}

fn change_dir(run_state: &mut RunState, path: &str) -> Result<(), FATError> {
    run_state.cwd = cursor_at(run_state, path)?;

    let mut parts: Vec<&str> = if path.starts_with('/') {
        vec![]
    } else {
        run_state.path.split('/').filter(|p| !p.is_empty()).collect()
    };
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    run_state.path = format!("/{}", parts.join("/"));
    Ok(())
}

fn cat(run_state: &mut RunState, path: &str) -> Result<(), FATError> {
    let entry = run_state.vol.resolve(&run_state.cwd, path)?;
    let mut stdout = io::stdout().lock();
    for chunk in run_state.vol.read_file(&entry)? {
        stdout.write_all(&chunk?)?;
    }
    stdout.flush()?;
    Ok(())
}

fn import(run_state: &mut RunState, host: &Path, dir: Option<&str>) -> Result<(), FATError> {
    let name = host
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| FATError::InvalidName(host.display().to_string()))?;
    let file = File::open(host)?;

    let mut target = cursor_at(run_state, dir.unwrap_or(""))?;
    let entry = run_state.vol.write_new_file(&mut target, &name, file)?;
    info!("Imported {} bytes as {name:?}", entry.size());
    run_state.vol.refresh(&mut run_state.cwd)
}

fn export(run_state: &mut RunState, path: &str, host: &Path) -> Result<(), FATError> {
    let entry = run_state.vol.resolve(&run_state.cwd, path)?;
    let mut file = File::create(host)?;
    for chunk in run_state.vol.read_file(&entry)? {
        file.write_all(&chunk?)?;
    }
    info!("Exported {} bytes to {}", entry.size(), host.display());
    Ok(())
}

fn check(run_state: &mut RunState) -> Result<(), FATError> {
    let anomalies = run_state.vol.check()?;
    if anomalies.is_empty() {
        println!("fs is ok");
    }
    for anomaly in anomalies.iter() {
        println!("{anomaly}");
    }
    Ok(())
}
