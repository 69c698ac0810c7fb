use {
    c9p::{
        client::{Session, StatChanges, dial, walk_names},
        error::Error,
        fcall::{Stat, dm, om},
        *,
    },
    clap::{Parser, Subcommand},
    tokio::io,
};

#[derive(Debug, Parser)]
#[command(about = "A 9P2000 command line client")]
struct Cli {
    /// proto!address!port
    /// where: proto = tcp | unix
    #[arg(short = 'a', long = "addr", default_value = "tcp!127.0.0.1!564")]
    addr: String,

    /// File tree to attach to
    #[arg(short = 'A', long = "aname", default_value = "/")]
    aname: String,

    /// User name to attach as
    #[arg(short = 'u', long = "uname", default_value = "none")]
    uname: String,

    /// Print every message sent and received
    #[arg(short = 'D', long = "debug")]
    debug: bool,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Stream a file's content to stdout
    Read { path: String },
    /// Stream stdin into a file, truncating it first
    Write { path: String },
    /// Print a file's metadata
    Stat { path: String },
    /// List a directory
    Ls { path: String },
    /// Create a file
    Create { path: String },
    /// Create a directory
    Mkdir { path: String },
    /// Remove a file or an empty directory
    Rm { path: String },
    /// Walk to a file and open it, printing the server's answer
    Open { path: String },
    /// Change a file's permission bits (octal)
    Chmod { mode: String, path: String },
}

/// Plan 9 style mode column, like `drwxr-xr-x`.
fn mode_str(mode: u32) -> String {
    let mut s = String::with_capacity(10);
    s.push(if mode & dm::DIR != 0 {
        'd'
    } else if mode & dm::APPEND != 0 {
        'a'
    } else {
        '-'
    });
    for shift in [6, 3, 0] {
        let bits = mode >> shift;
        s.push(if bits & dm::READ != 0 { 'r' } else { '-' });
        s.push(if bits & dm::WRITE != 0 { 'w' } else { '-' });
        s.push(if bits & dm::EXEC != 0 { 'x' } else { '-' });
    }
    s
}

fn print_stat(stat: &Stat) {
    println!(
        "{} {:>10} {:>10} {}",
        mode_str(stat.mode),
        stat.length,
        stat.mtime,
        stat.name
    );
}

async fn cmd_read(session: &mut Session, path: &str) -> Result<()> {
    let (fid, _) = session.walk(session.root(), path).await?;
    let (_, iounit) = session.open(fid, om::READ).await?;
    session.read_into(fid, iounit, &mut io::stdout()).await?;
    session.clunk(fid).await
}

async fn cmd_write(session: &mut Session, path: &str) -> Result<()> {
    let (fid, _) = session.walk(session.root(), path).await?;
    let (_, iounit) = session.open(fid, om::WRITE | om::TRUNC).await?;
    session.write_from(fid, iounit, &mut io::stdin()).await?;
    session.clunk(fid).await
}

async fn cmd_stat(session: &mut Session, path: &str) -> Result<()> {
    let (fid, _) = session.walk(session.root(), path).await?;
    let stat = session.stat(fid).await?;
    print_stat(&stat);
    session.clunk(fid).await
}

async fn cmd_ls(session: &mut Session, path: &str) -> Result<()> {
    let (fid, _) = session.walk(session.root(), path).await?;
    let stat = session.stat(fid).await?;

    if stat.is_dir() {
        let (_, iounit) = session.open(fid, om::READ).await?;
        for entry in session.read_dir(fid, iounit).await? {
            print_stat(&entry);
        }
    } else {
        print_stat(&stat);
    }
    session.clunk(fid).await
}

/// Walk to the parent of `path`, then create its last element there.
async fn cmd_create(session: &mut Session, path: &str, perm: u32, mode: u8) -> Result<()> {
    let mut names = walk_names(path);
    let name = names
        .pop()
        .ok_or_else(|| Error::InvalidArgument("create needs a file name".to_owned()))?;
    let parent = names.join("/");

    let (fid, _) = session.walk(session.root(), &parent).await?;
    match session.create(fid, &name, perm, mode).await {
        Ok(_) => session.clunk(fid).await,
        Err(e) => {
            // The fid still refers to the parent; release it
            let _ = session.clunk(fid).await;
            Err(e)
        }
    }
}

async fn cmd_rm(session: &mut Session, path: &str) -> Result<()> {
    let (fid, _) = session.walk(session.root(), path).await?;
    session.remove(fid).await
}

async fn cmd_open(session: &mut Session, path: &str) -> Result<()> {
    let (fid, qid) = session.walk(session.root(), path).await?;
    let (open_qid, iounit) = session.open(fid, om::READ).await?;
    println!(
        "walked qid ({:#x} {}), opened qid ({:#x} {}), iounit {}",
        qid.path, qid.version, open_qid.path, open_qid.version, iounit
    );
    session.clunk(fid).await
}

async fn cmd_chmod(session: &mut Session, mode: &str, path: &str) -> Result<()> {
    let perm = u32::from_str_radix(mode.trim_start_matches("0o"), 8)
        .map_err(|_| Error::InvalidArgument(format!("bad octal mode {:?}", mode)))?;

    let (fid, _) = session.walk(session.root(), path).await?;
    let changes = StatChanges {
        mode: Some(perm),
        ..Default::default()
    };
    session.wstat(fid, &changes).await?;
    session.clunk(fid).await
}

async fn npc_main(cli: Cli) -> Result<i32> {
    let (reader, writer) = dial(&cli.addr).await?;
    let mut session = Session::attach(reader, writer, &cli.uname, &cli.aname).await?;

    let result = match &cli.cmd {
        Cmd::Read { path } => cmd_read(&mut session, path).await,
        Cmd::Write { path } => cmd_write(&mut session, path).await,
        Cmd::Stat { path } => cmd_stat(&mut session, path).await,
        Cmd::Ls { path } => cmd_ls(&mut session, path).await,
        Cmd::Create { path } => cmd_create(&mut session, path, 0o644, om::WRITE).await,
        Cmd::Mkdir { path } => cmd_create(&mut session, path, 0o755 | dm::DIR, om::READ).await,
        Cmd::Rm { path } => cmd_rm(&mut session, path).await,
        Cmd::Open { path } => cmd_open(&mut session, path).await,
        Cmd::Chmod { mode, path } => cmd_chmod(&mut session, mode, path).await,
    };

    session.detach().await;
    result.and(Ok(0))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut builder = env_logger::Builder::from_default_env();
    if cli.debug {
        builder.filter_module("c9p::trace", log::LevelFilter::Debug);
    }
    builder.init();

    let exit_code = npc_main(cli).await.unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        -1
    });

    std::process::exit(exit_code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_column_renders_plan9_style() {
        assert_eq!(mode_str(0o755 | dm::DIR), "drwxr-xr-x");
        assert_eq!(mode_str(0o644), "-rw-r--r--");
        assert_eq!(mode_str(0o000), "----------");
    }

    #[test]
    fn chmod_rejects_non_octal() {
        assert!(u32::from_str_radix("rwx", 8).is_err());
        assert_eq!(u32::from_str_radix("644", 8).unwrap(), 0o644);
    }
}
