use crate::{error, fcall::NINEP_PORT};

pub type Result<T> = ::std::result::Result<T, error::Error>;

#[macro_export]
macro_rules! io_err {
    ($kind:ident, $msg:expr) => {
        ::std::io::Error::new(::std::io::ErrorKind::$kind, $msg)
    };
}

#[macro_export]
macro_rules! res {
    ($err:expr) => {
        Err(From::from($err))
    };
}

/// Parse a dial target of the form `[proto!]host[!port]`.
///
/// An omitted protocol defaults to tcp; `unix!` selects a local domain
/// socket whose remainder is the path; a tcp address without an explicit
/// port receives the 9P service port.
pub fn parse_dial(arg: &str) -> Option<(&'static str, String)> {
    if arg.is_empty() {
        return None;
    }

    if let Some(path) = arg.strip_prefix("unix!") {
        if path.is_empty() {
            return None;
        }
        return Some(("unix", path.to_owned()));
    }

    let mut split = arg.split('!');
    let (host, port) = match (split.next()?, split.next(), split.next()) {
        ("tcp", Some(host), port) => (host, port),
        (host, port, None) => (host, port),
        _ => return None,
    };
    if split.next().is_some() {
        return None;
    }
    if host.is_empty() {
        return None;
    }

    let port = match port {
        Some(p) => p.parse::<u16>().ok()?,
        None => NINEP_PORT,
    };

    Some(("tcp", format!("{}:{}", host, port)))
}
