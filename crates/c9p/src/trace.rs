//! Wire tracing in the style of Plan 9's `9p -D` output.
//!
//! Every message kind formats its own payload; there is no shared
//! positional-argument scheme to get out of sync with the wire layout.

use std::fmt;

use log::debug;

use crate::fcall::*;

/// Log a request on its way to the server.
pub fn sent(msg: &Msg) {
    debug!("→ {} tag={}", TraceFcall(&msg.body), msg.tag);
}

/// Log a response delivered to its caller.
pub fn received(msg: &Msg) {
    debug!("← {} tag={}", TraceFcall(&msg.body), msg.tag);
}

struct TraceQid<'a>(&'a Qid);

impl fmt::Display for TraceQid<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "({:#x} {} {:#04x})",
            self.0.path,
            self.0.version,
            self.0.typ.bits()
        )
    }
}

struct TraceFcall<'a>(&'a Fcall);

impl fmt::Display for TraceFcall<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self.0 {
            Fcall::Tversion { msize, ref version } => {
                write!(f, "Tversion msize={} version={:?}", msize, version)
            }
            Fcall::Rversion { msize, ref version } => {
                write!(f, "Rversion msize={} version={:?}", msize, version)
            }
            Fcall::Tauth {
                afid,
                ref uname,
                ref aname,
            } => write!(f, "Tauth afid={} uname={:?} aname={:?}", afid, uname, aname),
            Fcall::Rauth { ref aqid } => write!(f, "Rauth aqid={}", TraceQid(aqid)),
            Fcall::Tattach {
                fid,
                afid,
                ref uname,
                ref aname,
            } => {
                write!(f, "Tattach fid={} afid=", fid)?;
                if afid == NOFID {
                    write!(f, "<nofid>")?;
                } else {
                    write!(f, "{}", afid)?;
                }
                write!(f, " uname={:?} aname={:?}", uname, aname)
            }
            Fcall::Rattach { ref qid } => write!(f, "Rattach qid={}", TraceQid(qid)),
            Fcall::Rerror { ref ename } => write!(f, "Rerror ename={:?}", ename),
            Fcall::Tflush { oldtag } => write!(f, "Tflush oldtag={}", oldtag),
            Fcall::Rflush => write!(f, "Rflush"),
            Fcall::Twalk {
                fid,
                newfid,
                ref wnames,
            } => write!(f, "Twalk fid={} newfid={} wnames={:?}", fid, newfid, wnames),
            Fcall::Rwalk { ref wqids } => {
                write!(f, "Rwalk wqids=[")?;
                for (i, qid) in wqids.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", TraceQid(qid))?;
                }
                write!(f, "]")
            }
            Fcall::Topen { fid, mode } => write!(f, "Topen fid={} mode={:#o}", fid, mode),
            Fcall::Ropen { ref qid, iounit } => {
                write!(f, "Ropen qid={} iounit={}", TraceQid(qid), iounit)
            }
            Fcall::Tcreate {
                fid,
                ref name,
                perm,
                mode,
            } => write!(
                f,
                "Tcreate fid={} name={:?} perm={:#o} mode={:#o}",
                fid, name, perm, mode
            ),
            Fcall::Rcreate { ref qid, iounit } => {
                write!(f, "Rcreate qid={} iounit={}", TraceQid(qid), iounit)
            }
            Fcall::Tread { fid, offset, count } => {
                write!(f, "Tread fid={} offset={} count={}", fid, offset, count)
            }
            Fcall::Rread { ref data } => write!(f, "Rread count={}", data.0.len()),
            Fcall::Twrite {
                fid,
                offset,
                ref data,
            } => write!(
                f,
                "Twrite fid={} offset={} count={}",
                fid,
                offset,
                data.0.len()
            ),
            Fcall::Rwrite { count } => write!(f, "Rwrite count={}", count),
            Fcall::Tclunk { fid } => write!(f, "Tclunk fid={}", fid),
            Fcall::Rclunk => write!(f, "Rclunk"),
            Fcall::Tremove { fid } => write!(f, "Tremove fid={}", fid),
            Fcall::Rremove => write!(f, "Rremove"),
            Fcall::Tstat { fid } => write!(f, "Tstat fid={}", fid),
            Fcall::Rstat { ref stat } => write!(
                f,
                "Rstat name={:?} qid={} mode={:#o} length={}",
                stat.name,
                TraceQid(&stat.qid),
                stat.mode,
                stat.length
            ),
            Fcall::Twstat { fid, ref stat } => {
                write!(f, "Twstat fid={} mode={:#o}", fid, stat.mode)
            }
            Fcall::Rwstat => write!(f, "Rwstat"),
        }
    }
}
