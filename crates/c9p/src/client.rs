//! Asynchronous client side 9P library.
//!
//! # Protocol
//! 9P2000

use {
    crate::{
        error,
        fcall::*,
        io_err, res, serialize, trace,
        utils::{self, Result},
    },
    bytes::buf::{Buf, BufMut},
    futures::sink::SinkExt,
    log::{error, warn},
    std::{
        collections::{HashMap, HashSet},
        sync::Arc,
    },
    tokio::{
        io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
        net::{TcpStream, UnixStream},
        sync::{Mutex, oneshot},
    },
    tokio_stream::StreamExt,
    tokio_util::codec::{FramedWrite, length_delimited::LengthDelimitedCodec},
};

/// Read half of the transport as the dispatcher consumes it.
pub type TransportRead = Box<dyn AsyncRead + Send + Unpin>;
/// Write half of the transport as the dispatcher consumes it.
pub type TransportWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// Dial a 9P server.
///
/// The target syntax is `[proto!]host[!port]`; see [`utils::parse_dial`].
pub async fn dial(addr: &str) -> Result<(TransportRead, TransportWrite)> {
    let (proto, target) = utils::parse_dial(addr)
        .ok_or_else(|| io_err!(InvalidInput, "Invalid protocol or address"))?;

    match proto {
        "tcp" => {
            let stream = TcpStream::connect(&target).await?;
            let (readhalf, writehalf) = stream.into_split();
            Ok((Box::new(readhalf), Box::new(writehalf)))
        }
        "unix" => {
            let stream = UnixStream::connect(&target).await?;
            let (readhalf, writehalf) = tokio::io::split(stream);
            Ok((Box::new(readhalf), Box::new(writehalf)))
        }
        _ => res!(io_err!(InvalidInput, "Protocol not supported")),
    }
}

#[derive(Default)]
struct Pending {
    /// In-flight transactions waiting for the response bearing their tag
    transactions: HashMap<u16, oneshot::Sender<Msg>>,
    next_tag: u16,
    /// Set once the transport dies; every later rpc fails immediately
    dead: Option<String>,
}

/// Transaction dispatch over one 9P connection.
///
/// Allocates a tag per request, sends the encoded message, and suspends the
/// caller until the demultiplexer task delivers the response with the same
/// tag. The reference CLI issues one transaction at a time, but tags are
/// tracked independently so that `flush` and future concurrent callers work.
pub struct Dispatcher {
    writer: Mutex<FramedWrite<TransportWrite, LengthDelimitedCodec>>,
    pending: Arc<Mutex<Pending>>,
}

impl Dispatcher {
    /// Take ownership of a connected transport and start the response
    /// demultiplexer.
    pub fn new(reader: TransportRead, writer: TransportWrite) -> Dispatcher {
        let mut framedread = LengthDelimitedCodec::builder()
            .length_field_offset(0)
            .length_field_length(4)
            .length_adjustment(-4)
            .little_endian()
            .new_read(reader);
        let framedwrite = LengthDelimitedCodec::builder()
            .length_field_offset(0)
            .length_field_length(4)
            .length_adjustment(-4)
            .little_endian()
            .new_write(writer);

        let pending = Arc::new(Mutex::new(Pending::default()));

        let demux_pending = pending.clone();
        tokio::spawn(async move {
            let why = loop {
                let bytes = match framedread.next().await {
                    Some(Ok(bytes)) => bytes,
                    Some(Err(e)) => break e.to_string(),
                    None => break "connection closed by server".to_owned(),
                };

                let msg = match serialize::read_msg(&mut bytes.reader()) {
                    Ok(msg) => msg,
                    Err(e) => break format!("undecodable message: {}", e),
                };
                trace::received(&msg);

                let mut pending = demux_pending.lock().await;
                match pending.transactions.remove(&msg.tag) {
                    Some(tx) => {
                        // A flushed transaction may complete anyway; the
                        // receiver is simply gone by then.
                        let _ = tx.send(msg);
                    }
                    None => warn!("response with unknown tag {}", msg.tag),
                }
            };

            error!("transport lost: {}", why);
            let mut pending = demux_pending.lock().await;
            pending.dead = Some(why);
            // Dropping the senders wakes every waiting caller with an error
            pending.transactions.clear();
        });

        Dispatcher {
            writer: Mutex::new(framedwrite),
            pending,
        }
    }

    fn alloc_tag(&self, pending: &mut Pending) -> u16 {
        loop {
            let tag = pending.next_tag;
            pending.next_tag = pending.next_tag.wrapping_add(1);
            if tag != NOTAG && !pending.transactions.contains_key(&tag) {
                return tag;
            }
        }
    }

    /// Send one request and wait for the matching tagged response.
    ///
    /// `Rerror` becomes [`error::Error::Server`]; the transaction is never
    /// retried. `Tversion` travels under `NOTAG` per the protocol.
    pub async fn rpc(&self, body: Fcall) -> Result<Fcall> {
        let is_version = matches!(body, Fcall::Tversion { .. });

        let (tx, rx) = oneshot::channel();
        let tag = {
            let mut pending = self.pending.lock().await;
            if let Some(ref why) = pending.dead {
                return res!(io_err!(ConnectionAborted, why.clone()));
            }
            let tag = if is_version {
                NOTAG
            } else {
                self.alloc_tag(&mut pending)
            };
            pending.transactions.insert(tag, tx);
            tag
        };

        let msg = Msg { tag, body };
        if let Err(e) = self.send(&msg).await {
            let mut pending = self.pending.lock().await;
            pending.transactions.remove(&tag);
            return Err(e);
        }

        let resp = match rx.await {
            Ok(resp) => resp,
            Err(_) => {
                let pending = self.pending.lock().await;
                let why = pending
                    .dead
                    .clone()
                    .unwrap_or_else(|| "transaction abandoned".to_owned());
                return res!(io_err!(ConnectionAborted, why));
            }
        };

        match resp.body {
            Fcall::Rerror { ename } => Err(error::Error::Server(ename)),
            body => Ok(body),
        }
    }

    /// Cancel an outstanding transaction.
    ///
    /// After `Rflush` the old tag is free for reuse; whoever was waiting on
    /// it observes an aborted transaction.
    pub async fn flush(&self, oldtag: u16) -> Result<()> {
        match self.rpc(Fcall::Tflush { oldtag }).await? {
            Fcall::Rflush => {
                let mut pending = self.pending.lock().await;
                pending.transactions.remove(&oldtag);
                Ok(())
            }
            other => Err(unexpected("Rflush", &other)),
        }
    }

    async fn send(&self, msg: &Msg) -> Result<()> {
        trace::sent(msg);

        let mut writer = bytes::BytesMut::with_capacity(4096).writer();
        serialize::write_msg(&mut writer, msg)?;
        let frozen = writer.into_inner().freeze();

        let mut framedwrite = self.writer.lock().await;
        framedwrite.send(frozen).await?;
        Ok(())
    }
}

fn unexpected(expected: &'static str, got: &Fcall) -> error::Error {
    error::Error::UnexpectedResponse {
        expected,
        got: format!("{:?}", MsgType::from(got)),
    }
}

/// Client-side handle allocator.
///
/// Fids are handed out from a counter that never reuses a value within a
/// run; `NOFID` is reserved. Each live fid remembers the qid the server
/// bound it to and whether it has been opened, so clone-walks can report a
/// real identity and remove can check its open precondition. Teardown
/// drains whatever is still live.
struct FidPool {
    next: u32,
    live: HashMap<u32, Qid>,
    open: HashSet<u32>,
}

impl FidPool {
    fn new() -> FidPool {
        FidPool {
            next: 0,
            live: HashMap::new(),
            open: HashSet::new(),
        }
    }

    fn allocate(&mut self) -> u32 {
        let fid = self.next;
        self.next += 1;
        self.live.insert(fid, Qid::default());
        fid
    }

    fn bind(&mut self, fid: u32, qid: Qid) {
        if let Some(slot) = self.live.get_mut(&fid) {
            *slot = qid;
        }
    }

    fn qid_of(&self, fid: u32) -> Option<Qid> {
        self.live.get(&fid).copied()
    }

    fn mark_open(&mut self, fid: u32) {
        self.open.insert(fid);
    }

    fn is_open(&self, fid: u32) -> bool {
        self.open.contains(&fid)
    }

    fn retire(&mut self, fid: u32) -> bool {
        self.open.remove(&fid);
        self.live.remove(&fid).is_some()
    }

    fn drain(&mut self) -> Vec<u32> {
        self.open.clear();
        let mut fids: Vec<u32> = self.live.drain().map(|(fid, _)| fid).collect();
        fids.sort_unstable_by(|a, b| b.cmp(a)); // root (0) released last
        fids
    }
}

/// Intended field changes for a wstat.
///
/// Only the set fields reach the wire as real values; everything else is
/// first re-read from the server so untouched metadata survives the
/// round trip unchanged.
#[derive(Clone, Debug, Default)]
pub struct StatChanges {
    pub mode: Option<u32>,
    pub name: Option<String>,
    pub length: Option<u64>,
    pub mtime: Option<u32>,
}

/// One negotiated 9P connection: version, attached root, fid table.
///
/// Operations take `&mut self`; the session is single-owner, which is the
/// concurrency model the protocol engine assumes. State that would need a
/// lock under concurrent use (the fid table) is mutated at every
/// transaction boundary.
pub struct Session {
    dispatcher: Dispatcher,
    msize: u32,
    version: String,
    fids: FidPool,
    root: u32,
}

impl Session {
    /// Negotiate the protocol and attach to the named file tree.
    ///
    /// Proposes [`DEFAULT_MSIZE`]; the effective message size is the
    /// minimum of the proposal and the server's answer. A version response
    /// other than `9P2000` is fatal. The auth sub-protocol is not spoken:
    /// `afid` is always `NOFID`.
    pub async fn attach(
        reader: TransportRead,
        writer: TransportWrite,
        uname: &str,
        aname: &str,
    ) -> Result<Session> {
        let dispatcher = Dispatcher::new(reader, writer);

        let (msize, version) = match dispatcher
            .rpc(Fcall::Tversion {
                msize: DEFAULT_MSIZE,
                version: P92000.to_owned(),
            })
            .await?
        {
            Fcall::Rversion { msize, version } => (msize, version),
            other => return Err(unexpected("Rversion", &other)),
        };

        if version != P92000 {
            return res!(io_err!(
                InvalidData,
                format!("server speaks {:?}, not {}", version, P92000)
            ));
        }
        let msize = msize.min(DEFAULT_MSIZE);
        if msize <= IOHDRSZ {
            return res!(io_err!(
                InvalidData,
                format!("negotiated msize {} leaves no room for data", msize)
            ));
        }

        let mut fids = FidPool::new();
        let root = fids.allocate();

        match dispatcher
            .rpc(Fcall::Tattach {
                fid: root,
                afid: NOFID,
                uname: uname.to_owned(),
                aname: aname.to_owned(),
            })
            .await?
        {
            Fcall::Rattach { qid } => fids.bind(root, qid),
            other => return Err(unexpected("Rattach", &other)),
        }

        Ok(Session {
            dispatcher,
            msize,
            version,
            fids,
            root,
        })
    }

    /// The negotiated maximum message size.
    pub fn msize(&self) -> u32 {
        self.msize
    }

    /// The negotiated protocol version string.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The fid bound to the attached tree root.
    pub fn root(&self) -> u32 {
        self.root
    }

    /// Largest data payload a single read or write transaction may carry.
    pub fn iohdr_limit(&self) -> u32 {
        self.msize - IOHDRSZ
    }

    fn clamp_iounit(&self, iounit: u32) -> u32 {
        if iounit == 0 || iounit > self.iohdr_limit() {
            self.iohdr_limit()
        } else {
            iounit
        }
    }

    /// Resolve `path` relative to `base`, binding a fresh fid to the final
    /// element.
    ///
    /// The whole ordered name list travels in one `Twalk`; an empty path is
    /// a clone-walk of `base`. A response resolving fewer elements than
    /// requested leaves no fid bound and names the failing depth.
    pub async fn walk(&mut self, base: u32, path: &str) -> Result<(u32, Qid)> {
        let wnames = walk_names(path);
        let wanted = wnames.len();
        let newfid = self.fids.allocate();

        let wqids = match self
            .dispatcher
            .rpc(Fcall::Twalk {
                fid: base,
                newfid,
                wnames,
            })
            .await
        {
            Ok(Fcall::Rwalk { wqids }) => wqids,
            Ok(other) => {
                self.fids.retire(newfid);
                return Err(unexpected("Rwalk", &other));
            }
            Err(e) => {
                self.fids.retire(newfid);
                return Err(e);
            }
        };

        if wqids.len() < wanted {
            // The server did not bind newfid; nothing to clunk
            self.fids.retire(newfid);
            return Err(error::Error::WalkShort {
                wanted,
                got: wqids.len(),
            });
        }

        // A clone-walk returns no qids; the clone shares the base's identity
        let qid = match wqids.last() {
            Some(&qid) => qid,
            None => self.fids.qid_of(base).unwrap_or_default(),
        };
        self.fids.bind(newfid, qid);
        Ok((newfid, qid))
    }

    /// Open a walked fid. Returns the qid and the transfer unit to use,
    /// already clamped to the negotiated message size.
    pub async fn open(&mut self, fid: u32, mode: u8) -> Result<(Qid, u32)> {
        match self.dispatcher.rpc(Fcall::Topen { fid, mode }).await? {
            Fcall::Ropen { qid, iounit } => {
                self.fids.bind(fid, qid);
                self.fids.mark_open(fid);
                Ok((qid, self.clamp_iounit(iounit)))
            }
            other => Err(unexpected("Ropen", &other)),
        }
    }

    /// Create `name` in the directory `dirfid` refers to.
    ///
    /// On success the dir fid becomes the fid of the created object, open
    /// in `mode`. Directory creation sets [`dm::DIR`] in `perm`.
    pub async fn create(
        &mut self,
        dirfid: u32,
        name: &str,
        perm: u32,
        mode: u8,
    ) -> Result<(Qid, u32)> {
        if name.is_empty() || name.contains('/') {
            return Err(error::Error::InvalidArgument(format!(
                "bad create name {:?}",
                name
            )));
        }

        match self
            .dispatcher
            .rpc(Fcall::Tcreate {
                fid: dirfid,
                name: name.to_owned(),
                perm,
                mode,
            })
            .await?
        {
            Fcall::Rcreate { qid, iounit } => {
                self.fids.bind(dirfid, qid);
                self.fids.mark_open(dirfid);
                Ok((qid, self.clamp_iounit(iounit)))
            }
            other => Err(unexpected("Rcreate", &other)),
        }
    }

    async fn read_at(&mut self, fid: u32, offset: u64, count: u32) -> Result<Vec<u8>> {
        match self
            .dispatcher
            .rpc(Fcall::Tread { fid, offset, count })
            .await?
        {
            Fcall::Rread { data } => Ok(data.0),
            other => Err(unexpected("Rread", &other)),
        }
    }

    /// Chunked read streaming each chunk into `sink` as it arrives.
    /// Returns the total byte count.
    pub async fn read_into<W>(&mut self, fid: u32, iounit: u32, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let buf = self.read_loop(fid, iounit, Some(sink), false).await?;
        debug_assert!(buf.1.is_empty());
        Ok(buf.0)
    }

    /// Chunked read materializing the whole object in order.
    pub async fn read_to_end(&mut self, fid: u32, iounit: u32) -> Result<Vec<u8>> {
        let sink: Option<&mut tokio::io::Sink> = None;
        let (_, buf) = self.read_loop(fid, iounit, sink, true).await?;
        Ok(buf)
    }

    /// Chunked read doing both: stream chunks into `sink` and also return
    /// the materialized sequence.
    pub async fn read_tee<W>(&mut self, fid: u32, iounit: u32, sink: &mut W) -> Result<Vec<u8>>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let (_, buf) = self.read_loop(fid, iounit, Some(sink), true).await?;
        Ok(buf)
    }

    /// The transfer loop shared by every read policy.
    ///
    /// Offsets advance by exactly the byte count of the previous response;
    /// a zero-byte response is the end-of-data signal, never an error.
    async fn read_loop<W>(
        &mut self,
        fid: u32,
        iounit: u32,
        mut sink: Option<&mut W>,
        collect: bool,
    ) -> Result<(u64, Vec<u8>)>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let count = self.clamp_iounit(iounit);
        let mut total: u64 = 0;
        let mut collected = Vec::new();

        let mut offset: u64 = 0;
        loop {
            let chunk = self.read_at(fid, offset, count).await?;
            if chunk.is_empty() {
                break;
            }

            offset += chunk.len() as u64;
            total += chunk.len() as u64;

            if let Some(ref mut w) = sink {
                w.write_all(&chunk).await?;
            }
            if collect {
                collected.extend_from_slice(&chunk);
            }
        }

        if let Some(ref mut w) = sink {
            w.flush().await?;
        }

        Ok((total, collected))
    }

    /// Chunked write pulling iounit-sized blocks from `source` until it is
    /// exhausted. A response counting fewer bytes than were sent is a short
    /// write and aborts the transfer.
    pub async fn write_from<R>(&mut self, fid: u32, iounit: u32, source: &mut R) -> Result<u64>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let block = self.clamp_iounit(iounit) as usize;
        let mut buf = vec![0u8; block];
        let mut offset: u64 = 0;

        loop {
            let n = source.read(&mut buf).await?;
            if n == 0 {
                break;
            }

            let count = match self
                .dispatcher
                .rpc(Fcall::Twrite {
                    fid,
                    offset,
                    data: Data(buf[..n].to_vec()),
                })
                .await?
            {
                Fcall::Rwrite { count } => count,
                other => return Err(unexpected("Rwrite", &other)),
            };

            if count as usize != n {
                return Err(error::Error::ShortWrite {
                    requested: n as u32,
                    written: count,
                });
            }
            offset += count as u64;
        }

        Ok(offset)
    }

    /// Full metadata of a walked fid.
    pub async fn stat(&mut self, fid: u32) -> Result<Stat> {
        match self.dispatcher.rpc(Fcall::Tstat { fid }).await? {
            Fcall::Rstat { stat } => Ok(stat),
            other => Err(unexpected("Rstat", &other)),
        }
    }

    /// Overlay `changes` on the fid's current metadata and send the result.
    ///
    /// Fields the caller leaves unset are re-sent with their current values
    /// (strings) or the wstat sentinel (integers wstat cannot change), so
    /// nothing is cleared by accident.
    pub async fn wstat(&mut self, fid: u32, changes: &StatChanges) -> Result<()> {
        let current = self.stat(fid).await?;

        let mut stat = Stat::nulled();
        stat.name = changes.name.clone().unwrap_or(current.name);
        stat.uid = current.uid;
        stat.gid = current.gid;
        stat.muid = current.muid;
        if let Some(mode) = changes.mode {
            stat.mode = mode;
        }
        if let Some(length) = changes.length {
            stat.length = length;
        }
        if let Some(mtime) = changes.mtime {
            stat.mtime = mtime;
        }

        match self.dispatcher.rpc(Fcall::Twstat { fid, stat }).await? {
            Fcall::Rwstat => Ok(()),
            other => Err(unexpected("Rwstat", &other)),
        }
    }

    /// Remove the object the fid refers to.
    ///
    /// Removal wants the fid open read-write; a fid that has not been
    /// opened yet is opened with [`om::RDWR`] first. The server releases
    /// the fid whether or not the remove succeeds; the fid is retired here
    /// and must not be clunked afterwards.
    pub async fn remove(&mut self, fid: u32) -> Result<()> {
        if !self.fids.is_open(fid) {
            self.open(fid, om::RDWR).await?;
        }
        self.fids.retire(fid);
        match self.dispatcher.rpc(Fcall::Tremove { fid }).await? {
            Fcall::Rremove => Ok(()),
            other => Err(unexpected("Rremove", &other)),
        }
    }

    /// Release a fid. Exactly once per allocated fid; remove does it
    /// implicitly.
    pub async fn clunk(&mut self, fid: u32) -> Result<()> {
        if !self.fids.retire(fid) {
            return Err(error::Error::InvalidArgument(format!(
                "fid {} is not live",
                fid
            )));
        }
        match self.dispatcher.rpc(Fcall::Tclunk { fid }).await? {
            Fcall::Rclunk => Ok(()),
            other => Err(unexpected("Rclunk", &other)),
        }
    }

    /// Cancel the transaction issued under `oldtag`.
    pub async fn flush(&mut self, oldtag: u16) -> Result<()> {
        self.dispatcher.flush(oldtag).await
    }

    /// Decode a directory's read buffer into its entries, in server order.
    ///
    /// The fid must be an open directory. Listing requires the materialized
    /// read policy: records may straddle chunk boundaries only in the sense
    /// that the server never splits one, but decoding still wants the whole
    /// buffer.
    pub async fn read_dir(&mut self, fid: u32, iounit: u32) -> Result<Vec<Stat>> {
        let buf = self.read_to_end(fid, iounit).await?;

        let mut entries = Vec::new();
        for stat in serialize::DirReader::new(&buf) {
            entries.push(stat?);
        }
        Ok(entries)
    }

    /// Release every fid still live and consume the session.
    ///
    /// Failures are logged, not returned: teardown is best-effort on every
    /// exit path.
    pub async fn detach(mut self) {
        for fid in self.fids.drain() {
            if let Err(e) = self.dispatcher.rpc(Fcall::Tclunk { fid }).await {
                error!("clunk of fid {} during detach failed: {}", fid, e);
            }
        }
    }
}

/// Split a slash-delimited path into walk elements.
///
/// Leading and trailing slashes, repeated slashes and surrounding
/// whitespace vanish; the root path produces the empty list (a clone-walk).
pub fn walk_names(path: &str) -> Vec<String> {
    path.trim()
        .trim_matches('/')
        .split('/')
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialize::{Decodable, Encodable};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn walk_names_normalizes() {
        assert_eq!(walk_names("/adir/afile"), vec!["adir", "afile"]);
        assert_eq!(walk_names("adir//afile/"), vec!["adir", "afile"]);
        assert!(walk_names("/").is_empty());
        assert!(walk_names("  ").is_empty());
    }

    /// In-memory 9P2000 server good enough to exercise the client.
    ///
    /// Paths are slash-joined strings with "" for the root. Every node gets
    /// a stable qid path number in creation order.
    struct TestServer {
        nodes: HashMap<String, TestNode>,
        fids: HashMap<u32, String>,
        open_bufs: HashMap<u32, Vec<u8>>,
        next_qid: u64,
        msize: u32,
        version: String,
        counters: Arc<Counters>,
    }

    struct TestNode {
        qid: Qid,
        perm: u32,
        data: Vec<u8>,
        /// Forces Rwrite to claim half the bytes, for short-write tests
        lies_about_writes: bool,
    }

    #[derive(Default)]
    struct Counters {
        reads: AtomicUsize,
        opens: AtomicUsize,
        clunks: AtomicUsize,
        removes: AtomicUsize,
    }

    impl TestServer {
        fn new() -> TestServer {
            let mut srv = TestServer {
                nodes: HashMap::new(),
                fids: HashMap::new(),
                open_bufs: HashMap::new(),
                next_qid: 0,
                msize: 4096,
                version: P92000.to_owned(),
                counters: Arc::new(Counters::default()),
            };
            srv.add_dir("");
            srv
        }

        fn alloc_qid(&mut self, dir: bool) -> Qid {
            self.next_qid += 1;
            Qid {
                typ: if dir { QidType::DIR } else { QidType::FILE },
                version: 0,
                path: self.next_qid,
            }
        }

        fn add_dir(&mut self, path: &str) {
            let qid = self.alloc_qid(true);
            self.nodes.insert(
                path.to_owned(),
                TestNode {
                    qid,
                    perm: 0o755 | dm::DIR,
                    data: Vec::new(),
                    lies_about_writes: false,
                },
            );
        }

        fn add_file(&mut self, path: &str, data: Vec<u8>) {
            let qid = self.alloc_qid(false);
            self.nodes.insert(
                path.to_owned(),
                TestNode {
                    qid,
                    perm: 0o644,
                    data,
                    lies_about_writes: false,
                },
            );
        }

        fn stat_of(&self, path: &str) -> Stat {
            let node = &self.nodes[path];
            let name = match path.rsplit('/').next() {
                Some("") | None => "/".to_owned(),
                Some(last) => last.to_owned(),
            };
            Stat {
                typ: 0,
                dev: 0,
                qid: node.qid,
                mode: node.perm,
                atime: 1234567890,
                mtime: 1234567890,
                length: node.data.len() as u64,
                name,
                uid: "glenda".to_owned(),
                gid: "glenda".to_owned(),
                muid: "glenda".to_owned(),
            }
        }

        fn dir_bytes(&self, path: &str) -> Vec<u8> {
            let prefix = if path.is_empty() {
                String::new()
            } else {
                format!("{}/", path)
            };
            let mut children: Vec<&String> = self
                .nodes
                .keys()
                .filter(|p| {
                    !p.is_empty()
                        && p.starts_with(&prefix)
                        && !p[prefix.len()..].contains('/')
                })
                .collect();
            children.sort();

            let mut buf = Vec::new();
            for child in children {
                self.stat_of(child).encode(&mut buf).unwrap();
            }
            buf
        }

        fn handle(&mut self, body: Fcall) -> Fcall {
            match body {
                Fcall::Tversion { msize, version } => {
                    if version != P92000 {
                        return Fcall::Rversion {
                            msize,
                            version: VERSION_UNKNOWN.to_owned(),
                        };
                    }
                    Fcall::Rversion {
                        msize: msize.min(self.msize),
                        version: self.version.clone(),
                    }
                }
                Fcall::Tattach { fid, .. } => {
                    self.fids.insert(fid, String::new());
                    Fcall::Rattach {
                        qid: self.nodes[""].qid,
                    }
                }
                Fcall::Twalk {
                    fid,
                    newfid,
                    wnames,
                } => {
                    let base = match self.fids.get(&fid) {
                        Some(p) => p.clone(),
                        None => return rerror("unknown fid"),
                    };
                    let mut path = base;
                    let mut wqids = Vec::new();
                    for (i, name) in wnames.iter().enumerate() {
                        let next = if path.is_empty() {
                            name.clone()
                        } else {
                            format!("{}/{}", path, name)
                        };
                        match self.nodes.get(&next) {
                            Some(node) => wqids.push(node.qid),
                            None if i == 0 => return rerror("file not found"),
                            None => return Fcall::Rwalk { wqids },
                        }
                        path = next;
                    }
                    self.fids.insert(newfid, path);
                    Fcall::Rwalk { wqids }
                }
                Fcall::Topen { fid, mode: _ } => {
                    self.counters.opens.fetch_add(1, Ordering::SeqCst);
                    let path = match self.fids.get(&fid) {
                        Some(p) => p.clone(),
                        None => return rerror("unknown fid"),
                    };
                    let node = &self.nodes[&path];
                    let qid = node.qid;
                    let buf = if qid.typ.contains(QidType::DIR) {
                        self.dir_bytes(&path)
                    } else {
                        node.data.clone()
                    };
                    self.open_bufs.insert(fid, buf);
                    Fcall::Ropen { qid, iounit: 0 }
                }
                Fcall::Tcreate {
                    fid,
                    name,
                    perm,
                    mode: _,
                } => {
                    let base = match self.fids.get(&fid) {
                        Some(p) => p.clone(),
                        None => return rerror("unknown fid"),
                    };
                    let path = if base.is_empty() {
                        name.clone()
                    } else {
                        format!("{}/{}", base, name)
                    };
                    if self.nodes.contains_key(&path) {
                        return rerror("file exists");
                    }
                    let dir = perm & dm::DIR != 0;
                    let qid = self.alloc_qid(dir);
                    self.nodes.insert(
                        path.clone(),
                        TestNode {
                            qid,
                            perm,
                            data: Vec::new(),
                            lies_about_writes: false,
                        },
                    );
                    self.fids.insert(fid, path);
                    self.open_bufs.insert(fid, Vec::new());
                    Fcall::Rcreate { qid, iounit: 0 }
                }
                Fcall::Tread { fid, offset, count } => {
                    self.counters.reads.fetch_add(1, Ordering::SeqCst);
                    let buf = match self.open_bufs.get(&fid) {
                        Some(b) => b,
                        None => return rerror("fid not open"),
                    };
                    let start = (offset as usize).min(buf.len());
                    let end = (start + count as usize).min(buf.len());
                    Fcall::Rread {
                        data: Data(buf[start..end].to_vec()),
                    }
                }
                Fcall::Twrite { fid, offset, data } => {
                    let path = match self.fids.get(&fid) {
                        Some(p) => p.clone(),
                        None => return rerror("unknown fid"),
                    };
                    if !self.open_bufs.contains_key(&fid) {
                        return rerror("fid not open");
                    }
                    let node = self.nodes.get_mut(&path).unwrap();
                    if node.lies_about_writes {
                        return Fcall::Rwrite {
                            count: (data.0.len() / 2) as u32,
                        };
                    }
                    let end = offset as usize + data.0.len();
                    if node.data.len() < end {
                        node.data.resize(end, 0);
                    }
                    node.data[offset as usize..end].copy_from_slice(&data.0);
                    Fcall::Rwrite {
                        count: data.0.len() as u32,
                    }
                }
                Fcall::Tstat { fid } => {
                    let path = match self.fids.get(&fid) {
                        Some(p) => p.clone(),
                        None => return rerror("unknown fid"),
                    };
                    Fcall::Rstat {
                        stat: self.stat_of(&path),
                    }
                }
                Fcall::Twstat { fid, stat } => {
                    let path = match self.fids.get(&fid) {
                        Some(p) => p.clone(),
                        None => return rerror("unknown fid"),
                    };
                    let node = self.nodes.get_mut(&path).unwrap();
                    if stat.mode != !0 {
                        node.perm = stat.mode;
                    }
                    Fcall::Rwstat
                }
                Fcall::Tremove { fid } => {
                    self.counters.removes.fetch_add(1, Ordering::SeqCst);
                    let path = match self.fids.remove(&fid) {
                        Some(p) => p,
                        None => return rerror("unknown fid"),
                    };
                    // The fid is released either way, but removal itself
                    // wants the fid open
                    if self.open_bufs.remove(&fid).is_none() {
                        return rerror("fid not open");
                    }
                    self.nodes.remove(&path);
                    Fcall::Rremove
                }
                Fcall::Tclunk { fid } => {
                    self.counters.clunks.fetch_add(1, Ordering::SeqCst);
                    if self.fids.remove(&fid).is_none() {
                        return rerror("unknown fid");
                    }
                    self.open_bufs.remove(&fid);
                    Fcall::Rclunk
                }
                Fcall::Tflush { oldtag: _ } => Fcall::Rflush,
                _ => rerror("operation not supported"),
            }
        }
    }

    fn rerror(msg: &str) -> Fcall {
        Fcall::Rerror {
            ename: msg.to_owned(),
        }
    }

    /// Spawn the scripted server on an in-memory duplex transport and hand
    /// back a connected session plus the server's transaction counters.
    async fn serve(mut srv: TestServer) -> (Session, Arc<Counters>) {
        let counters = srv.counters.clone();
        let (client_side, server_side) = tokio::io::duplex(64 * 1024);
        let (srv_read, srv_write) = tokio::io::split(server_side);

        tokio::spawn(async move {
            let mut framedread = LengthDelimitedCodec::builder()
                .length_field_offset(0)
                .length_field_length(4)
                .length_adjustment(-4)
                .little_endian()
                .new_read(srv_read);
            let mut framedwrite = LengthDelimitedCodec::builder()
                .length_field_offset(0)
                .length_field_length(4)
                .length_adjustment(-4)
                .little_endian()
                .new_write(srv_write);

            while let Some(Ok(bytes)) = framedread.next().await {
                let msg: Msg = Decodable::decode(&mut Cursor::new(&bytes[..])).unwrap();
                let reply = Msg {
                    tag: msg.tag,
                    body: srv.handle(msg.body),
                };
                let mut buf = Vec::new();
                reply.encode(&mut buf).unwrap();
                if framedwrite.send(bytes::Bytes::from(buf)).await.is_err() {
                    break;
                }
            }
        });

        let (cl_read, cl_write) = tokio::io::split(client_side);
        let session = Session::attach(Box::new(cl_read), Box::new(cl_write), "glenda", "/")
            .await
            .expect("attach failed");
        (session, counters)
    }

    fn populated() -> TestServer {
        let mut srv = TestServer::new();
        srv.add_dir("adir");
        srv.add_file("adir/afile", b"hello from afile".to_vec());
        srv.add_file("adir/bfile", b"b".to_vec());
        srv.add_file("big", vec![7u8; 10_000]);
        srv
    }

    #[tokio::test]
    async fn attach_negotiates_min_msize() {
        let (session, _) = serve(populated()).await;
        assert_eq!(session.msize(), 4096);
        assert_eq!(session.version(), P92000);
        session.detach().await;
    }

    #[tokio::test]
    async fn incompatible_version_is_fatal() {
        let mut srv = TestServer::new();
        srv.version = "9P1999".to_owned();

        let (client_side, server_side) = tokio::io::duplex(64 * 1024);
        let (srv_read, srv_write) = tokio::io::split(server_side);
        tokio::spawn(async move {
            let mut framedread = LengthDelimitedCodec::builder()
                .length_field_offset(0)
                .length_field_length(4)
                .length_adjustment(-4)
                .little_endian()
                .new_read(srv_read);
            let mut framedwrite = LengthDelimitedCodec::builder()
                .length_field_offset(0)
                .length_field_length(4)
                .length_adjustment(-4)
                .little_endian()
                .new_write(srv_write);
            if let Some(Ok(bytes)) = framedread.next().await {
                let msg: Msg = Decodable::decode(&mut Cursor::new(&bytes[..])).unwrap();
                let reply = Msg {
                    tag: msg.tag,
                    body: Fcall::Rversion {
                        msize: 4096,
                        version: srv.version.clone(),
                    },
                };
                let mut buf = Vec::new();
                reply.encode(&mut buf).unwrap();
                let _ = framedwrite.send(bytes::Bytes::from(buf)).await;
            }
        });

        let (cl_read, cl_write) = tokio::io::split(client_side);
        match Session::attach(Box::new(cl_read), Box::new(cl_write), "glenda", "/").await {
            Err(e) => assert!(e.to_string().contains("9P1999"), "{}", e),
            Ok(_) => panic!("attach accepted an incompatible version"),
        }
    }

    #[tokio::test]
    async fn undersized_msize_is_rejected() {
        let (client_side, server_side) = tokio::io::duplex(64 * 1024);
        let (srv_read, srv_write) = tokio::io::split(server_side);
        tokio::spawn(async move {
            let mut framedread = LengthDelimitedCodec::builder()
                .length_field_offset(0)
                .length_field_length(4)
                .length_adjustment(-4)
                .little_endian()
                .new_read(srv_read);
            let mut framedwrite = LengthDelimitedCodec::builder()
                .length_field_offset(0)
                .length_field_length(4)
                .length_adjustment(-4)
                .little_endian()
                .new_write(srv_write);
            if let Some(Ok(bytes)) = framedread.next().await {
                let msg: Msg = Decodable::decode(&mut Cursor::new(&bytes[..])).unwrap();
                let reply = Msg {
                    tag: msg.tag,
                    // Smaller than the read/write header itself
                    body: Fcall::Rversion {
                        msize: 16,
                        version: P92000.to_owned(),
                    },
                };
                let mut buf = Vec::new();
                reply.encode(&mut buf).unwrap();
                let _ = framedwrite.send(bytes::Bytes::from(buf)).await;
            }
        });

        let (cl_read, cl_write) = tokio::io::split(client_side);
        match Session::attach(Box::new(cl_read), Box::new(cl_write), "glenda", "/").await {
            Err(e) => assert!(e.to_string().contains("msize"), "{}", e),
            Ok(_) => panic!("attach accepted an unusable msize"),
        }
    }

    #[tokio::test]
    async fn independent_walks_bind_distinct_fids_to_one_qid() {
        let (mut session, _) = serve(populated()).await;
        let root = session.root();

        let (fid1, qid1) = session.walk(root, "adir/afile").await.unwrap();
        let (fid2, qid2) = session.walk(root, "adir/afile").await.unwrap();

        assert_ne!(fid1, fid2);
        assert_eq!(qid1, qid2);

        session.clunk(fid1).await.unwrap();
        session.clunk(fid2).await.unwrap();
        session.detach().await;
    }

    #[tokio::test]
    async fn clone_walk_of_root_resolves_no_elements() {
        let (mut session, _) = serve(populated()).await;
        let root = session.root();

        let (clone, qid) = session.walk(root, "/").await.unwrap();
        assert_ne!(clone, root);
        // The clone is a real handle: stat through it works
        let stat = session.stat(clone).await.unwrap();
        assert_eq!(stat.name, "/");
        // And it reports the identity the attach bound, not a made-up qid
        assert_eq!(qid, stat.qid);

        session.clunk(clone).await.unwrap();
        session.detach().await;
    }

    #[tokio::test]
    async fn partial_walk_names_the_failing_depth() {
        let (mut session, _) = serve(populated()).await;
        let root = session.root();

        match session.walk(root, "adir/missing/deeper").await {
            Err(error::Error::WalkShort { wanted: 3, got: 1 }) => {}
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
        session.detach().await;
    }

    #[tokio::test]
    async fn chunked_read_materializes_exact_length() {
        let (mut session, counters) = serve(populated()).await;
        let root = session.root();

        let (fid, _) = session.walk(root, "big").await.unwrap();
        let (_, iounit) = session.open(fid, om::READ).await.unwrap();
        assert_eq!(iounit, session.msize() - IOHDRSZ);

        let reads_before = counters.reads.load(Ordering::SeqCst);
        let data = session.read_to_end(fid, iounit).await.unwrap();
        let reads = counters.reads.load(Ordering::SeqCst) - reads_before;

        assert_eq!(data.len(), 10_000);
        assert!(data.iter().all(|&b| b == 7));
        // ceil(10000 / iounit) data-bearing reads plus one terminal zero-byte read
        assert_eq!(reads, 10_000usize.div_ceil(iounit as usize) + 1);

        session.clunk(fid).await.unwrap();
        session.detach().await;
    }

    #[tokio::test]
    async fn read_tee_streams_and_materializes() {
        let (mut session, _) = serve(populated()).await;
        let root = session.root();

        let (fid, _) = session.walk(root, "adir/afile").await.unwrap();
        let (_, iounit) = session.open(fid, om::READ).await.unwrap();

        let mut streamed = Vec::new();
        let collected = session.read_tee(fid, iounit, &mut streamed).await.unwrap();
        assert_eq!(collected, b"hello from afile");
        assert_eq!(streamed, collected);

        session.clunk(fid).await.unwrap();
        session.detach().await;
    }

    #[tokio::test]
    async fn chunked_write_round_trips() {
        let (mut session, _) = serve(populated()).await;
        let root = session.root();

        let (fid, _) = session.walk(root, "adir/bfile").await.unwrap();
        let (_, iounit) = session.open(fid, om::WRITE).await.unwrap();

        let payload = vec![3u8; 9000];
        let mut source = Cursor::new(payload.clone());
        let written = session.write_from(fid, iounit, &mut source).await.unwrap();
        assert_eq!(written, 9000);
        session.clunk(fid).await.unwrap();

        let (fid, _) = session.walk(root, "adir/bfile").await.unwrap();
        let (_, iounit) = session.open(fid, om::READ).await.unwrap();
        let data = session.read_to_end(fid, iounit).await.unwrap();
        assert_eq!(data, payload);

        session.clunk(fid).await.unwrap();
        session.detach().await;
    }

    #[tokio::test]
    async fn short_write_is_an_error() {
        let mut srv = populated();
        srv.add_file("shorty", Vec::new());
        srv.nodes.get_mut("shorty").unwrap().lies_about_writes = true;

        let (mut session, _) = serve(srv).await;
        let root = session.root();

        let (fid, _) = session.walk(root, "shorty").await.unwrap();
        let (_, iounit) = session.open(fid, om::WRITE).await.unwrap();

        let mut source = Cursor::new(vec![1u8; 100]);
        match session.write_from(fid, iounit, &mut source).await {
            Err(error::Error::ShortWrite {
                requested: 100,
                written: 50,
            }) => {}
            other => panic!("unexpected result: {:?}", other),
        }

        session.clunk(fid).await.unwrap();
        session.detach().await;
    }

    #[tokio::test]
    async fn wstat_overlays_only_requested_fields() {
        let (mut session, _) = serve(populated()).await;
        let root = session.root();

        let (fid, _) = session.walk(root, "adir/afile").await.unwrap();
        let before = session.stat(fid).await.unwrap();

        let changes = StatChanges {
            mode: Some(0o600),
            ..Default::default()
        };
        session.wstat(fid, &changes).await.unwrap();

        let after = session.stat(fid).await.unwrap();
        assert_eq!(after.mode, 0o600);
        assert_eq!(after.name, before.name);
        assert_eq!(after.uid, before.uid);
        assert_eq!(after.gid, before.gid);
        assert_eq!(after.muid, before.muid);

        session.clunk(fid).await.unwrap();
        session.detach().await;
    }

    #[tokio::test]
    async fn create_binds_fresh_qid() {
        let (mut session, _) = serve(populated()).await;
        let root = session.root();

        let (dirfid, dirqid) = session.walk(root, "adir").await.unwrap();
        let (qid, _) = session
            .create(dirfid, "newfile", 0o644, om::WRITE)
            .await
            .unwrap();
        assert_ne!(qid, dirqid);
        session.clunk(dirfid).await.unwrap();

        let (fid, walked_qid) = session.walk(root, "adir/newfile").await.unwrap();
        assert_eq!(walked_qid, qid);
        session.clunk(fid).await.unwrap();
        session.detach().await;
    }

    #[tokio::test]
    async fn remove_releases_fid_without_clunk() {
        let (mut session, counters) = serve(populated()).await;
        let root = session.root();

        let (fid, _) = session.walk(root, "adir/bfile").await.unwrap();
        session.open(fid, om::RDWR).await.unwrap();
        session.remove(fid).await.unwrap();
        assert_eq!(counters.removes.load(Ordering::SeqCst), 1);

        assert!(session.walk(root, "adir/bfile").await.is_err());

        let clunks_before = counters.clunks.load(Ordering::SeqCst);
        session.detach().await;
        // Only the root fid remained; the removed fid was not clunked again
        assert_eq!(counters.clunks.load(Ordering::SeqCst), clunks_before + 1);
    }

    #[tokio::test]
    async fn remove_opens_an_unopened_fid_read_write() {
        let (mut session, counters) = serve(populated()).await;
        let root = session.root();

        let (fid, _) = session.walk(root, "adir/bfile").await.unwrap();
        session.remove(fid).await.unwrap();

        // The open the client issued on the caller's behalf
        assert_eq!(counters.opens.load(Ordering::SeqCst), 1);
        assert!(session.walk(root, "adir/bfile").await.is_err());

        session.detach().await;
    }

    #[tokio::test]
    async fn read_dir_yields_entries_in_server_order() {
        let (mut session, _) = serve(populated()).await;
        let root = session.root();

        let (fid, _) = session.walk(root, "adir").await.unwrap();
        let (_, iounit) = session.open(fid, om::READ).await.unwrap();
        let entries = session.read_dir(fid, iounit).await.unwrap();

        let names: Vec<&str> = entries.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["afile", "bfile"]);

        session.clunk(fid).await.unwrap();
        session.detach().await;
    }

    #[tokio::test]
    async fn detach_clunks_every_live_fid() {
        let (mut session, counters) = serve(populated()).await;
        let root = session.root();

        session.walk(root, "adir").await.unwrap();
        session.walk(root, "adir/afile").await.unwrap();

        session.detach().await;
        // Two walked fids plus the root
        assert_eq!(counters.clunks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn server_error_carries_message() {
        let (mut session, _) = serve(populated()).await;
        let root = session.root();

        match session.walk(root, "nosuchfile").await {
            Err(error::Error::Server(ename)) => assert_eq!(ename, "file not found"),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
        session.detach().await;
    }

    /// Server that never answers a read but answers everything else,
    /// recording the tag of every request. For exercising the dispatcher's
    /// tag handling directly.
    fn stall_server() -> (Arc<Dispatcher>, Arc<std::sync::Mutex<Vec<u16>>>) {
        let (client_side, server_side) = tokio::io::duplex(64 * 1024);
        let (srv_read, srv_write) = tokio::io::split(server_side);
        let tags = Arc::new(std::sync::Mutex::new(Vec::new()));

        let seen = tags.clone();
        tokio::spawn(async move {
            let mut framedread = LengthDelimitedCodec::builder()
                .length_field_offset(0)
                .length_field_length(4)
                .length_adjustment(-4)
                .little_endian()
                .new_read(srv_read);
            let mut framedwrite = LengthDelimitedCodec::builder()
                .length_field_offset(0)
                .length_field_length(4)
                .length_adjustment(-4)
                .little_endian()
                .new_write(srv_write);

            while let Some(Ok(bytes)) = framedread.next().await {
                let msg: Msg = Decodable::decode(&mut Cursor::new(&bytes[..])).unwrap();
                seen.lock().unwrap().push(msg.tag);
                let body = match msg.body {
                    Fcall::Tread { .. } => continue, // stall forever
                    Fcall::Tclunk { .. } => Fcall::Rclunk,
                    Fcall::Tflush { .. } => Fcall::Rflush,
                    _ => rerror("unexpected request"),
                };
                let mut buf = Vec::new();
                Msg { tag: msg.tag, body }.encode(&mut buf).unwrap();
                if framedwrite.send(bytes::Bytes::from(buf)).await.is_err() {
                    break;
                }
            }
        });

        let (cl_read, cl_write) = tokio::io::split(client_side);
        let dispatcher = Dispatcher::new(Box::new(cl_read), Box::new(cl_write));
        (Arc::new(dispatcher), tags)
    }

    async fn wait_for_tags(tags: &std::sync::Mutex<Vec<u16>>, n: usize) {
        while tags.lock().unwrap().len() < n {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn in_flight_tag_is_not_reissued() {
        let (dispatcher, tags) = stall_server();

        let stalled_dispatcher = dispatcher.clone();
        let stalled = tokio::spawn(async move {
            stalled_dispatcher
                .rpc(Fcall::Tread {
                    fid: 0,
                    offset: 0,
                    count: 1,
                })
                .await
        });
        wait_for_tags(&tags, 1).await;

        // A second transaction while the first is outstanding
        match dispatcher.rpc(Fcall::Tclunk { fid: 0 }).await.unwrap() {
            Fcall::Rclunk => {}
            other => panic!("unexpected response: {:?}", other),
        }

        let seen = tags.lock().unwrap().clone();
        assert_eq!(seen.len(), 2);
        assert_ne!(seen[0], seen[1]);

        // Cleanup: abandon the stalled read so the task can finish
        dispatcher.flush(seen[0]).await.unwrap();
        assert!(stalled.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn flush_abandons_a_stalled_transaction() {
        let (dispatcher, tags) = stall_server();

        let stalled_dispatcher = dispatcher.clone();
        let stalled = tokio::spawn(async move {
            stalled_dispatcher
                .rpc(Fcall::Tread {
                    fid: 0,
                    offset: 0,
                    count: 1,
                })
                .await
        });
        wait_for_tags(&tags, 1).await;
        let oldtag = tags.lock().unwrap()[0];

        dispatcher.flush(oldtag).await.unwrap();

        // The waiter observes an aborted transaction, not a hang
        match stalled.await.unwrap() {
            Err(error::Error::Io(e)) => {
                assert_eq!(e.kind(), std::io::ErrorKind::ConnectionAborted)
            }
            other => panic!("unexpected result: {:?}", other),
        }

        // The transport is still healthy for later transactions
        match dispatcher.rpc(Fcall::Tclunk { fid: 0 }).await.unwrap() {
            Fcall::Rclunk => {}
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn transport_loss_surfaces_as_io_error() {
        let srv = populated();
        let (client_side, server_side) = tokio::io::duplex(64 * 1024);
        let (srv_read, srv_write) = tokio::io::split(server_side);

        // Serve exactly the bootstrap, then hang up
        tokio::spawn(async move {
            let mut srv = srv;
            let mut framedread = LengthDelimitedCodec::builder()
                .length_field_offset(0)
                .length_field_length(4)
                .length_adjustment(-4)
                .little_endian()
                .new_read(srv_read);
            let mut framedwrite = LengthDelimitedCodec::builder()
                .length_field_offset(0)
                .length_field_length(4)
                .length_adjustment(-4)
                .little_endian()
                .new_write(srv_write);
            for _ in 0..2 {
                if let Some(Ok(bytes)) = framedread.next().await {
                    let msg: Msg = Decodable::decode(&mut Cursor::new(&bytes[..])).unwrap();
                    let reply = Msg {
                        tag: msg.tag,
                        body: srv.handle(msg.body),
                    };
                    let mut buf = Vec::new();
                    reply.encode(&mut buf).unwrap();
                    let _ = framedwrite.send(bytes::Bytes::from(buf)).await;
                }
            }
            // Halves drop here; the client sees EOF
        });

        let (cl_read, cl_write) = tokio::io::split(client_side);
        let mut session = Session::attach(Box::new(cl_read), Box::new(cl_write), "glenda", "/")
            .await
            .unwrap();

        let root = session.root();
        match session.walk(root, "adir").await {
            Err(error::Error::Io(_)) => {}
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }
}
