//! Scripted netlink socket for unit tests.

use std::collections::VecDeque;
use std::future::Future;
use std::io::{self, IoSlice};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use bytes::BytesMut;
use libc::c_int;
use tokio::sync::mpsc;

use crate::netlink::builder::MessageBuilder;
use crate::netlink::message::{NLM_F_ACK, NLMSG_HDRLEN, NlMsgHdr, NlMsgType};
use crate::netlink::nfgen::NFNL_SUBSYS_QUEUE;
use crate::netlink::socket::NetlinkIo;
use crate::nfqueue::{
    NFQA_IFINDEX_INDEV, NFQA_MARK, NFQA_PACKET_HDR, NFQA_PAYLOAD, NFQNL_MSG_PACKET,
};

const MOCK_PORT_ID: u32 = 4242;

type Datagram = io::Result<Vec<u8>>;

struct Inner {
    sent: Mutex<Vec<Vec<u8>>>,
    vectored: Mutex<Vec<Vec<Vec<u8>>>>,
    options: Mutex<Vec<(c_int, c_int, c_int)>>,
    tx: mpsc::UnboundedSender<Datagram>,
    rx: Mutex<mpsc::UnboundedReceiver<Datagram>>,
    acks: Mutex<VecDeque<i32>>,
    auto_ack: AtomicBool,
    delivered: AtomicUsize,
    closes: AtomicUsize,
}

/// The socket half, handed to the code under test.
pub(crate) struct MockSocket {
    inner: Arc<Inner>,
}

/// The test's view of a [`MockSocket`].
#[derive(Clone)]
pub(crate) struct MockHandle {
    inner: Arc<Inner>,
}

impl MockSocket {
    pub(crate) fn new() -> (Self, MockHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            sent: Mutex::new(Vec::new()),
            vectored: Mutex::new(Vec::new()),
            options: Mutex::new(Vec::new()),
            tx,
            rx: Mutex::new(rx),
            acks: Mutex::new(VecDeque::new()),
            auto_ack: AtomicBool::new(true),
            delivered: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        });
        (
            Self {
                inner: inner.clone(),
            },
            MockHandle { inner },
        )
    }
}

impl Drop for MockSocket {
    fn drop(&mut self) {
        self.inner.closes.fetch_add(1, Ordering::SeqCst);
    }
}

impl NetlinkIo for MockSocket {
    fn send(&self, msg: &[u8]) -> impl Future<Output = io::Result<usize>> + Send {
        self.inner.sent.lock().unwrap().push(msg.to_vec());

        if self.inner.auto_ack.load(Ordering::SeqCst)
            && let Ok(hdr) = NlMsgHdr::from_bytes(msg)
            && hdr.nlmsg_flags & NLM_F_ACK != 0
        {
            let code = self.inner.acks.lock().unwrap().pop_front().unwrap_or(0);
            let _ = self.inner.tx.send(Ok(ack_datagram(hdr.nlmsg_seq, code)));
        }

        std::future::ready(Ok(msg.len()))
    }

    fn poll_recv(&self, cx: &mut Context<'_>, buf: &mut BytesMut) -> Poll<io::Result<usize>> {
        let mut rx = self.inner.rx.lock().unwrap();
        match rx.poll_recv(cx) {
            Poll::Ready(Some(Ok(datagram))) => {
                self.inner.delivered.fetch_add(1, Ordering::SeqCst);
                buf.clear();
                buf.extend_from_slice(&datagram);
                Poll::Ready(Ok(datagram.len()))
            }
            Poll::Ready(Some(Err(e))) => {
                self.inner.delivered.fetch_add(1, Ordering::SeqCst);
                Poll::Ready(Err(e))
            }
            Poll::Ready(None) => Poll::Ready(Err(io::ErrorKind::BrokenPipe.into())),
            Poll::Pending => Poll::Pending,
        }
    }

    fn send_vectored(&self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        let segments: Vec<Vec<u8>> = bufs.iter().map(|b| b.to_vec()).collect();
        let total = segments.iter().map(Vec::len).sum();
        self.inner.vectored.lock().unwrap().push(segments);
        Ok(total)
    }

    fn set_option(&self, level: c_int, name: c_int, value: c_int) -> io::Result<()> {
        self.inner.options.lock().unwrap().push((level, name, value));
        Ok(())
    }

    fn port_id(&self) -> u32 {
        MOCK_PORT_ID
    }
}

impl MockHandle {
    /// Datagrams sent with `send`.
    pub(crate) fn sent(&self) -> Vec<Vec<u8>> {
        self.inner.sent.lock().unwrap().clone()
    }

    /// Segments of every vectored write.
    pub(crate) fn vectored(&self) -> Vec<Vec<Vec<u8>>> {
        self.inner.vectored.lock().unwrap().clone()
    }

    /// Socket options set, in order.
    pub(crate) fn options(&self) -> Vec<(c_int, c_int, c_int)> {
        self.inner.options.lock().unwrap().clone()
    }

    /// Queue a datagram for the next receive.
    pub(crate) fn push(&self, datagram: Vec<u8>) {
        let _ = self.inner.tx.send(Ok(datagram));
    }

    /// Make the next receive fail.
    pub(crate) fn push_error(&self, err: io::Error) {
        let _ = self.inner.tx.send(Err(err));
    }

    /// Answer the next acked request with `code` instead of 0.
    pub(crate) fn fail_next(&self, code: i32) {
        self.inner.acks.lock().unwrap().push_back(code);
    }

    /// Answer the next acked requests with these codes, in order.
    pub(crate) fn script_acks(&self, codes: &[i32]) {
        self.inner.acks.lock().unwrap().extend(codes);
    }

    /// Stop answering `NLM_F_ACK` requests automatically.
    pub(crate) fn set_auto_ack(&self, enabled: bool) {
        self.inner.auto_ack.store(enabled, Ordering::SeqCst);
    }

    /// Receives completed so far (datagrams and errors).
    pub(crate) fn delivered(&self) -> usize {
        self.inner.delivered.load(Ordering::SeqCst)
    }

    /// Number of times the socket was dropped.
    pub(crate) fn closes(&self) -> usize {
        self.inner.closes.load(Ordering::SeqCst)
    }

    pub(crate) fn port_id(&self) -> u32 {
        MOCK_PORT_ID
    }
}

/// `NLMSG_ERROR` datagram answering `seq` with `code`.
pub(crate) fn ack_datagram(seq: u32, code: i32) -> Vec<u8> {
    let mut hdr = NlMsgHdr::new(NlMsgType::ERROR, 0);
    hdr.nlmsg_len = (NLMSG_HDRLEN + 4 + NLMSG_HDRLEN) as u32;
    hdr.nlmsg_seq = seq;
    hdr.nlmsg_pid = 0;
    let mut buf = hdr.as_bytes().to_vec();
    buf.extend_from_slice(&code.to_ne_bytes());
    buf.extend_from_slice(NlMsgHdr::default().as_bytes());
    buf
}

/// NFQUEUE packet notification as the kernel would send it.
pub(crate) fn packet_datagram(queue: u16, id: u32, mark: Option<u32>, payload: &[u8]) -> Vec<u8> {
    let mut builder = MessageBuilder::nfnetlink(NFNL_SUBSYS_QUEUE, NFQNL_MSG_PACKET, 0, 2, queue);
    let mut hdr = Vec::with_capacity(7);
    hdr.extend_from_slice(&id.to_be_bytes());
    hdr.extend_from_slice(&0x0800u16.to_be_bytes());
    hdr.push(1); // NF_INET_LOCAL_IN
    builder.append_attr(NFQA_PACKET_HDR, &hdr).unwrap();
    if let Some(mark) = mark {
        builder.append_attr_u32_be(NFQA_MARK, mark);
    }
    builder.append_attr_u32_be(NFQA_IFINDEX_INDEV, 3);
    if !payload.is_empty() {
        builder.append_attr(NFQA_PAYLOAD, payload).unwrap();
    }
    builder.finish()
}
