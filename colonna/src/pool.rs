//! Keep alive connection reuse for the tcp backend.
//!
//! A worker task owns the idle connections. Callers acquire a previously
//! released connection or get [`None`] and dial a fresh one themselves,
//! release hands a reusable connection back. The pool never owns a
//! connection that is serving a response: the response body does, and
//! releases it on exhaustion.
use std::{
    collections::VecDeque,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::{
    sync::{
        mpsc::{self, UnboundedReceiver, UnboundedSender},
        oneshot,
    },
    time::{Instant, Sleep, sleep},
};

use crate::{common::trace, config::PoolOptions, http::tcp::TcpTransport};

pub(crate) struct Handle {
    send: UnboundedSender<Message>,
}

impl Handle {
    pub(crate) fn new(options: PoolOptions) -> (Handle, Worker) {
        let (send, recv) = mpsc::unbounded_channel();
        let sleep = Box::pin(sleep(options.idle_timeout));
        (
            Handle { send },
            Worker {
                options,
                idle: VecDeque::new(),
                recv,
                sleep,
            },
        )
    }

    /// Take an idle connection, [`None`] means the caller should dial.
    pub(crate) async fn acquire(&self) -> Option<TcpTransport> {
        let (tx, rx) = oneshot::channel();
        if self.send.send(Message::Acquire(tx)).is_err() {
            return None;
        }
        rx.await.unwrap_or(None)
    }

    /// Hand a reusable connection back.
    pub(crate) fn release(&self, conn: TcpTransport) {
        let _ = self.send.send(Message::Release(conn));
    }
}

impl Clone for Handle {
    fn clone(&self) -> Self {
        Self { send: self.send.clone() }
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Handle")
    }
}

enum Message {
    Acquire(oneshot::Sender<Option<TcpTransport>>),
    Release(TcpTransport),
}

struct Idle {
    conn: TcpTransport,
    since: Instant,
}

pub(crate) struct Worker {
    options: PoolOptions,

    /// - released conn is pushed front
    /// - acquired conn is popped front
    /// - expiry trims from the back
    ///
    /// front of the queue is the most fresh connection
    idle: VecDeque<Idle>,
    recv: UnboundedReceiver<Message>,
    sleep: Pin<Box<Sleep>>,
}

impl Worker {
    fn expire(&mut self) {
        let timeout = self.options.idle_timeout;
        self.idle.retain(|idle| idle.since.elapsed() < timeout);
    }
}

impl Future for Worker {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        let me = self.get_mut();

        while let Poll::Ready(msg) = me.recv.poll_recv(cx) {
            let Some(msg) = msg else {
                // all handles dropped
                return Poll::Ready(());
            };

            match msg {
                Message::Acquire(send) => {
                    me.expire();
                    let conn = me.idle.pop_front().map(|idle| idle.conn);
                    let _reused = conn.is_some();
                    let _ = send.send(conn);

                    trace!("{:11}: Reused={_reused}, Idle={}", "Acquired", me.idle.len());
                },
                Message::Release(conn) => {
                    me.idle.push_front(Idle { conn, since: Instant::now() });
                    me.idle.truncate(me.options.max_idle);

                    trace!("{:11}: Idle={}", "Released", me.idle.len());
                },
            }
        }

        if me.sleep.as_mut().poll(cx).is_ready() {
            me.expire();
            let deadline = Instant::now() + me.options.idle_timeout;
            me.sleep.as_mut().reset(deadline);

            trace!("{:11}: Idle={}", "Cycled", me.idle.len());
        }

        Poll::Pending
    }
}
