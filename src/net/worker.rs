//! Session workers backing the TCP server.
//!
//! The poller thread queues one [`Dispatch`] per ready connection; a fixed
//! crew of workers drains the queue. Each worker runs the server's session
//! handler on the stream, then finishes the one-shot cycle itself: a
//! connection the handler keeps is re-armed in epoll, anything else is
//! dropped from the server, and the poller is woken to pick up the change.

use std::os::fd::RawFd;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;

use log::{debug, warn};

use super::server::{Handler, PollShared, SessionControl};
use super::stream::TcpStream;

/// A connection reported ready by the poller.
pub(super) struct Dispatch {
    pub fd: RawFd,
    pub socket: Arc<Mutex<TcpStream>>,
}

/// Fixed-size crew of session workers draining a shared dispatch queue.
///
/// Dropping the crew closes the queue and joins every worker after the
/// queued dispatches drain.
pub(super) struct SessionWorkers {
    crew: Vec<thread::JoinHandle<()>>,
    queue: Option<mpsc::Sender<Dispatch>>,
}

impl SessionWorkers {
    /// Spawn `count` workers bound to the server state and handler.
    pub fn spawn(count: usize, shared: Arc<PollShared>, handler: Handler) -> Self {
        assert!(count > 0);

        let (queue, feed) = mpsc::channel();
        let feed = Arc::new(Mutex::new(feed));

        let crew = (0..count)
            .map(|n| {
                let feed = Arc::clone(&feed);
                let shared = Arc::clone(&shared);
                let handler = Arc::clone(&handler);
                thread::Builder::new()
                    .name(format!("session-{n}"))
                    .spawn(move || worker_main(n, feed, shared, handler))
                    .expect("failed to spawn session worker")
            })
            .collect();

        Self {
            crew,
            queue: Some(queue),
        }
    }

    /// Hand a ready connection to the crew.
    pub fn submit(&self, dispatch: Dispatch) {
        let queue = self.queue.as_ref().expect("queue lives as long as the crew");
        if queue.send(dispatch).is_err() {
            warn!("dispatch dropped, session workers are gone");
        }
    }
}

impl Drop for SessionWorkers {
    fn drop(&mut self) {
        drop(self.queue.take());

        for worker in self.crew.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_main(
    n: usize,
    feed: Arc<Mutex<mpsc::Receiver<Dispatch>>>,
    shared: Arc<PollShared>,
    handler: Handler,
) {
    loop {
        let dispatch = match feed.lock().unwrap().recv() {
            Ok(dispatch) => dispatch,
            Err(_) => break,
        };

        let mut stream = dispatch.socket.lock().unwrap();
        let control = handler(&mut stream);
        let keep = control == SessionControl::KeepOpen && stream.is_open();
        drop(stream);

        if keep {
            if let Err(e) = shared.rearm(dispatch.fd) {
                warn!("failed to re-arm connection: {e}");
                shared.remove(dispatch.fd);
            }
        } else {
            shared.remove(dispatch.fd);
        }
        // The interest list changed under the poller; kick it.
        shared.wake();
    }
    debug!("session worker {n} exiting");
}
