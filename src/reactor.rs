use hashbrown::HashMap;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Registry, Token};
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::logging;
use crate::logging::Logger;

const MAX_POLL_EVENTS: usize = 8192;

/// Fired when the descriptor becomes readable.
pub type OnEvent = Box<dyn Fn() -> Result<()> + Send + Sync>;
/// Fired when the peer hangs up.
pub type OnError = Box<dyn Fn() -> Result<()> + Send + Sync>;

struct Handler {
    on_event: Arc<OnEvent>,
    on_error: Option<Arc<OnError>>,
}

struct Poller {
    poll: Poll,
    events: Events,
}

/// Single-threaded readiness dispatcher. Registered descriptors are watched
/// for readable and hang-up events; callbacks run one at a time on the loop
/// thread and their failures are logged, never fatal.
///
/// `run` must not be re-entered; callbacks may freely call `add_handler`,
/// `remove_handler` and `stop`.
pub struct Mainloop {
    poller: Mutex<Poller>,
    registry: Registry,
    handlers: Mutex<HashMap<RawFd, Handler>>,
    wakeup: EventFd,
    stopped: AtomicBool,
    log: Logger,
}

impl Mainloop {
    pub fn new<'a, L: Into<Option<&'a Logger>>>(log: L) -> Result<Mainloop> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;

        Ok(Mainloop {
            poller: Mutex::new(Poller {
                poll,
                events: Events::with_capacity(MAX_POLL_EVENTS),
            }),
            registry,
            handlers: Mutex::new(HashMap::new()),
            wakeup: EventFd::new()?,
            stopped: AtomicBool::new(false),
            log: logging::child(log),
        })
    }

    /// Registers `fd` for readable and hang-up notifications. Registering a
    /// descriptor twice fails.
    pub fn add_handler(&self, fd: RawFd, on_event: OnEvent, on_error: Option<OnError>) -> Result<()> {
        let mut handlers = self.handlers.lock().unwrap();

        if handlers.contains_key(&fd) {
            return Err(Error::AlreadyRegistered);
        }

        self.registry
            .register(&mut SourceFd(&fd), Token(fd as usize), Interest::READABLE)?;

        handlers.insert(
            fd,
            Handler {
                on_event: Arc::new(on_event),
                on_error: on_error.map(Arc::new),
            },
        );

        logging::trace!(self.log, "handler registered"; "fd" => fd);

        Ok(())
    }

    /// Unregisters `fd`. Removing an absent descriptor is a no-op.
    pub fn remove_handler(&self, fd: RawFd) {
        let mut handlers = self.handlers.lock().unwrap();

        if handlers.remove(&fd).is_none() {
            return;
        }

        drop(self.registry.deregister(&mut SourceFd(&fd)));

        logging::trace!(self.log, "handler removed"; "fd" => fd);
    }

    /// Installs the wakeup handler: a one-shot that drains the signal,
    /// removes itself and marks the loop stopped.
    fn prepare(self: &Arc<Self>) -> Result<()> {
        self.stopped.store(false, Ordering::Relaxed);

        let mainloop = Arc::downgrade(self);
        let wakeup = Box::new(move || {
            if let Some(mainloop) = Weak::upgrade(&mainloop) {
                mainloop.wakeup.receive()?;
                mainloop.remove_handler(mainloop.wakeup.fd());
                mainloop.stopped.store(true, Ordering::Relaxed);
            }
            Ok(())
        });

        match self.add_handler(self.wakeup.fd(), wakeup, None) {
            // Left armed by a previous timeout exit.
            Err(Error::AlreadyRegistered) => Ok(()),
            other => other,
        }
    }

    /// Runs the dispatch loop until `stop` is called or a pass expires with
    /// no events (only possible with a timeout).
    pub fn run(self: &Arc<Self>, timeout: Option<Duration>) -> Result<()> {
        let mut poller = self.poller.lock().unwrap();

        self.prepare()?;

        let mut done = false;
        while !self.stopped.load(Ordering::Relaxed) && !done {
            done = !self.dispatch(&mut poller, timeout);
        }

        Ok(())
    }

    /// Unblocks the loop from any thread.
    pub fn stop(&self) -> Result<()> {
        self.wakeup.send()
    }

    fn dispatch(&self, poller: &mut Poller, timeout: Option<Duration>) -> bool {
        loop {
            match poller.poll.poll(&mut poller.events, timeout) {
                Ok(()) => break,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    logging::error!(self.log, "poll failed"; "error" => %err);
                    return false;
                }
            }
        }

        if poller.events.is_empty() {
            return false;
        }

        for event in poller.events.iter() {
            let fd = event.token().0 as RawFd;

            // Copy the callbacks out so the registry lock is never held
            // across an invocation.
            let (on_event, on_error) = {
                let handlers = self.handlers.lock().unwrap();
                match handlers.get(&fd) {
                    Some(handler) => (handler.on_event.clone(), handler.on_error.clone()),
                    None => continue,
                }
            };

            if event.is_read_closed() {
                if let Some(on_error) = on_error {
                    if let Err(err) = on_error() {
                        logging::warn!(self.log, "error callback failed"; "fd" => fd, "error" => ?err);
                    }
                }
            } else if let Err(err) = on_event() {
                logging::warn!(self.log, "event callback failed"; "fd" => fd, "error" => ?err);
            }
        }

        true
    }
}

/// Counter-valued wakeup descriptor, delivered in-band through the same
/// poll as every other event source.
struct EventFd {
    fd: RawFd,
}

impl EventFd {
    fn new() -> Result<EventFd> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_SEMAPHORE) };
        if fd == -1 {
            return Err(io::Error::last_os_error().into());
        }

        Ok(EventFd { fd })
    }

    fn send(&self) -> Result<()> {
        let value: u64 = 1;
        let rc = unsafe {
            libc::write(
                self.fd,
                &value as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if rc == -1 {
            return Err(io::Error::last_os_error().into());
        }

        Ok(())
    }

    fn receive(&self) -> Result<()> {
        let mut value: u64 = 0;
        let rc = unsafe {
            libc::read(
                self.fd,
                &mut value as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if rc == -1 {
            return Err(io::Error::last_os_error().into());
        }

        Ok(())
    }

    #[inline]
    fn fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for EventFd {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_eventfd_roundtrip() {
        let event = EventFd::new().unwrap();

        event.send().unwrap();
        event.receive().unwrap();
    }

    #[test]
    fn test_duplicate_registration() {
        let mainloop = Mainloop::new(None).unwrap();
        let marker = EventFd::new().unwrap();

        mainloop
            .add_handler(marker.fd(), Box::new(|| Ok(())), None)
            .unwrap();

        let result = mainloop.add_handler(marker.fd(), Box::new(|| Ok(())), None);

        assert_eq!(result.unwrap_err(), Error::AlreadyRegistered);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mainloop = Mainloop::new(None).unwrap();

        mainloop.remove_handler(12345);
    }

    #[test]
    fn test_readd_after_remove() {
        let mainloop = Mainloop::new(None).unwrap();
        let marker = EventFd::new().unwrap();

        mainloop
            .add_handler(marker.fd(), Box::new(|| Ok(())), None)
            .unwrap();
        mainloop.remove_handler(marker.fd());
        mainloop
            .add_handler(marker.fd(), Box::new(|| Ok(())), None)
            .unwrap();
    }

    #[test]
    fn test_stop_unblocks_run() {
        let mainloop = Arc::new(Mainloop::new(None).unwrap());

        let runner = {
            let mainloop = Arc::clone(&mainloop);
            thread::spawn(move || mainloop.run(None))
        };

        thread::sleep(Duration::from_millis(50));
        mainloop.stop().unwrap();

        runner.join().unwrap().unwrap();
    }

    #[test]
    fn test_run_exits_on_idle_timeout() {
        let mainloop = Arc::new(Mainloop::new(None).unwrap());

        let started = Instant::now();
        mainloop.run(Some(Duration::from_millis(50))).unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_event_dispatch() {
        let mainloop = Arc::new(Mainloop::new(None).unwrap());
        let marker = Arc::new(EventFd::new().unwrap());
        let fired = Arc::new(AtomicBool::new(false));

        {
            let mainloop_ref = Arc::clone(&mainloop);
            let marker = Arc::clone(&marker);
            let fired = Arc::clone(&fired);
            let fd = marker.fd();

            mainloop
                .add_handler(
                    fd,
                    Box::new(move || {
                        marker.receive()?;
                        fired.store(true, Ordering::Relaxed);
                        mainloop_ref.remove_handler(fd);
                        mainloop_ref.stop()
                    }),
                    None,
                )
                .unwrap();
        }

        marker.send().unwrap();
        mainloop.run(None).unwrap();

        assert!(fired.load(Ordering::Relaxed));
    }

    #[test]
    fn test_callback_failure_is_not_fatal() {
        let mainloop = Arc::new(Mainloop::new(None).unwrap());
        let broken = Arc::new(EventFd::new().unwrap());
        let healthy = Arc::new(EventFd::new().unwrap());
        let fired = Arc::new(AtomicUsize::new(0));

        {
            let broken = Arc::clone(&broken);
            let fired = Arc::clone(&fired);
            mainloop
                .add_handler(
                    broken.fd(),
                    Box::new(move || {
                        broken.receive()?;
                        fired.fetch_add(1, Ordering::Relaxed);
                        Err(Error::InvalidArgument)
                    }),
                    None,
                )
                .unwrap();
        }
        {
            let healthy = Arc::clone(&healthy);
            let fired = Arc::clone(&fired);
            mainloop
                .add_handler(
                    healthy.fd(),
                    Box::new(move || {
                        healthy.receive()?;
                        fired.fetch_add(1, Ordering::Relaxed);
                        Ok(())
                    }),
                    None,
                )
                .unwrap();
        }

        broken.send().unwrap();
        healthy.send().unwrap();

        mainloop.run(Some(Duration::from_millis(100))).unwrap();

        assert_eq!(fired.load(Ordering::Relaxed), 2);
    }
}
