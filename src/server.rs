use crate::prelude::*;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use std::os::fd::{FromRawFd, IntoRawFd};

/// Binds every configured address and accepts on all of them from one poll
/// loop. Each accepted socket gets its own thread running `handle_client`;
/// the loop itself only ever blocks for `POLL_TIMEOUT` so the shutdown flag
/// drains it within a tick.
pub struct Server {
    listeners: Vec<TcpListener>,
    factory: Arc<dyn ClientFactory>,
    shutdown: Arc<AtomicBool>,
}

impl Server {
    pub fn new(
        config: &AppConfig,
        factory: Arc<dyn ClientFactory>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Server> {
        let mut listeners = Vec::new();
        for bind in &config.bind {
            let addr: SocketAddr = bind.parse()?;
            listeners.push(TcpListener::bind(addr)?);
            info!("listening on {}", addr);
        }
        if listeners.is_empty() {
            return Err("no listen address configured".into());
        }
        Ok(Server {
            listeners,
            factory,
            shutdown,
        })
    }

    pub fn run(&mut self) -> Result<()> {
        let mut poll = Poll::new()?;
        let mut events = Events::with_capacity(64);
        for (index, listener) in self.listeners.iter_mut().enumerate() {
            poll.registry()
                .register(listener, Token(index), Interest::READABLE)?;
        }

        while !self.shutdown.load(Ordering::SeqCst) {
            if let Err(e) = poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                if e.kind() == ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }
            for event in events.iter() {
                let Token(index) = event.token();
                accept_pending(
                    &self.listeners[index],
                    &self.factory,
                    &self.shutdown,
                );
            }
        }

        info!("draining");
        Ok(())
    }
}

fn accept_pending(
    listener: &TcpListener,
    factory: &Arc<dyn ClientFactory>,
    shutdown: &Arc<AtomicBool>,
) {
    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!("client {}", peer);
                // hand the connection thread a blocking socket
                let stream =
                    unsafe { std::net::TcpStream::from_raw_fd(stream.into_raw_fd()) };
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }
                let factory = Arc::clone(factory);
                let shutdown = Arc::clone(shutdown);
                thread::spawn(move || handle_client(stream, factory, shutdown));
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => break,
            Err(e) => {
                warn!("accept: {}", e);
                break;
            }
        }
    }
}
