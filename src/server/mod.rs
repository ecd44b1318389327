use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use log::{debug, error, info, warn};
use tokio::net::TcpListener;
use tokio::time;

use crate::cache::AddressCache;
use crate::config::Config;
use crate::tunnel::Handler;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct Server {
    handler: Arc<Handler>,
}

impl Server {
    pub fn new(cfg: &Config) -> Server {
        let handler = Handler::new(
            cfg.codec(),
            AddressCache::new(cfg.max_cache_entries),
            cfg.dial_timeout(),
        );
        Server {
            handler: Arc::new(handler),
        }
    }

    pub fn handler(&self) -> Arc<Handler> {
        self.handler.clone()
    }

    // serve accepts connections forever, one task per connection.
    //
    // A failed accept or a panicking connection is logged and the loop
    // goes on accepting.
    pub async fn serve(self, listener: TcpListener) {
        if let Ok(addr) = listener.local_addr() {
            info!("Server listens at {}.", addr);
        }

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(a) => a,
                Err(err) => {
                    error!("accept failed: {}", err);
                    time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };
            let _ = stream.set_nodelay(true);
            debug!("accepted {}", peer);

            let handler = self.handler.clone();
            tokio::spawn(async move {
                match AssertUnwindSafe(handler.serve(stream)).catch_unwind().await {
                    Ok(Ok(first)) => debug!("{}: tunnel closed, {} finished first", peer, first),
                    Ok(Err(err)) => warn!("{}: {}", peer, err),
                    Err(_) => error!("connection from {} panicked, closed", peer),
                }
            });
        }
    }
}

// raise_nofile_limit lifts RLIMIT_NOFILE to at least want.
//
// Without privilege the hard limit cannot grow past the kernel's nr_open,
// so a failed full raise falls back to lifting the soft limit to the
// current hard limit.
#[cfg(unix)]
pub fn raise_nofile_limit(want: u64) -> io::Result<()> {
    let (cur, max) = nofile_limit()?;
    if cur >= want && max >= want {
        return Ok(());
    }

    match set_nofile_limit(want, want) {
        Ok(()) => return Ok(()),
        Err(err) => debug!("raise open file limit to {} failed: {}", want, err),
    }

    if cur >= max {
        return Ok(());
    }
    set_nofile_limit(max, max)?;
    info!("open file limit raised to {}", max);
    Ok(())
}

#[cfg(unix)]
fn nofile_limit() -> io::Result<(u64, u64)> {
    let mut lim = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut lim) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok((lim.rlim_cur as u64, lim.rlim_max as u64))
}

#[cfg(unix)]
fn set_nofile_limit(cur: u64, max: u64) -> io::Result<()> {
    let lim = libc::rlimit {
        rlim_cur: cur as libc::rlim_t,
        rlim_max: max as libc::rlim_t,
    };
    if unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &lim) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn raise_nofile_limit(_want: u64) -> io::Result<()> {
    Ok(())
}
