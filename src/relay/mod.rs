use std::fmt;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use log::{debug, error, warn};
use tokio::io::{self, AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    // client -> backend
    Upstream,
    // backend -> client
    Downstream,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upstream => write!(f, "client -> backend"),
            Direction::Downstream => write!(f, "backend -> client"),
        }
    }
}

// run pipes client and backend into each other until one direction ends.
//
// Each direction runs on its own task. The first one to finish, by EOF,
// error or panic, ends the session: the other task is aborted, which drops
// its halves, so both streams are closed by the time run returns and no
// task outlives the session. Returns the direction that finished first.
pub async fn run<C, B>(client: C, backend: B) -> Direction
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    B: AsyncRead + AsyncWrite + Send + 'static,
{
    let (cr, cw) = io::split(client);
    let (br, bw) = io::split(backend);

    let mut upstream = tokio::spawn(pipe(cr, bw, Direction::Upstream));
    let mut downstream = tokio::spawn(pipe(br, cw, Direction::Downstream));

    let (first, rest) = tokio::select! {
        _ = &mut upstream => (Direction::Upstream, downstream),
        _ = &mut downstream => (Direction::Downstream, upstream),
    };
    close(rest).await;
    first
}

async fn close(task: JoinHandle<()>) {
    task.abort();
    if let Err(err) = task.await {
        if !err.is_cancelled() {
            warn!("relay task ended abnormally: {}", err);
        }
    }
}

// pipe copies src into dst. Errors and panics end this direction only.
async fn pipe<R, W>(mut src: R, mut dst: W, dir: Direction)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match AssertUnwindSafe(io::copy(&mut src, &mut dst))
        .catch_unwind()
        .await
    {
        Ok(Ok(n)) => debug!("{}: {} bytes, eof", dir, n),
        Ok(Err(err)) => debug!("{}: io copy failed {}", dir, err),
        Err(_) => error!("{}: relay panicked", dir),
    }
}
