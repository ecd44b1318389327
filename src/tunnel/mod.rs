// Package tunnel serves one client connection of the encrypted-address tunnel.

use std::time::Duration;

use log::debug;
use tokio::io::{
    self, AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::TcpStream;
use tokio::time;

use crate::cache::AddressCache;
use crate::crypto::Codec;
use crate::error::{Error, Result};
use crate::relay;

// bufio default: a token line, newline included, must fit.
pub const MAX_LINE: usize = 4096;

/// Handler walks a connection through read token, resolve, dial and relay.
///
/// One handler is shared by every connection; the cache is the only state
/// that changes after startup.
pub struct Handler {
    codec: Codec,
    cache: AddressCache,
    dial_timeout: Option<Duration>,
}

impl Handler {
    pub fn new(codec: Codec, cache: AddressCache, dial_timeout: Option<Duration>) -> Handler {
        Handler {
            codec,
            cache,
            dial_timeout,
        }
    }

    pub fn cache(&self) -> &AddressCache {
        &self.cache
    }

    // serve handles conn until the tunnel or the handshake ends.
    //
    // On failure a single error byte is written before the connection is
    // dropped, and the error is returned for the caller to log. Bytes the
    // client sent right behind the token stay in the reader's buffer and
    // are relayed to the backend.
    pub async fn serve<S>(&self, conn: S) -> Result<relay::Direction>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut reader = BufReader::with_capacity(MAX_LINE, conn);

        let (addr, backend) = match self.connect(&mut reader).await {
            Ok(established) => established,
            Err(err) => {
                let conn = reader.get_mut();
                let _ = conn.write_all(&[err.code()]).await;
                let _ = conn.shutdown().await;
                return Err(err);
            }
        };

        debug!("tunnel to {} established", addr);
        let first = relay::run(reader, backend).await;
        debug!("tunnel to {} closed, {} finished first", addr, first);
        Ok(first)
    }

    async fn connect<R>(&self, reader: &mut R) -> Result<(String, TcpStream)>
    where
        R: AsyncBufRead + Unpin,
    {
        let token = read_token(reader).await?;
        let addr = self.resolve(&token)?;
        let backend = self.dial(&addr).await?;
        Ok((addr, backend))
    }

    // resolve checks the cache before running the codec.
    pub fn resolve(&self, token: &str) -> Result<String> {
        if let Some(addr) = self.cache.lookup(token) {
            return Ok(addr);
        }

        let addr = self.codec.resolve(token)?;
        self.cache.insert(token.to_string(), addr.clone());
        Ok(addr)
    }

    async fn dial(&self, addr: &str) -> Result<TcpStream> {
        let backend = match self.dial_timeout {
            Some(limit) => match time::timeout(limit, TcpStream::connect(addr)).await {
                Ok(res) => res,
                Err(_) => return Err(Error::DialTimeout(addr.to_string())),
            },
            None => TcpStream::connect(addr).await,
        }
        .map_err(|e| Error::dial(addr, e))?;

        let _ = backend.set_nodelay(true);
        Ok(backend)
    }
}

// read_token reads the first line without consuming anything behind it.
pub async fn read_token<R>(reader: &mut R) -> Result<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::with_capacity(128);
    let n = (&mut *reader)
        .take(MAX_LINE as u64)
        .read_until(b'\n', &mut line)
        .await
        .map_err(Error::Read)?;

    if n == 0 {
        return Err(Error::Read(io::ErrorKind::UnexpectedEof.into()));
    }
    if line.last() != Some(&b'\n') {
        if n == MAX_LINE {
            return Err(Error::BadRequest("line too long"));
        }
        return Err(Error::BadRequest("line not terminated"));
    }

    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    // not text cannot be base64 either
    String::from_utf8(line).map_err(|e| {
        let at = e.utf8_error().valid_up_to();
        let byte = e.as_bytes()[at];
        Error::Decode(base64::DecodeError::InvalidByte(at, byte))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpSocket};

    const SECRET: &[u8] = b"0123456789abcdef";
    const SALT: &[u8] = b"pepper";

    fn handler() -> Handler {
        Handler::new(Codec::new(SECRET, SALT), AddressCache::new(16), None)
    }

    async fn token_of(input: &[u8]) -> Result<String> {
        let mut reader = BufReader::new(input);
        read_token(&mut reader).await
    }

    #[tokio::test]
    async fn test_read_token() {
        assert_eq!(token_of(b"abc\n").await.unwrap(), "abc");
        assert_eq!(token_of(b"abc\r\nrest").await.unwrap(), "abc");
        assert_eq!(token_of(b"\n").await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_read_token_keeps_trailing_bytes() {
        let mut reader = BufReader::new(&b"tok\nping"[..]);
        assert_eq!(read_token(&mut reader).await.unwrap(), "tok");

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"ping");
    }

    #[tokio::test]
    async fn test_read_token_rejects() {
        assert_eq!(token_of(b"").await.unwrap_err().code(), 0x04);
        assert_eq!(token_of(b"no newline").await.unwrap_err().code(), 0x04);

        let mut long = vec![b'A'; MAX_LINE];
        long.push(b'\n');
        match token_of(&long).await {
            Err(Error::BadRequest(msg)) => assert_eq!(msg, "line too long"),
            other => panic!("unexpected {:?}", other),
        }

        let mut fits = vec![b'A'; MAX_LINE - 1];
        fits.push(b'\n');
        assert_eq!(token_of(&fits).await.unwrap().len(), MAX_LINE - 1);
    }

    #[test]
    fn test_resolve_fills_cache() {
        let h = handler();
        let token = h.codec.encode("127.0.0.1:9").unwrap();
        assert_eq!(h.cache().lookup(&token), None);

        assert_eq!(h.resolve(&token).unwrap(), "127.0.0.1:9");
        assert_eq!(h.cache().lookup(&token).as_deref(), Some("127.0.0.1:9"));
    }

    #[test]
    fn test_resolve_hits_cache_before_codec() {
        let h = handler();
        // not a valid token, so only the cache can answer
        h.cache()
            .insert("cached!".to_string(), "10.0.0.1:80".to_string());
        assert_eq!(h.resolve("cached!").unwrap(), "10.0.0.1:80");
    }

    #[test]
    fn test_failed_resolve_not_cached() {
        let h = handler();
        assert_eq!(h.resolve("%%%").unwrap_err().code(), 0x05);
        assert!(h.cache().is_empty());
    }

    #[tokio::test]
    async fn test_serve_reports_dial_failure() {
        // grab a free port, then close it so the dial is refused
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let h = handler();
        let line = format!("{}\n", h.codec.encode(&addr).unwrap());
        let (mut client, conn) = io::duplex(MAX_LINE * 2);
        client.write_all(line.as_bytes()).await.unwrap();

        let err = h.serve(conn).await.unwrap_err();
        assert_eq!(err.code(), 0x02);

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, vec![0x02]);
    }

    #[tokio::test]
    async fn test_serve_reports_bad_token() {
        let h = handler();
        let (mut client, conn) = io::duplex(64);
        client.write_all(b"*** not base64 ***\n").await.unwrap();

        assert!(h.serve(conn).await.is_err());

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, vec![0x05]);
    }

    #[tokio::test]
    async fn test_serve_non_text_line_is_decode_failure() {
        match token_of(b"\xff\xfe\n").await {
            Err(Error::Decode(base64::DecodeError::InvalidByte(0, 0xff))) => {}
            other => panic!("unexpected {:?}", other),
        }

        let h = handler();
        let (mut client, conn) = io::duplex(64);
        client.write_all(b"QUJD\xff\xfe\n").await.unwrap();

        assert_eq!(h.serve(conn).await.unwrap_err().code(), 0x05);

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, vec![0x05]);
    }

    // A listener whose accept queue is full drops further SYNs on Linux,
    // so a dial to it hangs until the dial timeout fires.
    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_serve_reports_dial_timeout() {
        let socket = TcpSocket::new_v4().unwrap();
        socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let listener = socket.listen(1).unwrap();
        let addr = listener.local_addr().unwrap();

        let mut queued = Vec::new();
        for _ in 0..4 {
            let dial = time::timeout(Duration::from_millis(100), TcpStream::connect(addr));
            if let Ok(Ok(s)) = dial.await {
                queued.push(s);
            }
        }

        let h = Handler::new(
            Codec::new(SECRET, SALT),
            AddressCache::new(16),
            Some(Duration::from_millis(200)),
        );
        let line = format!("{}\n", h.codec.encode(&addr.to_string()).unwrap());
        let (mut client, conn) = io::duplex(MAX_LINE * 2);
        client.write_all(line.as_bytes()).await.unwrap();

        match h.serve(conn).await {
            Err(Error::DialTimeout(a)) => assert_eq!(a, addr.to_string()),
            other => panic!("unexpected {:?}", other),
        }

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, vec![0x01]);
        drop(listener);
    }
}
