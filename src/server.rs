use std::io::{BufReader, BufWriter};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};

use tracing::{debug, error, info};

use crate::registry::Registry;
use crate::session::Session;
use crate::thread_pool::ThreadPool;
use crate::Result;

/// A TCP server serving the table-store protocol.
///
/// It listens for incoming connections and hands each one to the thread
/// pool, where a [`Session`] drives the client to completion. Every session
/// thread receives a clone of the shared [`Registry`] handle.
///
/// # Example
/// Create a server on "127.0.0.1:4000" with one thread per connection:
/// ```rust
/// use tkvs::{Registry, TkvsServer};
/// use tkvs::thread_pool::{NaiveThreadPool, ThreadPool};
/// # use std::error::Error;
/// # fn main() -> Result<(), Box<dyn Error>> {
/// let registry = Registry::new();
/// let pool = NaiveThreadPool::new(0)?;
/// let server = TkvsServer::new(registry, pool);
/// // server.run("127.0.0.1:4000")?;
/// #
/// # Ok(())
/// # }
/// ```
pub struct TkvsServer<P: ThreadPool> {
    /// the shared table registry handed to every session
    registry: Registry,
    /// a pool of threads that drive sessions to completion
    pool: P,
}

impl<P: ThreadPool> TkvsServer<P> {
    /// creates a server over the given registry and thread pool
    pub fn new(registry: Registry, pool: P) -> Self {
        TkvsServer { registry, pool }
    }

    /// binds a listener on `addr` and serves until the process is killed
    ///
    /// # Errors
    /// returns an error if the listener could not be bound
    pub fn run<A: ToSocketAddrs>(self, addr: A) -> Result<()> {
        let listener = TcpListener::bind(addr)?;
        self.run_with(listener)
    }

    /// serves connections accepted from an already-bound listener. Useful
    /// when the caller bound port 0 and needs to know the real address.
    pub fn run_with(self, listener: TcpListener) -> Result<()> {
        info!("listening on {}", listener.local_addr()?);
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let registry = self.registry.clone();
                    self.pool.spawn(move || {
                        if let Err(e) = serve(registry, stream) {
                            error!("error on serving client: {}", e);
                        }
                    });
                }
                Err(e) => error!("connection failed: {}", e),
            }
        }
        Ok(())
    }
}

/// drives one client session over the given `tcp` stream
fn serve(registry: Registry, tcp: TcpStream) -> Result<()> {
    let peer_addr = tcp.peer_addr()?;
    debug!("accepted connection from {}", peer_addr);

    let reader = BufReader::new(&tcp);
    let writer = BufWriter::new(&tcp);
    let result = Session::new(registry, reader, writer).chat();

    debug!("connection from {} closed", peer_addr);
    result
}
