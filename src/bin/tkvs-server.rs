//! this binary starts the tkvs server
//! to see the list of options, type: `tkvs-server --help`

use std::net::SocketAddr;
use std::process::exit;

use clap::{crate_version, App, Arg};
use tkvs::thread_pool::{NaiveThreadPool, SharedQueueThreadPool, ThreadPool};
use tkvs::{Registry, Result, TkvsError, TkvsServer};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// ['Opt'] holds parsed and validated options from the command line
#[derive(Debug)]
struct Opt {
    addr: SocketAddr,
    threads: u32,
}

impl Opt {
    /// validates the `port` and `threads` parameters
    /// # Errors
    /// returns [`TkvsError::Parsing`] if one of the parameters is invalid
    fn build(port: &str, threads: &str) -> Result<Opt> {
        let port: u16 = port
            .parse()
            .map_err(|_| TkvsError::Parsing(format!("could not parse {} into a port number", port)))?;
        let threads: u32 = threads
            .parse()
            .map_err(|_| TkvsError::Parsing(format!("could not parse {} into a thread count", threads)))?;

        Ok(Opt {
            addr: SocketAddr::from(([0, 0, 0, 0], port)),
            threads,
        })
    }
}

fn main() {
    // set up a tracing subscriber to log to STDERR
    subscriber_config();

    let matches = App::new("tkvs-server")
        .version(crate_version!())
        .about("a multi-threaded, transactional, in-memory key-value table store")
        .arg(
            Arg::with_name("PORT")
                .help("the TCP port to listen on")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::with_name("threads")
                .long("threads")
                .value_name("N")
                .help("serve from a fixed pool of N worker threads instead of one thread per connection")
                .default_value("0"),
        )
        .get_matches();

    let opt = match Opt::build(
        matches.value_of("PORT").unwrap(),
        matches.value_of("threads").unwrap(),
    ) {
        Ok(opt) => opt,
        Err(err) => {
            eprintln!("{:?}", err);
            exit(1);
        }
    };

    if let Err(e) = run(opt) {
        eprintln!("{:?}", e);
        exit(1);
    }
}

fn run(opt: Opt) -> Result<()> {
    info!("tkvs-server {}", env!("CARGO_PKG_VERSION"));
    info!("Listening on {}", opt.addr);

    let registry = Registry::new();
    if opt.threads == 0 {
        TkvsServer::new(registry, NaiveThreadPool::new(0)?).run(opt.addr)
    } else {
        TkvsServer::new(registry, SharedQueueThreadPool::new(opt.threads)?).run(opt.addr)
    }
}

/// configures a tracing subscriber that will log to STDERR
fn subscriber_config() {
    let subscriber = FmtSubscriber::builder()
        // all spans/events with a level higher than TRACE (e.g, debug, info, warn, etc.)
        // will be written to stdout.
        .with_max_level(Level::TRACE)
        // log to stderr instrad of stdout
        .with_writer(std::io::stderr)
        // completes the builder.
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting tracing default subscriber failed");
}
