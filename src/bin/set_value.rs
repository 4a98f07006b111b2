//! The set_value executable stores one value into a table on a running
//! tkvs server:
//!
//! `set_value <hostname> <port> <username> <table> <key> <value>`
//!
//! It performs LOGIN, PUSH, SET, BYE and exits 0 if every response was OK.
//! Any FAILED or ERROR response is printed to stderr with a non-zero exit
//! code.

use std::process::exit;

use clap::{crate_version, App, Arg, ArgMatches};
use tkvs::{Result, TkvsClient, TkvsError};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// ['Opt'] holds parsed and validated options from the command line
#[derive(Debug)]
struct Opt {
    host: String,
    port: u16,
    username: String,
    table: String,
    key: String,
    value: String,
}

impl Opt {
    /// validates the `port` parameter is a valid port number
    /// # Errors
    /// returns [`TkvsError::Parsing`] if the port is invalid
    fn build(matches: &ArgMatches) -> Result<Opt> {
        let port = matches.value_of("PORT").unwrap();
        let port: u16 = port
            .parse()
            .map_err(|_| TkvsError::Parsing(format!("could not parse {} into a port number", port)))?;

        Ok(Opt {
            host: matches.value_of("HOST").unwrap().to_string(),
            port,
            username: matches.value_of("USERNAME").unwrap().to_string(),
            table: matches.value_of("TABLE").unwrap().to_string(),
            key: matches.value_of("KEY").unwrap().to_string(),
            value: matches.value_of("VALUE").unwrap().to_string(),
        })
    }
}

fn main() {
    // configure a subscriber that will log messages to STDERR
    subscriber_config();

    let matches = App::new("set_value")
        .version(crate_version!())
        .about("stores one value into a table on a tkvs server")
        .arg(Arg::with_name("HOST").required(true).index(1))
        .arg(Arg::with_name("PORT").required(true).index(2))
        .arg(Arg::with_name("USERNAME").required(true).index(3))
        .arg(Arg::with_name("TABLE").required(true).index(4))
        .arg(Arg::with_name("KEY").required(true).index(5))
        .arg(Arg::with_name("VALUE").required(true).index(6))
        .get_matches();

    let opt = match Opt::build(&matches) {
        Ok(opt) => opt,
        Err(err) => {
            eprintln!("Error: {}", err);
            exit(1);
        }
    };

    if let Err(e) = run(opt) {
        eprintln!("Error: {}", e);
        exit(1);
    }
}

/// logs in, pushes the value, and stores it under the table key
fn run(opt: Opt) -> Result<()> {
    let mut client = TkvsClient::connect((opt.host.as_str(), opt.port), &opt.username)?;
    client.push(&opt.value)?;
    client.set(&opt.table, &opt.key)?;
    client.bye()
}

/// configures a tracing subscriber that will log to STDERR
fn subscriber_config() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::WARN)
        // log to stderr instead of stdout, which belongs to command output
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting tracing default subscriber failed");
}
