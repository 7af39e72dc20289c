//! Reproduces the cherokee-0.9.2 crash caused by a malformed
//! `If-Modified-Since` date: concurrent workers keep sending the conditional
//! GET through `wget`.
mod client;
mod worker;

use client::HttpClient;
use failure::Error;
use log::*;
use std::ffi::OsString;
use structopt::StructOpt;
use worker::Worker;

#[derive(Debug, StructOpt)]
struct Opt {
    /// Number of requests each worker issues.
    calls: u64,

    /// The URL to request.
    #[structopt(long, default_value = client::DEFAULT_URL)]
    url: String,

    /// Value of the If-Modified-Since header.
    #[structopt(long, default_value = client::MALFORMED_DATE)]
    date: String,

    /// The wget executable.
    #[structopt(long, parse(from_os_str), default_value = client::DEFAULT_PROGRAM)]
    wget: OsString,

    /// Number of concurrent worker processes.
    #[structopt(long, default_value = "2")]
    workers: usize,

    /// Keep the stderr of wget instead of discarding it.
    #[structopt(long)]
    show_client_output: bool,
}

fn run(opt: &Opt) -> Result<(), Error> {
    let client = HttpClient {
        program: opt.wget.clone(),
        url: opt.url.clone(),
        date: opt.date.clone(),
        show_output: opt.show_client_output,
    };
    info!("running {:?}, {} calls per worker", client.command().argv(), opt.calls);

    worker::run_all(opt.workers, |id| Worker::launch(id, &client, opt.calls))
}

fn main() {
    let env = env_logger::Env::default().default_filter_or("info");
    env_logger::from_env(env).init();

    let opt = Opt::from_args();
    if let Err(e) = run(&opt) {
        error!("{}", e);
        std::process::exit(1);
    }
    info!("bye");
}
