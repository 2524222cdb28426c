// Copyright 2022 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Worker orchestrator entrypoint: `IDLE -> FETCHING ->
//! ... -> (ARCHIVED|CLEAN) -> IDLE`, one submission at a time, forever.
//!
//! Installs SIGINT/SIGTERM handlers that exit immediately, then loops
//! `process_once` forever, sleeping between iterations only when the
//! previous one had nothing to do or hit a stage failure.

mod config;
mod pipeline;
mod submission;

use clap::Parser;
use log::{error, info};
use tokio::signal::unix::{signal, SignalKind};

use config::WorkerConfig;
use pipeline::Worker;

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let config = WorkerConfig::parse();

    // Widened once, globally, from the orchestrator at start-up — not
    // re-applied per submission.
    workspace::widen_umask_once();
    logging::init(log::LevelFilter::Info, true);

    let worker = match Worker::new(config.clone()) {
        Ok(worker) => worker,
        Err(e) => {
            error!("fatal: {e}");
            std::process::exit(1);
        }
    };

    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    info!("worker started, polling queues: {:?}", config.queue_compiler_dict());

    loop {
        tokio::select! {
            _ = sigint.recv() => {
                info!("received SIGINT, exiting");
                std::process::exit(0);
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM, exiting");
                std::process::exit(0);
            }
            should_wait = worker.process_once() => {
                if should_wait {
                    tokio::time::sleep(config.poll_interval()).await;
                }
            }
        }
    }
}
