use std::fs::OpenOptions;

use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "KRB5_SIDECAR_LOG";
const LOG_PATH_ENV: &str = "KRB5_SIDECAR_LOG_PATH";
const DEFAULT_FILTER: &str = "info";

pub fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let path = match std::env::var(LOG_PATH_ENV) {
        Ok(path) => path,
        Err(_) => {
            let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
            tracing_subscriber::registry().with(fmt_layer).with(filter).init();
            return;
        }
    };

    let file = match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("[krb5-sidecar] Couldn't open log file: {e}. File path: {}", path);
            let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
            tracing_subscriber::registry().with(fmt_layer).with(filter).init();
            return;
        }
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_thread_names(true)
        .with_writer(file);

    tracing_subscriber::registry().with(fmt_layer).with(filter).init();
}
