//! `tracing`/`tracing-subscriber` setup, modeled on the instrumentation
//! style `adamtc007-ob-poc`'s DSL CLI uses: an `EnvFilter`
//! driven by `RUST_LOG`, defaulting to `info`, with `-log <file>`
//! redirecting the formatted output to a file instead of stderr.

use std::fs::File;
use std::io;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

struct SharedFile(Arc<Mutex<File>>);

impl io::Write for SharedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.lock().unwrap().flush()
    }
}

pub fn init(log_file: Option<&std::path::Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let writer = match log_file {
        Some(path) => {
            let file = Arc::new(Mutex::new(File::create(path)?));
            BoxMakeWriter::new(move || SharedFile(file.clone()))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(writer).with_target(false).init();
    Ok(())
}
