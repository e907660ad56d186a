//! Rotating log file sink with a bounded hand-off queue.
//!
//! [`FileSink`] appends complete log lines to `<dir>/YYYY_MM_DD<suffix>`,
//! starting a new file on the first write of each calendar day and rolling
//! to `<dir>/YYYY_MM_DD-N<suffix>` every 50 000 lines. With a nonzero queue
//! capacity the sink is asynchronous: writers enqueue and a single consumer
//! thread performs the file I/O. A full queue falls back to a synchronous
//! write on the caller's thread rather than blocking it or dropping the
//! line.
//!
//! [`SinkWriter`] implements `std::io::Write` one-line-per-write, so the
//! sink slots directly into `tracing_subscriber`'s `with_writer`.

pub mod queue;

pub use queue::BoundedQueue;

use chrono::{Local, NaiveDate};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Lines per file segment before the `-N` suffix rolls.
pub const MAX_LINES: u64 = 50_000;

struct LogFile {
    dir: PathBuf,
    suffix: String,
    file: Option<File>,
    line_count: u64,
    today: NaiveDate,
}

impl LogFile {
    fn open_segment(&mut self, date: NaiveDate) -> io::Result<()> {
        if let Some(file) = self.file.as_mut() {
            let _ = file.flush();
        }
        let stem = date.format("%Y_%m_%d");
        let name = if date != self.today || self.line_count == 0 {
            format!("{}{}", stem, self.suffix)
        } else {
            format!("{}-{}{}", stem, self.line_count / MAX_LINES, self.suffix)
        };
        if date != self.today {
            self.today = date;
            self.line_count = 0;
        }
        self.file = Some(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.dir.join(name))?,
        );
        Ok(())
    }

    /// Append one line, rotating first when the day changed or the current
    /// segment is full. Failures are swallowed: logging never raises.
    fn write_line(&mut self, line: &[u8]) {
        let date = Local::now().date_naive();
        let segment_full = self.line_count > 0 && self.line_count % MAX_LINES == 0;
        if self.file.is_none() || date != self.today || segment_full {
            if self.open_segment(date).is_err() {
                return;
            }
        }
        if let Some(file) = self.file.as_mut() {
            if file.write_all(line).is_ok() {
                self.line_count += 1;
            }
        }
    }

    fn flush(&mut self) {
        if let Some(file) = self.file.as_mut() {
            let _ = file.flush();
        }
    }
}

struct Shared {
    queue: Option<BoundedQueue<Vec<u8>>>,
    file: std::sync::Mutex<LogFile>,
}

/// A rotating file sink with an optional asynchronous writer thread.
pub struct FileSink {
    shared: Arc<Shared>,
    consumer: Option<JoinHandle<()>>,
}

impl FileSink {
    /// Open a sink writing under `dir` with the given file `suffix`.
    ///
    /// `queue_capacity` of zero selects synchronous writes; otherwise a
    /// consumer thread drains a bounded queue of that capacity. The
    /// directory is created (permissions `0o777`) if missing.
    pub fn new(dir: &Path, suffix: &str, queue_capacity: usize) -> io::Result<FileSink> {
        fs::create_dir_all(dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(dir, fs::Permissions::from_mode(0o777));
        }

        let shared = Arc::new(Shared {
            queue: (queue_capacity > 0).then(|| BoundedQueue::with_capacity(queue_capacity)),
            file: std::sync::Mutex::new(LogFile {
                dir: dir.to_path_buf(),
                suffix: suffix.to_string(),
                file: None,
                line_count: 0,
                today: NaiveDate::MIN,
            }),
        });

        let consumer = shared.queue.as_ref().map(|_| {
            let shared = shared.clone();
            thread::Builder::new()
                .name("log-writer".to_string())
                .spawn(move || {
                    let queue = shared.queue.as_ref().unwrap();
                    while let Some(line) = queue.pop() {
                        shared.file.lock().unwrap().write_line(&line);
                        if queue.is_empty() {
                            shared.file.lock().unwrap().flush();
                        }
                    }
                })
                .expect("failed to spawn log writer thread")
        });

        Ok(FileSink { shared, consumer })
    }

    /// A cheap handle implementing `io::Write`, one line per write call.
    pub fn writer(&self) -> SinkWriter {
        SinkWriter {
            shared: self.shared.clone(),
        }
    }

    /// Wake the consumer and flush the current file.
    pub fn flush(&self) {
        if let Some(queue) = self.shared.queue.as_ref() {
            queue.flush();
        }
        self.shared.file.lock().unwrap().flush();
    }

    /// Total lines written to the current day's files so far.
    pub fn lines_written(&self) -> u64 {
        self.shared.file.lock().unwrap().line_count
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        if let Some(queue) = self.shared.queue.as_ref() {
            // Drain pending lines, then stop the consumer.
            while !queue.is_empty() {
                queue.flush();
                thread::yield_now();
            }
            queue.close();
        }
        if let Some(consumer) = self.consumer.take() {
            let _ = consumer.join();
        }
        self.shared.file.lock().unwrap().flush();
    }
}

/// Writer handle for one producer; suitable for
/// `tracing_subscriber::fmt::layer().with_writer(move || sink.writer())`.
pub struct SinkWriter {
    shared: Arc<Shared>,
}

impl Write for SinkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.shared.queue.as_ref() {
            Some(queue) => {
                // Full queue: write synchronously rather than blocking the
                // caller on log I/O.
                if let Err(line) = queue.try_push_back(buf.to_vec()) {
                    self.shared.file.lock().unwrap().write_line(&line);
                }
            }
            None => self.shared.file.lock().unwrap().write_line(buf),
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(queue) = self.shared.queue.as_ref() {
            queue.flush();
        }
        self.shared.file.lock().unwrap().flush();
        Ok(())
    }
}
