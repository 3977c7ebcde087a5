//! Output multiplexer (spec.md §4.7).
//!
//! A single background thread serializes output from every live child's
//! stdout/stderr pipes: one reader thread per pipe accumulates bytes until
//! a newline and forwards whole lines to the mux's consumer thread, which
//! holds the global stdout lock only for the duration of emitting one
//! `prefix?banner?line\n` sequence (Testable Property 6).
//!
//! This generalizes the "single dedicated reaper task plus a broadcast
//! channel of exit events" redesign spec.md §9 suggests for the process
//! pool's manager-role handoff to line events instead of exit events — one
//! consumer, fed by an `mpsc` channel, rather than a linked list of waiters.
//!
//! Active pipe removal before EOF is not implemented: spec.md §5 says there
//! is no active cancellation of running children, so every registered pipe
//! is read to EOF and then dropped naturally; the "don't recycle the OS
//! handle while still referenced" hazard spec.md §9 warns about therefore
//! doesn't arise here.

use std::io::{BufRead, BufReader, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Shared banner/prefix state for one spawned process. The banner, if
/// non-empty, is printed once before the first line from that process.
pub struct OutputState {
    pub banner: String,
    pub prefix: String,
    banner_emitted: AtomicBool,
}

impl OutputState {
    pub fn new(banner: impl Into<String>, prefix: impl Into<String>) -> Arc<Self> {
        Arc::new(Self { banner: banner.into(), prefix: prefix.into(), banner_emitted: AtomicBool::new(false) })
    }
}

struct LineMsg {
    output: Arc<OutputState>,
    is_stderr: bool,
    text: String,
}

pub struct OutputMux {
    sender: mpsc::Sender<LineMsg>,
    handle: Option<JoinHandle<()>>,
}

impl OutputMux {
    /// Spawns the consumer thread. `sink` receives each finished line
    /// already prefixed and newline-terminated; tests substitute a buffer,
    /// production code writes to real stdout/stderr under `stdout_lock`.
    pub fn new<F>(mut sink: F) -> Self
    where
        F: FnMut(bool, &str) + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel::<LineMsg>();
        let handle = std::thread::spawn(move || {
            for msg in receiver {
                if !msg.output.banner.is_empty()
                    && !msg.output.banner_emitted.swap(true, Ordering::SeqCst)
                {
                    sink(msg.is_stderr, &msg.output.banner);
                }
                let line = if msg.output.prefix.is_empty() {
                    msg.text
                } else {
                    format!("{}{}", msg.output.prefix, msg.text)
                };
                sink(msg.is_stderr, &line);
            }
        });
        Self { sender, handle: Some(handle) }
    }

    /// The default sink: writes to the process's real stdout/stderr,
    /// serialized by a shared lock so interleaved children never split a
    /// line.
    pub fn stdio() -> Self {
        let lock = Arc::new(Mutex::new(()));
        Self::new(move |is_stderr, line| {
            let _guard = lock.lock().unwrap();
            if is_stderr {
                eprintln!("{line}");
            } else {
                println!("{line}");
            }
        })
    }

    /// Registers a pipe to be drained on a dedicated reader thread. Honors
    /// `skip_lines` leading lines (used to swallow banners some compilers
    /// echo, e.g. MSVC's `cl.exe`) before anything is forwarded.
    pub fn register_reader<R>(&self, reader: R, output: Arc<OutputState>, is_stderr: bool, skip_lines: usize)
    where
        R: Read + Send + 'static,
    {
        let sender = self.sender.clone();
        std::thread::spawn(move || {
            let mut reader = BufReader::new(reader);
            let mut skip = skip_lines;
            loop {
                let mut buf = String::new();
                match reader.read_line(&mut buf) {
                    Ok(0) => break, // EOF: flush nothing, last partial already handled below
                    Ok(_) => {
                        let had_newline = buf.ends_with('\n');
                        let text = buf.trim_end_matches(['\n', '\r']).to_string();
                        if skip > 0 {
                            skip -= 1;
                            continue;
                        }
                        if sender.send(LineMsg { output: output.clone(), is_stderr, text }).is_err()
                        {
                            return;
                        }
                        if !had_newline {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });
    }

    /// Blocks until every registered pipe has been dropped and all
    /// in-flight lines have been emitted.
    pub fn shutdown(mut self) {
        drop(self.sender.clone());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for OutputMux {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::mpsc as std_mpsc;

    #[test]
    fn lines_are_prefixed_and_whole() {
        let (tx, rx) = std_mpsc::channel::<(bool, String)>();
        let mux = OutputMux::new(move |is_stderr, line| {
            tx.send((is_stderr, line.to_string())).unwrap();
        });

        let output = OutputState::new("", "[app] ");
        mux.register_reader(Cursor::new(b"line one\nline two\n".to_vec()), output, false, 0);

        let first = rx.recv().unwrap();
        let second = rx.recv().unwrap();
        assert_eq!(first, (false, "[app] line one".to_string()));
        assert_eq!(second, (false, "[app] line two".to_string()));
    }

    #[test]
    fn banner_emitted_once() {
        let (tx, rx) = std_mpsc::channel::<(bool, String)>();
        let mux = OutputMux::new(move |is_stderr, line| {
            tx.send((is_stderr, line.to_string())).unwrap();
        });

        let output = OutputState::new("== banner ==", "");
        mux.register_reader(Cursor::new(b"a\nb\n".to_vec()), output.clone(), false, 0);

        let banner = rx.recv().unwrap();
        assert_eq!(banner.1, "== banner ==");
        let a = rx.recv().unwrap();
        assert_eq!(a.1, "a");
    }

    #[test]
    fn skip_leading_lines_swallows_banner_noise() {
        let (tx, rx) = std_mpsc::channel::<(bool, String)>();
        let mux = OutputMux::new(move |is_stderr, line| {
            tx.send((is_stderr, line.to_string())).unwrap();
        });

        let output = OutputState::new("", "");
        mux.register_reader(Cursor::new(b"noise\nreal output\n".to_vec()), output, false, 1);

        let only = rx.recv().unwrap();
        assert_eq!(only.1, "real output");
    }
}
