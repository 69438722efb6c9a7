// CLASSIFICATION: COMMUNITY
// Filename: console.rs v0.3
// Author: Lukas Bower
// Date Modified: 2027-08-26

//! Serialized console sink for the write syscall.
//!
//! Both worlds funnel their console bytes through here one byte per
//! trap; each world gets its own line buffer so concurrent writers can
//! never interleave within a line. The caller's security state is used
//! only to annotate the drained line.

use std::sync::Mutex;

type LineSink = Box<dyn Fn(bool, &str) + Send + Sync>;

struct ConsoleState {
    secure_line: Vec<u8>,
    normal_line: Vec<u8>,
}

/// Byte-oriented console with per-world line buffering.
pub struct Console {
    state: Mutex<ConsoleState>,
    sink: LineSink,
}

impl Console {
    /// Console draining completed lines through the log facade.
    #[must_use]
    pub fn new() -> Self {
        Self::with_sink(Box::new(|secure, line| {
            let origin = if secure { "secure" } else { "normal" };
            log::info!(target: "console", "[{origin}] {line}");
        }))
    }

    /// Console draining completed lines into the supplied sink.
    #[must_use]
    pub fn with_sink(sink: LineSink) -> Self {
        Self {
            state: Mutex::new(ConsoleState {
                secure_line: Vec::new(),
                normal_line: Vec::new(),
            }),
            sink,
        }
    }

    /// Buffer one byte from the given security state, draining the line
    /// when a newline arrives.
    pub fn write_byte(&self, secure: bool, byte: u8) {
        let mut state = self.state.lock().expect("console lock poisoned");
        let line = if secure {
            &mut state.secure_line
        } else {
            &mut state.normal_line
        };
        if byte == b'\n' {
            let text = String::from_utf8_lossy(line).into_owned();
            line.clear();
            drop(state);
            (self.sink)(secure, &text);
        } else {
            line.push(byte);
        }
    }

    /// Drain any partial lines, annotated like completed ones.
    pub fn flush(&self) {
        let mut state = self.state.lock().expect("console lock poisoned");
        let secure = std::mem::take(&mut state.secure_line);
        let normal = std::mem::take(&mut state.normal_line);
        drop(state);
        if !secure.is_empty() {
            (self.sink)(true, &String::from_utf8_lossy(&secure));
        }
        if !normal.is_empty() {
            (self.sink)(false, &String::from_utf8_lossy(&normal));
        }
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn capturing_console() -> (Arc<Console>, Arc<Mutex<Vec<(bool, String)>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let captured = lines.clone();
        let console = Arc::new(Console::with_sink(Box::new(move |secure, line| {
            captured.lock().unwrap().push((secure, line.to_string()));
        })));
        (console, lines)
    }

    #[test]
    fn worlds_get_separate_line_buffers() {
        let (console, lines) = capturing_console();
        for (secure, text) in [(true, "monitor up"), (false, "kernel up")] {
            for byte in text.bytes() {
                console.write_byte(secure, byte);
            }
        }
        console.write_byte(false, b'\n');
        console.write_byte(true, b'\n');

        let lines = lines.lock().unwrap();
        assert_eq!(lines[0], (false, "kernel up".to_string()));
        assert_eq!(lines[1], (true, "monitor up".to_string()));
    }

    #[test]
    fn concurrent_writers_never_interleave_a_line() {
        let (console, lines) = capturing_console();
        let workers: Vec<_> = [(true, "ssssssss\n"), (false, "nnnnnnnn\n")]
            .into_iter()
            .map(|(secure, text)| {
                let console = console.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        for byte in text.bytes() {
                            console.write_byte(secure, byte);
                        }
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().expect("join writer");
        }

        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 100);
        for (secure, line) in lines.iter() {
            let expected = if *secure { "ssssssss" } else { "nnnnnnnn" };
            assert_eq!(line, expected);
        }
    }

    #[test]
    fn flush_drains_partial_lines() {
        let (console, lines) = capturing_console();
        console.write_byte(true, b'x');
        console.flush();
        assert_eq!(lines.lock().unwrap()[0], (true, "x".to_string()));
    }
}
