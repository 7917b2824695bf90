//! Diagnostics output of the control and identification tasks.
//!
//! The sink is a narrow text channel: on the board it is a UART or a semihosting console, on a
//! host any [`std::io::Write`].  Lines are formatted into fixed-capacity buffers so the control
//! task never allocates.

use core::fmt::{self, Write as _};

use log::warn;

use crate::scheduler::Tick;

/// Capacity of a formatted diagnostics line.
pub const LINE_CAPACITY: usize = 64;

/// A formatted diagnostics line.
pub type Line = heapless::String<LINE_CAPACITY>;

/// Text channel receiving loop records and reports.
pub trait DiagnosticSink {
    /// Emit a chunk of text, typically one newline-terminated line.
    fn emit(&mut self, text: &str);
}

impl<T: DiagnosticSink + ?Sized> DiagnosticSink for &mut T {
    fn emit(&mut self, text: &str) {
        (**self).emit(text)
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn emit(&mut self, _text: &str) {}
}

/// Keeps the first `N` lines in memory.
///
/// Once full, further lines are dropped.
impl<const N: usize> DiagnosticSink for heapless::Vec<Line, N> {
    fn emit(&mut self, text: &str) {
        let mut line = Line::new();
        if line.push_str(text).is_err() {
            warn!("diagnostics line of {} bytes truncated", text.len());
            for c in text.chars() {
                if line.push(c).is_err() {
                    break;
                }
            }
        }
        // full buffers drop the line
        let _ = self.push(line);
    }
}

/// One control loop iteration: `tick,reference,output,measured`.
///
/// All values are integers; the unit of `reference`, `output` and `measured` depends on the
/// strategy (millivolts for the filter loops, scaled volts for the observer loop).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopRecord {
    pub tick: Tick,
    pub reference: i32,
    pub output: i32,
    pub measured: i32,
}

impl LoopRecord {
    /// Format as a newline-terminated CSV line.
    ///
    /// # Examples
    ///
    /// ```
    /// use fixed_control::diagnostics::LoopRecord;
    ///
    /// let record = LoopRecord { tick: 5, reference: 2000, output: 3999, measured: 0 };
    /// assert_eq!(record.to_line().as_str(), "5,2000,3999,0\n");
    /// ```
    pub fn to_line(&self) -> Line {
        let mut line = Line::new();
        // four integers always fit in the line capacity
        let _ = writeln!(line, "{}", self);
        line
    }
}

impl fmt::Display for LoopRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.tick, self.reference, self.output, self.measured
        )
    }
}

#[cfg(feature = "std")]
pub use self::writer::WriterSink;

#[cfg(feature = "std")]
mod writer {
    use std::io::Write;

    use log::error;

    use super::DiagnosticSink;

    /// Sink writing to any [`std::io::Write`].
    ///
    /// Write errors are logged once and the sink goes quiet afterwards.
    #[derive(Debug)]
    pub struct WriterSink<W> {
        writer: W,
        failed: bool,
    }

    impl<W: Write> WriterSink<W> {
        pub fn new(writer: W) -> Self {
            Self {
                writer,
                failed: false,
            }
        }

        pub fn into_inner(self) -> W {
            self.writer
        }
    }

    impl<W: Write> DiagnosticSink for WriterSink<W> {
        fn emit(&mut self, text: &str) {
            if self.failed {
                return;
            }
            if let Err(e) = self.writer.write_all(text.as_bytes()) {
                error!("diagnostics output failed: {}", e);
                self.failed = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_line() {
        let record = LoopRecord {
            tick: 4_294_967_295,
            reference: -2_147_483_648,
            output: -2_147_483_648,
            measured: -2_147_483_648,
        };
        let line = record.to_line();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches(',').count(), 3);
        assert_eq!(
            line.as_str(),
            "4294967295,-2147483648,-2147483648,-2147483648\n"
        );
    }

    #[test]
    fn buffer_sink_keeps_lines_until_full() {
        let mut sink: heapless::Vec<Line, 2> = heapless::Vec::new();
        sink.emit("a\n");
        sink.emit("b\n");
        sink.emit("c\n");
        assert_eq!(sink.len(), 2);
        assert_eq!(sink[1].as_str(), "b\n");
    }

    #[test]
    fn buffer_sink_truncates_long_lines() {
        let mut sink: heapless::Vec<Line, 1> = heapless::Vec::new();
        let long = "x".repeat(100);
        sink.emit(&long);
        assert_eq!(sink[0].len(), LINE_CAPACITY);
    }

    #[cfg(feature = "std")]
    #[test]
    fn writer_sink() {
        let mut sink = WriterSink::new(Vec::new());
        sink.emit("1,2,3,4\n");
        sink.emit("Identified system parameters:\n");
        let text = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(text, "1,2,3,4\nIdentified system parameters:\n");
    }
}
