//! Serialized console output.
//!
//! Many sessions finish concurrently; each result must land on its own
//! line without interleaving with another. The client prints every reply it
//! receives, the server every reply it sends.

use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};

/// A print sink shared between tasks. One `report` call writes one line.
#[derive(Debug)]
pub struct Reporter<W> {
    sink: Mutex<W>,
}

impl<W: Write> Reporter<W> {
    /// Wrap `sink`; every report goes through its lock.
    pub fn new(sink: W) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }

    /// Write `value` followed by a newline and flush.
    pub fn report(&self, value: i64) -> io::Result<()> {
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(sink, "{value}")?;
        sink.flush()
    }

    /// Give back the sink, e.g. to inspect captured output.
    pub fn into_inner(self) -> W {
        self.sink.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Reporter<io::Stdout> {
    /// Reporter over the process's standard output.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

/// Reporter over any sink, for holders that should not be generic over it.
pub type DynReporter = Reporter<Box<dyn Write + Send>>;

impl DynReporter {
    /// Erase the concrete sink type.
    pub fn boxed<W: Write + Send + 'static>(sink: W) -> Self {
        Self::new(Box::new(sink))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    /// A cloneable in-memory sink, readable while a reporter still owns it.
    #[derive(Debug, Clone, Default)]
    pub(crate) struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        pub(crate) fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_one_line_per_value() {
        let reporter = Reporter::new(Vec::new());
        reporter.report(6).unwrap();
        reporter.report(-42).unwrap();
        assert_eq!(reporter.into_inner(), b"6\n-42\n");
    }

    #[test]
    fn test_concurrent_reports_do_not_interleave() {
        let reporter = Arc::new(Reporter::new(Vec::new()));
        let threads: Vec<_> = (0..8)
            .map(|t| {
                let reporter = Arc::clone(&reporter);
                thread::spawn(move || {
                    for i in 0..100 {
                        reporter.report(t * 1_000_000 + i).unwrap();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let reporter = Arc::try_unwrap(reporter).unwrap();
        let output = String::from_utf8(reporter.into_inner()).unwrap();
        let lines: Vec<i64> = output.lines().map(|l| l.parse().unwrap()).collect();
        assert_eq!(lines.len(), 800);
        for t in 0..8 {
            assert_eq!(lines.iter().filter(|&&v| v / 1_000_000 == t).count(), 100);
        }
    }

    #[test]
    fn test_boxed_sink() {
        let output = Captured::default();
        let reporter = DynReporter::boxed(output.clone());
        reporter.report(i64::MIN).unwrap();
        assert_eq!(output.contents(), format!("{}\n", i64::MIN));
    }
}
