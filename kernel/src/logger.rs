//! Backend for the `log` facade: stamps each record with the tick-derived
//! millisecond timestamp, the CPU and the current thread id, then hands
//! the formatted line to a platform-supplied sink.

use crate::{support::IrqGuard, sync::spinlock::SpinLock, thread, thread::Thread, time};
use core::fmt::{self, Write};
use log::{LevelFilter, Log, Metadata, Record};

pub type Sink = fn(&str);

static SINK: spin::Once<Sink> = spin::Once::new();
static WRITER: SpinLock<()> = SpinLock::new("logger", ());

struct KernelLogger;

static LOGGER: KernelLogger = KernelLogger;

/// Install the logger. Later calls only adjust the level.
pub fn init(level: LevelFilter, sink: Sink) {
    SINK.call_once(|| sink);
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}

const LINE_MAX: usize = 256;

struct LineBuffer {
    buf: [u8; LINE_MAX],
    len: usize,
}

impl LineBuffer {
    const fn new() -> Self {
        Self {
            buf: [0; LINE_MAX],
            len: 0,
        }
    }

    fn as_str(&self) -> &str {
        core::str::from_utf8(&self.buf[..self.len]).unwrap_or("<bad utf8>")
    }
}

impl fmt::Write for LineBuffer {
    // Overlong records are truncated rather than refused.
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = LINE_MAX - self.len;
        let n = s.len().min(room);
        self.buf[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
        self.len += n;
        Ok(())
    }
}

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let Some(sink) = SINK.get() else {
            return;
        };
        let timestamp = time::get_milliseconds();
        let tid = thread::current().map_or(0, |t| Thread::id(&t));
        let cpu_id = {
            let _irq = IrqGuard::new();
            crate::arch::cpu_id()
        };
        let _serialized = WRITER.lock();
        let mut line = LineBuffer::new();
        let _ = write!(
            line,
            "[T:{:09} C:{} TH:0x{:x}][{}] {}",
            timestamp,
            cpu_id,
            tid,
            record.level(),
            record.args()
        );
        sink(line.as_str());
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_buffer_truncates() {
        let mut line = LineBuffer::new();
        for _ in 0..40 {
            let _ = write!(line, "0123456789");
        }
        assert_eq!(line.as_str().len(), LINE_MAX);
    }
}
