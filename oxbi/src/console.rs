// SPDX-License-Identifier: MPL-2.0

//! The machine console.
//!
//! Character I/O backends are external collaborators registered by the
//! platform; this module only owns the priority order between them and the
//! bounded diagnostic formatter. Reads and writes both go to the first
//! configured backend in the order primary UART > legacy UART > HTIF, and are
//! silently dropped when none is configured.

use core::fmt::{self, Write};

use spin::Once;

/// A `putchar`/`getchar`-shaped character backend.
pub trait ByteConsole: Sync {
    /// Writes one byte.
    fn putchar(&self, byte: u8);

    /// Reads one byte if one is available.
    fn getchar(&self) -> Option<u8>;
}

/// The host-target interface channel: a console backend that can also take
/// over the power-off sequence in simulation environments.
pub trait HtifChannel: ByteConsole {
    /// Hands the power-off to the host. Never returns.
    fn poweroff(&self) -> !;
}

/// The console backend registry.
///
/// Backends are registered once during platform bring-up; the selection
/// between them is re-evaluated on every byte, identically for reads and
/// writes.
pub struct Console {
    primary: Once<&'static dyn ByteConsole>,
    legacy: Once<&'static dyn ByteConsole>,
    htif: Once<&'static dyn ByteConsole>,
}

impl Console {
    /// Creates a registry with no backends configured.
    pub const fn new() -> Self {
        Self {
            primary: Once::new(),
            legacy: Once::new(),
            htif: Once::new(),
        }
    }

    /// Registers the primary memory-mapped UART.
    pub fn set_primary(&self, dev: &'static dyn ByteConsole) {
        self.primary.call_once(|| dev);
    }

    /// Registers the legacy UART.
    pub fn set_legacy(&self, dev: &'static dyn ByteConsole) {
        self.legacy.call_once(|| dev);
    }

    /// Registers the host-target interface console.
    pub fn set_htif(&self, dev: &'static dyn ByteConsole) {
        self.htif.call_once(|| dev);
    }

    fn backend(&self) -> Option<&'static dyn ByteConsole> {
        self.primary
            .get()
            .or_else(|| self.legacy.get())
            .or_else(|| self.htif.get())
            .map(|dev| *dev)
    }

    /// Writes one byte to the configured backend, if any.
    pub fn putchar(&self, byte: u8) {
        if let Some(dev) = self.backend() {
            dev.putchar(byte);
        }
    }

    /// Reads one byte from the configured backend; `0` when no backend is
    /// configured or no byte is available.
    pub fn getchar(&self) -> u8 {
        self.backend().and_then(|dev| dev.getchar()).unwrap_or(0)
    }

    /// Writes a string byte-by-byte.
    pub fn putstring(&self, s: &str) {
        for &byte in s.as_bytes() {
            self.putchar(byte);
        }
    }
}

/// The process-wide console.
pub static CONSOLE: Console = Console::new();

/// Size of the diagnostic rendering buffer; longer output is truncated.
const DIAG_BUF_LEN: usize = 256;

/// A fixed-capacity formatter. Output beyond the capacity is dropped, not an
/// error.
struct BoundedWriter {
    buf: [u8; DIAG_BUF_LEN],
    len: usize,
}

impl BoundedWriter {
    const fn new() -> Self {
        Self {
            buf: [0; DIAG_BUF_LEN],
            len: 0,
        }
    }

    fn as_str(&self) -> &str {
        // The buffer only ever holds prefixes of `str` input, truncated at a
        // byte boundary; lossy conversion keeps a clipped multi-byte
        // character from poisoning the output.
        core::str::from_utf8(&self.buf[..self.len]).unwrap_or("<invalid utf8>")
    }
}

impl Write for BoundedWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = DIAG_BUF_LEN - self.len;
        let take = s.len().min(room);
        self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        Ok(())
    }
}

/// Renders the formatted arguments through the bounded buffer and writes
/// them to the process-wide console.
pub fn print(args: fmt::Arguments) {
    let mut writer = BoundedWriter::new();
    let _ = writer.write_fmt(args);
    CONSOLE.putstring(writer.as_str());
}

/// Prints to the machine console.
#[macro_export]
macro_rules! mprint {
    ($($arg:tt)*) => {
        $crate::console::print(format_args!($($arg)*))
    };
}

/// Prints to the machine console, terminating the line with CR/LF.
#[macro_export]
macro_rules! mprintln {
    () => {
        $crate::console::print(format_args!("\r\n"))
    };
    ($($arg:tt)*) => {{
        $crate::console::print(format_args!($($arg)*));
        $crate::console::print(format_args!("\r\n"));
    }};
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct Recording {
        bytes: Mutex<Vec<u8>>,
        input: Option<u8>,
    }

    impl Recording {
        fn leaked(input: Option<u8>) -> &'static Self {
            Box::leak(Box::new(Self {
                bytes: Mutex::new(Vec::new()),
                input,
            }))
        }

        fn written(&self) -> Vec<u8> {
            self.bytes.lock().unwrap().clone()
        }
    }

    impl ByteConsole for Recording {
        fn putchar(&self, byte: u8) {
            self.bytes.lock().unwrap().push(byte);
        }

        fn getchar(&self) -> Option<u8> {
            self.input
        }
    }

    #[test]
    fn no_backend_drops_writes_and_reads_zero() {
        let console = Console::new();
        console.putchar(b'x');
        assert_eq!(console.getchar(), 0);
    }

    #[test]
    fn primary_backend_wins_over_the_others() {
        let console = Console::new();
        let primary = Recording::leaked(Some(b'p'));
        let legacy = Recording::leaked(Some(b'l'));
        let htif = Recording::leaked(Some(b'h'));

        console.set_htif(htif);
        assert_eq!(console.getchar(), b'h');

        console.set_legacy(legacy);
        assert_eq!(console.getchar(), b'l');

        console.set_primary(primary);
        assert_eq!(console.getchar(), b'p');

        console.putchar(b'!');
        assert_eq!(primary.written(), vec![b'!']);
        assert!(legacy.written().is_empty());
        assert!(htif.written().is_empty());
    }

    #[test]
    fn bounded_writer_truncates_long_output() {
        let mut writer = BoundedWriter::new();
        for _ in 0..40 {
            writer.write_str("0123456789").unwrap();
        }
        assert_eq!(writer.as_str().len(), DIAG_BUF_LEN);
        assert!(writer.as_str().ends_with("012345"));
    }
}
