//! Sysfs GPIO input lines.
//!
//! One [`GpioLine`] is one exported digital input with a persistently open
//! `value` file.  The handle stays open for the life of the line so the
//! ~1 kHz encoder poller pays one `lseek` + `read` per sample instead of an
//! open/close pair.
//!
//! [`LineReader`] is the port trait the decode logic consumes; tests
//! substitute scripted readers for real hardware.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::InitError;
use crate::sysfs;

/// Default sysfs GPIO class directory.
pub const GPIO_CLASS: &str = "/sys/class/gpio";

/// Read side of a digital input.  The decode logic only ever needs a
/// boolean level per tick.
pub trait LineReader: Send {
    /// Sample the current level.  `true` = high.
    fn read(&mut self) -> io::Result<bool>;
}

/// A single exported sysfs GPIO input with a cached `value` handle.
#[derive(Debug)]
pub struct GpioLine {
    line: u32,
    value: File,
}

impl GpioLine {
    /// Export `line`, configure it as an input, and open its value file.
    ///
    /// Exporting a line that is already exported is not an error; the
    /// kernel keeps the existing state.
    pub fn open_input(line: u32) -> Result<Self, InitError> {
        Self::open_input_at(Path::new(GPIO_CLASS), line)
    }

    /// Same as [`open_input`](Self::open_input) against an alternate class
    /// root (disk-backed fakes in tests).
    pub fn open_input_at(root: &Path, line: u32) -> Result<Self, InitError> {
        let line_dir = root.join(format!("gpio{line}"));

        if !sysfs::exists(&line_dir) {
            sysfs::write_u64(&root.join("export"), u64::from(line)).map_err(|source| {
                InitError::Gpio {
                    line,
                    op: "export",
                    source,
                }
            })?;
        }

        sysfs::write_attr(&line_dir.join("direction"), "in").map_err(|source| {
            InitError::Gpio {
                line,
                op: "direction",
                source,
            }
        })?;

        let value = File::open(line_dir.join("value")).map_err(|source| InitError::Gpio {
            line,
            op: "open value",
            source,
        })?;

        Ok(Self { line, value })
    }

    /// Platform line number this input is attached to.
    pub fn line(&self) -> u32 {
        self.line
    }
}

impl LineReader for GpioLine {
    fn read(&mut self) -> io::Result<bool> {
        // The value file is a pseudo-file: rewind and re-read the first byte.
        self.value.seek(SeekFrom::Start(0))?;
        let mut buf = [0u8; 1];
        let n = self.value.read(&mut buf)?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "empty value file"));
        }
        Ok(buf[0] != b'0')
    }
}
