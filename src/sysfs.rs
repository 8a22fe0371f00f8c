//! Tiny sysfs attribute helpers shared by the GPIO and PWM adapters.
//!
//! A sysfs attribute is a one-line pseudo-file; writes either take effect
//! whole or fail with an errno from the driver (EINVAL for out-of-range
//! values, EBUSY for double exports).  Short writes do not happen, so a
//! plain `fs::write` of the decimal string is the entire protocol.

use std::fs;
use std::io;
use std::path::Path;

/// Write a string to a sysfs attribute.
pub fn write_attr(path: &Path, value: &str) -> io::Result<()> {
    fs::write(path, value)
}

/// Write an integer to a sysfs attribute as its decimal string.
pub fn write_u64(path: &Path, value: u64) -> io::Result<()> {
    fs::write(path, value.to_string())
}

/// Read a sysfs attribute and parse it as an integer.
pub fn read_u64(path: &Path) -> io::Result<u64> {
    let text = fs::read_to_string(path)?;
    text.trim()
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Does the path exist?  (Export appearance checks.)
pub fn exists(path: &Path) -> bool {
    path.exists()
}
