//! Linux `i2c-dev` backend: `/dev/i2c-<bus>` driven through SMBus ioctls.

use super::{Bus, BusProvider};
use i2con_proto::BusId;
use libc::c_ulong;
use log::debug;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

// <linux/i2c-dev.h>
const I2C_SLAVE: c_ulong = 0x0703;
const I2C_TENBIT: c_ulong = 0x0704;
const I2C_SMBUS: c_ulong = 0x0720;

// <linux/i2c.h>
const I2C_SMBUS_WRITE: u8 = 0;
const I2C_SMBUS_READ: u8 = 1;
const I2C_SMBUS_BYTE_DATA: u32 = 2;
const I2C_SMBUS_WORD_DATA: u32 = 3;
const I2C_SMBUS_BLOCK_MAX: usize = 32;

const MAX_7BIT_ADDRESS: u16 = 0x7f;

#[repr(C)]
union SmbusData {
    byte: u8,
    word: u16,
    block: [u8; I2C_SMBUS_BLOCK_MAX + 2],
}

#[repr(C)]
struct SmbusIoctlData {
    read_write: u8,
    command: u8,
    size: u32,
    data: *mut SmbusData,
}

/// Opens buses from a device directory, `/dev` unless overridden.
#[derive(Debug, Clone)]
pub struct LinuxI2c {
    dev_dir: PathBuf,
}

impl Default for LinuxI2c {
    fn default() -> Self {
        Self { dev_dir: PathBuf::from("/dev") }
    }
}

impl LinuxI2c {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dev_dir(dev_dir: impl Into<PathBuf>) -> Self {
        Self { dev_dir: dev_dir.into() }
    }

    pub fn device_path(&self, bus: BusId) -> PathBuf {
        self.dev_dir.join(format!("i2c-{bus}"))
    }
}

impl BusProvider for LinuxI2c {
    type Handle = I2cDevice;

    fn open(&self, bus: BusId) -> io::Result<I2cDevice> {
        if bus < 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, format!("invalid bus id {bus}")));
        }
        I2cDevice::open(&self.device_path(bus))
    }
}

/// An open `i2c-dev` character device.
#[derive(Debug)]
pub struct I2cDevice {
    file: File,
    ten_bit: bool,
}

impl I2cDevice {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        debug!("opened {}", path.display());
        Ok(Self { file, ten_bit: false })
    }

    fn ioctl(&self, request: c_ulong, arg: c_ulong) -> io::Result<()> {
        // SAFETY: I2C_SLAVE and I2C_TENBIT take an integer argument.
        let rc = unsafe { libc::ioctl(self.file.as_raw_fd(), request as _, arg) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn smbus(&self, read_write: u8, command: u8, size: u32, data: &mut SmbusData) -> io::Result<()> {
        let mut args = SmbusIoctlData {
            read_write,
            command,
            size,
            data,
        };
        // SAFETY: `args` and the data block it points to outlive the call.
        let rc = unsafe { libc::ioctl(self.file.as_raw_fd(), I2C_SMBUS as _, &mut args as *mut SmbusIoctlData) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Bus for I2cDevice {
    fn select_device(&mut self, address: u16) -> io::Result<()> {
        let ten_bit = address > MAX_7BIT_ADDRESS;
        if ten_bit != self.ten_bit {
            self.ioctl(I2C_TENBIT, ten_bit as c_ulong)?;
            self.ten_bit = ten_bit;
        }
        self.ioctl(I2C_SLAVE, address as c_ulong)
    }

    fn read_byte_data(&mut self, register: u8) -> io::Result<u8> {
        let mut data = SmbusData { block: [0; I2C_SMBUS_BLOCK_MAX + 2] };
        self.smbus(I2C_SMBUS_READ, register, I2C_SMBUS_BYTE_DATA, &mut data)?;
        // SAFETY: every bit pattern is a valid u8.
        Ok(unsafe { data.byte })
    }

    fn read_word_data(&mut self, register: u8) -> io::Result<u16> {
        let mut data = SmbusData { block: [0; I2C_SMBUS_BLOCK_MAX + 2] };
        self.smbus(I2C_SMBUS_READ, register, I2C_SMBUS_WORD_DATA, &mut data)?;
        // SAFETY: every bit pattern is a valid u16.
        Ok(unsafe { data.word })
    }

    fn write_byte_data(&mut self, register: u8, value: u8) -> io::Result<()> {
        let mut data = SmbusData { byte: value };
        self.smbus(I2C_SMBUS_WRITE, register, I2C_SMBUS_BYTE_DATA, &mut data)
    }

    fn write_word_data(&mut self, register: u8, value: u16) -> io::Result<()> {
        let mut data = SmbusData { word: value };
        self.smbus(I2C_SMBUS_WRITE, register, I2C_SMBUS_WORD_DATA, &mut data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_path_follows_bus_id() {
        let provider = LinuxI2c::with_dev_dir("/tmp/i2c-test");
        assert_eq!(provider.device_path(1), PathBuf::from("/tmp/i2c-test/i2c-1"));
        assert_eq!(LinuxI2c::new().device_path(0), PathBuf::from("/dev/i2c-0"));
    }

    #[test]
    fn missing_bus_fails_to_open() {
        let provider = LinuxI2c::with_dev_dir("/nonexistent-i2con-dev");
        let err = provider.open(3).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn negative_bus_is_rejected() {
        let err = LinuxI2c::new().open(-1).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn ioctl_on_regular_file_fails() {
        let path = std::env::temp_dir().join(format!("i2con-not-a-bus-{}", std::process::id()));
        std::fs::write(&path, b"").unwrap();
        let mut dev = I2cDevice::open(&path).unwrap();
        assert!(dev.select_device(0x29).is_err());
        assert!(dev.read_byte_data(0x92).is_err());
        std::fs::remove_file(&path).unwrap();
    }
}
