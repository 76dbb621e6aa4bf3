//! Accelerator device types.

use std::error::Error;
use std::fmt;
use std::str::FromStr;

/// Kind of compute backend an instance drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeviceType {
    /// Host-only processing. Always available.
    Cpu,
    /// NVIDIA CUDA.
    Cuda,
    /// AMD HIP.
    Hip,
    /// OpenCL 1.2.
    OpenCl,
    /// OpenCL 2.x.
    OpenCl2,
}

impl DeviceType {
    /// Every device type, in declaration order.
    pub const ALL: [DeviceType; 5] = [
        DeviceType::Cpu,
        DeviceType::Cuda,
        DeviceType::Hip,
        DeviceType::OpenCl,
        DeviceType::OpenCl2,
    ];

    /// Short upper-case name, e.g. `"CUDA"`.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Cpu => "CPU",
            Self::Cuda => "CUDA",
            Self::Hip => "HIP",
            Self::OpenCl => "OCL",
            Self::OpenCl2 => "OCL2",
        }
    }

    /// Whether this device has its own memory plane.
    pub const fn is_accelerator(self) -> bool {
        !matches!(self, Self::Cpu)
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A device type name that matched none of [`DeviceType::ALL`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseDeviceTypeError {
    /// The rejected input.
    pub input: String,
}

impl fmt::Display for ParseDeviceTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid device type: {}", self.input)
    }
}

impl Error for ParseDeviceTypeError {}

impl FromStr for DeviceType {
    type Err = ParseDeviceTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|d| d.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseDeviceTypeError {
                input: s.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("cuda".parse::<DeviceType>(), Ok(DeviceType::Cuda));
        assert_eq!("OCL2".parse::<DeviceType>(), Ok(DeviceType::OpenCl2));
        assert_eq!(" cpu ".parse::<DeviceType>(), Ok(DeviceType::Cpu));
    }

    #[test]
    fn parse_rejects_unknown() {
        let err = "TPU".parse::<DeviceType>().unwrap_err();
        assert_eq!(err.input, "TPU");
    }

    #[test]
    fn names_round_trip() {
        for d in DeviceType::ALL {
            assert_eq!(d.name().parse::<DeviceType>(), Ok(d));
        }
    }

    #[test]
    fn only_cpu_is_host_only() {
        assert!(!DeviceType::Cpu.is_accelerator());
        assert!(DeviceType::Hip.is_accelerator());
    }
}
