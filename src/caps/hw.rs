//! Host hardware capability probe.
//!
//! Produces an immutable [`HwCaps`] flag set describing the OS family, CPU
//! ISA width and SIMD features of the running host. OS, CPU and GPU flags
//! share one 32-bit namespace so a backend's `required_hardware_flags` can be
//! tested against their union with a single mask.
//!
//! There is no portable way to interrogate a GPU without initialising a
//! graphics API, so [`probe`] reports no GPU features; hosts that know better
//! declare them through [`HwCaps::with_gpu_flags`] (see the `[hardware]`
//! config section).

use serde::Serialize;

use crate::kernel::kernel_caps;

/// OS family flags (bits 0-7).
pub mod os {
    pub const WIN32: u32 = 1 << 0;
    pub const POSIX: u32 = 1 << 1;
    pub const LINUX: u32 = 1 << 2;
    pub const APPLE: u32 = 1 << 3;

    pub const MASK: u32 = 0x0000_00ff;
}

/// CPU ISA and SIMD flags (bits 8-15).
pub mod cpu {
    pub const X86_32: u32 = 1 << 8;
    pub const X86_64: u32 = 1 << 9;
    pub const ARM32: u32 = 1 << 10;
    pub const ARM64: u32 = 1 << 11;
    pub const SSE2: u32 = 1 << 12;
    pub const SSE42: u32 = 1 << 13;
    pub const AVX2: u32 = 1 << 14;
    pub const NEON: u32 = 1 << 15;

    /// Every SIMD extension bit.
    pub const SIMD_MASK: u32 = SSE2 | SSE42 | AVX2 | NEON;
    pub const MASK: u32 = 0x0000_ff00;
}

/// GPU API and feature flags (bits 16-23).
pub mod gpu {
    pub const GL2: u32 = 1 << 16;
    pub const VK1: u32 = 1 << 17;
    pub const DX9: u32 = 1 << 18;
    pub const DX11: u32 = 1 << 19;
    pub const METAL: u32 = 1 << 20;
    pub const COMPUTE: u32 = 1 << 21;

    pub const MASK: u32 = 0x00ff_0000;

    /// Map a config-file feature name (`"vk1"`, `"compute"`, ...) to its flag.
    pub fn from_name(name: &str) -> Option<u32> {
        let flag = match name.to_ascii_lowercase().as_str() {
            "gl2" => GL2,
            "vk1" => VK1,
            "dx9" => DX9,
            "dx11" => DX11,
            "metal" => METAL,
            "compute" => COMPUTE,
            _ => return None,
        };
        Some(flag)
    }
}

/// Immutable snapshot of host hardware capabilities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HwCaps {
    pub os_flags: u32,
    pub cpu_flags: u32,
    pub gpu_flags: u32,
}

impl HwCaps {
    /// Build a snapshot from explicit flag words (tests, replay tooling).
    pub const fn new(os_flags: u32, cpu_flags: u32, gpu_flags: u32) -> Self {
        Self {
            os_flags,
            cpu_flags,
            gpu_flags,
        }
    }

    /// Union of OS, CPU and GPU flags.
    pub const fn flags(&self) -> u32 {
        self.os_flags | self.cpu_flags | self.gpu_flags
    }

    /// Returns `true` when every bit of `required` is present on the host.
    pub const fn satisfies(&self, required: u32) -> bool {
        required & !self.flags() == 0
    }

    pub fn with_gpu_flags(mut self, gpu_flags: u32) -> Self {
        self.gpu_flags |= gpu_flags & gpu::MASK;
        self
    }

    /// Drop every SIMD extension bit, leaving the scalar ISA flags intact.
    pub fn without_simd(mut self) -> Self {
        self.cpu_flags &= !cpu::SIMD_MASK;
        self
    }

    pub const fn has_simd(&self) -> bool {
        self.cpu_flags & cpu::SIMD_MASK != 0
    }

    /// Native pointer width of the CPU ISA in bits (0 when unknown).
    pub const fn isa_width_bits(&self) -> u32 {
        if self.cpu_flags & (cpu::X86_64 | cpu::ARM64) != 0 {
            64
        } else if self.cpu_flags & (cpu::X86_32 | cpu::ARM32) != 0 {
            32
        } else {
            0
        }
    }

    /// Kernel capability bits this host can satisfy.
    pub const fn kernel_capabilities(&self) -> u32 {
        let mut caps = 0;
        if self.has_simd() {
            caps |= kernel_caps::SIMD;
        }
        if self.gpu_flags & gpu::COMPUTE != 0 {
            caps |= kernel_caps::GPU_COMPUTE;
        }
        caps
    }
}

/// Probe the running host.
pub fn probe() -> HwCaps {
    HwCaps {
        os_flags: probe_os(),
        cpu_flags: probe_cpu(),
        gpu_flags: 0,
    }
}

fn probe_os() -> u32 {
    let mut flags = 0;
    if cfg!(windows) {
        flags |= os::WIN32;
    }
    if cfg!(unix) {
        flags |= os::POSIX;
    }
    if cfg!(target_os = "linux") {
        flags |= os::LINUX;
    }
    if cfg!(target_vendor = "apple") {
        flags |= os::APPLE;
    }
    flags
}

fn probe_cpu() -> u32 {
    let mut flags = 0;
    if cfg!(target_arch = "x86") {
        flags |= cpu::X86_32;
    }
    if cfg!(target_arch = "x86_64") {
        flags |= cpu::X86_64;
    }
    if cfg!(target_arch = "arm") {
        flags |= cpu::ARM32;
    }
    if cfg!(target_arch = "aarch64") {
        flags |= cpu::ARM64;
    }

    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    {
        if std::arch::is_x86_feature_detected!("sse2") {
            flags |= cpu::SSE2;
        }
        if std::arch::is_x86_feature_detected!("sse4.2") {
            flags |= cpu::SSE42;
        }
        if std::arch::is_x86_feature_detected!("avx2") {
            flags |= cpu::AVX2;
        }
    }

    // ASIMD is architecturally mandatory on AArch64.
    #[cfg(target_arch = "aarch64")]
    {
        flags |= cpu::NEON;
    }

    flags
}
