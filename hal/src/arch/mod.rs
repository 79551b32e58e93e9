//! Per-architecture implementations of the HAL seams
//!
//! Only the module matching the build target is compiled in.

cfg_if::cfg_if! {
    if #[cfg(target_arch = "arm")] {
        pub mod cortex_m;
    } else if #[cfg(target_arch = "aarch64")] {
        pub mod aarch64;
    } else if #[cfg(target_arch = "x86_64")] {
        pub mod x86_64;
    } else if #[cfg(target_arch = "riscv64")] {
        pub mod riscv64;
    }
}
