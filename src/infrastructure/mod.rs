pub mod bluetooth;
#[cfg(windows)]
pub mod gamepad;
pub mod logging;
