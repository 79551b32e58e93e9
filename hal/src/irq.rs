//! Scoped interrupt masking

use crate::InterruptControl;

/// Interrupts stay masked for the lifetime of the guard
///
/// The previous state is restored on drop, so nested guards compose.
pub struct IrqGuard<'a> {
    control: &'a dyn InterruptControl,
    state: usize,
}

impl<'a> IrqGuard<'a> {
    /// Mask interrupts until the guard is dropped
    pub fn new(control: &'a dyn InterruptControl) -> Self {
        let state = control.disable();
        Self { control, state }
    }

    /// Mask state captured when the guard was created
    #[inline]
    pub fn saved_state(&self) -> usize {
        self.state
    }
}

impl Drop for IrqGuard<'_> {
    fn drop(&mut self) {
        self.control.restore(self.state);
    }
}

impl core::fmt::Debug for IrqGuard<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IrqGuard")
            .field("state", &self.state)
            .finish()
    }
}
