// Copyright Antonio Porsia 2025. Licensed under the EUPL-1.2 or later.

/// Number of breakpoints a debugger has placed inside a block for one kind of access.
///
/// Never goes below zero: a decrement at zero is refused and leaves the count untouched.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct BreakpointCount(u32);

impl BreakpointCount {
    #[inline]
    pub fn get(&self) -> u32 {
        self.0
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.0 > 0
    }

    /// Adds a breakpoint. Returns `true` on the 0 -> 1 transition.
    pub fn increment(&mut self) -> bool {
        self.0 = self.0.saturating_add(1);
        self.0 == 1
    }

    /// Removes a breakpoint. Returns `Some(true)` on the 1 -> 0 transition, `None` on underflow.
    pub fn decrement(&mut self) -> Option<bool> {
        self.0 = self.0.checked_sub(1)?;
        Some(self.0 == 0)
    }
}
