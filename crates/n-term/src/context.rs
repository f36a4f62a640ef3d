// SPDX-License-Identifier: MIT
//
// Per-driver shared state.
//
// Everything the components would otherwise reach for through a global
// lives here: the configuration, what the backend negotiated, the colour
// pair cache, the table of outstanding device queries, and the clock. One
// context is created when a driver starts and handed by reference to each
// component that needs it. Two drivers in one process never share state.

use std::fmt;

use crate::backend::Capabilities;
use crate::clock::SharedClock;
use crate::color::ColorPairCache;
use crate::config::DriverConfig;
use crate::pending::PendingRequestTable;

pub struct DriverContext {
    pub config: DriverConfig,
    pub capabilities: Capabilities,
    /// Attribute colour pairs mapped to backend handles, kept for the
    /// lifetime of the driver.
    pub colors: ColorPairCache,
    pub pending: PendingRequestTable,
    pub clock: SharedClock,
}

impl DriverContext {
    #[must_use]
    pub fn new(config: DriverConfig, capabilities: Capabilities, clock: SharedClock) -> Self {
        Self {
            config,
            capabilities,
            colors: ColorPairCache::new(),
            pending: PendingRequestTable::new(),
            clock,
        }
    }
}

impl fmt::Debug for DriverContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverContext")
            .field("config", &self.config)
            .field("capabilities", &self.capabilities)
            .field("colors", &self.colors.len())
            .field("pending", &self.pending.total_outstanding())
            .finish_non_exhaustive()
    }
}
