// SPDX-License-Identifier: MPL-2.0

//! The process-wide coordinator owning all shared per-hart state.

use crate::{
    console::HtifChannel,
    hal::{Finisher, IpiController, TriggerUnit},
    hart::{HartId, HartLocal, HartMask, HartTable},
};

/// The machine-mode runtime coordinator.
///
/// One instance exists per system, constructed by the embedding firmware
/// before any trap handling begins and never destroyed. It owns the fixed
/// per-hart state table, the enabled-hart mask, the interrupt controller
/// client, and the opaque platform collaborators.
pub struct Machine<I: IpiController> {
    intc: I,
    harts: HartTable,
    enabled: HartMask,
    htif: Option<&'static dyn HtifChannel>,
    finisher: Option<&'static dyn Finisher>,
    trigger: Option<&'static dyn TriggerUnit>,
}

impl<I: IpiController> Machine<I> {
    /// Creates a coordinator over the given interrupt controller client and
    /// enabled-hart mask.
    pub const fn new(intc: I, enabled: HartMask) -> Self {
        Self {
            intc,
            harts: HartTable::new(),
            enabled,
            htif: None,
            finisher: None,
            trigger: None,
        }
    }

    /// Attaches the HTIF channel used for console fallback and power-off
    /// delegation.
    pub fn with_htif(mut self, htif: &'static dyn HtifChannel) -> Self {
        self.htif = Some(htif);
        self
    }

    /// Attaches the finisher device.
    pub fn with_finisher(mut self, finisher: &'static dyn Finisher) -> Self {
        self.finisher = Some(finisher);
        self
    }

    /// Attaches the debug-trigger unit.
    pub fn with_trigger(mut self, trigger: &'static dyn TriggerUnit) -> Self {
        self.trigger = Some(trigger);
        self
    }

    /// Returns the mask of harts enabled on this platform.
    pub fn enabled(&self) -> HartMask {
        self.enabled
    }

    /// Returns one hart's local state.
    pub fn hart(&self, hart: HartId) -> &HartLocal {
        self.harts.slot(hart)
    }

    /// Returns the interrupt controller client.
    pub fn intc(&self) -> &I {
        &self.intc
    }

    pub(crate) fn htif(&self) -> Option<&'static dyn HtifChannel> {
        self.htif
    }

    pub(crate) fn finisher(&self) -> Option<&'static dyn Finisher> {
        self.finisher
    }

    pub(crate) fn trigger(&self) -> Option<&'static dyn TriggerUnit> {
        self.trigger
    }
}
