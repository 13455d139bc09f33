// SPDX-License-Identifier: MPL-2.0

//! A simulated register set and interrupt controller.
//!
//! The mock models per-hart CSR files, the timer MMIO, a four-way cache tag
//! array behind the cache-maintenance controller registers, and the
//! software-interrupt crossbar, so the coordination logic can be unit-tested
//! without real hardware. `wfi` and the supervisor-switch stub are modeled as
//! panics with recognizable payloads.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use super::{Csr, Finisher, IpiController, PrivRegs, TriggerUnit, NR_CSRS};
use crate::{
    console::{ByteConsole, HtifChannel},
    dcache::{CCTL_L1D_IX_INVAL, CCTL_L1D_IX_RTAG, CCTL_L1D_IX_WB},
    hart::HartId,
    MAX_HARTS,
};

/// Panic payload of a hart parked in the idle-wait loop.
pub(crate) const PARKED: &str = "hart parked in idle-wait";
/// Panic payload of the supervisor-switch stub.
pub(crate) const REDIRECTED: &str = "redirect entry reached";
/// Panic payload of the HTIF power-off channel.
pub(crate) const HTIF_POWEROFF: &str = "htif poweroff";

/// The shared hardware state of a simulated multi-hart board.
pub(crate) struct MockBoard {
    csrs: Vec<[AtomicUsize; NR_CSRS]>,
    timecmp: [AtomicU64; MAX_HARTS],
    mtime: AtomicU64,
    tags: [AtomicU64; 4],
    cctl_ops: Mutex<Vec<(usize, usize)>>,
    fences: [AtomicUsize; MAX_HARTS],
    ifences: [AtomicUsize; MAX_HARTS],
    sfences: [AtomicUsize; MAX_HARTS],
    memory: Mutex<BTreeMap<usize, usize>>,
}

impl MockBoard {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            csrs: (0..MAX_HARTS)
                .map(|_| std::array::from_fn(|_| AtomicUsize::new(0)))
                .collect(),
            timecmp: std::array::from_fn(|_| AtomicU64::new(0)),
            mtime: AtomicU64::new(0),
            tags: std::array::from_fn(|_| AtomicU64::new(0)),
            cctl_ops: Mutex::new(Vec::new()),
            fences: std::array::from_fn(|_| AtomicUsize::new(0)),
            ifences: std::array::from_fn(|_| AtomicUsize::new(0)),
            sfences: std::array::from_fn(|_| AtomicUsize::new(0)),
            memory: Mutex::new(BTreeMap::new()),
        })
    }

    /// Returns the privileged-register context of one hart.
    pub(crate) fn regs(self: &Arc<Self>, hart: HartId) -> MockRegs {
        MockRegs {
            board: Arc::clone(self),
            hart,
        }
    }

    fn csr(&self, hart: HartId, csr: Csr) -> &AtomicUsize {
        &self.csrs[hart.as_usize()][csr as usize]
    }

    pub(crate) fn csr_value(&self, hart: HartId, csr: Csr) -> usize {
        self.csr(hart, csr).load(Ordering::SeqCst)
    }

    pub(crate) fn set_csr(&self, hart: HartId, csr: Csr, value: usize) {
        self.csr(hart, csr).store(value, Ordering::SeqCst);
    }

    pub(crate) fn set_mtime(&self, value: u64) {
        self.mtime.store(value, Ordering::SeqCst);
    }

    pub(crate) fn timecmp(&self, hart: HartId) -> u64 {
        self.timecmp[hart.as_usize()].load(Ordering::SeqCst)
    }

    /// Installs a raw tag into one of the four simulated cache ways.
    pub(crate) fn set_tag(&self, way: usize, tag: u64) {
        self.tags[way].store(tag, Ordering::SeqCst);
    }

    /// Returns the recorded `(command, beginaddr)` maintenance operations.
    pub(crate) fn cctl_ops(&self) -> Vec<(usize, usize)> {
        self.cctl_ops.lock().unwrap().clone()
    }

    pub(crate) fn lower_word(&self, vaddr: usize) -> Option<usize> {
        self.memory.lock().unwrap().get(&vaddr).copied()
    }

    pub(crate) fn sfence_count(&self, hart: HartId) -> usize {
        self.sfences[hart.as_usize()].load(Ordering::SeqCst)
    }

    pub(crate) fn ifence_count(&self, hart: HartId) -> usize {
        self.ifences[hart.as_usize()].load(Ordering::SeqCst)
    }
}

/// One hart's view of the [`MockBoard`].
#[derive(Clone)]
pub(crate) struct MockRegs {
    board: Arc<MockBoard>,
    hart: HartId,
}

impl PrivRegs for MockRegs {
    fn hart_id(&self) -> HartId {
        self.hart
    }

    fn read(&self, csr: Csr) -> usize {
        self.board.csr(self.hart, csr).load(Ordering::SeqCst)
    }

    fn write(&self, csr: Csr, value: usize) {
        self.board.csr(self.hart, csr).store(value, Ordering::SeqCst);

        // The command register drives the simulated maintenance controller.
        if csr == Csr::McctlCommand {
            let begin = self.read(Csr::McctlBeginAddr);
            match value {
                CCTL_L1D_IX_RTAG => {
                    let way = (begin >> 13) & 0b11;
                    let tag = self.board.tags[way].load(Ordering::SeqCst);
                    self.board
                        .csr(self.hart, Csr::McctlData)
                        .store(tag as usize, Ordering::SeqCst);
                }
                CCTL_L1D_IX_WB | CCTL_L1D_IX_INVAL => {
                    self.board.cctl_ops.lock().unwrap().push((value, begin));
                }
                _ => {}
            }
        }
    }

    fn set_bits(&self, csr: Csr, mask: usize) -> usize {
        self.board.csr(self.hart, csr).fetch_or(mask, Ordering::SeqCst)
    }

    fn clear_bits(&self, csr: Csr, mask: usize) -> usize {
        self.board
            .csr(self.hart, csr)
            .fetch_and(!mask, Ordering::SeqCst)
    }

    fn barrier(&self) {
        self.board.fences[self.hart.as_usize()].fetch_add(1, Ordering::SeqCst);
        std::sync::atomic::fence(Ordering::SeqCst);
    }

    fn fence_i(&self) {
        self.board.ifences[self.hart.as_usize()].fetch_add(1, Ordering::SeqCst);
    }

    fn sfence_vma(&self) {
        self.board.sfences[self.hart.as_usize()].fetch_add(1, Ordering::SeqCst);
    }

    fn wait_for_interrupt(&self) {
        panic!("{}", PARKED);
    }

    fn mtime(&self) -> u64 {
        self.board.mtime.load(Ordering::SeqCst)
    }

    fn write_timecmp(&self, when: u64) {
        self.board.timecmp[self.hart.as_usize()].store(when, Ordering::SeqCst);
    }

    fn store_lower_word(&self, vaddr: usize, value: usize) {
        self.board.memory.lock().unwrap().insert(vaddr, value);
    }

    fn redirect_entry(&self) -> ! {
        panic!("{}", REDIRECTED);
    }
}

/// A software-interrupt crossbar with one source per hart.
///
/// Source `h + 1` is dedicated to hart `h`; a source stays pending from post
/// until completion, per the [`IpiController`] contract.
pub(crate) struct MockIpi {
    posted: [AtomicU32; MAX_HARTS],
    in_service: [AtomicU32; MAX_HARTS],
}

impl MockIpi {
    pub(crate) fn new() -> Self {
        Self {
            posted: std::array::from_fn(|_| AtomicU32::new(0)),
            in_service: std::array::from_fn(|_| AtomicU32::new(0)),
        }
    }
}

impl IpiController for MockIpi {
    fn post(&self, target: HartId) {
        let source = target.as_usize() as u32 + 1;
        self.posted[target.as_usize()].fetch_or(1 << source, Ordering::SeqCst);
    }

    fn is_pending(&self, target: HartId) -> bool {
        self.posted[target.as_usize()].load(Ordering::SeqCst) != 0
            || self.in_service[target.as_usize()].load(Ordering::SeqCst) != 0
    }

    fn claim(&self, hart: HartId) -> Option<u32> {
        let posted = &self.posted[hart.as_usize()];
        loop {
            let cur = posted.load(Ordering::SeqCst);
            if cur == 0 {
                return None;
            }
            let source = cur.trailing_zeros();
            let next = cur & !(1 << source);
            if posted
                .compare_exchange(cur, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                self.in_service[hart.as_usize()].fetch_or(1 << source, Ordering::SeqCst);
                return Some(source);
            }
        }
    }

    fn complete(&self, hart: HartId, source: u32) {
        self.in_service[hart.as_usize()].fetch_and(!(1 << source), Ordering::SeqCst);
    }

    fn repost(&self, hart: HartId, mask: u32) {
        self.posted[hart.as_usize()].fetch_or(mask, Ordering::SeqCst);
    }
}

/// Runs a closure expected to die in the simulated hardware (park, redirect
/// stub, HTIF power-off) and returns the panic payload for inspection.
pub(crate) fn unwind_payload(f: impl FnOnce()) -> String {
    let err = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f))
        .expect_err("the operation was expected to diverge");
    if let Some(s) = err.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else {
        String::from("non-string panic payload")
    }
}

/// A finisher that records the exit code it was handed.
pub(crate) struct MockFinisher {
    code: Mutex<Option<u16>>,
}

impl MockFinisher {
    pub(crate) fn new() -> Self {
        Self {
            code: Mutex::new(None),
        }
    }

    pub(crate) fn code(&self) -> Option<u16> {
        *self.code.lock().unwrap()
    }
}

impl Finisher for MockFinisher {
    fn exit(&self, code: u16) {
        *self.code.lock().unwrap() = Some(code);
    }
}

/// An HTIF channel whose power-off path is observable as a panic.
pub(crate) struct MockHtif;

impl ByteConsole for MockHtif {
    fn putchar(&self, _byte: u8) {}

    fn getchar(&self) -> Option<u8> {
        None
    }
}

impl HtifChannel for MockHtif {
    fn poweroff(&self) -> ! {
        panic!("{}", HTIF_POWEROFF);
    }
}

/// A trigger unit recording the last configuration it received.
pub(crate) struct MockTrigger {
    status: isize,
    last: Mutex<Option<(&'static str, usize, usize)>>,
}

impl MockTrigger {
    pub(crate) fn new(status: isize) -> Self {
        Self {
            status,
            last: Mutex::new(None),
        }
    }

    pub(crate) fn last(&self) -> Option<(&'static str, usize, usize)> {
        *self.last.lock().unwrap()
    }
}

impl TriggerUnit for MockTrigger {
    fn set_icount(&self, data: usize, enables: usize) -> isize {
        *self.last.lock().unwrap() = Some(("icount", data, enables));
        self.status
    }

    fn set_itrigger(&self, data: usize, enables: usize) -> isize {
        *self.last.lock().unwrap() = Some(("itrigger", data, enables));
        self.status
    }

    fn set_etrigger(&self, data: usize, enables: usize) -> isize {
        *self.last.lock().unwrap() = Some(("etrigger", data, enables));
        self.status
    }
}
