// Author: Lukas Bower
// Purpose: Physical address space shared by the host HAL and the simulated NIC.

//! Host physical memory.
//!
//! Pages handed out by [`HostHal`](super::HostHal) are registered here by
//! their fake physical address so the simulated device can follow
//! descriptor addresses the way bus-master DMA would. The map holds weak
//! references only: registering a page never pins it.

use std::collections::BTreeMap;
use std::sync::Arc;

use spin::Mutex;

use super::HostError;
use crate::hal::{PageRef, WeakPageRef};

/// DMA-visible address space.
#[derive(Clone, Debug, Default)]
pub struct PhysMemory {
    pages: Arc<Mutex<BTreeMap<u64, WeakPageRef>>>,
}

impl PhysMemory {
    /// Empty address space.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `page` reachable at its physical address.
    pub fn register(&self, page: &PageRef) {
        self.pages.lock().insert(page.paddr(), page.downgrade());
    }

    /// Number of registered pages that are still alive.
    pub fn live_pages(&self) -> usize {
        self.pages
            .lock()
            .values()
            .filter(|page| page.upgrade().is_some())
            .count()
    }

    /// Page containing `paddr` and the offset of `paddr` within it.
    pub fn resolve(&self, paddr: u64) -> Result<(PageRef, usize), HostError> {
        let pages = self.pages.lock();
        let (base, weak) = pages
            .range(..=paddr)
            .next_back()
            .ok_or(HostError::Unmapped { paddr })?;
        let page = weak.upgrade().ok_or(HostError::Unmapped { paddr })?;
        let offset = (paddr - base) as usize;
        if offset >= page.len() {
            return Err(HostError::Unmapped { paddr });
        }
        Ok((page, offset))
    }

    fn span(&self, paddr: u64, len: usize) -> Result<(PageRef, usize), HostError> {
        let (page, offset) = self.resolve(paddr)?;
        if offset + len > page.len() {
            return Err(HostError::CrossesPage { paddr, len });
        }
        Ok((page, offset))
    }

    /// Device read of `dst.len()` bytes at `paddr`.
    pub fn read(&self, paddr: u64, dst: &mut [u8]) -> Result<(), HostError> {
        let (page, offset) = self.span(paddr, dst.len())?;
        page.read_bytes(offset, dst);
        Ok(())
    }

    /// Device write of `src` at `paddr`.
    pub fn write(&self, paddr: u64, src: &[u8]) -> Result<(), HostError> {
        let (page, offset) = self.span(paddr, src.len())?;
        page.write_bytes(offset, src);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use cohesix_net_constants::PAGE_SIZE;

    use super::*;
    use crate::hal::DmaFrame;

    fn page(paddr: u64) -> PageRef {
        PageRef::new(DmaFrame::alloc_zeroed(paddr, PAGE_SIZE).unwrap())
    }

    #[test]
    fn resolves_inside_registered_pages() {
        let memory = PhysMemory::new();
        let a = page(0x10_0000);
        let b = page(0x10_1000);
        memory.register(&a);
        memory.register(&b);

        memory.write(0x10_1010, b"dma").unwrap();
        let mut out = [0u8; 3];
        b.read_bytes(0x10, &mut out);
        assert_eq!(&out, b"dma");

        let (found, offset) = memory.resolve(0x10_0fff).unwrap();
        assert!(found.same_page(&a));
        assert_eq!(offset, 0xfff);
        drop(found);
        assert!(a.is_exclusive());
    }

    #[test]
    fn rejects_unmapped_and_dead_pages() {
        let memory = PhysMemory::new();
        assert!(matches!(
            memory.resolve(0x5000),
            Err(HostError::Unmapped { .. })
        ));
        let gone = page(0x20_0000);
        memory.register(&gone);
        drop(gone);
        assert_eq!(memory.live_pages(), 0);
        assert!(memory.read(0x20_0000, &mut [0u8; 4]).is_err());
    }

    #[test]
    fn rejects_accesses_crossing_a_page() {
        let memory = PhysMemory::new();
        let a = page(0x30_0000);
        memory.register(&a);
        assert!(matches!(
            memory.write(0x30_0ffe, &[1, 2, 3, 4]),
            Err(HostError::CrossesPage { .. })
        ));
    }
}
