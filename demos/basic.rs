use fitalloc::{Heap, Policy, Reserved};

fn log_alloc(addr: *mut u8, size: usize) {
    println!("Requested {size} bytes of memory");
    println!("Received this address: {addr:?}");
}

fn print_stats(heap: &Heap<Reserved>) {
    println!(
        "total free: {} bytes, largest segment: {} bytes",
        heap.total_free_size(),
        heap.largest_free_segment()
    );
}

fn main() {
    let mut heap = Heap::new(Reserved::with_capacity(1 << 16));

    let sizes = [8, 48, 24];
    let mut addrs = Vec::new();

    for size in sizes {
        let addr = heap.allocate(size, Policy::FirstFit).unwrap().as_ptr();
        log_alloc(addr, size);
        addrs.push(addr);

        // Keep the free blocks apart so they don't merge.
        heap.allocate(8, Policy::FirstFit).unwrap();
    }

    unsafe {
        for addr in &addrs {
            heap.release(*addr);
        }
    }
    print_stats(&heap);

    let first = heap.allocate(16, Policy::FirstFit).unwrap().as_ptr();
    println!("first fit for 16 bytes reused {first:?} (48 byte block was at {:?})", addrs[1]);

    let best = heap.allocate(16, Policy::BestFit).unwrap().as_ptr();
    println!("best fit for 16 bytes reused {best:?} (24 byte block was at {:?})", addrs[2]);

    print_stats(&heap);

    for block in heap.blocks() {
        println!("{:#x}: {} bytes, free: {}", block.addr, block.size, block.is_free);
    }
}
