//! Runs a program on the process-wide arena with best fit as the policy,
//! then shows which hole a new `Box` lands in and what a three way merge
//! does to the arena statistics.

use fitalloc::{FitAlloc, largest_free_block, largest_free_segment, total_free_size};

#[global_allocator]
static ALLOCATOR: FitAlloc = FitAlloc::best_fit();

fn stats(label: &str) {
    println!(
        "{label:<28} total free: {:>6}  largest segment: {:>6}  largest free: {:>6}",
        total_free_size(),
        largest_free_segment(),
        largest_free_block()
    );
}

fn main() {
    // The first print sets up stdout's buffer, keep it out of the holes below.
    stats("start");

    // Three holes of different sizes, kept apart by small live boxes.
    let small = Box::new([1u8; 64]);
    let fence_a = Box::new(0u64);
    let large = Box::new([2u8; 512]);
    let fence_b = Box::new(0u64);
    let medium = Box::new([3u8; 160]);
    let fence_c = Box::new(0u64);

    let holes = [
        ("64 byte hole", small.as_ptr()),
        ("512 byte hole", large.as_ptr()),
        ("160 byte hole", medium.as_ptr()),
    ];

    drop(small);
    drop(large);
    drop(medium);
    stats("three separated holes");

    // Best fit skips the first hole that fits (512) for the tightest one (160).
    let reused = Box::new([4u8; 128]);
    let at = reused.as_ptr();
    match holes.iter().find(|(_, addr)| *addr == at) {
        Some((name, _)) => println!("a 128 byte box reused the {name} at {at:p}"),
        None => println!("a 128 byte box got fresh memory at {at:p}"),
    }
    stats("after reuse");

    // Merge: free the outer neighbours first, then the middle one.
    let left = Box::new([5u8; 96]);
    let middle = Box::new([6u8; 96]);
    let right = Box::new([7u8; 96]);
    let fence_d = Box::new(0u64);

    drop(left);
    drop(right);
    stats("left and right released");

    drop(middle);
    stats("middle released (merged)");

    drop((reused, fence_a, fence_b, fence_c, fence_d));
    stats("end");
}
