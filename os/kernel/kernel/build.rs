use kernel_info::memory;
use std::{env, path::PathBuf};

fn main() {
    // Sanity checks (fail fast during build)
    let kernel_base = memory::KERNEL_BASE;
    let phys_load = memory::PHYS_LOAD;
    assert_eq!(
        kernel_base & ((1u32 << 22) - 1),
        phys_load & ((1u32 << 22) - 1),
        "KERNEL_BASE and PHYS_LOAD must share their offset in a 4 MiB page \
         (got {kernel_base:#x} / {phys_load:#x})"
    );
    assert_eq!(
        phys_load & 0xfff,
        0,
        "PHYS_LOAD must be 4 KiB aligned (got {phys_load:#x})"
    );
    assert_eq!(
        kernel_base - phys_load,
        memory::HIGHER_HALF_BASE,
        "the image must be linked into the low-memory direct map"
    );

    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let ld = manifest_dir.join("kernel.ld");
    println!("cargo:rerun-if-changed={}", ld.display());
    println!("cargo:rerun-if-changed=i686-kernel.json");

    // Hosted builds (tests, clippy) link a stub binary with the host linker.
    if env::var("CARGO_CFG_TARGET_OS").as_deref() != Ok("none") {
        return;
    }

    // Linker script
    println!("cargo:rustc-link-arg-bins=-T{}", ld.display());

    // Provide symbols to the linker script
    println!("cargo:rustc-link-arg-bins=--defsym=KERNEL_BASE={kernel_base:#x}");
    println!("cargo:rustc-link-arg-bins=--defsym=PHYS_LOAD={phys_load:#x}");
}
