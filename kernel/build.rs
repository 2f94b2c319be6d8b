use std::{env, path::PathBuf};

fn main() {
    let target = env::var("TARGET").expect("TARGET not set");
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR not set");
    let kernel_dir = PathBuf::from(manifest_dir);

    // The bare-metal image needs the fixed QEMU-virt load layout; host builds
    // (unit tests) link normally.
    if target.contains("riscv") {
        let linker_script = kernel_dir.join("src/arch/riscv/link.ld");
        println!("cargo:rustc-link-arg=-T{}", linker_script.display());
    }

    println!("cargo:rerun-if-changed=src/arch/riscv/link.ld");
}
