use which::which;

/// Rebuild the programs when the linker changes. bpf-linker is located by
/// rustc through PATH, so a missing linker is reported by the link step.
fn main() {
    if let Ok(bpf_linker) = which("bpf-linker") {
        println!("cargo:rerun-if-changed={}", bpf_linker.display());
    }
}
