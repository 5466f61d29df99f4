//! Build script: embeds the git hash and checks the toolchain whisper-rs needs.
//!
//! whisper-rs-sys builds whisper.cpp with cmake; a missing cmake produces a
//! long, confusing error deep in the dependency build, so we warn up front.

use std::process::Command;

fn main() {
    // Embed git short hash for version string
    if let Ok(output) = Command::new("git")
        .args(["rev-parse", "--short=7", "HEAD"])
        .output()
        && output.status.success()
    {
        let hash = String::from_utf8_lossy(&output.stdout).trim().to_string();
        println!("cargo:rustc-env=GIT_HASH={}", hash);
    }
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads/");

    if cfg!(feature = "whisper") {
        check_cmake();
    }
    if cfg!(feature = "cuda") {
        check_tool("nvcc", "CUDA toolkit (nvcc)", "sudo apt install nvidia-cuda-toolkit");
    }
    if cfg!(feature = "vulkan") {
        check_tool("glslc", "Vulkan shader compiler (glslc)", "sudo apt install glslc libvulkan-dev");
    }
}

fn check_cmake() {
    match Command::new("cmake").arg("--version").output() {
        Ok(out) if out.status.success() => {
            let text = String::from_utf8_lossy(&out.stdout);
            if let Some(version) = parse_cmake_version(&text) {
                println!("cargo::warning=whisper backend: building with cmake {}", version);
            }
        }
        _ => {
            println!("cargo::warning=");
            println!("cargo::warning=The `whisper` feature needs cmake to build whisper.cpp.");
            println!("cargo::warning=Install it with: sudo apt install cmake");
            println!("cargo::warning=");
        }
    }
}

fn check_tool(binary: &str, label: &str, hint: &str) {
    let found = Command::new(binary)
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false);
    if !found {
        println!("cargo::warning={} not found; install with: {}", label, hint);
    }
}

/// Parse "cmake version 3.28.3" into "3.28.3".
fn parse_cmake_version(text: &str) -> Option<&str> {
    text.lines()
        .next()?
        .strip_prefix("cmake version ")
        .map(str::trim)
}
